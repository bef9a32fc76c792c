use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use cluster_selector_coordinator::{
    RefundReceipt, SelectionError, SelectorService, SelectorSnapshot, ServiceError,
};
use cluster_selector_core::{epoch_seed, Address, Weight};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{MembersFile, ServerConfig};
use crate::roles::RoleTable;

pub const STATE_FILE: &str = "state.json";
const STATE_TMP_FILE: &str = "state.json.tmp";

type Reply<T> = oneshot::Sender<Result<T, ServiceError>>;

enum Command {
    Upsert {
        caller: Address,
        address: Address,
        weight: Weight,
        respond_to: Reply<()>,
    },
    UpsertMultiple {
        caller: Address,
        addresses: Vec<Address>,
        weights: Vec<Weight>,
        respond_to: Reply<()>,
    },
    DeleteIfPresent {
        caller: Address,
        address: Address,
        respond_to: Reply<bool>,
    },
    SelectClusters {
        caller: Address,
        gas_price: u128,
        tx_size: u64,
        respond_to: Reply<RefundReceipt<Address>>,
    },
    GetClusters {
        epoch: u64,
        respond_to: Reply<Vec<Address>>,
    },
    UpdateMissingClusters {
        epoch: u64,
        respond_to: Reply<Vec<Address>>,
    },
    CurrentEpoch {
        respond_to: Reply<u64>,
    },
    NodesInTree {
        respond_to: oneshot::Sender<usize>,
    },
    Fund {
        amount: u128,
        respond_to: oneshot::Sender<u128>,
    },
    FlushRefunds {
        caller: Address,
        to: Address,
        respond_to: Reply<u128>,
    },
    Snapshot {
        respond_to: oneshot::Sender<SelectorSnapshot<Address>>,
    },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HandleError {
    #[error("selector task has stopped")]
    ActorGone,
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// Cloneable front door to a running [`App`]. Every call is serialized
/// through the app's single mailbox.
#[derive(Clone, Debug)]
pub struct SelectorHandle {
    tx: mpsc::Sender<Command>,
}

impl SelectorHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, HandleError> {
        let (send, recv) = oneshot::channel();
        self.tx
            .send(make(send))
            .await
            .map_err(|_| HandleError::ActorGone)?;
        recv.await.map_err(|_| HandleError::ActorGone)
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T, HandleError> {
        Ok(self.request(make).await??)
    }

    pub async fn upsert(
        &self,
        caller: Address,
        address: Address,
        weight: Weight,
    ) -> Result<(), HandleError> {
        self.call(|respond_to| Command::Upsert {
            caller,
            address,
            weight,
            respond_to,
        })
        .await
    }

    pub async fn upsert_multiple(
        &self,
        caller: Address,
        addresses: Vec<Address>,
        weights: Vec<Weight>,
    ) -> Result<(), HandleError> {
        self.call(|respond_to| Command::UpsertMultiple {
            caller,
            addresses,
            weights,
            respond_to,
        })
        .await
    }

    pub async fn delete_if_present(
        &self,
        caller: Address,
        address: Address,
    ) -> Result<bool, HandleError> {
        self.call(|respond_to| Command::DeleteIfPresent {
            caller,
            address,
            respond_to,
        })
        .await
    }

    pub async fn select_clusters(
        &self,
        caller: Address,
        gas_price: u128,
        tx_size: u64,
    ) -> Result<RefundReceipt<Address>, HandleError> {
        self.call(|respond_to| Command::SelectClusters {
            caller,
            gas_price,
            tx_size,
            respond_to,
        })
        .await
    }

    pub async fn get_clusters(&self, epoch: u64) -> Result<Vec<Address>, HandleError> {
        self.call(|respond_to| Command::GetClusters { epoch, respond_to })
            .await
    }

    pub async fn update_missing_clusters(&self, epoch: u64) -> Result<Vec<Address>, HandleError> {
        self.call(|respond_to| Command::UpdateMissingClusters { epoch, respond_to })
            .await
    }

    pub async fn current_epoch(&self) -> Result<u64, HandleError> {
        self.call(|respond_to| Command::CurrentEpoch { respond_to })
            .await
    }

    pub async fn nodes_in_tree(&self) -> Result<usize, HandleError> {
        self.request(|respond_to| Command::NodesInTree { respond_to })
            .await
    }

    pub async fn fund(&self, amount: u128) -> Result<u128, HandleError> {
        self.request(|respond_to| Command::Fund { amount, respond_to })
            .await
    }

    pub async fn flush_refunds(&self, caller: Address, to: Address) -> Result<u128, HandleError> {
        self.call(|respond_to| Command::FlushRefunds {
            caller,
            to,
            respond_to,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<SelectorSnapshot<Address>, HandleError> {
        self.request(|respond_to| Command::Snapshot { respond_to })
            .await
    }
}

pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

pub struct App {
    cancel: CancellationToken,
    service: SelectorService<Address, RoleTable>,
    rx: mpsc::Receiver<Command>,
    tick_interval: Option<Interval>,
    operator: Address,
    seed: Option<[u8; 32]>,
    gas_price: u128,
    tx_size: u64,
    save_state_dir: Option<PathBuf>,
    now: Clock,
}

impl App {
    /// Builds the service, restoring `save_state_dir/state.json` when it
    /// exists, then applies `members` as the operator. A `tick` of `None`
    /// disables automatic selection.
    pub fn new(
        cancel: CancellationToken,
        config: ServerConfig,
        members: Option<MembersFile>,
        save_state_dir: Option<PathBuf>,
        tick: Option<Duration>,
    ) -> Result<(Self, SelectorHandle)> {
        let ServerConfig {
            selector: selector_config,
            roles,
            operator,
            gas_price,
            tx_size,
        } = config;

        let saved = match &save_state_dir {
            Some(dir) => load_state(&dir.join(STATE_FILE))?,
            None => None,
        };
        let mut service = match &saved {
            Some(snapshot) => {
                info!(
                    members = snapshot.members.len(),
                    epochs = snapshot.results.len(),
                    "Restored saved state"
                );
                selector_config.restore_service(roles, snapshot)?
            }
            None => selector_config.build_service(roles)?,
        };

        if let Some(members) = members {
            let (addresses, weights) = members.split();
            service
                .upsert_multiple(&operator, &addresses, &weights)
                .context("failed to apply members file")?;
            info!(count = addresses.len(), "Applied members file");
        }

        let tick_interval = tick.map(|period| {
            let mut tick_interval = interval(period);
            tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tick_interval
        });

        let (tx, rx) = mpsc::channel(64);
        let app = Self {
            cancel,
            service,
            rx,
            tick_interval,
            operator,
            seed: selector_config.seed_bytes()?,
            gas_price: u128::from(gas_price),
            tx_size,
            save_state_dir,
            now: Arc::new(get_timestamp),
        };
        app.save_state();
        Ok((app, SelectorHandle { tx }))
    }

    /// Replaces the wall clock, for driving epochs deterministically.
    pub fn with_clock(mut self, now: Clock) -> Self {
        self.now = now;
        self
    }

    pub async fn run(mut self) -> Result<()> {
        loop {
            select! {
                _ = self.cancel.cancelled() => {
                    break;
                }
                Some(command) = self.rx.recv() => {
                    self.on_command(command);
                }
                _ = next_tick(&mut self.tick_interval) => {
                    self.on_tick();
                }
                else => break,
            }
        }
        info!("Selector server stopped");
        Ok(())
    }

    fn on_command(&mut self, command: Command) {
        let now = (self.now)();
        let changed = match command {
            Command::Upsert {
                caller,
                address,
                weight,
                respond_to,
            } => reply(respond_to, self.service.upsert(&caller, address, weight)),
            Command::UpsertMultiple {
                caller,
                addresses,
                weights,
                respond_to,
            } => reply(
                respond_to,
                self.service.upsert_multiple(&caller, &addresses, &weights),
            ),
            Command::DeleteIfPresent {
                caller,
                address,
                respond_to,
            } => reply(respond_to, self.service.delete_if_present(&caller, address)),
            Command::SelectClusters {
                caller,
                gas_price,
                tx_size,
                respond_to,
            } => {
                let result = self.select(caller, now, gas_price, tx_size);
                reply(respond_to, result)
            }
            Command::GetClusters { epoch, respond_to } => {
                let _ = respond_to.send(self.service.get_clusters(epoch));
                false
            }
            Command::UpdateMissingClusters { epoch, respond_to } => reply(
                respond_to,
                self.service.update_missing_clusters(epoch, now),
            ),
            Command::CurrentEpoch { respond_to } => {
                let _ = respond_to.send(self.service.current_epoch(now).map_err(Into::into));
                false
            }
            Command::NodesInTree { respond_to } => {
                let _ = respond_to.send(self.service.nodes_in_tree());
                false
            }
            Command::Fund { amount, respond_to } => {
                let _ = respond_to.send(self.service.fund(amount));
                true
            }
            Command::FlushRefunds {
                caller,
                to,
                respond_to,
            } => reply(respond_to, self.service.flush_refunds(&caller, to)),
            Command::Snapshot { respond_to } => {
                let _ = respond_to.send(self.service.snapshot());
                false
            }
        };
        if changed {
            self.save_state();
        }
    }

    fn on_tick(&mut self) {
        if self.service.nodes_in_tree() == 0 {
            return;
        }
        let now = (self.now)();
        let epoch = match self.service.current_epoch(now) {
            Ok(epoch) => epoch,
            Err(SelectionError::EpochNotStarted { .. }) => return,
            Err(err) => {
                warn!("Selector tick error: {err}");
                return;
            }
        };
        if self.service.selector().has_selection(epoch) {
            return;
        }
        match self.select(self.operator, now, self.gas_price, self.tx_size) {
            Ok(receipt) => {
                info!(
                    epoch = receipt.epoch,
                    winners = receipt.winners.len(),
                    refund = receipt.paid,
                    "Automatic selection"
                );
                self.save_state();
            }
            Err(err) => warn!(epoch, "Automatic selection failed: {err}"),
        }
    }

    fn select(
        &mut self,
        caller: Address,
        now: u64,
        gas_price: u128,
        tx_size: u64,
    ) -> Result<RefundReceipt<Address>, ServiceError> {
        let epoch = self.service.current_epoch(now)?;
        let mut rng = match &self.seed {
            Some(seed) => ChaCha8Rng::from_seed(epoch_seed(seed, epoch)),
            None => ChaCha8Rng::from_seed(rand::thread_rng().gen()),
        };
        self.service
            .select_clusters(&caller, now, &mut rng, gas_price, tx_size)
    }

    fn save_state(&self) {
        let Some(save_state_dir) = &self.save_state_dir else {
            return;
        };
        match serde_json::to_string_pretty(&self.service.snapshot()) {
            Ok(json) => {
                let path = save_state_dir.join(STATE_FILE);
                debug!("Saving state to {path:?}");
                if let Err(err) = write_replacing(save_state_dir, &path, json.as_bytes()) {
                    tracing::error!("Error saving state to {path:?}: {err}");
                }
            }
            Err(err) => tracing::error!("Error serializing state: {err}"),
        }
    }
}

/// Sends `result` and reports whether it was a successful mutation.
fn reply<T>(respond_to: Reply<T>, result: Result<T, ServiceError>) -> bool {
    let ok = result.is_ok();
    let _ = respond_to.send(result);
    ok
}

/// Writes beside `path` and renames over it, so a crash leaves either the
/// old or the new contents.
fn write_replacing(dir: &Path, path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let tmp = dir.join(STATE_TMP_FILE);
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

async fn next_tick(tick_interval: &mut Option<Interval>) {
    match tick_interval {
        Some(tick_interval) => {
            tick_interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn load_state(path: &Path) -> Result<Option<SelectorSnapshot<Address>>> {
    if !path.exists() {
        return Ok(None);
    }
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read saved state {path:?}"))?;
    let snapshot = serde_json::from_str(&json)
        .with_context(|| format!("failed to parse saved state {path:?}"))?;
    Ok(Some(snapshot))
}

fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
