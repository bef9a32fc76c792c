use cluster_selector_core::ClusterIdentity;
use serde::{Deserialize, Serialize};

use crate::{
    Authorizer, CalldataCost, ClusterSelector, ConfigError, CostModel, EpochClock, GasRefunder,
    NoDataCost, RefundConfig, RefundPool, SelectionError, SelectorService, SelectorSnapshot,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CostModelConfig {
    #[default]
    None,
    Calldata {
        gas_per_byte: u64,
        #[serde(default)]
        fixed_gas: u64,
    },
}

impl CostModelConfig {
    pub fn build(&self) -> Box<dyn CostModel> {
        match *self {
            CostModelConfig::None => Box::new(NoDataCost),
            CostModelConfig::Calldata {
                gas_per_byte,
                fixed_gas,
            } => Box::new(CalldataCost {
                gas_per_byte,
                fixed_gas,
            }),
        }
    }
}

/// Deployment parameters. These are fixed for the life of a process;
/// changing them means editing the file and restarting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorConfig {
    pub start_time: u64,
    pub epoch_length: u64,
    pub committee_size: usize,

    #[serde(default)]
    pub refund: RefundConfig,
    #[serde(default)]
    pub cost_model: CostModelConfig,

    /// Hex-encoded 32 byte seed for the per-epoch draw.
    #[serde(default)]
    pub seed: Option<String>,
}

impl SelectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        EpochClock::new(self.start_time, self.epoch_length)?;
        if self.committee_size == 0 {
            return Err(ConfigError::ZeroCommitteeSize);
        }
        self.seed_bytes()?;
        Ok(())
    }

    pub fn clock(&self) -> Result<EpochClock, ConfigError> {
        EpochClock::new(self.start_time, self.epoch_length)
    }

    pub fn seed_bytes(&self) -> Result<Option<[u8; 32]>, ConfigError> {
        let Some(seed) = &self.seed else {
            return Ok(None);
        };
        let hex = seed.strip_prefix("0x").unwrap_or(seed);
        let bytes = data_encoding::HEXLOWER_PERMISSIVE
            .decode(hex.as_bytes())
            .map_err(|e| ConfigError::BadSeed(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| ConfigError::BadSeed(format!("got {} bytes", b.len())))?;
        Ok(Some(bytes))
    }

    pub fn build_service<T: ClusterIdentity, A: Authorizer<T>>(
        &self,
        authorizer: A,
    ) -> Result<SelectorService<T, A>, ConfigError> {
        self.validate()?;
        Ok(SelectorService::new(
            ClusterSelector::new(self.clock()?, self.committee_size),
            GasRefunder::new(self.refund, self.cost_model.build()),
            authorizer,
        ))
    }

    /// Rebuilds a service from a saved snapshot under this configuration.
    pub fn restore_service<T: ClusterIdentity, A: Authorizer<T>>(
        &self,
        authorizer: A,
        snapshot: &SelectorSnapshot<T>,
    ) -> Result<SelectorService<T, A>, RestoreError> {
        self.validate()?;
        let selector = ClusterSelector::from_snapshot(self.clock()?, self.committee_size, snapshot)?;
        let pool = RefundPool::new(snapshot.refund_balance, snapshot.paid.clone());
        Ok(SelectorService::new(
            selector,
            GasRefunder::new(self.refund, self.cost_model.build()),
            authorizer,
        )
        .with_pool(pool))
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RestoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("snapshot is inconsistent: {0}")]
    Snapshot(#[from] SelectionError),
}
