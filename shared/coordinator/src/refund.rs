//! Refunds for callers of committee selection.
//!
//! A refund is `(fixed_overhead + per_winner * winners + data_cost) * gas_price`,
//! paid from a pool that anyone can fund. An underfunded pool pays what it
//! has; that is never an error.

use std::collections::BTreeMap;

use cluster_selector_core::ClusterIdentity;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{ClusterSelector, SelectionError};

/// Host-specific charge for the bytes a transaction carries, in gas.
pub trait CostModel: Send + Sync {
    fn data_cost(&self, tx_size: u64) -> u64;
}

/// Hosts without a data-availability charge.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDataCost;

impl CostModel for NoDataCost {
    fn data_cost(&self, _tx_size: u64) -> u64 {
        0
    }
}

/// Rollup-style calldata pricing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CalldataCost {
    pub gas_per_byte: u64,
    pub fixed_gas: u64,
}

impl CostModel for CalldataCost {
    fn data_cost(&self, tx_size: u64) -> u64 {
        self.fixed_gas
            .saturating_add(self.gas_per_byte.saturating_mul(tx_size))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundConfig {
    /// Gas charged once per selection regardless of committee size.
    pub fixed_overhead: u64,
    /// Gas charged per selected cluster.
    pub per_winner: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefundReceipt<T> {
    pub epoch: u64,
    pub winners: Vec<T>,
    pub computed: u128,
    pub paid: u128,
}

pub struct GasRefunder {
    config: RefundConfig,
    cost_model: Box<dyn CostModel>,
}

impl GasRefunder {
    pub fn new(config: RefundConfig, cost_model: Box<dyn CostModel>) -> Self {
        Self { config, cost_model }
    }

    pub fn config(&self) -> RefundConfig {
        self.config
    }

    pub fn refund_for(&self, winners: usize, tx_size: u64, gas_price: u128) -> u128 {
        let gas = self
            .config
            .fixed_overhead
            .saturating_add(self.config.per_winner.saturating_mul(winners as u64))
            .saturating_add(self.cost_model.data_cost(tx_size));
        u128::from(gas).saturating_mul(gas_price)
    }

    /// Runs [`ClusterSelector::select_clusters`] and refunds `caller` from
    /// `pool`. Nothing is paid when the selection fails.
    #[allow(clippy::too_many_arguments)]
    pub fn select_and_refund<T: ClusterIdentity, R: RngCore + ?Sized>(
        &self,
        selector: &mut ClusterSelector<T>,
        pool: &mut RefundPool<T>,
        caller: T,
        unix_timestamp: u64,
        rng: &mut R,
        gas_price: u128,
        tx_size: u64,
    ) -> Result<RefundReceipt<T>, SelectionError> {
        let epoch = selector.current_epoch(unix_timestamp)?;
        let winners = selector.select_clusters(unix_timestamp, rng)?;

        let computed = self.refund_for(winners.len(), tx_size, gas_price);
        let paid = pool.pay(caller, computed);
        if paid < computed {
            warn!(
                epoch,
                computed,
                paid,
                "Refund pool is short, truncated refund"
            );
        }

        Ok(RefundReceipt {
            epoch,
            winners,
            computed,
            paid,
        })
    }
}

impl std::fmt::Debug for GasRefunder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GasRefunder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefundPool<T> {
    balance: u128,
    paid: BTreeMap<T, u128>,
}

impl<T: ClusterIdentity> RefundPool<T> {
    pub fn new(balance: u128, paid: BTreeMap<T, u128>) -> Self {
        Self { balance, paid }
    }

    pub fn balance(&self) -> u128 {
        self.balance
    }

    /// Total refunds paid to `caller` so far.
    pub fn paid_to(&self, caller: &T) -> u128 {
        self.paid.get(caller).copied().unwrap_or_default()
    }

    pub fn paid(&self) -> &BTreeMap<T, u128> {
        &self.paid
    }

    pub fn fund(&mut self, amount: u128) -> u128 {
        self.balance = self.balance.saturating_add(amount);
        self.balance
    }

    /// Pays `min(amount, balance)` and returns what was paid.
    pub fn pay(&mut self, to: T, amount: u128) -> u128 {
        let paid = amount.min(self.balance);
        if paid > 0 {
            self.balance -= paid;
            let total = self.paid.entry(to).or_default();
            *total = total.saturating_add(paid);
        }
        paid
    }

    /// Empties the pool, returning the amount moved to `to`.
    pub fn flush(&mut self, to: T) -> u128 {
        let amount = std::mem::take(&mut self.balance);
        info!(to = %to, amount, "Flushed refund pool");
        amount
    }
}
