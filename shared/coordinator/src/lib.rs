mod cluster_selector;
mod config;
mod epoch;
mod error;
mod refund;
mod service;
mod snapshot;
mod traits;

pub use cluster_selector::ClusterSelector;
pub use config::{CostModelConfig, RestoreError, SelectorConfig};
pub use epoch::EpochClock;
pub use error::{ConfigError, SelectionError, ServiceError};
pub use refund::{
    CalldataCost, CostModel, GasRefunder, NoDataCost, RefundConfig, RefundPool, RefundReceipt,
};
pub use service::SelectorService;
pub use snapshot::SelectorSnapshot;
pub use traits::{Authorizer, Capability};
