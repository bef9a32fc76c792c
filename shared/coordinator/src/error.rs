use cluster_selector_core::{ErrorKind, TreeError};
use thiserror::Error;

use crate::Capability;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("timestamp {now} is before the first epoch starts at {start_time}")]
    EpochNotStarted { now: u64, start_time: u64 },

    #[error("no clusters available to select")]
    NoClusterSelected,

    #[error("epoch {0} already has a selection")]
    AlreadySelected(u64),

    #[error("epoch {epoch} is after the current epoch {current}")]
    FutureEpoch { epoch: u64, current: u64 },

    #[error("no selection exists at or before epoch {0}")]
    NoPriorSelection(u64),
}

impl SelectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SelectionError::Tree(err) => err.kind(),
            _ => ErrorKind::State,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error("{caller} lacks the {capability} capability")]
    Unauthorized {
        caller: String,
        capability: Capability,
    },

    #[error("refunds cannot be flushed to the zero identity")]
    ZeroRecipient,
}

impl From<TreeError> for ServiceError {
    fn from(value: TreeError) -> Self {
        ServiceError::Selection(value.into())
    }
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Selection(err) => err.kind(),
            ServiceError::Unauthorized { .. } => ErrorKind::Authorization,
            ServiceError::ZeroRecipient => ErrorKind::Validation,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("epoch_length must be greater than zero")]
    ZeroEpochLength,

    #[error("committee_size must be greater than zero")]
    ZeroCommitteeSize,

    #[error("seed must be 32 bytes of hex: {0}")]
    BadSeed(String),
}
