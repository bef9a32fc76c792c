use thiserror::Error;

/// Coarse classification shared by every error in the workspace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    State,
    Authorization,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "Validation"),
            ErrorKind::NotFound => write!(f, "Not found"),
            ErrorKind::State => write!(f, "State"),
            ErrorKind::Authorization => write!(f, "Authorization"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("cluster {0} is already in the tree")]
    AlreadyPresent(String),

    #[error("cluster {0} is not in the tree")]
    NotPresent(String),

    #[error("the zero identity is reserved and cannot be stored")]
    ZeroIdentity,

    #[error("batch has {addresses} addresses but {weights} weights")]
    LengthMismatch { addresses: usize, weights: usize },

    #[error("cluster {0} appears more than once in the batch")]
    DuplicateInBatch(String),

    #[error("total weight would overflow")]
    WeightOverflow,

    #[error("index {index} is outside 1..={len}")]
    IndexOutOfRange { index: usize, len: usize },
}

impl TreeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TreeError::NotPresent(_) | TreeError::IndexOutOfRange { .. } => ErrorKind::NotFound,
            TreeError::AlreadyPresent(_)
            | TreeError::ZeroIdentity
            | TreeError::LengthMismatch { .. }
            | TreeError::DuplicateInBatch(_)
            | TreeError::WeightOverflow => ErrorKind::Validation,
        }
    }
}
