use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Tree maintenance.
    Updater,
    /// Refund pool flushes.
    RewardController,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Capability::Updater => write!(f, "updater"),
            Capability::RewardController => write!(f, "reward controller"),
        }
    }
}

pub trait Authorizer<T>: Send + Sync {
    fn is_authorized(&self, caller: &T, capability: Capability) -> bool;
}

impl<T, F> Authorizer<T> for F
where
    F: Fn(&T, Capability) -> bool + Send + Sync,
{
    fn is_authorized(&self, caller: &T, capability: Capability) -> bool {
        self(caller, capability)
    }
}
