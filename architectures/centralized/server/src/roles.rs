use std::collections::BTreeSet;

use cluster_selector_coordinator::{Authorizer, Capability};
use cluster_selector_core::Address;
use serde::{Deserialize, Serialize};

/// Config-driven role assignments, read from the `[roles]` table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleTable {
    #[serde(default)]
    pub updaters: BTreeSet<Address>,
    #[serde(default)]
    pub reward_controllers: BTreeSet<Address>,
}

impl Authorizer<Address> for RoleTable {
    fn is_authorized(&self, caller: &Address, capability: Capability) -> bool {
        match capability {
            Capability::Updater => self.updaters.contains(caller),
            Capability::RewardController => self.reward_controllers.contains(caller),
        }
    }
}
