use std::collections::BTreeMap;

use cluster_selector_core::{ClusterIdentity, Weight};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Persistable state of a selector service. Members are stored in tree
/// index order so a restore reproduces the same indices.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(bound = "T: ClusterIdentity + DeserializeOwned")]
pub struct SelectorSnapshot<T> {
    pub members: Vec<(T, Weight)>,
    pub results: BTreeMap<u64, Vec<T>>,
    #[serde(default)]
    pub last_updated_epoch: u64,
    #[serde(default)]
    pub refund_balance: u128,
    #[serde(default)]
    pub paid: BTreeMap<T, u128>,
}
