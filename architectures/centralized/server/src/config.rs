use std::path::Path;

use anyhow::{bail, Context, Result};
use cluster_selector_coordinator::SelectorConfig;
use cluster_selector_core::{Address, ClusterIdentity, Weight};
use serde::{Deserialize, Serialize};

use crate::roles::RoleTable;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(flatten)]
    pub selector: SelectorConfig,

    #[serde(default)]
    pub roles: RoleTable,

    /// Identity the server acts as for startup membership and automatic
    /// selection.
    pub operator: Address,

    /// Gas price used to refund the operator's automatic selections.
    #[serde(default)]
    pub gas_price: u64,
    #[serde(default)]
    pub tx_size: u64,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        self.selector.validate()?;
        if self.operator.is_zero() {
            bail!("operator must not be the zero address");
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembersFile {
    #[serde(default)]
    pub clusters: Vec<ClusterEntry>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterEntry {
    pub address: Address,
    pub weight: u64,
}

impl MembersFile {
    pub fn split(&self) -> (Vec<Address>, Vec<Weight>) {
        self.clusters
            .iter()
            .map(|c| (c.address, Weight::from(c.weight)))
            .unzip()
    }
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {what} toml file {path:?}"))?;
    toml::from_str(&contents).with_context(|| format!("failed to parse {what} toml file {path:?}"))
}

pub fn load_server_config(path: &Path) -> Result<ServerConfig> {
    let config: ServerConfig = read_toml(path, "selector config")?;
    config
        .validate()
        .with_context(|| format!("invalid selector config {path:?}"))?;
    Ok(config)
}

pub fn load_members(path: &Path) -> Result<MembersFile> {
    read_toml(path, "members")
}
