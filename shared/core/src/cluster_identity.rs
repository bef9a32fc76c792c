use std::{
    fmt::{Debug, Display},
    hash::Hash,
    str::FromStr,
};

use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Anything that can key a cluster in the selection tree.
///
/// `Default` must produce the zero identity, which the tree reserves as the
/// "absent" sentinel and never stores.
pub trait ClusterIdentity:
    Display
    + Copy
    + Debug
    + PartialEq
    + Eq
    + Hash
    + Ord
    + Default
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

pub const ADDRESS_LEN: usize = 20;

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; ADDRESS_LEN]);

impl Address {
    pub const ZERO: Address = Address([0u8; ADDRESS_LEN]);

    /// Address whose last eight bytes hold `value` big-endian.
    pub fn from_low_u64_be(value: u64) -> Self {
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes[ADDRESS_LEN - 8..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }
}

impl ClusterIdentity for Address {}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; ADDRESS_LEN]> for Address {
    fn from(value: [u8; ADDRESS_LEN]) -> Self {
        Self(value)
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", data_encoding::HEXLOWER.encode(&self.0))
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseAddressError {
    #[error("address is empty")]
    MissingHex,
    #[error("address must be 20 bytes, got {0}")]
    BadLength(usize),
    #[error("address is not valid hex")]
    BadHex,
}

impl FromStr for Address {
    type Err = ParseAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.strip_prefix("0x").unwrap_or(s);
        if hex.is_empty() {
            return Err(ParseAddressError::MissingHex);
        }
        let bytes = data_encoding::HEXLOWER_PERMISSIVE
            .decode(hex.as_bytes())
            .map_err(|_| ParseAddressError::BadHex)?;
        let bytes: [u8; ADDRESS_LEN] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| ParseAddressError::BadLength(b.len()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
