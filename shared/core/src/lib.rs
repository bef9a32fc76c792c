mod cluster_identity;
mod error;
mod sha256;
mod weight_tree;

pub use cluster_identity::{Address, ClusterIdentity, ParseAddressError, ADDRESS_LEN};
pub use error::{ErrorKind, TreeError};
pub use sha256::{epoch_seed, sha256, sha256v};
pub use weight_tree::{IndexedWeightTree, Node, Weight};
