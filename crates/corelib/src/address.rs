//! Address abstractions.
//!
//! Transport endpoints (e.g. `SocketAddr`) and overlay logical addresses both
//! satisfy [`Address`]. [`NodeId`] is the compact logical address used by
//! overlays and the CLI.

use std::fmt::{self, Debug, Display};
use std::hash::Hash;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Anything usable as an endpoint identity: immutable, comparable, hashable.
pub trait Address: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static {}

impl<T> Address for T where T: Clone + Eq + Hash + Debug + Display + Send + Sync + 'static {}

/// Compact logical identifier for a node in an overlay.
///
/// Newtype over `u128` so comparisons and hashing are cheap. Rendered and
/// parsed as 32 lowercase hex digits; parsing also accepts shorter input.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct NodeId(pub u128);

impl Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        u128::from_str_radix(digits, 16).map(NodeId)
    }
}

impl From<u128> for NodeId {
    fn from(value: u128) -> Self {
        NodeId(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display_is_fixed_width() {
        assert_eq!(NodeId(0xab).to_string(), format!("{:0>32}", "ab"));
    }

    #[test]
    fn test_node_id_parse() {
        assert_eq!("ab".parse::<NodeId>().unwrap(), NodeId(0xab));
        assert_eq!("0x10".parse::<NodeId>().unwrap(), NodeId(16));
        let id = NodeId(u128::MAX - 7);
        assert_eq!(id.to_string().parse::<NodeId>().unwrap(), id);
        assert!("not-hex".parse::<NodeId>().is_err());
    }
}
