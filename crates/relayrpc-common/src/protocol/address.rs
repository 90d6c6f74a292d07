use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Network address of a node, in `host:port` form.
///
/// Used as the key for connections, circuit breakers and hash-ring entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeAddress(String);

impl NodeAddress {
    pub fn new(addr: impl Into<String>) -> Self {
        NodeAddress(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeAddress {
    fn from(addr: &str) -> Self {
        NodeAddress(addr.to_string())
    }
}

impl From<String> for NodeAddress {
    fn from(addr: String) -> Self {
        NodeAddress(addr)
    }
}

impl From<SocketAddr> for NodeAddress {
    fn from(addr: SocketAddr) -> Self {
        NodeAddress(addr.to_string())
    }
}

impl AsRef<str> for NodeAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
