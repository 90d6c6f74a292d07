//! Service discovery.
//!
//! Servers register `(service name, address)` pairs; clients look up every
//! address currently serving a name. Real deployments plug in a backend such
//! as ZooKeeper or Nacos behind the [`Discovery`] trait. [`StaticDiscovery`]
//! keeps the table in memory, which is enough for single-process setups and
//! tests.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::protocol::{NodeAddress, Result};

#[async_trait]
pub trait Discovery: Send + Sync {
    /// Publishes `addr` as a provider of `service_name`.
    async fn register(&self, service_name: &str, addr: &NodeAddress) -> Result<()>;

    /// Returns every address currently registered for `service_name`.
    ///
    /// An unknown service yields an empty list, not an error.
    async fn lookup_all(&self, service_name: &str) -> Result<Vec<NodeAddress>>;

    /// Deregisters everything this instance published and releases backend
    /// resources.
    async fn destroy(&self) -> Result<()>;
}

/// In-memory discovery table.
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    services: RwLock<HashMap<String, Vec<NodeAddress>>>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder helper that pre-registers a set of nodes.
    pub fn with_nodes<I, A>(self, service_name: &str, nodes: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<NodeAddress>,
    {
        {
            let mut services = self.services.write();
            let entry = services.entry(service_name.to_string()).or_default();
            for node in nodes {
                let node = node.into();
                if !entry.contains(&node) {
                    entry.push(node);
                }
            }
        }
        self
    }

    /// Removes `addr` from `service_name`. Returns whether it was registered.
    pub fn deregister(&self, service_name: &str, addr: &NodeAddress) -> bool {
        let mut services = self.services.write();
        match services.get_mut(service_name) {
            Some(nodes) => {
                let before = nodes.len();
                nodes.retain(|n| n != addr);
                before != nodes.len()
            }
            None => false,
        }
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn register(&self, service_name: &str, addr: &NodeAddress) -> Result<()> {
        let mut services = self.services.write();
        let nodes = services.entry(service_name.to_string()).or_default();
        if !nodes.contains(addr) {
            tracing::info!(service = service_name, addr = %addr, "registered service");
            nodes.push(addr.clone());
        }
        Ok(())
    }

    async fn lookup_all(&self, service_name: &str) -> Result<Vec<NodeAddress>> {
        Ok(self
            .services
            .read()
            .get(service_name)
            .cloned()
            .unwrap_or_default())
    }

    /// Empties the table. Every holder of this instance sees it empty.
    async fn destroy(&self) -> Result<()> {
        let mut services = self.services.write();
        let count: usize = services.values().map(Vec::len).sum();
        services.clear();
        tracing::debug!(registrations = count, "discovery table cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_lookup() {
        let discovery = StaticDiscovery::new();
        let addr = NodeAddress::from("127.0.0.1:8080");

        discovery.register("UserService", &addr).await.unwrap();
        discovery.register("UserService", &addr).await.unwrap();

        assert_eq!(discovery.lookup_all("UserService").await.unwrap(), vec![addr]);
    }

    #[tokio::test]
    async fn test_unknown_service_is_empty() {
        let discovery = StaticDiscovery::new();
        assert!(discovery.lookup_all("Nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deregister() {
        let discovery = StaticDiscovery::new().with_nodes("S", ["a:1", "b:2"]);
        assert!(discovery.deregister("S", &"a:1".into()));
        assert!(!discovery.deregister("S", &"a:1".into()));
        assert_eq!(discovery.lookup_all("S").await.unwrap(), vec![NodeAddress::from("b:2")]);
    }

    #[tokio::test]
    async fn test_destroy_deregisters_everything() {
        let discovery = StaticDiscovery::new().with_nodes("S", ["a:1"]);
        discovery.register("T", &"b:2".into()).await.unwrap();

        discovery.destroy().await.unwrap();

        assert!(discovery.lookup_all("S").await.unwrap().is_empty());
        assert!(discovery.lookup_all("T").await.unwrap().is_empty());
    }
}
