//! Load balancing strategies.
//!
//! A balancer picks one node from the candidates that survived breaker and
//! blacklist filtering. Strategies are registered in the extension registry
//! under the names used in configuration:
//!
//! | Name             | Strategy                                              |
//! |------------------|-------------------------------------------------------|
//! | `random`         | uniform random pick                                   |
//! | `roundRobin`     | rotates through the candidates in order               |
//! | `consistentHash` | same first argument goes to the same node             |

mod consistent_hash;
mod random;
mod round_robin;

pub use consistent_hash::{ConsistentHashBalancer, HashRing, VIRTUAL_NODES};
pub use random::RandomBalancer;
pub use round_robin::RoundRobinBalancer;

use std::sync::Arc;

use relayrpc_common::extension::ExtensionRegistry;
use relayrpc_common::protocol::{Call, NodeAddress};

pub trait LoadBalancer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Picks one of `candidates` for `call`. Returns `None` only when
    /// `candidates` is empty.
    fn select(&self, candidates: &[NodeAddress], call: &Call) -> Option<NodeAddress>;
}

/// Registers the built-in strategies.
pub fn register_default_balancers(registry: &ExtensionRegistry) {
    registry.register::<dyn LoadBalancer, _>("random", || Arc::new(RandomBalancer));
    registry.register::<dyn LoadBalancer, _>("roundRobin", || Arc::new(RoundRobinBalancer::new()));
    registry.register::<dyn LoadBalancer, _>("consistentHash", || {
        Arc::new(ConsistentHashBalancer::new())
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolve_by_name() {
        let registry = ExtensionRegistry::new();
        register_default_balancers(&registry);

        for name in ["random", "roundRobin", "consistentHash"] {
            let balancer = registry.resolve::<dyn LoadBalancer>(name).unwrap();
            assert_eq!(balancer.name(), name);
        }
        assert!(registry.resolve::<dyn LoadBalancer>("leastActive").is_err());
    }

    #[test]
    fn test_every_strategy_handles_empty_and_single() {
        let call = Call::new("S", "m", vec!["k".into()]);
        let only = vec![NodeAddress::from("a:1")];
        let strategies: Vec<Box<dyn LoadBalancer>> = vec![
            Box::new(RandomBalancer),
            Box::new(RoundRobinBalancer::new()),
            Box::new(ConsistentHashBalancer::new()),
        ];

        for lb in strategies {
            assert_eq!(lb.select(&[], &call), None, "{}", lb.name());
            for _ in 0..5 {
                assert_eq!(lb.select(&only, &call), Some(only[0].clone()), "{}", lb.name());
            }
        }
    }
}
