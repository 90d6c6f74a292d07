use rand::seq::SliceRandom;
use relayrpc_common::protocol::{Call, NodeAddress};

use super::LoadBalancer;

/// Picks a candidate uniformly at random.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomBalancer;

impl LoadBalancer for RandomBalancer {
    fn name(&self) -> &'static str {
        "random"
    }

    fn select(&self, candidates: &[NodeAddress], _call: &Call) -> Option<NodeAddress> {
        candidates.choose(&mut rand::thread_rng()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_eventually_hits_every_node() {
        let nodes: Vec<NodeAddress> = (0..3).map(|i| NodeAddress::from(format!("n{}:1", i))).collect();
        let call = Call::new("S", "m", vec![]);
        let seen: HashSet<_> = (0..300)
            .filter_map(|_| RandomBalancer.select(&nodes, &call))
            .collect();
        assert_eq!(seen.len(), 3);
    }
}
