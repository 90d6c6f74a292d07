use std::sync::atomic::{AtomicUsize, Ordering};

use relayrpc_common::protocol::{Call, NodeAddress};

use super::LoadBalancer;

/// Round-robin over the candidates, shared across all services.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    counter: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn name(&self) -> &'static str {
        "roundRobin"
    }

    fn select(&self, candidates: &[NodeAddress], _call: &Call) -> Option<NodeAddress> {
        if candidates.is_empty() {
            return None;
        }
        // fetch_add wraps on overflow, so the index never goes out of range
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        candidates.get(n % candidates.len()).cloned()
    }
}
