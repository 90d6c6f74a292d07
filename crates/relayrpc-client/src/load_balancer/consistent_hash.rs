use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use relayrpc_common::protocol::{Call, NodeAddress};
use sha2::{Digest, Sha256};

use super::LoadBalancer;

/// Virtual points placed on the ring per node.
pub const VIRTUAL_NODES: usize = 160;

/// Points produced per digest: the first 16 bytes give four u32 positions.
const POINTS_PER_DIGEST: usize = 4;

/// Sorted ring of virtual node positions for one candidate set.
#[derive(Debug)]
pub struct HashRing {
    fingerprint: [u8; 32],
    points: BTreeMap<u32, NodeAddress>,
}

impl HashRing {
    pub fn build(nodes: &[NodeAddress]) -> Self {
        let mut sorted: Vec<&NodeAddress> = nodes.iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut points = BTreeMap::new();
        for node in &sorted {
            for i in 0..VIRTUAL_NODES / POINTS_PER_DIGEST {
                let digest = Sha256::digest(format!("{}#{}", node, i).as_bytes());
                for h in 0..POINTS_PER_DIGEST {
                    let b = &digest[h * 4..h * 4 + 4];
                    let position = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                    // First writer keeps a colliding position
                    points.entry(position).or_insert_with(|| (*node).clone());
                }
            }
        }

        HashRing {
            fingerprint: fingerprint(nodes),
            points,
        }
    }

    /// Returns the node owning `key`: the first point at or after the key's
    /// position, wrapping around to the lowest point.
    pub fn locate(&self, key: &str) -> Option<&NodeAddress> {
        let position = key_position(key);
        self.points
            .range(position..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, node)| node)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

fn key_position(key: &str) -> u32 {
    let digest = Sha256::digest(key.as_bytes());
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Order-independent identity of a candidate set.
fn fingerprint(nodes: &[NodeAddress]) -> [u8; 32] {
    let mut sorted: Vec<&str> = nodes.iter().map(NodeAddress::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();

    let mut hasher = Sha256::new();
    for node in sorted {
        hasher.update(node.as_bytes());
        hasher.update([0u8]);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Routes calls with the same first argument to the same node.
///
/// Keeps one ring per service, rebuilt only when that service's candidate set
/// changes. Removing a node only moves the keys that node owned.
#[derive(Debug, Default)]
pub struct ConsistentHashBalancer {
    rings: DashMap<String, Arc<HashRing>>,
}

impl ConsistentHashBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    fn ring_for(&self, service: &str, candidates: &[NodeAddress]) -> Arc<HashRing> {
        let fingerprint = fingerprint(candidates);

        let cached = self.rings.get(service).map(|r| r.value().clone());
        if let Some(ring) = cached {
            if ring.fingerprint == fingerprint {
                return ring;
            }
        }

        // The entry lock makes concurrent rebuilds for one service run once
        let mut entry = self
            .rings
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(HashRing::build(candidates)));
        if entry.fingerprint != fingerprint {
            tracing::debug!(service, "rebuilding hash ring");
            *entry = Arc::new(HashRing::build(candidates));
        }
        entry.value().clone()
    }
}

impl LoadBalancer for ConsistentHashBalancer {
    fn name(&self) -> &'static str {
        "consistentHash"
    }

    fn select(&self, candidates: &[NodeAddress], call: &Call) -> Option<NodeAddress> {
        if candidates.is_empty() {
            return None;
        }
        let ring = self.ring_for(&call.interface_name, candidates);
        ring.locate(&call.hash_key()).cloned()
    }
}
