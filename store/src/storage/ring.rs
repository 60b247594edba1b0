//! Consistent hash ring mapping object keys to server endpoints.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use tracing::warn;

use crate::net::Endpoint;

/// Ring positions per physical server; enough for a reasonably uniform key distribution.
pub const VIRTUAL_NODES_PER_SERVER: usize = 100;

const HASH_SEED: u64 = 0x1234_ABCD;
const HASH_M: u64 = 0xc6a4_a793_5bd1_e995;
const HASH_R: u32 = 47;

/// 64-bit murmur-style hash. The exact recurrence is an interop contract: a key must land
/// on the same ring position in every implementation that shares the keyspace.
fn hash_key(key: &str) -> u64 {
    let mut h = HASH_SEED;
    for &b in key.as_bytes() {
        h = h.wrapping_add(u64::from(b)).wrapping_mul(HASH_M);
        h ^= h >> HASH_R;
    }
    for _ in 0..3 {
        h = h.wrapping_mul(HASH_M);
        h ^= h >> HASH_R;
    }
    h
}

struct RingState {
    /// hash position -> owning endpoint, treated as a circular ordered sequence.
    ring: BTreeMap<u64, Endpoint>,
    /// Reverse index: endpoint -> its virtual-node positions.
    virtual_nodes: HashMap<Endpoint, BTreeSet<u64>>,
}

/// Consistent-hash router. For a fixed server set, `server_for_key` is a pure function of
/// the key; adding or removing a server reassigns only the keys in the changed arcs.
pub struct HashRing {
    state: RwLock<RingState>,
}

impl HashRing {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RingState {
                ring: BTreeMap::new(),
                virtual_nodes: HashMap::new(),
            }),
        }
    }

    pub fn with_servers(servers: impl IntoIterator<Item = Endpoint>) -> Self {
        let ring = Self::new();
        for server in servers {
            ring.add_server(&server);
        }
        ring
    }

    pub fn add_server(&self, endpoint: &Endpoint) {
        let Ok(mut state) = self.state.write() else {
            warn!("hash ring poisoned; add_server dropped");
            return;
        };
        let mut points = BTreeSet::new();
        for i in 0..VIRTUAL_NODES_PER_SERVER {
            let position = hash_key(&format!("{endpoint}#{i}"));
            state.ring.insert(position, endpoint.clone());
            points.insert(position);
        }
        state.virtual_nodes.insert(endpoint.clone(), points);
    }

    pub fn remove_server(&self, endpoint: &Endpoint) {
        let Ok(mut state) = self.state.write() else {
            warn!("hash ring poisoned; remove_server dropped");
            return;
        };
        if let Some(points) = state.virtual_nodes.remove(endpoint) {
            for position in points {
                state.ring.remove(&position);
            }
        }
    }

    /// The server owning `key`: the first ring position at or after the key's hash,
    /// wrapping to the start of the ring. `None` only when the ring is empty.
    pub fn server_for_key(&self, key: &str) -> Option<Endpoint> {
        let Ok(state) = self.state.read() else {
            return None;
        };
        let position = hash_key(key);
        state
            .ring
            .range(position..)
            .next()
            .or_else(|| state.ring.iter().next())
            .map(|(_, endpoint)| endpoint.clone())
    }

    /// Walk clockwise from the key's position collecting distinct servers, stopping after
    /// `n` or one full revolution.
    pub fn servers_for_key(&self, key: &str, n: usize) -> Vec<Endpoint> {
        let Ok(state) = self.state.read() else {
            return Vec::new();
        };
        let position = hash_key(key);
        let mut found: Vec<Endpoint> = Vec::new();
        for (_, endpoint) in state
            .ring
            .range(position..)
            .chain(state.ring.range(..position))
        {
            if !found.contains(endpoint) {
                found.push(endpoint.clone());
                if found.len() == n {
                    break;
                }
            }
        }
        found
    }

    /// Distinct servers currently on the ring.
    pub fn servers(&self) -> Vec<Endpoint> {
        let Ok(state) = self.state.read() else {
            return Vec::new();
        };
        state.virtual_nodes.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state
            .read()
            .map(|state| state.virtual_nodes.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn endpoints(n: u16) -> Vec<Endpoint> {
        (0..n).map(|i| Endpoint::localhost(9000 + i)).collect()
    }

    #[test]
    fn empty_ring_routes_nothing() {
        let ring = HashRing::new();
        assert!(ring.server_for_key("k").is_none());
        assert!(ring.servers_for_key("k", 3).is_empty());
    }

    #[test]
    fn each_server_owns_its_virtual_nodes() {
        let ring = HashRing::with_servers(endpoints(3));
        assert_eq!(ring.len(), 3);
        let state = ring.state.read().unwrap();
        assert_eq!(state.ring.len(), 3 * VIRTUAL_NODES_PER_SERVER);
        for points in state.virtual_nodes.values() {
            assert_eq!(points.len(), VIRTUAL_NODES_PER_SERVER);
        }
    }

    #[test]
    fn routing_is_deterministic() {
        let ring_a = HashRing::with_servers(endpoints(5));
        let ring_b = HashRing::with_servers(endpoints(5));
        for i in 0..200 {
            let key = format!("customer-CUST{i:04}");
            assert_eq!(ring_a.server_for_key(&key), ring_b.server_for_key(&key));
        }
    }

    #[test]
    fn keys_spread_across_servers() {
        let ring = HashRing::with_servers(endpoints(4));
        let mut counts: HashMap<Endpoint, usize> = HashMap::new();
        for i in 0..1000 {
            let server = ring.server_for_key(&format!("key-{i}")).unwrap();
            *counts.entry(server).or_default() += 1;
        }
        // every server takes some share of the keyspace
        assert_eq!(counts.len(), 4);
        assert!(counts.values().all(|&count| count > 100));
    }

    #[test]
    fn servers_for_key_returns_distinct_endpoints() {
        let ring = HashRing::with_servers(endpoints(5));
        let servers = ring.servers_for_key("some-key", 3);
        assert_eq!(servers.len(), 3);
        let unique: std::collections::HashSet<_> = servers.iter().collect();
        assert_eq!(unique.len(), 3);

        // asking for more than exist yields everyone, once
        let all = ring.servers_for_key("some-key", 10);
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn removing_a_server_only_moves_its_keys() {
        let ring = HashRing::with_servers(endpoints(5));
        let keys: Vec<String> = (0..500).map(|i| format!("key-{i}")).collect();
        let before: Vec<Endpoint> = keys
            .iter()
            .map(|k| ring.server_for_key(k).unwrap())
            .collect();

        let victim = Endpoint::localhost(9002);
        ring.remove_server(&victim);

        for (key, old) in keys.iter().zip(&before) {
            let new = ring.server_for_key(key).unwrap();
            assert_ne!(new, victim);
            if *old != victim {
                // keys not owned by the removed server stay put
                assert_eq!(new, *old);
            }
        }
    }
}
