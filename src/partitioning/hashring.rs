//! Consistent hashing with a small fixed-size ring.
//!
//! Every member owns `replicas` positions on a ring of `unit` slots. A key is
//! served by the owners of the first positions at or after `hash(key)`,
//! walking forward and wrapping around until `replicas` distinct members are
//! collected.

use super::{hash_key, Membership, Switch};
use crate::error::{Result, RoutingError};
use crate::types::NodeId;
use std::collections::BTreeMap;

/// Positions per member, and members per key.
pub const DEFAULT_RING_REPLICAS: usize = 3;

/// Number of slots on the ring.
pub const DEFAULT_RING_UNIT: u64 = 360;

/// A consistent hash ring switch.
#[derive(Debug, Clone)]
pub struct ConsistentSwitch {
    /// Ring position to owning member.
    ring: BTreeMap<u64, NodeId>,
    membership: Membership,
    replicas: usize,
    unit: u64,
}

impl ConsistentSwitch {
    /// Create an empty ring.
    pub fn new(replicas: usize, unit: u64) -> Self {
        Self {
            ring: BTreeMap::new(),
            membership: Membership::new(),
            replicas: replicas.max(1),
            unit: unit.max(1),
        }
    }

    /// Ring positions owned by a member.
    pub fn positions(&self, id: NodeId) -> Vec<u64> {
        self.ring
            .iter()
            .filter(|&(_, &owner)| owner == id)
            .map(|(&position, _)| position)
            .collect()
    }

    /// Primary owner of a key.
    pub fn primary(&self, key: &[u8]) -> Option<NodeId> {
        self.owners(key, 1).into_iter().next()
    }

    /// Up to `count` distinct owners of a key, primary first.
    pub fn owners(&self, key: &[u8], count: usize) -> Vec<NodeId> {
        if self.ring.is_empty() {
            return Vec::new();
        }

        let position = hash_key(key) % self.unit;
        let wanted = count.min(self.membership.len());
        let mut owners = Vec::with_capacity(wanted);

        let walk = self
            .ring
            .range(position..)
            .chain(self.ring.range(..position));
        for (_, &owner) in walk {
            if !owners.contains(&owner) {
                owners.push(owner);
                if owners.len() >= wanted {
                    break;
                }
            }
        }

        owners
    }

    /// Slot for the `replica`-th position of a member.
    ///
    /// Occupied slots are skipped so a new member never takes over an
    /// existing member's position.
    fn free_slot(&self, replica: usize, id: NodeId) -> Option<u64> {
        if self.ring.len() as u64 >= self.unit {
            return None;
        }
        let label = format!("{replica} {id}");
        let mut slot = hash_key(label.as_bytes()) % self.unit;
        while self.ring.contains_key(&slot) {
            slot = (slot + 1) % self.unit;
        }
        Some(slot)
    }
}

impl Default for ConsistentSwitch {
    fn default() -> Self {
        Self::new(DEFAULT_RING_REPLICAS, DEFAULT_RING_UNIT)
    }
}

impl Switch for ConsistentSwitch {
    fn register(&mut self, id: NodeId) {
        if self.membership.contains(id) {
            return;
        }
        self.membership.register(id);

        for replica in 0..self.replicas {
            if let Some(slot) = self.free_slot(replica, id) {
                self.ring.insert(slot, id);
            }
        }
    }

    fn deregister(&mut self, id: NodeId) {
        self.membership.deregister(id);
        self.ring.retain(|_, owner| *owner != id);
    }

    fn route(&mut self, key: &[u8]) -> Result<Vec<NodeId>> {
        let owners = self.owners(key, self.replicas);
        if owners.is_empty() {
            return Err(RoutingError::NoMembers.into());
        }
        Ok(owners)
    }

    fn members(&self) -> Vec<NodeId> {
        self.membership.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ring_with(count: usize) -> ConsistentSwitch {
        let mut ring = ConsistentSwitch::default();
        for id in 0..count {
            ring.register(id);
        }
        ring
    }

    fn sample_keys() -> Vec<String> {
        (0..2000).map(|i| format!("sample_key_{i}")).collect()
    }

    #[test]
    fn test_single_member() {
        let mut ring = ring_with(1);
        assert_eq!(ring.positions(0).len(), DEFAULT_RING_REPLICAS);
        assert_eq!(ring.route(b"key").unwrap(), vec![0]);
    }

    #[test]
    fn test_distinct_owners() {
        let mut ring = ring_with(5);
        for key in sample_keys().iter().take(200) {
            let owners = ring.route(key.as_bytes()).unwrap();
            assert_eq!(owners.len(), DEFAULT_RING_REPLICAS);
            let mut unique = owners.clone();
            unique.sort();
            unique.dedup();
            assert_eq!(unique.len(), owners.len());
        }
    }

    #[test]
    fn test_positions_within_unit() {
        let ring = ring_with(20);
        for id in 0..20 {
            let positions = ring.positions(id);
            assert_eq!(positions.len(), DEFAULT_RING_REPLICAS);
            assert!(positions.iter().all(|&p| p < DEFAULT_RING_UNIT));
        }
    }

    #[test]
    fn test_register_moves_keys_only_to_new_member() {
        let mut ring = ring_with(8);
        let keys = sample_keys();
        let before: HashMap<&String, NodeId> = keys
            .iter()
            .map(|k| (k, ring.primary(k.as_bytes()).unwrap()))
            .collect();

        ring.register(8);

        let mut moved = 0;
        for key in &keys {
            let after = ring.primary(key.as_bytes()).unwrap();
            if after != before[key] {
                assert_eq!(after, 8, "{key} moved between existing members");
                moved += 1;
            }
        }

        // The new member takes a share of the keys, not most of them.
        assert!(moved > 0, "new member received no keys");
        assert!(
            moved < keys.len() / 2,
            "{moved} of {} keys remapped",
            keys.len()
        );
    }

    #[test]
    fn test_deregister_removes_positions() {
        let mut ring = ring_with(4);
        ring.deregister(2);

        assert!(ring.positions(2).is_empty());
        assert_eq!(ring.members(), vec![0, 1, 3]);
        for key in sample_keys().iter().take(200) {
            let owners = ring.route(key.as_bytes()).unwrap();
            assert!(!owners.contains(&2));
            assert_eq!(owners.len(), 3);
        }
    }

    #[test]
    fn test_duplicate_register() {
        let mut ring = ring_with(2);
        ring.register(1);
        assert_eq!(ring.members(), vec![0, 1]);
        assert_eq!(ring.positions(1).len(), DEFAULT_RING_REPLICAS);
    }
}
