//! Partitioning strategies mapping keys to cluster members.
//!
//! A [`Switch`] owns a view of the registered members and resolves a key to
//! the member(s) that should serve it. Strategies range from a single fixed
//! node to a consistent hash ring with replicas.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      SharedSwitch                         │
//! │  ┌────────────────────┐     ┌──────────────────────────┐ │
//! │  │  active Event      │ ──► │  base Switch             │ │
//! │  │  (e.g. NodeDown)   │     │  single / random /       │ │
//! │  │  filters targets   │     │  sharded / replica /     │ │
//! │  └────────────────────┘     │  consistent / leader     │ │
//! │                             └──────────────────────────┘ │
//! │  key "user:123" → route → [2, 3, 4]                      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use switchyard::partitioning::{Partition, Switch};
//!
//! let mut switch = (Partition::Replica.factory())();
//! for id in 0..5 {
//!     switch.register(id);
//! }
//! let targets = switch.route(b"user:123").unwrap();
//! assert_eq!(targets.len(), 3);
//! ```

mod hashring;
mod shared;
mod strategies;

pub use hashring::{ConsistentSwitch, DEFAULT_RING_REPLICAS, DEFAULT_RING_UNIT};
pub use shared::SharedSwitch;
pub use strategies::{
    LeaderFollowerSwitch, RandomSwitch, ReplicaSwitch, ShardedSwitch, SingleSwitch,
    DEFAULT_REPLICAS,
};

use crate::error::Result;
use crate::types::NodeId;
use std::hash::Hasher;
use std::sync::Arc;
use twox_hash::XxHash64;

/// Routing strategy over a set of registered members.
pub trait Switch: Send {
    /// Add a member.
    fn register(&mut self, id: NodeId);

    /// Remove a member.
    fn deregister(&mut self, id: NodeId);

    /// Resolve the members that should serve `key`.
    fn route(&mut self, key: &[u8]) -> Result<Vec<NodeId>>;

    /// Currently registered members.
    fn members(&self) -> Vec<NodeId>;
}

/// Creates a fresh switch for a new cluster.
pub type SwitchFactory = Arc<dyn Fn() -> Box<dyn Switch> + Send + Sync>;

/// Built-in partitioning strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    /// Every key goes to member 0.
    Single,
    /// Every key goes to a random member.
    Random,
    /// `hash(key) mod members`.
    Sharded,
    /// Three consecutive members starting at `hash(key) mod members`.
    Replica,
    /// Consistent hash ring with replicas.
    Consistent,
    /// Every key goes to the first registered member.
    LeaderFollower,
}

impl Partition {
    /// Build a new switch for this strategy.
    pub fn build(self) -> Box<dyn Switch> {
        match self {
            Partition::Single => Box::new(SingleSwitch::new()),
            Partition::Random => Box::new(RandomSwitch::new()),
            Partition::Sharded => Box::new(ShardedSwitch::new()),
            Partition::Replica => Box::new(ReplicaSwitch::new(DEFAULT_REPLICAS)),
            Partition::Consistent => Box::new(ConsistentSwitch::default()),
            Partition::LeaderFollower => Box::new(LeaderFollowerSwitch::new()),
        }
    }

    /// Factory building a new switch for this strategy.
    pub fn factory(self) -> SwitchFactory {
        Arc::new(move || self.build())
    }
}

/// Ordered member list shared by the strategies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Membership {
    members: Vec<NodeId>,
}

impl Membership {
    /// Create an empty membership.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a member, ignoring duplicates.
    pub fn register(&mut self, id: NodeId) {
        if !self.members.contains(&id) {
            self.members.push(id);
        }
    }

    /// Remove a member by id.
    pub fn deregister(&mut self, id: NodeId) {
        self.members.retain(|&m| m != id);
    }

    /// Member at a registration position.
    pub fn get(&self, position: usize) -> Option<NodeId> {
        self.members.get(position).copied()
    }

    /// Check if a member is registered.
    pub fn contains(&self, id: NodeId) -> bool {
        self.members.contains(&id)
    }

    /// Number of registered members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if no member is registered.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Registered members in registration order.
    pub fn as_slice(&self) -> &[NodeId] {
        &self.members
    }

    /// Registered members in registration order.
    pub fn to_vec(&self) -> Vec<NodeId> {
        self.members.clone()
    }
}

/// Hash a key with xxHash64.
pub(crate) fn hash_key(key: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(key);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership_register_deregister() {
        let mut membership = Membership::new();
        membership.register(0);
        membership.register(1);
        membership.register(2);
        membership.register(1);
        assert_eq!(membership.as_slice(), &[0, 1, 2]);

        membership.deregister(0);
        assert_eq!(membership.as_slice(), &[1, 2]);
        assert_eq!(membership.get(0), Some(1));

        // removing by id, not by position
        membership.deregister(2);
        assert_eq!(membership.as_slice(), &[1]);
        assert!(!membership.contains(2));
    }

    #[test]
    fn test_routing_idempotence() {
        let keys: Vec<String> = (0..200).map(|i| format!("key-{i}")).collect();

        for partition in [
            Partition::Single,
            Partition::Sharded,
            Partition::Replica,
            Partition::Consistent,
            Partition::LeaderFollower,
        ] {
            let mut switch = partition.build();
            for id in 0..7 {
                switch.register(id);
            }

            for key in &keys {
                let first = switch.route(key.as_bytes()).unwrap();
                for _ in 0..5 {
                    assert_eq!(
                        switch.route(key.as_bytes()).unwrap(),
                        first,
                        "{partition:?} is not stable for {key}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_no_members() {
        for partition in [
            Partition::Single,
            Partition::Random,
            Partition::Sharded,
            Partition::Replica,
            Partition::Consistent,
            Partition::LeaderFollower,
        ] {
            let mut switch = partition.build();
            let err = switch.route(b"key").unwrap_err();
            assert!(err.is_routing(), "{partition:?} routed without members");
            assert_eq!(err.to_string(), "routing error: no members");
        }
    }

    #[test]
    fn test_hash_key_is_deterministic() {
        assert_eq!(hash_key(b"abc"), hash_key(b"abc"));
        assert_ne!(hash_key(b"abc"), hash_key(b"abd"));
    }
}
