//! Simple partitioning strategies.

use super::{hash_key, Membership, Switch};
use crate::error::{Result, RoutingError};
use crate::types::NodeId;
use rand::Rng;

/// Number of targets used by [`ReplicaSwitch`].
pub const DEFAULT_REPLICAS: usize = 3;

/// Routes every key to member 0.
#[derive(Debug, Default)]
pub struct SingleSwitch {
    membership: Membership,
}

impl SingleSwitch {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Switch for SingleSwitch {
    fn register(&mut self, id: NodeId) {
        self.membership.register(id);
    }

    fn deregister(&mut self, id: NodeId) {
        self.membership.deregister(id);
    }

    fn route(&mut self, _key: &[u8]) -> Result<Vec<NodeId>> {
        if self.membership.is_empty() {
            return Err(RoutingError::NoMembers.into());
        }
        Ok(vec![0])
    }

    fn members(&self) -> Vec<NodeId> {
        self.membership.to_vec()
    }
}

/// Routes every key to a uniformly random member.
///
/// Only the member count is tracked, so members are assumed to be `0..count`.
#[derive(Debug, Default)]
pub struct RandomSwitch {
    count: usize,
}

impl RandomSwitch {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Switch for RandomSwitch {
    fn register(&mut self, _id: NodeId) {
        self.count += 1;
    }

    fn deregister(&mut self, _id: NodeId) {
        self.count = self.count.saturating_sub(1);
    }

    fn route(&mut self, _key: &[u8]) -> Result<Vec<NodeId>> {
        if self.count == 0 {
            return Err(RoutingError::NoMembers.into());
        }
        Ok(vec![rand::rng().random_range(0..self.count)])
    }

    fn members(&self) -> Vec<NodeId> {
        (0..self.count).collect()
    }
}

/// Routes a key to `hash(key) mod members`.
#[derive(Debug, Default)]
pub struct ShardedSwitch {
    membership: Membership,
}

impl ShardedSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registration position owning the key.
    fn shard(&self, key: &[u8]) -> usize {
        (hash_key(key) % self.membership.len() as u64) as usize
    }
}

impl Switch for ShardedSwitch {
    fn register(&mut self, id: NodeId) {
        self.membership.register(id);
    }

    fn deregister(&mut self, id: NodeId) {
        self.membership.deregister(id);
    }

    fn route(&mut self, key: &[u8]) -> Result<Vec<NodeId>> {
        if self.membership.is_empty() {
            return Err(RoutingError::NoMembers.into());
        }
        let owner = self
            .membership
            .get(self.shard(key))
            .ok_or(RoutingError::NoMembers)?;
        Ok(vec![owner])
    }

    fn members(&self) -> Vec<NodeId> {
        self.membership.to_vec()
    }
}

/// Routes a key to consecutive members starting at `hash(key) mod members`.
///
/// Emulates naive replication: every target receives the write, with no
/// coordination between them.
#[derive(Debug)]
pub struct ReplicaSwitch {
    membership: Membership,
    replicas: usize,
}

impl ReplicaSwitch {
    /// Create a switch writing to `replicas` members per key.
    pub fn new(replicas: usize) -> Self {
        Self {
            membership: Membership::new(),
            replicas: replicas.max(1),
        }
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }
}

impl Default for ReplicaSwitch {
    fn default() -> Self {
        Self::new(DEFAULT_REPLICAS)
    }
}

impl Switch for ReplicaSwitch {
    fn register(&mut self, id: NodeId) {
        self.membership.register(id);
    }

    fn deregister(&mut self, id: NodeId) {
        self.membership.deregister(id);
    }

    fn route(&mut self, key: &[u8]) -> Result<Vec<NodeId>> {
        let count = self.membership.len();
        if count == 0 {
            return Err(RoutingError::NoMembers.into());
        }

        let start = (hash_key(key) % count as u64) as usize;
        let targets = (0..self.replicas.min(count))
            .filter_map(|offset| self.membership.get((start + offset) % count))
            .collect();
        Ok(targets)
    }

    fn members(&self) -> Vec<NodeId> {
        self.membership.to_vec()
    }
}

/// Routes every key to the first registered member.
#[derive(Debug, Default)]
pub struct LeaderFollowerSwitch {
    membership: Membership,
}

impl LeaderFollowerSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current leader.
    pub fn leader(&self) -> Option<NodeId> {
        self.membership.get(0)
    }
}

impl Switch for LeaderFollowerSwitch {
    fn register(&mut self, id: NodeId) {
        self.membership.register(id);
    }

    fn deregister(&mut self, id: NodeId) {
        self.membership.deregister(id);
    }

    fn route(&mut self, _key: &[u8]) -> Result<Vec<NodeId>> {
        self.leader()
            .map(|leader| vec![leader])
            .ok_or_else(|| RoutingError::NoMembers.into())
    }

    fn members(&self) -> Vec<NodeId> {
        self.membership.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn registered<S: Switch>(mut switch: S, count: usize) -> S {
        for id in 0..count {
            switch.register(id);
        }
        switch
    }

    #[test]
    fn test_single_switch() {
        let mut switch = registered(SingleSwitch::new(), 4);
        for i in 0..50 {
            let key = format!("key-{i}");
            assert_eq!(switch.route(key.as_bytes()).unwrap(), vec![0]);
        }
        assert_eq!(switch.members(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_random_switch_covers_members() {
        let mut switch = registered(RandomSwitch::new(), 3);
        let mut seen = HashSet::new();
        for _ in 0..500 {
            let targets = switch.route(b"key").unwrap();
            assert_eq!(targets.len(), 1);
            assert!(targets[0] < 3);
            seen.insert(targets[0]);
        }
        assert_eq!(seen.len(), 3);

        switch.deregister(2);
        assert_eq!(switch.members(), vec![0, 1]);
    }

    #[test]
    fn test_random_switch_stays_in_range() {
        for count in 1..6 {
            let mut switch = registered(RandomSwitch::new(), count);
            for i in 0..200 {
                let key = format!("key-{i}");
                let targets = switch.route(key.as_bytes()).unwrap();
                assert!(targets.iter().all(|&id| id < count), "{targets:?} of {count}");
            }
        }

        let mut switch = registered(RandomSwitch::new(), 2);
        switch.deregister(1);
        for _ in 0..100 {
            assert_eq!(switch.route(b"key").unwrap(), vec![0]);
        }
        switch.deregister(0);
        assert!(switch.route(b"key").is_err());
    }

    #[test]
    fn test_sharded_switch_spreads_keys() {
        let mut switch = registered(ShardedSwitch::new(), 4);
        let mut counts = [0usize; 4];
        for i in 0..2000 {
            let key = format!("key-{i}");
            let targets = switch.route(key.as_bytes()).unwrap();
            assert_eq!(targets.len(), 1);
            counts[targets[0]] += 1;
        }
        for (node, &count) in counts.iter().enumerate() {
            assert!(count > 300, "node {node} only owns {count} keys");
        }
    }

    #[test]
    fn test_replica_switch_consecutive_targets() {
        let mut switch = registered(ReplicaSwitch::default(), 5);
        for i in 0..100 {
            let key = format!("key-{i}");
            let targets = switch.route(key.as_bytes()).unwrap();
            assert_eq!(targets.len(), 3);
            assert_eq!(targets[1], (targets[0] + 1) % 5);
            assert_eq!(targets[2], (targets[0] + 2) % 5);
        }
    }

    #[test]
    fn test_replica_switch_small_cluster() {
        let mut switch = registered(ReplicaSwitch::default(), 2);
        let targets = switch.route(b"key").unwrap();
        assert_eq!(targets.len(), 2);
        assert_ne!(targets[0], targets[1]);
    }

    #[test]
    fn test_leader_follower_switch() {
        let mut switch = registered(LeaderFollowerSwitch::new(), 3);
        assert_eq!(switch.route(b"a").unwrap(), vec![0]);
        assert_eq!(switch.route(b"b").unwrap(), vec![0]);

        switch.deregister(0);
        assert_eq!(switch.leader(), Some(1));
        assert_eq!(switch.route(b"a").unwrap(), vec![1]);
    }
}
