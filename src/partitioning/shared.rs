//! Mutex-guarded switch shared by the network and its failure clock.

use super::Switch;
use crate::cluster::Event;
use crate::error::{Result, RoutingError};
use crate::types::NodeId;
use parking_lot::Mutex;
use std::fmt;
use tracing::{debug, info};

struct Routing {
    base: Option<Box<dyn Switch>>,
    event: Option<Box<dyn Event>>,
}

/// Single coordination point for routing and membership changes.
///
/// Register, deregister, route, and event wrapping all take the same lock,
/// so membership changes never race with concurrent routes.
pub struct SharedSwitch {
    inner: Mutex<Routing>,
}

impl SharedSwitch {
    /// Wrap a switch.
    pub fn new(base: Box<dyn Switch>) -> Self {
        Self {
            inner: Mutex::new(Routing {
                base: Some(base),
                event: None,
            }),
        }
    }

    /// Add a member.
    pub fn register(&self, id: NodeId) {
        let mut guard = self.inner.lock();
        let routing = &mut *guard;
        match (routing.event.as_mut(), routing.base.as_mut()) {
            (Some(event), _) => event.register(id),
            (None, Some(base)) => base.register(id),
            (None, None) => {}
        }
        debug!(member = id, "Registered member");
    }

    /// Remove a member.
    pub fn deregister(&self, id: NodeId) {
        let mut guard = self.inner.lock();
        let routing = &mut *guard;
        match (routing.event.as_mut(), routing.base.as_mut()) {
            (Some(event), _) => event.deregister(id),
            (None, Some(base)) => base.deregister(id),
            (None, None) => {}
        }
        debug!(member = id, "Deregistered member");
    }

    /// Resolve the members serving a key.
    pub fn route(&self, key: &[u8]) -> Result<Vec<NodeId>> {
        let mut guard = self.inner.lock();
        let routing = &mut *guard;
        match (routing.event.as_mut(), routing.base.as_mut()) {
            (Some(event), _) => event.route(key),
            (None, Some(base)) => base.route(key),
            (None, None) => Err(RoutingError::NoMembers.into()),
        }
    }

    /// Currently registered members.
    pub fn members(&self) -> Vec<NodeId> {
        let routing = self.inner.lock();
        match (routing.event.as_ref(), routing.base.as_ref()) {
            (Some(event), _) => event.members(),
            (None, Some(base)) => base.members(),
            (None, None) => Vec::new(),
        }
    }

    /// Replace the active event with `event`.
    ///
    /// A previously active event is unwrapped first, so events never stack.
    pub fn apply(&self, mut event: Box<dyn Event>) {
        let mut routing = self.inner.lock();
        if let Some(mut previous) = routing.event.take() {
            debug!(event = %previous.describe(), "Resetting previous event");
            if let Some(base) = previous.reset() {
                routing.base = Some(base);
            }
        }
        if let Some(base) = routing.base.take() {
            event.wrap(base);
        }
        info!(event = %event.describe(), member = event.target(), "Applying event");
        routing.event = Some(event);
    }

    /// Unwrap the active event if it no longer affects routing.
    ///
    /// Returns the target of the removed event.
    pub fn clear_exhausted(&self) -> Option<NodeId> {
        let mut routing = self.inner.lock();
        let exhausted = routing
            .event
            .as_ref()
            .map(|event| event.is_exhausted())
            .unwrap_or(false);
        if !exhausted {
            return None;
        }

        let mut event = routing.event.take()?;
        if let Some(base) = event.reset() {
            routing.base = Some(base);
        }
        info!(event = %event.describe(), member = event.target(), "Event expired");
        Some(event.target())
    }

    /// Target of the active event, if any.
    pub fn active_event(&self) -> Option<NodeId> {
        self.inner.lock().event.as_ref().map(|event| event.target())
    }
}

impl fmt::Debug for SharedSwitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSwitch")
            .field("members", &self.members())
            .field("active_event", &self.active_event())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::NodeDown;
    use crate::partitioning::Partition;

    fn shared(partition: Partition, members: usize) -> SharedSwitch {
        let switch = SharedSwitch::new(partition.build());
        for id in 0..members {
            switch.register(id);
        }
        switch
    }

    #[test]
    fn test_route_through_event() {
        let switch = shared(Partition::LeaderFollower, 3);
        assert_eq!(switch.route(b"key").unwrap(), vec![0]);

        switch.apply(Box::new(NodeDown::new(0, 2)));
        assert_eq!(switch.active_event(), Some(0));
        assert!(switch.route(b"key").is_err());
        assert!(switch.route(b"key").is_err());
        assert_eq!(switch.route(b"key").unwrap(), vec![0]);
    }

    #[test]
    fn test_events_do_not_stack() {
        let switch = shared(Partition::LeaderFollower, 3);
        switch.apply(Box::new(NodeDown::new(0, 100)));
        switch.apply(Box::new(NodeDown::new(1, 100)));

        // only the newest event filters
        assert_eq!(switch.active_event(), Some(1));
        assert_eq!(switch.route(b"key").unwrap(), vec![0]);
    }

    #[test]
    fn test_membership_through_event() {
        let switch = shared(Partition::Sharded, 3);
        switch.apply(Box::new(NodeDown::new(2, 1)));
        switch.register(3);
        assert_eq!(switch.members(), vec![0, 1, 2, 3]);
        switch.deregister(1);
        assert_eq!(switch.members(), vec![0, 2, 3]);
    }

    #[test]
    fn test_clear_exhausted() {
        let switch = shared(Partition::LeaderFollower, 2);
        switch.apply(Box::new(NodeDown::new(0, 1)));
        assert_eq!(switch.clear_exhausted(), None);

        assert!(switch.route(b"key").is_err());
        assert_eq!(switch.clear_exhausted(), Some(0));
        assert_eq!(switch.active_event(), None);
        assert_eq!(switch.route(b"key").unwrap(), vec![0]);
        assert_eq!(switch.members(), vec![0, 1]);
    }
}
