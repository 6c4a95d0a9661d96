//! Failure events applied at the routing level.

use crate::error::{Result, RoutingError};
use crate::partitioning::Switch;
use crate::types::NodeId;
use std::fmt;

/// A routing decorator that simulates a cluster event.
///
/// The network wraps its current switch with the event when the world clock
/// fires it, and takes the switch back with [`Event::reset`] before applying
/// the next one.
pub trait Event: Switch {
    /// Member affected by the event.
    fn target(&self) -> NodeId;

    /// Decorate `inner` with this event.
    fn wrap(&mut self, inner: Box<dyn Switch>);

    /// Detach and return the decorated switch.
    fn reset(&mut self) -> Option<Box<dyn Switch>>;

    /// Whether the event no longer affects routing.
    fn is_exhausted(&self) -> bool;

    /// Clock cycles the target is kept out of the protocol at most.
    fn window(&self) -> usize;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Makes a node unresponsive for a bounded number of routing outcomes.
///
/// Each route that would have included the target has it removed, until
/// `duration` routes have been filtered. After that the target is routed to
/// normally again.
pub struct NodeDown {
    target: NodeId,
    duration: usize,
    iterations: usize,
    inner: Option<Box<dyn Switch>>,
}

impl NodeDown {
    /// Create an event suppressing `target` for `duration` routes.
    pub fn new(target: NodeId, duration: usize) -> Self {
        Self {
            target,
            duration,
            iterations: 0,
            inner: None,
        }
    }

    /// Number of routes filtered so far.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Total number of routes to filter.
    pub fn duration(&self) -> usize {
        self.duration
    }

    /// Filter the target out of a routing result.
    fn filter(&mut self, ids: Vec<NodeId>) -> Vec<NodeId> {
        let mut live = Vec::with_capacity(ids.len());
        let mut suppressed = false;
        for id in ids {
            if id == self.target && self.iterations < self.duration {
                suppressed = true;
            } else {
                live.push(id);
            }
        }
        if suppressed {
            self.iterations += 1;
        }
        live
    }
}

impl fmt::Debug for NodeDown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeDown")
            .field("target", &self.target)
            .field("duration", &self.duration)
            .field("iterations", &self.iterations)
            .field("wrapped", &self.inner.is_some())
            .finish()
    }
}

impl Switch for NodeDown {
    fn register(&mut self, id: NodeId) {
        if let Some(inner) = self.inner.as_mut() {
            inner.register(id);
        }
    }

    fn deregister(&mut self, id: NodeId) {
        if let Some(inner) = self.inner.as_mut() {
            inner.deregister(id);
        }
    }

    fn route(&mut self, key: &[u8]) -> Result<Vec<NodeId>> {
        let ids = match self.inner.as_mut() {
            Some(inner) => inner.route(key)?,
            None => return Err(RoutingError::NoMembers.into()),
        };

        let live = self.filter(ids);
        if live.is_empty() {
            return Err(RoutingError::NodeNotResponding(self.target).into());
        }
        Ok(live)
    }

    fn members(&self) -> Vec<NodeId> {
        self.inner
            .as_ref()
            .map(|inner| inner.members())
            .unwrap_or_default()
    }
}

impl Event for NodeDown {
    fn target(&self) -> NodeId {
        self.target
    }

    fn wrap(&mut self, inner: Box<dyn Switch>) {
        self.inner = Some(inner);
    }

    fn reset(&mut self) -> Option<Box<dyn Switch>> {
        self.inner.take()
    }

    fn is_exhausted(&self) -> bool {
        self.iterations >= self.duration
    }

    fn window(&self) -> usize {
        self.duration
    }

    fn describe(&self) -> String {
        format!("node {} down for {} routes", self.target, self.duration)
    }
}
