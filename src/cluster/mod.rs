//! The simulated cluster: nodes, message fabric, failure injection, and
//! the [`Network`] facade tying them together.

pub mod clock;
pub mod events;
pub mod fabric;
pub mod network;
pub mod node;

pub use clock::{EventSchedule, WorldClock};
pub use events::{Event, NodeDown};
pub use fabric::Fabric;
pub use network::{retry, Network, NetworkBuilder};
pub use node::{Node, NodeHandle};
