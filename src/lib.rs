//! In-process emulator of a distributed key-value cluster.
//!
//! This crate simulates a cluster of storage nodes inside a single process:
//! - **Partitioning** strategies route each key to one or more nodes
//! - **Node actors** serve client commands and internal messages on tokio tasks
//! - **Two-phase consensus** (Raft log replication or Paxos proposals) keeps replicas aligned
//! - **Failure injection** makes nodes unresponsive on a deterministic schedule
//!
//! The whole cluster implements [`Storage`], so any workload written against
//! a single store runs unchanged against a simulated cluster.
//!
//! # Example
//!
//! ```rust,no_run
//! use switchyard::{
//!     Element, MemoryStorage, NetworkBuilder, NetworkConfig, NodeDown, Partition, RaftProtocol,
//!     Storage,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let network = NetworkBuilder::new()
//!         .partition(Partition::LeaderFollower)
//!         .storage(MemoryStorage::factory())
//!         .protocol(RaftProtocol::factory())
//!         .config(NetworkConfig::new(5).with_warm_up(50))
//!         .event(NodeDown::new(0, 30))
//!         .build()?;
//!
//!     network.put(Element::new("user:123", "Alice")).await?;
//!     let element = network.get(b"user:123").await?;
//!     println!("Found: {}", element);
//!
//!     network.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              Network (Storage)               │
//! │  put / get ─► retry(route) ─► node queues    │
//! │  every routed op ticks the WorldClock        │
//! └─────────────────────────────────────────────┘
//!          │                         │
//!          ▼                         ▼
//! ┌─────────────────┐      ┌──────────────────┐
//! │  SharedSwitch   │      │   Node actors    │
//! │  NodeDown event │      │  op loop         │
//! │  base strategy  │      │  protocol loop   │
//! └─────────────────┘      └──────────────────┘
//!                                   │
//!                                   ▼
//!                          ┌──────────────────┐
//!                          │ Fabric + quorum  │
//!                          │ Raft / Paxos     │
//!                          └──────────────────┘
//! ```

pub mod cluster;
pub mod config;
pub mod consensus;
pub mod error;
pub mod metrics;
pub mod partitioning;
pub mod storage;
pub mod testing;
pub mod types;

pub use config::{ConsensusConfig, NetworkConfig, QuorumPolicy};
pub use error::{ConsensusError, Error, Result, RoutingError, StorageError};
pub use types::{Command, Element, Key, Metadata, MessageId, NodeId, Response, Value};

// Re-export cluster types
pub use cluster::{Event, EventSchedule, Network, NetworkBuilder, NodeDown, WorldClock};

// Re-export consensus types
pub use consensus::{NoProtocol, PaxosProtocol, Protocol, ProtocolFactory, RaftProtocol};

// Re-export partitioning types
pub use partitioning::{Partition, SharedSwitch, Switch, SwitchFactory};

// Re-export storage types
pub use storage::{MemoryStorage, Storage, StorageFactory};

// Re-export metrics types
pub use metrics::{distribution_skew, MetricsSnapshot, NetworkMetrics, Skew};

// Re-export testing types
pub use testing::{ConsistencyCheck, ElementGenerator, FailureRate, FailureReport, Limit};
