//! Workload harness and cluster scenario tests.
//!
//! The workloads in this module take any [`Storage`](crate::storage::Storage),
//! so the same checks run against a single [`MemoryStorage`] and against a
//! whole simulated [`Network`].
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              Workloads                        │
//! │  ConsistencyCheck  write N, read N, compare   │
//! │  FailureRate       concurrent cycles, count   │
//! │                    read and write failures    │
//! └──────────────────────────────────────────────┘
//!                       │
//!                       ▼
//!        MemoryStorage  or  Network<Protocol>
//! ```
//!
//! [`MemoryStorage`]: crate::storage::MemoryStorage
//! [`Network`]: crate::cluster::Network

mod utils;
mod workload;

mod paxos_tests;

pub use utils::{wait_for, wait_for_result};
pub use workload::{
    random_bytes, ConsistencyCheck, ElementGenerator, FailureRate, FailureReport, Limit,
};
