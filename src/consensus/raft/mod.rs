//! Raft-style log replication over the two-phase handshake.
//!
//! The leader ships every write to its followers as an append request
//! carrying a [`HeartBeat`]. Followers check the heartbeat against their
//! log and append the entry (phase 1); once every follower holds it, the
//! leader appends locally and tells the followers to commit up to the new
//! index (phase 2), then commits itself.
//!
//! There is no election: the leader is fixed when the cluster is built,
//! which matches routing through [`LeaderFollowerSwitch`].
//!
//! [`LeaderFollowerSwitch`]: crate::partitioning::LeaderFollowerSwitch

mod state_machine;

pub use state_machine::{AppendRpc, HeartBeat, LogEntry, LogIndex, StateMachine, Term};

use super::{Initiation, Protocol, ProtocolFactory};
use crate::error::{ConsensusError, Result};
use crate::storage::Storage;
use crate::types::{Command, Element, NodeId};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Payload of Raft messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaftRpc {
    /// Phase 1: a new entry to append.
    Append(AppendRpc),
    /// Phase 2: commit everything up to the heartbeat's log index.
    Heartbeat(HeartBeat),
}

impl RaftRpc {
    fn into_append(self) -> Result<AppendRpc> {
        match self {
            RaftRpc::Append(rpc) => Ok(rpc),
            other => Err(ConsensusError::UnexpectedMessage(format!("{other:?}")).into()),
        }
    }

    fn into_heartbeat(self) -> Result<HeartBeat> {
        match self {
            RaftRpc::Heartbeat(heartbeat) => Ok(heartbeat),
            other => Err(ConsensusError::UnexpectedMessage(format!("{other:?}")).into()),
        }
    }
}

/// Per-node Raft handlers.
pub struct RaftProtocol {
    node_id: NodeId,
    leader: NodeId,
    term: Term,
    storage: Arc<dyn Storage>,
    state: Mutex<StateMachine>,
}

impl RaftProtocol {
    pub fn new(node_id: NodeId, leader: NodeId, storage: Arc<dyn Storage>) -> Self {
        Self {
            node_id,
            leader,
            term: 0,
            storage,
            state: Mutex::new(StateMachine::new(node_id)),
        }
    }

    /// Factory for a cluster led by node 0.
    pub fn factory() -> ProtocolFactory<RaftProtocol> {
        Self::factory_with_leader(0)
    }

    pub fn factory_with_leader(leader: NodeId) -> ProtocolFactory<RaftProtocol> {
        Arc::new(move |id, storage| RaftProtocol::new(id, leader, storage))
    }

    pub fn leader(&self) -> NodeId {
        self.leader
    }

    pub fn is_leader(&self) -> bool {
        self.node_id == self.leader
    }

    /// Copy of the node's log.
    pub async fn entries(&self) -> Vec<LogEntry> {
        self.state.lock().await.entries().to_vec()
    }

    pub async fn commit_index(&self) -> LogIndex {
        self.state.lock().await.commit_index()
    }

    /// Check and append under a single lock.
    async fn verify_and_append(&self, rpc: AppendRpc) -> Result<HeartBeat> {
        let heartbeat = rpc.heartbeat;
        let mut state = self.state.lock().await;
        state.verify(&heartbeat)?;
        state.append(rpc);
        debug!(
            node_id = self.node_id,
            term = heartbeat.term,
            log_index = heartbeat.log_index,
            log_len = state.len(),
            "Appended entry"
        );
        Ok(heartbeat)
    }
}

#[async_trait]
impl Protocol for RaftProtocol {
    type Rpc = RaftRpc;

    async fn initiate(&self, element: Element) -> Result<Initiation<RaftRpc>> {
        let commit_index = self.state.lock().await.commit_index();
        let heartbeat = HeartBeat {
            leader: self.node_id,
            term: self.term,
            prev_log_index: commit_index - 1,
            log_index: commit_index,
        };
        Ok(Initiation::Coordinate(RaftRpc::Append(AppendRpc {
            heartbeat,
            command: Command::put(element),
        })))
    }

    async fn propose(&self, rpc: RaftRpc) -> Result<RaftRpc> {
        let rpc = rpc.into_append()?;
        let response = RaftRpc::Append(rpc.clone());
        self.verify_and_append(rpc).await?;
        Ok(response)
    }

    async fn promise(&self, rpc: RaftRpc) -> Result<RaftRpc> {
        let heartbeat = self.verify_and_append(rpc.into_append()?).await?;
        Ok(RaftRpc::Heartbeat(heartbeat))
    }

    async fn commit(&self, rpc: RaftRpc) -> Result<RaftRpc> {
        let heartbeat = rpc.into_heartbeat()?;
        self.state
            .lock()
            .await
            .commit(&heartbeat, self.storage.as_ref())
            .await?;
        Ok(RaftRpc::Heartbeat(heartbeat))
    }

    async fn confirm(&self, rpc: RaftRpc) -> Result<()> {
        let heartbeat = rpc.into_heartbeat()?;
        self.state
            .lock()
            .await
            .commit(&heartbeat, self.storage.as_ref())
            .await
    }
}
