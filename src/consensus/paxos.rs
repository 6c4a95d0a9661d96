//! Paxos-style propose/promise/commit per key.
//!
//! Every write is stamped with a proposal index taken from the wall clock.
//! Peers remember the highest proposal seen per key and refuse older ones;
//! a commit executes whatever proposal the peer recorded for the key.

use super::{Initiation, Protocol, ProtocolFactory};
use crate::error::{ConsensusError, Result};
use crate::storage::{execute, Storage};
use crate::types::{Command, Element, Key, NodeId, Response};
use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// A write proposed for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    /// Nanosecond timestamp ordering proposals for the same key.
    pub index: u64,
    pub command: Command,
}

/// Request to execute the proposal recorded for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub index: u64,
    pub key: Key,
}

/// Payload of Paxos messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaxosRpc {
    Proposal(Proposal),
    Promise { index: u64 },
    Commit(Commit),
    Accepted { index: u64 },
}

impl PaxosRpc {
    fn into_proposal(self) -> Result<Proposal> {
        match self {
            PaxosRpc::Proposal(proposal) => Ok(proposal),
            other => Err(ConsensusError::UnexpectedMessage(format!("{other:?}")).into()),
        }
    }

    fn into_commit(self) -> Result<Commit> {
        match self {
            PaxosRpc::Commit(commit) => Ok(commit),
            other => Err(ConsensusError::UnexpectedMessage(format!("{other:?}")).into()),
        }
    }
}

/// Highest proposal seen per key.
#[derive(Debug, Default)]
pub struct ProposalLog {
    proposals: HashMap<Key, Proposal>,
}

impl ProposalLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a proposal unless a newer one is already known for its key.
    pub fn promise(&mut self, proposal: Proposal) -> Result<()> {
        let key = proposal.command.key().clone();
        if let Some(existing) = self.proposals.get(&key) {
            if existing.index > proposal.index {
                return Err(ConsensusError::HigherIndex {
                    existing: existing.index,
                    received: proposal.index,
                }
                .into());
            }
        }
        self.proposals.insert(key, proposal);
        Ok(())
    }

    /// Execute the proposal recorded for the commit's key.
    pub async fn accept(&self, commit: &Commit, storage: &dyn Storage) -> Result<Response> {
        let proposal = self
            .proposals
            .get(&commit.key)
            .ok_or(ConsensusError::MissingProposal)?;
        execute(storage, &proposal.command).await
    }

    pub fn get(&self, key: &[u8]) -> Option<&Proposal> {
        self.proposals.get(key)
    }

    pub fn len(&self) -> usize {
        self.proposals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty()
    }
}

/// Per-node Paxos handlers.
pub struct PaxosProtocol {
    node_id: NodeId,
    storage: Arc<dyn Storage>,
    log: Mutex<ProposalLog>,
    last_index: SyncMutex<u64>,
}

impl PaxosProtocol {
    pub fn new(node_id: NodeId, storage: Arc<dyn Storage>) -> Self {
        Self {
            node_id,
            storage,
            log: Mutex::new(ProposalLog::new()),
            last_index: SyncMutex::new(0),
        }
    }

    pub fn factory() -> ProtocolFactory<PaxosProtocol> {
        Arc::new(PaxosProtocol::new)
    }

    /// Next proposal index: the current time in nanoseconds, never repeating
    /// on this node.
    fn next_index(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or_default();
        let mut last = self.last_index.lock();
        *last = now.max(*last + 1);
        *last
    }

    /// Proposal recorded for `key` on this node.
    pub async fn proposal(&self, key: &[u8]) -> Option<Proposal> {
        self.log.lock().await.get(key).cloned()
    }

    async fn accept(&self, commit: Commit) -> Result<()> {
        self.log
            .lock()
            .await
            .accept(&commit, self.storage.as_ref())
            .await?;
        trace!(node_id = self.node_id, index = commit.index, "Executed proposal");
        Ok(())
    }
}

#[async_trait]
impl Protocol for PaxosProtocol {
    type Rpc = PaxosRpc;

    async fn initiate(&self, element: Element) -> Result<Initiation<PaxosRpc>> {
        Ok(Initiation::Coordinate(PaxosRpc::Proposal(Proposal {
            index: self.next_index(),
            command: Command::put(element),
        })))
    }

    async fn propose(&self, rpc: PaxosRpc) -> Result<PaxosRpc> {
        let proposal = rpc.into_proposal()?;
        let index = proposal.index;
        self.log.lock().await.promise(proposal)?;
        Ok(PaxosRpc::Promise { index })
    }

    async fn promise(&self, rpc: PaxosRpc) -> Result<PaxosRpc> {
        let proposal = rpc.into_proposal()?;
        let commit = Commit {
            index: proposal.index,
            key: proposal.command.key().clone(),
        };
        self.log.lock().await.promise(proposal)?;
        debug!(node_id = self.node_id, index = commit.index, "Proposal promised");
        Ok(PaxosRpc::Commit(commit))
    }

    async fn commit(&self, rpc: PaxosRpc) -> Result<PaxosRpc> {
        let commit = rpc.into_commit()?;
        let index = commit.index;
        self.accept(commit).await?;
        Ok(PaxosRpc::Accepted { index })
    }

    async fn confirm(&self, rpc: PaxosRpc) -> Result<()> {
        self.accept(rpc.into_commit()?).await
    }
}
