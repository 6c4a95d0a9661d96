//! Per-node replicated log.

use crate::error::{ConsensusError, Result};
use crate::storage::{execute, Storage};
use crate::types::{Command, NodeId};
use tracing::{debug, warn};

/// Position of an entry in the log. The entry before the first is `-1`.
pub type LogIndex = i64;

/// Leader term.
pub type Term = u64;

/// Log position metadata sent by the leader with every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartBeat {
    pub leader: NodeId,
    pub term: Term,
    /// Index of the entry preceding the new one.
    pub prev_log_index: LogIndex,
    /// Index of the new entry.
    pub log_index: LogIndex,
}

/// Request to append a command to the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendRpc {
    pub heartbeat: HeartBeat,
    pub command: Command,
}

/// A log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub term: Term,
    pub index: LogIndex,
    pub command: Command,
    pub committed: bool,
}

/// Ordered log of commands with a commit cursor.
#[derive(Debug, Default)]
pub struct StateMachine {
    node_id: NodeId,
    /// Lowest index not yet committed.
    commit_index: LogIndex,
    entries: Vec<LogEntry>,
}

impl StateMachine {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            commit_index: 0,
            entries: Vec::new(),
        }
    }

    pub fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check the heartbeat against the log and drop any divergent suffix.
    ///
    /// After a successful call the log holds no entry past `prev_log_index`,
    /// ready for the new entry to be appended. A follower that missed
    /// entries while it was out of the protocol keeps what it has and
    /// resumes from the leader's position.
    pub fn verify(&mut self, heartbeat: &HeartBeat) -> Result<()> {
        let Some(last) = self.entries.last() else {
            return Ok(());
        };

        if last.term > heartbeat.term {
            return Err(ConsensusError::StaleTerm {
                current: last.term,
                received: heartbeat.term,
            }
            .into());
        }

        if heartbeat.prev_log_index < 0 {
            debug!(node_id = self.node_id, dropped = self.entries.len(), "Truncating whole log");
            self.entries.clear();
            return Ok(());
        }

        let matched = self.entries.iter().rposition(|entry| {
            entry.index == heartbeat.prev_log_index && entry.term == heartbeat.term
        });
        let keep = match matched {
            Some(position) => position + 1,
            None => {
                debug!(
                    node_id = self.node_id,
                    prev_log_index = heartbeat.prev_log_index,
                    last_index = last.index,
                    "No entry at leader position, resuming from it"
                );
                self.entries
                    .iter()
                    .rposition(|entry| entry.index <= heartbeat.prev_log_index)
                    .map_or(0, |position| position + 1)
            }
        };

        let dropped = self.entries.len() - keep;
        if dropped > 0 {
            debug!(
                node_id = self.node_id,
                prev_log_index = heartbeat.prev_log_index,
                dropped,
                "Truncating divergent entries"
            );
            self.entries.truncate(keep);
        }
        Ok(())
    }

    /// Append an uncommitted entry.
    pub fn append(&mut self, rpc: AppendRpc) {
        self.entries.push(LogEntry {
            term: rpc.heartbeat.term,
            index: rpc.heartbeat.log_index,
            command: rpc.command,
            committed: false,
        });
    }

    /// Apply every entry from the commit cursor up to `heartbeat.log_index`.
    ///
    /// Stops at the first command the storage rejects, leaving the cursor
    /// on that entry.
    pub async fn commit(&mut self, heartbeat: &HeartBeat, storage: &dyn Storage) -> Result<()> {
        for entry in self.entries.iter_mut() {
            if entry.index < self.commit_index || entry.index > heartbeat.log_index {
                continue;
            }
            if let Err(err) = execute(storage, &entry.command).await {
                warn!(
                    node_id = self.node_id,
                    index = entry.index,
                    error = %err,
                    "Failed to apply log entry"
                );
                self.commit_index = entry.index;
                return Err(err);
            }
            entry.committed = true;
        }

        self.commit_index = heartbeat.log_index + 1;
        debug!(
            node_id = self.node_id,
            term = heartbeat.term,
            commit_index = self.commit_index,
            "Committed log"
        );
        Ok(())
    }
}
