//! Error types for the cluster emulator.

use crate::consensus::Phase;
use crate::types::NodeId;
use thiserror::Error;

/// Result type alias for cluster operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the cluster emulator.
#[derive(Error, Debug)]
pub enum Error {
    /// Routing errors.
    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    /// Consensus errors.
    #[error("consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    /// Storage errors.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A client write could not be served by the cluster.
    #[error("error during put action: {0}")]
    Put(#[source] Box<Error>),

    /// A client read could not be served by the cluster.
    #[error("error during get action: {0}")]
    Get(#[source] Box<Error>),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// The cluster has been closed.
    #[error("operation cancelled")]
    Cancelled,

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error was caused by a routing failure.
    pub fn is_routing(&self) -> bool {
        match self {
            Error::Routing(_) => true,
            Error::Put(inner) | Error::Get(inner) => inner.is_routing(),
            _ => false,
        }
    }

    /// Check if this error was caused by a consensus failure.
    pub fn is_consensus(&self) -> bool {
        match self {
            Error::Consensus(_) => true,
            Error::Put(inner) | Error::Get(inner) => inner.is_consensus(),
            _ => false,
        }
    }

    /// Check if this error means the key was never stored.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Storage(StorageError::NotFound) => true,
            Error::Put(inner) | Error::Get(inner) => inner.is_not_found(),
            _ => false,
        }
    }
}

/// Key routing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// The switch has no registered members.
    #[error("no members")]
    NoMembers,

    /// Every candidate for the key is currently suppressed.
    #[error("node {0} is not responding")]
    NodeNotResponding(NodeId),

    /// The switch routed to a node the cluster does not know about.
    #[error("unknown member: {0}")]
    UnknownMember(NodeId),
}

/// Consensus and replication errors.
#[derive(Error, Debug)]
pub enum ConsensusError {
    /// No phase signal arrived before the phase timeout.
    #[error("could not get consensus from cluster during {phase}")]
    Timeout { phase: Phase },

    /// Enough peers rejected the phase that the quorum can no longer be reached.
    #[error("quorum unreachable during {phase}: {rejections} rejections, last: {reason}")]
    QuorumUnreachable {
        phase: Phase,
        rejections: usize,
        reason: String,
    },

    /// The incoming term is older than the last log entry's term.
    #[error("stale term received: current {current}, received {received}")]
    StaleTerm { current: u64, received: u64 },

    /// A newer proposal has already been recorded for the key.
    #[error("a higher index '{existing}' already exists for key (received '{received}')")]
    HigherIndex { existing: u64, received: u64 },

    /// A commit referenced a key with no recorded proposal.
    #[error("no proposal recorded for key")]
    MissingProposal,

    /// A handler received a payload it cannot process.
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    /// A peer rejected the request.
    #[error("node {node} rejected the request: {reason}")]
    Rejected { node: NodeId, reason: String },

    /// The prepare phase (propose/promise) failed.
    #[error("could not complete prepare phase: {0}")]
    Prepare(#[source] Box<Error>),

    /// The commit phase (commit/confirm) failed.
    #[error("could not complete commit phase: {0}")]
    Commit(#[source] Box<Error>),
}

impl ConsensusError {
    /// Wrap an error with prepare-phase context.
    pub fn prepare(err: impl Into<Error>) -> Self {
        ConsensusError::Prepare(Box::new(err.into()))
    }

    /// Wrap an error with commit-phase context.
    pub fn commit(err: impl Into<Error>) -> Self {
        ConsensusError::Commit(Box::new(err.into()))
    }
}

/// Storage layer errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// No element is stored under the key.
    #[error("no value for key")]
    NotFound,

    /// The storage has been closed.
    #[error("storage closed")]
    Closed,

    /// Failure reported by the backing implementation.
    #[error("backend error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Routing(RoutingError::NodeNotResponding(3));
        assert_eq!(err.to_string(), "routing error: node 3 is not responding");

        let err = Error::Storage(StorageError::NotFound);
        assert_eq!(err.to_string(), "storage error: no value for key");

        let err = ConsensusError::Timeout { phase: Phase::Phase1 };
        assert!(err.to_string().contains("could not get consensus from cluster"));
    }

    #[test]
    fn test_stage_wrapping() {
        let inner = ConsensusError::Timeout { phase: Phase::Phase1 };
        let err: Error = ConsensusError::prepare(inner).into();
        let message = err.to_string();
        assert!(message.contains("could not complete prepare phase"));
        assert!(err.is_consensus());

        let err: Error = ConsensusError::commit(StorageError::Closed).into();
        assert!(err.to_string().contains("could not complete commit phase"));
    }

    #[test]
    fn test_classification_through_facade() {
        let err = Error::Get(Box::new(RoutingError::NoMembers.into()));
        assert!(err.is_routing());
        assert!(!err.is_not_found());
        assert!(err.to_string().starts_with("error during get action"));

        let err = Error::Get(Box::new(StorageError::NotFound.into()));
        assert!(err.is_not_found());
    }
}
