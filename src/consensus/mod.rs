//! Two-phase consensus engine.
//!
//! Writes that need coordination go through a four-step handshake:
//!
//! ```text
//!  initiator                         peers
//!  ─────────                         ─────
//!  initiate(element) ── Propose ──►  propose()   ┐
//!                    ◄── Promise ──              │ Phase1
//!  [quorum reached]                              ┘
//!  promise()         ── Commit  ──►  commit()    ┐
//!                    ◄── Confirm ──              │ Phase2
//!  [quorum reached]                              ┘
//!  confirm()
//! ```
//!
//! The engine is generic over a [`Protocol`], which supplies the four
//! handlers. Raft log replication and Paxos proposals are the two
//! implementations shipped with the crate; [`NoProtocol`] writes locally
//! without any coordination.

pub mod coordinator;
pub mod paxos;
pub mod quorum;
pub mod raft;

pub use coordinator::Coordinator;
pub use paxos::PaxosProtocol;
pub use quorum::{ConsensusCounter, PhaseOutcome};
pub use raft::RaftProtocol;

use crate::error::{Error, Result};
use crate::storage::Storage;
use crate::types::{Element, MessageId, NodeId};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Synchronisation point of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Propose / Promise.
    Phase1,
    /// Commit / Confirm.
    Phase2,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Phase1 => write!(f, "phase1"),
            Phase::Phase2 => write!(f, "phase2"),
        }
    }
}

/// Kind of internal message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgType {
    Propose,
    Promise,
    Commit,
    Confirm,
}

impl MsgType {
    /// The message kind that answers this one.
    ///
    /// Confirm closes the handshake and wraps back to Propose.
    pub fn next(self) -> MsgType {
        match self {
            MsgType::Propose => MsgType::Promise,
            MsgType::Promise => MsgType::Commit,
            MsgType::Commit => MsgType::Confirm,
            MsgType::Confirm => MsgType::Propose,
        }
    }

    /// The phase this message kind belongs to.
    pub fn phase(self) -> Phase {
        match self {
            MsgType::Propose | MsgType::Promise => Phase::Phase1,
            MsgType::Commit | MsgType::Confirm => Phase::Phase2,
        }
    }
}

/// Error carried inside a message from one node to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolFault(pub String);

impl fmt::Display for ProtocolFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&Error> for ProtocolFault {
    fn from(err: &Error) -> Self {
        ProtocolFault(err.to_string())
    }
}

/// An internal message exchanged between nodes.
#[derive(Debug, Clone)]
pub struct Message<R> {
    /// Correlation id, unique per source node.
    pub id: MessageId,
    /// Node that sent the message.
    pub source: NodeId,
    /// Node that initiated the handshake; responses are routed back to it.
    pub routing_id: NodeId,
    pub kind: MsgType,
    pub signal: Phase,
    pub content: Option<R>,
    pub error: Option<ProtocolFault>,
}

impl<R> Message<R> {
    /// Create a request originating at `source`.
    pub fn request(id: MessageId, source: NodeId, kind: MsgType, content: R) -> Self {
        Self {
            id,
            source,
            routing_id: source,
            kind,
            signal: kind.phase(),
            content: Some(content),
            error: None,
        }
    }

    /// Build the response `responder` sends back for this request.
    pub fn respond(&self, responder: NodeId, result: Result<R>) -> Message<R> {
        let kind = self.kind.next();
        let (content, error) = match result {
            Ok(content) => (Some(content), None),
            Err(err) => (None, Some(ProtocolFault::from(&err))),
        };
        Message {
            id: self.id,
            source: responder,
            routing_id: self.source,
            kind,
            signal: kind.phase(),
            content,
            error,
        }
    }

    /// Whether the message acknowledges without error.
    pub fn is_ack(&self) -> bool {
        self.error.is_none()
    }
}

/// What the initiator should do with a write.
#[derive(Debug, Clone, PartialEq)]
pub enum Initiation<R> {
    /// No coordination needed: write straight to local storage.
    Local,
    /// Run the handshake with this payload.
    Coordinate(R),
}

/// Algorithm-specific handlers plugged into the two-phase engine.
///
/// One instance is built per node at assembly time and owns that node's
/// protocol state.
#[async_trait]
pub trait Protocol: Send + Sync + 'static {
    /// Payload carried by this protocol's messages.
    type Rpc: Clone + Send + Sync + fmt::Debug + 'static;

    /// Prepare a write on the initiating node.
    async fn initiate(&self, element: Element) -> Result<Initiation<Self::Rpc>>;

    /// Peer side of phase 1: answer a Propose with a Promise payload.
    async fn propose(&self, rpc: Self::Rpc) -> Result<Self::Rpc>;

    /// Initiator side of phase 1: build the Commit payload once a quorum promised.
    async fn promise(&self, rpc: Self::Rpc) -> Result<Self::Rpc>;

    /// Peer side of phase 2: answer a Commit with a Confirm payload.
    async fn commit(&self, rpc: Self::Rpc) -> Result<Self::Rpc>;

    /// Initiator side of phase 2: finish the write once a quorum confirmed.
    async fn confirm(&self, rpc: Self::Rpc) -> Result<()>;
}

/// Builds the protocol instance of a node around its storage.
pub type ProtocolFactory<P> = Arc<dyn Fn(NodeId, Arc<dyn Storage>) -> P + Send + Sync>;

/// Protocol without inter-node communication.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProtocol;

impl NoProtocol {
    /// Factory for clusters without coordination.
    pub fn factory() -> ProtocolFactory<NoProtocol> {
        Arc::new(|_, _| NoProtocol)
    }
}

#[async_trait]
impl Protocol for NoProtocol {
    type Rpc = ();

    async fn initiate(&self, _element: Element) -> Result<Initiation<()>> {
        Ok(Initiation::Local)
    }

    async fn propose(&self, _rpc: ()) -> Result<()> {
        Ok(())
    }

    async fn promise(&self, _rpc: ()) -> Result<()> {
        Ok(())
    }

    async fn commit(&self, _rpc: ()) -> Result<()> {
        Ok(())
    }

    async fn confirm(&self, _rpc: ()) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;

    #[test]
    fn test_msg_type_sequence() {
        assert_eq!(MsgType::Propose.next(), MsgType::Promise);
        assert_eq!(MsgType::Promise.next(), MsgType::Commit);
        assert_eq!(MsgType::Commit.next(), MsgType::Confirm);
        assert_eq!(MsgType::Confirm.next(), MsgType::Propose);

        assert_eq!(MsgType::Propose.phase(), Phase::Phase1);
        assert_eq!(MsgType::Promise.phase(), Phase::Phase1);
        assert_eq!(MsgType::Commit.phase(), Phase::Phase2);
        assert_eq!(MsgType::Confirm.phase(), Phase::Phase2);
    }

    #[test]
    fn test_respond_routes_back_to_source() {
        let request = Message::request(7, 2, MsgType::Propose, "payload");
        assert_eq!(request.routing_id, 2);
        assert_eq!(request.signal, Phase::Phase1);

        let ack = request.respond(5, Ok("promised"));
        assert_eq!(ack.id, 7);
        assert_eq!(ack.source, 5);
        assert_eq!(ack.routing_id, 2);
        assert_eq!(ack.kind, MsgType::Promise);
        assert_eq!(ack.signal, Phase::Phase1);
        assert!(ack.is_ack());

        let commit = Message::request(8, 2, MsgType::Commit, "payload");
        let nack = commit.respond(5, Err(StorageError::Closed.into()));
        assert_eq!(nack.kind, MsgType::Confirm);
        assert_eq!(nack.signal, Phase::Phase2);
        assert!(!nack.is_ack());
        assert!(nack.content.is_none());
        assert_eq!(
            nack.error,
            Some(ProtocolFault("storage error: storage closed".to_string()))
        );
    }

    #[tokio::test]
    async fn test_no_protocol_writes_locally() {
        let protocol = NoProtocol;
        let initiation = protocol
            .initiate(Element::new("key", "value"))
            .await
            .unwrap();
        assert_eq!(initiation, Initiation::Local);
    }
}
