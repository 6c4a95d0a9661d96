//! In-memory message router between node protocol loops.
//!
//! Requests (Propose, Commit) are fanned out to the live peers of the
//! initiator. Responses (Promise, Confirm) are routed back to the
//! initiator's consensus counter by `routing_id`.

use crate::consensus::{ConsensusCounter, Message};
use crate::error::Error;
use crate::types::NodeId;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Routes internal messages between nodes.
pub struct Fabric<R> {
    inboxes: Vec<mpsc::Sender<Message<R>>>,
    counters: Vec<Arc<ConsensusCounter>>,
    /// Nodes taking part in the protocol.
    live: RwLock<BTreeSet<NodeId>>,
}

impl<R: Clone + Send + 'static> Fabric<R> {
    /// Create a fabric over per-node inboxes and counters, indexed by node id.
    ///
    /// Every node starts live.
    pub fn new(inboxes: Vec<mpsc::Sender<Message<R>>>, counters: Vec<Arc<ConsensusCounter>>) -> Self {
        let live = (0..inboxes.len()).collect();
        Self {
            inboxes,
            counters,
            live: RwLock::new(live),
        }
    }

    /// Let a node take part in the protocol again.
    pub fn register(&self, id: NodeId) {
        if id < self.inboxes.len() && self.live.write().insert(id) {
            debug!(node_id = id, "Node rejoined the protocol");
        }
    }

    /// Stop delivering requests to a node and exclude it from quorums.
    pub fn deregister(&self, id: NodeId) {
        if self.live.write().remove(&id) {
            debug!(node_id = id, "Node left the protocol");
        }
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.live.read().contains(&id)
    }

    /// Live nodes other than `of`.
    pub fn live_peers(&self, of: NodeId) -> Vec<NodeId> {
        self.live.read().iter().copied().filter(|&id| id != of).collect()
    }

    /// Deliver a request to `peers`.
    ///
    /// A peer whose inbox is gone counts as a rejection, so the initiator
    /// does not wait for an answer that cannot come.
    pub async fn broadcast(&self, msg: Message<R>, peers: &[NodeId]) -> usize {
        let mut delivered = 0;
        for &peer in peers {
            let Some(inbox) = self.inboxes.get(peer) else {
                warn!(node_id = msg.source, peer, "Broadcast to unknown node");
                continue;
            };
            match inbox.send(msg.clone()).await {
                Ok(()) => delivered += 1,
                Err(_) => {
                    debug!(node_id = msg.source, peer, msg_id = msg.id, "Peer inbox closed");
                    self.respond(msg.respond(peer, Err(Error::Cancelled)));
                }
            }
        }
        trace!(
            node_id = msg.source,
            msg_id = msg.id,
            kind = ?msg.kind,
            delivered,
            "Broadcast request"
        );
        delivered
    }

    /// Route a response back to the node that initiated the handshake.
    pub fn respond(&self, msg: Message<R>) {
        match self.counters.get(msg.routing_id) {
            Some(counter) => counter.record(&msg),
            None => warn!(routing_id = msg.routing_id, "Response for unknown node"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{MsgType, Phase, PhaseOutcome};

    fn fabric(nodes: usize) -> (Fabric<u32>, Vec<mpsc::Receiver<Message<u32>>>) {
        let mut inboxes = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..nodes {
            let (tx, rx) = mpsc::channel(16);
            inboxes.push(tx);
            receivers.push(rx);
        }
        let counters = (0..nodes).map(|id| Arc::new(ConsensusCounter::new(id))).collect();
        (Fabric::new(inboxes, counters), receivers)
    }

    #[test]
    fn test_live_peers() {
        let (fabric, _rx) = fabric(4);
        assert_eq!(fabric.live_peers(0), vec![1, 2, 3]);

        fabric.deregister(2);
        assert!(!fabric.is_live(2));
        assert_eq!(fabric.live_peers(0), vec![1, 3]);
        assert_eq!(fabric.live_peers(2), vec![0, 1, 3]);

        fabric.register(2);
        fabric.register(9);
        assert_eq!(fabric.live_peers(3), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_broadcast_and_respond() {
        let (fabric, mut receivers) = fabric(3);
        let counter_rx = fabric.counters[0].expect(1, Phase::Phase1, 2, 2);

        let peers = fabric.live_peers(0);
        let delivered = fabric
            .broadcast(Message::request(1, 0, MsgType::Propose, 42), &peers)
            .await;
        assert_eq!(delivered, 2);
        assert!(receivers[0].try_recv().is_err());

        for peer in [1, 2] {
            let msg = receivers[peer].try_recv().unwrap();
            assert_eq!(msg.content, Some(42));
            fabric.respond(msg.respond(peer, Ok(43)));
        }

        assert_eq!(
            counter_rx.await.unwrap(),
            PhaseOutcome::Reached {
                phase: Phase::Phase1,
                acks: 2
            }
        );
    }

    #[tokio::test]
    async fn test_closed_inbox_counts_as_rejection() {
        let (fabric, mut receivers) = fabric(2);
        receivers[1].close();

        let counter_rx = fabric.counters[0].expect(5, Phase::Phase2, 1, 1);
        let delivered = fabric
            .broadcast(Message::request(5, 0, MsgType::Commit, 1), &[1])
            .await;
        assert_eq!(delivered, 0);
        assert!(matches!(
            counter_rx.await.unwrap(),
            PhaseOutcome::Unreachable { rejections: 1, .. }
        ));
    }
}
