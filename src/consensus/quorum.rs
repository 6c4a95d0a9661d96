//! Acknowledgement counting for in-flight handshakes.
//!
//! Each node owns one [`ConsensusCounter`]. Before broadcasting a request
//! the coordinator registers the message id with the number of peer
//! acknowledgements it needs, and receives a one-shot receiver that fires
//! exactly once: when the quorum is reached, or when so many peers rejected
//! the request that it can no longer be reached. The entry is removed as
//! soon as it fires, or when the waiter gives up and calls
//! [`ConsensusCounter::forget`].

use super::{Message, Phase};
use crate::types::{MessageId, NodeId};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

/// Outcome of a phase, delivered to the waiting coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// Enough peers acknowledged.
    Reached { phase: Phase, acks: usize },
    /// Enough peers rejected that the quorum cannot be reached.
    Unreachable {
        phase: Phase,
        rejections: usize,
        last_error: String,
    },
}

struct Tally {
    phase: Phase,
    remaining: usize,
    acks: usize,
    rejections: usize,
    tolerated: usize,
    notify: oneshot::Sender<PhaseOutcome>,
}

/// Per-node map of in-flight handshakes keyed by message id.
#[derive(Default)]
pub struct ConsensusCounter {
    node_id: NodeId,
    pending: Mutex<HashMap<MessageId, Tally>>,
}

impl ConsensusCounter {
    /// Create a counter for a node.
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Start counting responses for message `id`.
    ///
    /// `required` acknowledgements out of `peers` recipients are needed.
    /// When nothing is required the returned receiver is already resolved.
    pub fn expect(
        &self,
        id: MessageId,
        phase: Phase,
        required: usize,
        peers: usize,
    ) -> oneshot::Receiver<PhaseOutcome> {
        let (tx, rx) = oneshot::channel();
        let required = required.min(peers);

        if required == 0 {
            let _ = tx.send(PhaseOutcome::Reached { phase, acks: 0 });
            return rx;
        }

        trace!(node_id = self.node_id, msg_id = id, %phase, required, peers, "Awaiting quorum");
        self.pending.lock().insert(
            id,
            Tally {
                phase,
                remaining: required,
                acks: 0,
                rejections: 0,
                tolerated: peers - required,
                notify: tx,
            },
        );
        rx
    }

    /// Count a response.
    ///
    /// Responses for unknown or already decided ids are ignored.
    pub fn record<R>(&self, msg: &Message<R>) {
        let mut pending = self.pending.lock();
        let Some(tally) = pending.get_mut(&msg.id) else {
            trace!(
                node_id = self.node_id,
                msg_id = msg.id,
                source = msg.source,
                "Ignoring response for settled handshake"
            );
            return;
        };

        if tally.phase != msg.signal {
            warn!(
                node_id = self.node_id,
                msg_id = msg.id,
                expected = %tally.phase,
                received = %msg.signal,
                "Response for unexpected phase"
            );
            return;
        }

        let outcome = match &msg.error {
            None => {
                tally.acks += 1;
                tally.remaining -= 1;
                (tally.remaining == 0).then_some(PhaseOutcome::Reached {
                    phase: tally.phase,
                    acks: tally.acks,
                })
            }
            Some(fault) => {
                tally.rejections += 1;
                warn!(
                    node_id = self.node_id,
                    msg_id = msg.id,
                    source = msg.source,
                    error = %fault,
                    "Peer rejected request"
                );
                (tally.rejections > tally.tolerated).then(|| PhaseOutcome::Unreachable {
                    phase: tally.phase,
                    rejections: tally.rejections,
                    last_error: fault.to_string(),
                })
            }
        };

        if let Some(outcome) = outcome {
            if let Some(tally) = pending.remove(&msg.id) {
                debug!(node_id = self.node_id, msg_id = msg.id, ?outcome, "Phase decided");
                let _ = tally.notify.send(outcome);
            }
        }
    }

    /// Drop the entry for `id` without signalling.
    pub fn forget(&self, id: MessageId) {
        self.pending.lock().remove(&id);
    }

    /// Number of undecided handshakes.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::{MsgType, ProtocolFault};
    use tokio::sync::oneshot::error::TryRecvError;

    fn ack(id: MessageId, source: NodeId, kind: MsgType) -> Message<()> {
        Message {
            id,
            source,
            routing_id: 0,
            kind,
            signal: kind.phase(),
            content: Some(()),
            error: None,
        }
    }

    fn nack(id: MessageId, source: NodeId, kind: MsgType) -> Message<()> {
        Message {
            content: None,
            error: Some(ProtocolFault("stale".to_string())),
            ..ack(id, source, kind)
        }
    }

    #[test]
    fn test_signals_once_quorum_reached() {
        let counter = ConsensusCounter::new(0);
        let mut rx = counter.expect(1, Phase::Phase1, 2, 3);

        counter.record(&ack(1, 1, MsgType::Promise));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

        counter.record(&ack(1, 2, MsgType::Promise));
        assert_eq!(
            rx.try_recv(),
            Ok(PhaseOutcome::Reached {
                phase: Phase::Phase1,
                acks: 2
            })
        );
        assert_eq!(counter.in_flight(), 0);

        // late response is ignored
        counter.record(&ack(1, 3, MsgType::Promise));
        assert_eq!(counter.in_flight(), 0);
    }

    #[test]
    fn test_rejections_do_not_count_as_acks() {
        let counter = ConsensusCounter::new(0);
        let mut rx = counter.expect(4, Phase::Phase2, 2, 4);

        counter.record(&nack(4, 1, MsgType::Confirm));
        counter.record(&ack(4, 2, MsgType::Confirm));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

        counter.record(&ack(4, 3, MsgType::Confirm));
        assert!(matches!(
            rx.try_recv(),
            Ok(PhaseOutcome::Reached { acks: 2, .. })
        ));
    }

    #[test]
    fn test_fails_fast_when_quorum_unreachable() {
        let counter = ConsensusCounter::new(0);
        let mut rx = counter.expect(9, Phase::Phase1, 3, 3);

        counter.record(&ack(9, 1, MsgType::Promise));
        counter.record(&nack(9, 2, MsgType::Promise));

        match rx.try_recv() {
            Ok(PhaseOutcome::Unreachable {
                phase,
                rejections,
                last_error,
            }) => {
                assert_eq!(phase, Phase::Phase1);
                assert_eq!(rejections, 1);
                assert_eq!(last_error, "stale");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(counter.in_flight(), 0);
    }

    #[test]
    fn test_nothing_required_resolves_immediately() {
        let counter = ConsensusCounter::new(0);
        let mut rx = counter.expect(1, Phase::Phase1, 0, 0);
        assert!(matches!(
            rx.try_recv(),
            Ok(PhaseOutcome::Reached { acks: 0, .. })
        ));
        assert_eq!(counter.in_flight(), 0);
    }

    #[test]
    fn test_handshakes_are_independent() {
        let counter = ConsensusCounter::new(0);
        let mut first = counter.expect(1, Phase::Phase1, 1, 2);
        let mut second = counter.expect(2, Phase::Phase1, 1, 2);

        counter.record(&ack(2, 1, MsgType::Promise));
        assert_eq!(first.try_recv(), Err(TryRecvError::Empty));
        assert!(second.try_recv().is_ok());
        assert_eq!(counter.in_flight(), 1);

        counter.forget(1);
        assert_eq!(counter.in_flight(), 0);
        assert_eq!(first.try_recv(), Err(TryRecvError::Closed));
    }

    #[test]
    fn test_wrong_phase_is_ignored() {
        let counter = ConsensusCounter::new(0);
        let mut rx = counter.expect(3, Phase::Phase2, 1, 1);
        counter.record(&ack(3, 1, MsgType::Promise));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        counter.record(&ack(3, 1, MsgType::Confirm));
        assert!(rx.try_recv().is_ok());
    }
}
