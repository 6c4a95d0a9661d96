//! Initiator side of the two-phase handshake.

use super::{ConsensusCounter, Initiation, Message, MsgType, PhaseOutcome, Protocol};
use crate::cluster::Fabric;
use crate::config::ConsensusConfig;
use crate::error::{ConsensusError, Error, Result};
use crate::metrics::NetworkMetrics;
use crate::storage::Storage;
use crate::types::{Element, MessageId, NodeId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs client writes of one node through its protocol.
pub struct Coordinator<P: Protocol> {
    node_id: NodeId,
    protocol: Arc<P>,
    storage: Arc<dyn Storage>,
    fabric: Arc<Fabric<P::Rpc>>,
    counter: Arc<ConsensusCounter>,
    config: ConsensusConfig,
    metrics: Arc<NetworkMetrics>,
    next_id: AtomicU64,
}

impl<P: Protocol> Coordinator<P> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: NodeId,
        protocol: Arc<P>,
        storage: Arc<dyn Storage>,
        fabric: Arc<Fabric<P::Rpc>>,
        counter: Arc<ConsensusCounter>,
        config: ConsensusConfig,
        metrics: Arc<NetworkMetrics>,
    ) -> Self {
        Self {
            node_id,
            protocol,
            storage,
            fabric,
            counter,
            config,
            metrics,
            next_id: AtomicU64::new(0),
        }
    }

    /// Write an element, coordinating with the cluster when the protocol asks for it.
    pub async fn put(&self, element: Element) -> Result<()> {
        let rpc = match self.protocol.initiate(element.clone()).await? {
            Initiation::Local => return self.storage.put(element).await,
            Initiation::Coordinate(rpc) => rpc,
        };

        self.round(MsgType::Propose, rpc.clone())
            .await
            .map_err(ConsensusError::prepare)?;
        let commit = self
            .protocol
            .promise(rpc)
            .await
            .map_err(ConsensusError::prepare)?;

        self.round(MsgType::Commit, commit.clone())
            .await
            .map_err(ConsensusError::commit)?;
        self.protocol
            .confirm(commit)
            .await
            .map_err(ConsensusError::commit)?;

        Ok(())
    }

    fn next_message_id(&self) -> MessageId {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Broadcast a request and wait until its phase is decided.
    async fn round(&self, kind: MsgType, rpc: P::Rpc) -> Result<()> {
        let id = self.next_message_id();
        let phase = kind.phase();
        let peers = self.fabric.live_peers(self.node_id);
        let required = self.config.quorum.required_acks(peers.len());

        let rx = self.counter.expect(id, phase, required, peers.len());
        debug!(
            node_id = self.node_id,
            msg_id = id,
            %phase,
            peers = peers.len(),
            required,
            "Starting round"
        );
        self.fabric
            .broadcast(Message::request(id, self.node_id, kind, rpc), &peers)
            .await;

        tokio::select! {
            outcome = rx => match outcome {
                Ok(PhaseOutcome::Reached { acks, .. }) => {
                    debug!(node_id = self.node_id, msg_id = id, %phase, acks, "Quorum reached");
                    Ok(())
                }
                Ok(PhaseOutcome::Unreachable { phase, rejections, last_error }) => {
                    self.metrics.record_quorum_failure();
                    Err(ConsensusError::QuorumUnreachable {
                        phase,
                        rejections,
                        reason: last_error,
                    }
                    .into())
                }
                Err(_) => Err(Error::Cancelled),
            },
            _ = tokio::time::sleep(self.config.phase_timeout) => {
                self.counter.forget(id);
                self.metrics.record_consensus_timeout();
                warn!(
                    node_id = self.node_id,
                    msg_id = id,
                    %phase,
                    timeout_ms = self.config.phase_timeout.as_millis() as u64,
                    "Timeout waiting for quorum"
                );
                Err(ConsensusError::Timeout { phase }.into())
            }
        }
    }
}
