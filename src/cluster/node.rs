//! Node actor: one storage, one protocol instance, two worker loops.
//!
//! ```text
//!              ┌──────────────── Node ────────────────┐
//!  client ───► │ ops queue ──► operation loop          │
//!  metadata ─► │ meta queue ─┘   │ put → Coordinator   │
//!              │                 │ get → Storage       │
//!  fabric ───► │ inbox ──────► protocol loop           │
//!              │                 propose / commit      │
//!              └──────────────────────────────────────┘
//! ```
//!
//! Both loops stop when the cluster's cancellation token fires. The
//! operation loop closes the node's storage on the way out.

use super::Fabric;
use crate::config::NetworkConfig;
use crate::consensus::{ConsensusCounter, Coordinator, Message, MsgType, Protocol};
use crate::error::{ConsensusError, Error, Result};
use crate::metrics::NetworkMetrics;
use crate::storage::Storage;
use crate::types::{Command, Metadata, NodeId, Response};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// A client command waiting for its reply.
struct Operation {
    command: Command,
    reply: oneshot::Sender<Result<Response>>,
}

type MetaRequest = oneshot::Sender<Result<Metadata>>;

/// Client-side handle to a running node.
pub struct NodeHandle<P: Protocol> {
    id: NodeId,
    ops: mpsc::Sender<Operation>,
    meta: mpsc::Sender<MetaRequest>,
    inbox: mpsc::Sender<Message<P::Rpc>>,
    protocol: Arc<P>,
}

impl<P: Protocol> NodeHandle<P> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The node's protocol instance.
    pub fn protocol(&self) -> &Arc<P> {
        &self.protocol
    }

    /// Run a client command on the node and wait for its result.
    pub async fn execute(&self, command: Command) -> Result<Response> {
        let (reply, rx) = oneshot::channel();
        self.ops
            .send(Operation { command, reply })
            .await
            .map_err(|_| Error::Cancelled)?;
        rx.await.map_err(|_| Error::Cancelled)?
    }

    /// Ask the node for its storage metadata.
    pub async fn metadata(&self) -> Result<Metadata> {
        let (reply, rx) = oneshot::channel();
        self.meta.send(reply).await.map_err(|_| Error::Cancelled)?;
        rx.await.map_err(|_| Error::Cancelled)?
    }

    /// Put an internal message on the node's protocol queue.
    pub async fn deliver(&self, msg: Message<P::Rpc>) -> Result<()> {
        self.inbox.send(msg).await.map_err(|_| Error::Cancelled)
    }
}

impl<P: Protocol> Clone for NodeHandle<P> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            ops: self.ops.clone(),
            meta: self.meta.clone(),
            inbox: self.inbox.clone(),
            protocol: self.protocol.clone(),
        }
    }
}

/// Worker state shared by a node's two loops.
pub struct Node<P: Protocol> {
    id: NodeId,
    storage: Arc<dyn Storage>,
    protocol: Arc<P>,
    coordinator: Coordinator<P>,
    fabric: Arc<Fabric<P::Rpc>>,
    cancel: CancellationToken,
}

impl<P: Protocol> Node<P> {
    /// Start the worker loops of a node.
    ///
    /// `inbox` is the node's end of the protocol queue whose sender the
    /// fabric already holds.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        id: NodeId,
        storage: Arc<dyn Storage>,
        protocol: Arc<P>,
        fabric: Arc<Fabric<P::Rpc>>,
        counter: Arc<ConsensusCounter>,
        inbox: (mpsc::Sender<Message<P::Rpc>>, mpsc::Receiver<Message<P::Rpc>>),
        config: &NetworkConfig,
        metrics: Arc<NetworkMetrics>,
        cancel: CancellationToken,
    ) -> (NodeHandle<P>, Vec<JoinHandle<()>>) {
        let (ops_tx, ops_rx) = mpsc::channel(config.queue_depth);
        let (meta_tx, meta_rx) = mpsc::channel(config.queue_depth);
        let (inbox_tx, inbox_rx) = inbox;

        let coordinator = Coordinator::new(
            id,
            protocol.clone(),
            storage.clone(),
            fabric.clone(),
            counter,
            config.consensus.clone(),
            metrics,
        );
        let node = Arc::new(Node {
            id,
            storage,
            protocol: protocol.clone(),
            coordinator,
            fabric,
            cancel,
        });

        let tasks = vec![
            tokio::spawn(node.clone().run_operations(ops_rx, meta_rx)),
            tokio::spawn(node.run_protocol(inbox_rx)),
        ];
        debug!(node_id = id, "Node started");

        let handle = NodeHandle {
            id,
            ops: ops_tx,
            meta: meta_tx,
            inbox: inbox_tx,
            protocol,
        };
        (handle, tasks)
    }

    async fn run_operations(
        self: Arc<Self>,
        mut ops: mpsc::Receiver<Operation>,
        mut meta: mpsc::Receiver<MetaRequest>,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                Some(op) = ops.recv() => {
                    let result = tokio::select! {
                        _ = self.cancel.cancelled() => Err(Error::Cancelled),
                        result = self.apply(&op.command) => result,
                    };
                    if let Err(err) = &result {
                        debug!(node_id = self.id, command = op.command.name(), error = %err, "Command failed");
                    }
                    let _ = op.reply.send(result);
                }
                Some(reply) = meta.recv() => {
                    let _ = reply.send(self.storage.metadata().await);
                }
                else => break,
            }
        }

        if let Err(err) = self.storage.close().await {
            warn!(node_id = self.id, error = %err, "Failed to close storage");
        }
        info!(node_id = self.id, "Operation loop stopped");
    }

    async fn apply(&self, command: &Command) -> Result<Response> {
        match command {
            Command::Put(element) => {
                self.coordinator.put(element.clone()).await?;
                Ok(Response::Stored)
            }
            Command::Get(key) => self.storage.get(key).await.map(Response::Found),
        }
    }

    async fn run_protocol(self: Arc<Self>, mut inbox: mpsc::Receiver<Message<P::Rpc>>) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                msg = inbox.recv() => match msg {
                    Some(msg) => self.handle_message(msg).await,
                    None => break,
                },
            }
        }
        info!(node_id = self.id, "Protocol loop stopped");
    }

    /// Answer a request from another node.
    async fn handle_message(&self, msg: Message<P::Rpc>) {
        trace!(node_id = self.id, msg_id = msg.id, source = msg.source, kind = ?msg.kind, "Received message");

        let Some(content) = msg.content.clone() else {
            let err = ConsensusError::UnexpectedMessage(format!("{:?} without content", msg.kind));
            self.fabric.respond(msg.respond(self.id, Err(err.into())));
            return;
        };

        let result = match msg.kind {
            MsgType::Propose => self.protocol.propose(content).await,
            MsgType::Commit => self.protocol.commit(content).await,
            MsgType::Promise | MsgType::Confirm => {
                warn!(
                    node_id = self.id,
                    msg_id = msg.id,
                    kind = ?msg.kind,
                    "Response delivered to protocol queue"
                );
                return;
            }
        };

        if let Err(err) = &result {
            debug!(node_id = self.id, msg_id = msg.id, kind = ?msg.kind, error = %err, "Handler rejected request");
        }
        self.fabric.respond(msg.respond(self.id, result));
    }
}
