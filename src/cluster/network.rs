//! The cluster facade.
//!
//! A [`Network`] owns the nodes, their shared switch, the message fabric,
//! and the world clock, and exposes the whole cluster as a single
//! [`Storage`]. Client operations are routed through the switch (retrying
//! while the target is unresponsive) and executed on the selected nodes;
//! every routed operation advances the clock, which may apply the next
//! failure event.

use super::{Event, EventSchedule, Fabric, Node, NodeHandle, WorldClock};
use crate::config::NetworkConfig;
use crate::consensus::raft::{LogEntry, RaftProtocol};
use crate::consensus::{ConsensusCounter, NoProtocol, Protocol, ProtocolFactory};
use crate::error::{Error, Result, RoutingError};
use crate::metrics::{distribution_skew, NetworkMetrics};
use crate::partitioning::{Partition, SharedSwitch, SwitchFactory};
use crate::storage::{Storage, StorageFactory};
use crate::types::{Command, Element, Metadata, NodeId, Response};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Call `f` up to `iterations` times, returning its first success or its
/// last error. `f` receives the attempt number.
pub fn retry<T, F>(iterations: usize, mut f: F) -> Result<T>
where
    F: FnMut(usize) -> Result<T>,
{
    let mut attempt = 0;
    loop {
        match f(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if attempt + 1 >= iterations => return Err(err),
            Err(_) => attempt += 1,
        }
    }
}

/// Assembles a [`Network`].
///
/// ```rust,no_run
/// # async fn run() -> switchyard::Result<()> {
/// use switchyard::{NetworkBuilder, NodeDown, Partition, Storage, MemoryStorage, Element};
///
/// let network = NetworkBuilder::new()
///     .partition(Partition::Replica)
///     .storage(MemoryStorage::factory())
///     .nodes(5)
///     .event(NodeDown::new(2, 30))
///     .build()?;
///
/// network.put(Element::new("key", "value")).await?;
/// # Ok(())
/// # }
/// ```
pub struct NetworkBuilder<P: Protocol = NoProtocol> {
    router: Option<SwitchFactory>,
    storage: Option<StorageFactory>,
    protocol: ProtocolFactory<P>,
    events: Vec<Box<dyn Event>>,
    config: NetworkConfig,
}

impl NetworkBuilder<NoProtocol> {
    /// Start a builder for a cluster without inter-node coordination.
    pub fn new() -> Self {
        Self {
            router: None,
            storage: None,
            protocol: NoProtocol::factory(),
            events: Vec::new(),
            config: NetworkConfig::default(),
        }
    }
}

impl Default for NetworkBuilder<NoProtocol> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Protocol> NetworkBuilder<P> {
    /// Set the switch used to route client requests.
    pub fn router(mut self, router: SwitchFactory) -> Self {
        self.router = Some(router);
        self
    }

    /// Route with one of the built-in strategies.
    pub fn partition(self, partition: Partition) -> Self {
        self.router(partition.factory())
    }

    /// Set the storage created for every node.
    pub fn storage(mut self, storage: StorageFactory) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the number of nodes.
    pub fn nodes(mut self, nodes: usize) -> Self {
        self.config.nodes = nodes;
        self
    }

    /// Set the protocol the nodes run between each other.
    pub fn protocol<Q: Protocol>(self, protocol: ProtocolFactory<Q>) -> NetworkBuilder<Q> {
        NetworkBuilder {
            router: self.router,
            storage: self.storage,
            protocol,
            events: self.events,
            config: self.config,
        }
    }

    /// Schedule a failure event. Events are applied in the order added.
    pub fn event(mut self, event: impl Event + 'static) -> Self {
        self.events.push(Box::new(event));
        self
    }

    /// Replace the whole configuration, node count included.
    pub fn config(mut self, config: NetworkConfig) -> Self {
        self.config = config;
        self
    }

    /// Spawn the nodes and return the running cluster.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<Network<P>> {
        self.config.validate().map_err(Error::Config)?;
        let router = self.router.ok_or_else(|| {
            Error::Config("cannot create network without a routing implementation".to_string())
        })?;
        let storage = self.storage.ok_or_else(|| {
            Error::Config("cannot create network without a storage implementation".to_string())
        })?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::Config(
                "network must be built inside a tokio runtime".to_string(),
            ));
        }

        let config = self.config;
        let cancel = CancellationToken::new();
        let metrics = Arc::new(NetworkMetrics::new());

        let channels: Vec<_> = (0..config.nodes)
            .map(|_| mpsc::channel(config.queue_depth))
            .collect();
        let counters: Vec<_> = (0..config.nodes)
            .map(|id| Arc::new(ConsensusCounter::new(id)))
            .collect();
        let fabric = Arc::new(Fabric::new(
            channels.iter().map(|(tx, _)| tx.clone()).collect(),
            counters.clone(),
        ));

        let switch = SharedSwitch::new(router());
        let mut nodes = Vec::with_capacity(config.nodes);
        let mut tasks = Vec::with_capacity(config.nodes * 2);
        for (id, inbox) in channels.into_iter().enumerate() {
            let node_storage = storage(id);
            let protocol = Arc::new((self.protocol)(id, node_storage.clone()));
            let (handle, node_tasks) = Node::spawn(
                id,
                node_storage,
                protocol,
                fabric.clone(),
                counters[id].clone(),
                inbox,
                &config,
                metrics.clone(),
                cancel.clone(),
            );
            switch.register(id);
            nodes.push(handle);
            tasks.extend(node_tasks);
        }

        let clock = WorldClock::new(EventSchedule::new(config.warm_up, self.events));
        info!(
            nodes = config.nodes,
            warm_up = config.warm_up,
            scheduled_events = clock.schedule().pending(),
            "Network started"
        );

        Ok(Network {
            switch,
            clock: Mutex::new(clock),
            outage: Mutex::new(None),
            fabric,
            nodes,
            config,
            metrics,
            cancel,
            tasks: Mutex::new(tasks),
        })
    }
}

/// A node kept out of the protocol by the active event.
#[derive(Debug, Clone, Copy)]
struct Outage {
    target: NodeId,
    /// Clock cycles left before the target rejoins.
    remaining: usize,
}

/// A simulated cluster usable as a single [`Storage`].
pub struct Network<P: Protocol = NoProtocol> {
    switch: SharedSwitch,
    clock: Mutex<WorldClock>,
    outage: Mutex<Option<Outage>>,
    fabric: Arc<Fabric<P::Rpc>>,
    nodes: Vec<NodeHandle<P>>,
    config: NetworkConfig,
    metrics: Arc<NetworkMetrics>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<P: Protocol> Network<P> {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<NetworkMetrics> {
        &self.metrics
    }

    /// Members currently known to the switch.
    pub fn members(&self) -> Vec<NodeId> {
        self.switch.members()
    }

    /// Make a node routable.
    pub fn register(&self, id: NodeId) -> Result<()> {
        if id >= self.nodes.len() {
            return Err(RoutingError::UnknownMember(id).into());
        }
        self.switch.register(id);
        Ok(())
    }

    /// Stop routing to a node.
    pub fn deregister(&self, id: NodeId) {
        self.switch.deregister(id);
    }

    /// Whether a node currently takes part in consensus.
    pub fn is_live(&self, id: NodeId) -> bool {
        self.fabric.is_live(id)
    }

    /// Protocol instance of a node.
    pub fn protocol(&self, id: NodeId) -> Option<&Arc<P>> {
        self.nodes.get(id).map(|node| node.protocol())
    }

    /// Number of elements stored on each node, by node id.
    ///
    /// Nodes that fail to report count as empty.
    pub async fn distribution(&self) -> Vec<usize> {
        let mut counts = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            counts.push(node.metadata().await.map(|meta| meta.size).unwrap_or_default());
        }
        counts
    }

    fn check_open(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn node(&self, id: NodeId) -> Result<&NodeHandle<P>> {
        self.nodes
            .get(id)
            .ok_or_else(|| RoutingError::UnknownMember(id).into())
    }

    /// Resolve the targets of a key, retrying while routing fails.
    fn route(&self, key: &[u8]) -> Result<Vec<NodeId>> {
        retry(self.config.route_retries, |attempt| {
            self.switch.route(key).inspect_err(|err| {
                self.metrics.record_route_retry();
                debug!(attempt, error = %err, "Routing failed");
            })
        })
    }

    /// Advance the world clock by one cycle.
    ///
    /// An event keeps its target out of the protocol until the event is
    /// exhausted or its window of clock cycles has passed, whichever comes
    /// first. Targets that are never routed to rejoin through the window.
    fn tick(&self) {
        if let Some(target) = self.switch.clear_exhausted() {
            self.rejoin(target);
            self.metrics.record_event_expired();
        }
        self.age_outage();

        let due = self.clock.lock().tick();
        if let Some(event) = due {
            if let Some(previous) = self.switch.active_event() {
                self.rejoin(previous);
            }
            let target = event.target();
            let remaining = event.window();
            self.switch.apply(event);
            self.fabric.deregister(target);
            *self.outage.lock() = Some(Outage { target, remaining });
            self.metrics.record_event_applied();
        }
    }

    fn rejoin(&self, target: NodeId) {
        let mut outage = self.outage.lock();
        if outage.as_ref().is_some_and(|current| current.target == target) {
            *outage = None;
        }
        self.fabric.register(target);
    }

    fn age_outage(&self) {
        let mut outage = self.outage.lock();
        let Some(current) = outage.as_mut() else {
            return;
        };
        current.remaining = current.remaining.saturating_sub(1);
        if current.remaining == 0 {
            let target = current.target;
            *outage = None;
            debug!(node_id = target, "Outage window elapsed");
            self.fabric.register(target);
        }
    }

    async fn put_element(&self, element: Element) -> Result<()> {
        self.check_open()?;
        let targets = self
            .route(&element.key)
            .map_err(|err| Error::Put(Box::new(err)))?;

        let command = Command::put(element);
        let mut stored = false;
        let mut last_error = None;
        for id in targets {
            match self.node(id)?.execute(command.clone()).await {
                Ok(_) => stored = true,
                Err(err) => {
                    info!(node_id = id, error = %err, "Node failed to store element");
                    last_error = Some(err);
                }
            }
        }
        self.tick();

        match last_error {
            Some(err) if !stored => Err(err),
            _ => Ok(()),
        }
    }

    async fn get_element(&self, key: &[u8]) -> Result<Element> {
        self.check_open()?;
        let targets = self.route(key).map_err(|err| Error::Get(Box::new(err)))?;

        let command = Command::get(Bytes::copy_from_slice(key));
        let mut result: Result<Response> = Err(RoutingError::NoMembers.into());
        for id in targets {
            result = self.node(id)?.execute(command.clone()).await;
            if result.is_ok() {
                break;
            }
        }
        self.tick();

        let response = result?;
        response
            .into_element()
            .ok_or_else(|| Error::Internal("read returned no element".to_string()))
    }
}

impl Network<RaftProtocol> {
    /// Raft log of a node.
    pub async fn node_log(&self, id: NodeId) -> Option<Vec<LogEntry>> {
        match self.protocol(id) {
            Some(protocol) => Some(protocol.entries().await),
            None => None,
        }
    }
}

#[async_trait]
impl<P: Protocol> Storage for Network<P> {
    async fn put(&self, element: Element) -> Result<()> {
        let timer = self.metrics.put_latency.start_timer();
        let result = self.put_element(element).await;
        timer.observe();
        self.metrics.record_put(result.as_ref().err());
        result
    }

    async fn get(&self, key: &[u8]) -> Result<Element> {
        let timer = self.metrics.get_latency.start_timer();
        let result = self.get_element(key).await;
        timer.observe();
        self.metrics.record_get(result.as_ref().err());
        result
    }

    async fn metadata(&self) -> Result<Metadata> {
        self.check_open()?;
        let mut metadata = Metadata::new();
        let mut counts = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            match node.metadata().await {
                Ok(meta) => {
                    info!(
                        node_id = node.id(),
                        size = meta.size,
                        key_bytes = meta.key_bytes,
                        value_bytes = meta.value_bytes,
                        "Node metadata"
                    );
                    counts.push(meta.size as f64);
                    metadata.merge(meta);
                }
                Err(err) => {
                    warn!(node_id = node.id(), error = %err, "Node failed to report metadata");
                    counts.push(0.0);
                    metadata.error(format!("node {}: {}", node.id(), err));
                }
            }
        }

        let skew = distribution_skew(&counts);
        info!(
            std_dev = skew.std_dev,
            mean_deviation = skew.mean_deviation,
            metric = skew.metric,
            "Distribution metric"
        );
        Ok(metadata)
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "Node task ended abnormally");
            }
        }
        info!(nodes = self.nodes.len(), "Network closed");
        Ok(())
    }
}

impl<P: Protocol> Drop for Network<P> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
