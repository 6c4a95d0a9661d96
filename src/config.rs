//! Configuration types for the cluster emulator.

use std::time::Duration;

/// Default number of routing attempts per client operation.
pub const DEFAULT_ROUTE_RETRIES: usize = 10;

/// Default number of clock ticks between failure events.
pub const DEFAULT_WARM_UP: usize = 100;

/// Default depth of each node's operation and protocol queues.
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Default time the coordinator waits for a phase signal.
pub const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a simulated cluster.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Number of nodes in the cluster.
    pub nodes: usize,

    /// How many times a failed route is retried before the operation fails.
    pub route_retries: usize,

    /// Clock ticks to wait before each scheduled event is applied.
    pub warm_up: usize,

    /// Capacity of each node's operation and protocol queues.
    pub queue_depth: usize,

    /// Consensus configuration shared by all nodes.
    pub consensus: ConsensusConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            nodes: 0,
            route_retries: DEFAULT_ROUTE_RETRIES,
            warm_up: DEFAULT_WARM_UP,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            consensus: ConsensusConfig::default(),
        }
    }
}

impl NetworkConfig {
    /// Create a new configuration for the given node count.
    pub fn new(nodes: usize) -> Self {
        Self {
            nodes,
            ..Default::default()
        }
    }

    /// Set the number of routing attempts.
    pub fn with_route_retries(mut self, retries: usize) -> Self {
        self.route_retries = retries;
        self
    }

    /// Set the warm-up between scheduled events.
    pub fn with_warm_up(mut self, ticks: usize) -> Self {
        self.warm_up = ticks;
        self
    }

    /// Set the queue depth.
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Set the consensus configuration.
    pub fn with_consensus(mut self, consensus: ConsensusConfig) -> Self {
        self.consensus = consensus;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.nodes == 0 {
            return Err("cannot create network without nodes".to_string());
        }
        if self.queue_depth == 0 {
            return Err("queue depth must be positive".to_string());
        }
        self.consensus.validate()
    }
}

/// How many peer acknowledgements a phase needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QuorumPolicy {
    /// Every live peer must acknowledge.
    Unanimous,
    /// A majority of the cluster, counting the initiating node.
    Majority,
    /// A fraction of the live peers, rounded up.
    Ratio(f64),
}

impl QuorumPolicy {
    /// Number of acknowledgements required out of `peers` live peers.
    pub fn required_acks(&self, peers: usize) -> usize {
        match *self {
            QuorumPolicy::Unanimous => peers,
            QuorumPolicy::Majority => (peers + 1) / 2,
            QuorumPolicy::Ratio(ratio) => {
                let required = (peers as f64 * ratio.clamp(0.0, 1.0)).ceil() as usize;
                required.min(peers)
            }
        }
    }
}

/// Configuration for the two-phase coordinator.
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Quorum size policy.
    pub quorum: QuorumPolicy,

    /// Time to wait for each phase signal.
    pub phase_timeout: Duration,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            quorum: QuorumPolicy::Unanimous,
            phase_timeout: DEFAULT_PHASE_TIMEOUT,
        }
    }
}

impl ConsensusConfig {
    /// Configuration requiring a simple majority.
    pub fn majority() -> Self {
        Self {
            quorum: QuorumPolicy::Majority,
            ..Default::default()
        }
    }

    /// Set the quorum policy.
    pub fn with_quorum(mut self, quorum: QuorumPolicy) -> Self {
        self.quorum = quorum;
        self
    }

    /// Set the phase timeout.
    pub fn with_phase_timeout(mut self, timeout: Duration) -> Self {
        self.phase_timeout = timeout;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.phase_timeout.is_zero() {
            return Err("phase timeout must be positive".to_string());
        }
        if let QuorumPolicy::Ratio(ratio) = self.quorum {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(format!("quorum ratio {ratio} outside [0, 1]"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_acks() {
        assert_eq!(QuorumPolicy::Unanimous.required_acks(9), 9);
        assert_eq!(QuorumPolicy::Unanimous.required_acks(0), 0);

        // 10 nodes: 9 peers, 5 peer acks plus the initiator make 6 of 10
        assert_eq!(QuorumPolicy::Majority.required_acks(9), 5);
        // 3 nodes: 2 peers, 1 peer ack plus the initiator make 2 of 3
        assert_eq!(QuorumPolicy::Majority.required_acks(2), 1);
        assert_eq!(QuorumPolicy::Majority.required_acks(0), 0);

        assert_eq!(QuorumPolicy::Ratio(0.5).required_acks(9), 5);
        assert_eq!(QuorumPolicy::Ratio(1.0).required_acks(4), 4);
        assert_eq!(QuorumPolicy::Ratio(0.0).required_acks(4), 0);
    }

    #[test]
    fn test_validate() {
        assert!(NetworkConfig::default().validate().is_err());
        assert!(NetworkConfig::new(3).validate().is_ok());
        assert!(NetworkConfig::new(3).with_queue_depth(0).validate().is_err());

        let bad = ConsensusConfig::default().with_quorum(QuorumPolicy::Ratio(1.5));
        assert!(bad.validate().is_err());

        let bad = ConsensusConfig::default().with_phase_timeout(Duration::ZERO);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_builder() {
        let config = NetworkConfig::new(5)
            .with_route_retries(3)
            .with_warm_up(7)
            .with_consensus(ConsensusConfig::majority());

        assert_eq!(config.nodes, 5);
        assert_eq!(config.route_retries, 3);
        assert_eq!(config.warm_up, 7);
        assert_eq!(config.consensus.quorum, QuorumPolicy::Majority);
        assert_eq!(config.consensus.phase_timeout, DEFAULT_PHASE_TIMEOUT);
    }
}
