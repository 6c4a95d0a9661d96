//! Paxos scenarios on randomly routed clusters.

#[cfg(test)]
mod tests {
    use crate::cluster::{NetworkBuilder, NodeDown};
    use crate::config::NetworkConfig;
    use crate::consensus::PaxosProtocol;
    use crate::partitioning::Partition;
    use crate::storage::{MemoryStorage, Storage};
    use crate::testing::{random_bytes, ConsistencyCheck, ElementGenerator, FailureRate, Limit};
    use crate::types::Element;
    use std::sync::Arc;
    use test_log::test;

    fn paxos_network(config: NetworkConfig) -> NetworkBuilder<PaxosProtocol> {
        NetworkBuilder::new()
            .partition(Partition::Random)
            .storage(MemoryStorage::factory())
            .protocol(PaxosProtocol::factory())
            .config(config)
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_write_reaches_every_node() {
        let network = paxos_network(NetworkConfig::new(10)).build().unwrap();

        let element = ElementGenerator::random(10, 100).next();
        network.put(element.clone()).await.unwrap();

        let metadata = network.metadata().await.unwrap();
        assert_eq!(metadata.size, 10);
        for id in 0..10 {
            let proposal = network
                .protocol(id)
                .unwrap()
                .proposal(&element.key)
                .await
                .unwrap();
            assert_eq!(proposal.command.key(), &element.key);
        }

        network.close().await.unwrap();
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_random_routing_is_consistent() {
        let network = paxos_network(NetworkConfig::new(10)).build().unwrap();
        let keys = ConsistencyCheck::new(100).run(&network).await.unwrap();
        assert_eq!(network.distribution().await, vec![keys; 10]);
        network.close().await.unwrap();
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_overwrites_keep_latest_value() {
        let network = paxos_network(NetworkConfig::new(5)).build().unwrap();
        let key = random_bytes(10);

        for i in 0..10 {
            network
                .put(Element::new(key.clone(), format!("value-{i}")))
                .await
                .unwrap();
        }
        // every node answers with the last write
        for _ in 0..10 {
            let element = network.get(&key).await.unwrap();
            assert_eq!(element.value.as_ref(), b"value-9");
        }

        network.close().await.unwrap();
    }

    #[test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_failure_rate_with_node_down() {
        let network = Arc::new(
            paxos_network(NetworkConfig::new(10).with_warm_up(20))
                .event(NodeDown::new(0, 30))
                .build()
                .unwrap(),
        );

        let report = FailureRate::new(200)
            .with_concurrency(4)
            .run(network.clone())
            .await;

        // routing retries hide the down node from writers
        assert_eq!(report.write_failures, 0);
        assert!(report.within(&Limit {
            read: 0.5,
            write: 0.0
        }));
        assert_eq!(network.metrics().events_applied.get(), 1);

        network.close().await.unwrap();
    }
}
