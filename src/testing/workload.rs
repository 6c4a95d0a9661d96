//! Storage workloads that run against any [`Storage`], a single store or a
//! whole simulated cluster.

use crate::error::{Error, Result};
use crate::storage::Storage;
use crate::types::{Element, Key};
use bytes::Bytes;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Random bytes of the given length.
pub fn random_bytes(size: usize) -> Bytes {
    let mut rng = rand::rng();
    (0..size).map(|_| rng.random::<u8>()).collect::<Vec<_>>().into()
}

/// Produces test elements.
#[derive(Debug, Clone)]
pub struct ElementGenerator {
    key_size: usize,
    value_size: usize,
    fixed_key: Option<Key>,
}

impl ElementGenerator {
    /// Random keys and values.
    pub fn random(key_size: usize, value_size: usize) -> Self {
        Self {
            key_size,
            value_size,
            fixed_key: None,
        }
    }

    /// One random key shared by every element, random values.
    pub fn random_value(key_size: usize, value_size: usize) -> Self {
        Self {
            key_size,
            value_size,
            fixed_key: Some(random_bytes(key_size)),
        }
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn value_size(&self) -> usize {
        self.value_size
    }

    pub fn next(&self) -> Element {
        let key = match &self.fixed_key {
            Some(key) => key.clone(),
            None => random_bytes(self.key_size),
        };
        Element::new(key, random_bytes(self.value_size))
    }

    pub fn elements(&self, count: usize) -> Vec<Element> {
        (0..count).map(|_| self.next()).collect()
    }
}

impl Default for ElementGenerator {
    fn default() -> Self {
        Self::random(10, 20)
    }
}

/// Writes elements, reads them back, and compares.
#[derive(Debug, Clone)]
pub struct ConsistencyCheck {
    count: usize,
    generator: ElementGenerator,
    check_metadata: bool,
}

impl ConsistencyCheck {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            generator: ElementGenerator::default(),
            check_metadata: false,
        }
    }

    pub fn with_generator(mut self, generator: ElementGenerator) -> Self {
        self.generator = generator;
        self
    }

    /// Also require the reported size to equal the number of distinct keys.
    ///
    /// Only meaningful when every element is stored exactly once.
    pub fn with_metadata_check(mut self) -> Self {
        self.check_metadata = true;
        self
    }

    /// Run the check, returning the number of distinct keys written.
    pub async fn run(&self, storage: &dyn Storage) -> Result<usize> {
        let missing = random_bytes(self.generator.key_size().max(1));
        if let Ok(element) = storage.get(&missing).await {
            return Err(Error::Internal(format!(
                "read of unwritten key returned {element}"
            )));
        }

        let mut expected: HashMap<Key, Bytes> = HashMap::new();
        for element in self.generator.elements(self.count) {
            storage.put(element.clone()).await?;
            expected.insert(element.key, element.value);
        }

        for (key, value) in &expected {
            let element = storage.get(key).await?;
            if &element.value != value {
                return Err(Error::Internal(format!(
                    "value mismatch for key {key:?}: expected {value:?}, got {:?}",
                    element.value
                )));
            }
        }

        if self.check_metadata {
            let metadata = storage.metadata().await?;
            if metadata.size != expected.len() {
                return Err(Error::Internal(format!(
                    "metadata size {} does not match {} written keys",
                    metadata.size,
                    expected.len()
                )));
            }
        }

        debug!(keys = expected.len(), "Consistency check passed");
        Ok(expected.len())
    }
}

/// Highest tolerated failure fractions.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Limit {
    pub read: f64,
    pub write: f64,
}

/// Outcome of a [`FailureRate`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureReport {
    pub writes: u64,
    pub write_failures: u64,
    pub reads: u64,
    pub read_failures: u64,
}

impl FailureReport {
    pub fn write_rate(&self) -> f64 {
        rate(self.write_failures, self.writes)
    }

    pub fn read_rate(&self) -> f64 {
        rate(self.read_failures, self.reads)
    }

    /// Whether both rates are within `limit`.
    pub fn within(&self, limit: &Limit) -> bool {
        self.read_rate() <= limit.read && self.write_rate() <= limit.write
    }
}

fn rate(failures: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        failures as f64 / total as f64
    }
}

/// Concurrent write-then-read cycles that count failures instead of
/// stopping at the first one.
#[derive(Debug, Clone)]
pub struct FailureRate {
    operations: usize,
    concurrency: usize,
    generator: ElementGenerator,
}

impl FailureRate {
    pub fn new(operations: usize) -> Self {
        Self {
            operations,
            concurrency: 4,
            generator: ElementGenerator::default(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_generator(mut self, generator: ElementGenerator) -> Self {
        self.generator = generator;
        self
    }

    pub async fn run(&self, storage: Arc<dyn Storage>) -> FailureReport {
        let counters = Arc::new(Tally::default());
        let per_worker = self.operations.div_ceil(self.concurrency);

        let mut workers = Vec::with_capacity(self.concurrency);
        let mut remaining = self.operations;
        for _ in 0..self.concurrency {
            let batch = per_worker.min(remaining);
            remaining -= batch;
            let storage = storage.clone();
            let counters = counters.clone();
            let elements = self.generator.elements(batch);
            workers.push(tokio::spawn(async move {
                for element in elements {
                    let key = element.key.clone();
                    counters.writes.fetch_add(1, Ordering::Relaxed);
                    if storage.put(element).await.is_err() {
                        counters.write_failures.fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                    counters.reads.fetch_add(1, Ordering::Relaxed);
                    if storage.get(&key).await.is_err() {
                        counters.read_failures.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }));
        }
        for worker in workers {
            let _ = worker.await;
        }

        let report = counters.report();
        info!(
            writes = report.writes,
            write_rate = report.write_rate(),
            reads = report.reads,
            read_rate = report.read_rate(),
            "Failure rate"
        );
        report
    }
}

#[derive(Default)]
struct Tally {
    writes: AtomicU64,
    write_failures: AtomicU64,
    reads: AtomicU64,
    read_failures: AtomicU64,
}

impl Tally {
    fn report(&self) -> FailureReport {
        FailureReport {
            writes: self.writes.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn test_random_generators() {
        let random = ElementGenerator::random(10, 20);
        let a = random.next();
        let b = random.next();
        assert_eq!(a.key.len(), 10);
        assert_eq!(a.value.len(), 20);
        assert_ne!(a.key, b.key);

        let same_key = ElementGenerator::random_value(8, 4);
        let elements = same_key.elements(5);
        assert!(elements.iter().all(|e| e.key == elements[0].key));
    }

    #[tokio::test]
    async fn test_consistency_on_single_store() {
        let storage = MemoryStorage::new();
        let keys = ConsistencyCheck::new(200)
            .with_metadata_check()
            .run(&storage)
            .await
            .unwrap();
        assert_eq!(storage.len(), keys);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_one_key() {
        let storage = MemoryStorage::new();
        let keys = ConsistencyCheck::new(10)
            .with_generator(ElementGenerator::random_value(10, 20))
            .with_metadata_check()
            .run(&storage)
            .await
            .unwrap();
        assert_eq!(keys, 1);
    }

    #[tokio::test]
    async fn test_failure_rate_on_healthy_store() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let report = FailureRate::new(100).with_concurrency(3).run(storage).await;
        assert_eq!(report.writes, 100);
        assert_eq!(report.reads, 100);
        assert!(report.within(&Limit::default()));
    }

    #[tokio::test]
    async fn test_failure_rate_counts_errors() {
        let storage = Arc::new(MemoryStorage::new());
        storage.close().await.unwrap();
        let report = FailureRate::new(10).run(storage).await;
        assert_eq!(report.write_failures, 10);
        assert_eq!(report.reads, 0);
        assert_eq!(report.write_rate(), 1.0);
        assert!(!report.within(&Limit { read: 0.0, write: 0.5 }));
    }
}
