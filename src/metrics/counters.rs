//! Monotonic counters.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug)]
pub struct Counter {
    name: &'static str,
    help: &'static str,
    value: AtomicU64,
}

impl Counter {
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            value: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn help(&self) -> &'static str {
        self.help
    }

    /// Increment by one.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by `n`.
    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

/// A counter split by one label, e.g. error kind.
#[derive(Debug)]
pub struct LabeledCounter {
    name: &'static str,
    label: &'static str,
    values: RwLock<HashMap<String, AtomicU64>>,
}

impl LabeledCounter {
    pub fn new(name: &'static str, label: &'static str) -> Self {
        Self {
            name,
            label,
            values: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Increment the counter for `value`.
    pub fn inc(&self, value: &str) {
        {
            let values = self.values.read();
            if let Some(counter) = values.get(value) {
                counter.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        self.values
            .write()
            .entry(value.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Current count for `value`.
    pub fn get(&self, value: &str) -> u64 {
        self.values
            .read()
            .get(value)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// All label values and their counts.
    pub fn all(&self) -> HashMap<String, u64> {
        self.values
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect()
    }
}
