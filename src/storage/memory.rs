//! In-memory storage backed by a hash map.

use super::{Storage, StorageFactory};
use crate::error::{Result, StorageError};
use crate::types::{Element, Key, Metadata, Value};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Hash-map storage used as the default node store.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<Key, Value>>,
    closed: AtomicBool,
}

impl MemoryStorage {
    /// Create an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory producing a fresh storage for every node.
    pub fn factory() -> StorageFactory {
        Arc::new(|_| Arc::new(MemoryStorage::new()))
    }

    /// Number of stored elements.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the storage is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed.into());
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put(&self, element: Element) -> Result<()> {
        self.check_open()?;
        self.entries.write().insert(element.key, element.value);
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Result<Element> {
        self.check_open()?;
        let entries = self.entries.read();
        entries
            .get_key_value(key)
            .map(|(k, v)| Element::new(k.clone(), v.clone()))
            .ok_or_else(|| StorageError::NotFound.into())
    }

    async fn metadata(&self) -> Result<Metadata> {
        let entries = self.entries.read();
        let mut metadata = Metadata::new();
        for (key, value) in entries.iter() {
            metadata.size += 1;
            metadata.key_bytes += key.len();
            metadata.value_bytes += value.len();
        }
        Ok(metadata)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
