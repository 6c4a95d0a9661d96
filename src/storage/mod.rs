//! Single-node storage capability.
//!
//! Every node owns exactly one [`Storage`] instance. The cluster facade
//! implements the same trait, so anything that can be tested against a
//! single storage can be tested against a whole cluster.

mod memory;

pub use memory::MemoryStorage;

use crate::error::Result;
use crate::types::{Command, Element, Metadata, NodeId, Response};
use async_trait::async_trait;
use std::sync::Arc;

/// A key-value store.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store an element, replacing any previous value for its key.
    async fn put(&self, element: Element) -> Result<()>;

    /// Read the element stored under `key`.
    ///
    /// Fails with [`StorageError::NotFound`](crate::error::StorageError::NotFound)
    /// when nothing is stored under the key.
    async fn get(&self, key: &[u8]) -> Result<Element>;

    /// Report storage statistics.
    async fn metadata(&self) -> Result<Metadata>;

    /// Release the storage.
    async fn close(&self) -> Result<()>;
}

/// Creates the private storage of a node.
pub type StorageFactory = Arc<dyn Fn(NodeId) -> Arc<dyn Storage> + Send + Sync>;

/// Run a command against a storage.
pub async fn execute(storage: &dyn Storage, command: &Command) -> Result<Response> {
    match command {
        Command::Put(element) => {
            storage.put(element.clone()).await?;
            Ok(Response::Stored)
        }
        Command::Get(key) => storage.get(key).await.map(Response::Found),
    }
}
