//! Core types used throughout the cluster emulator.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Member index of a node: its position in the cluster's registration order.
pub type NodeId = usize;

/// Correlation id of an internal message, unique per originating node.
pub type MessageId = u64;

/// Opaque key bytes.
pub type Key = Bytes;

/// Opaque value bytes.
pub type Value = Bytes;

/// A key-value pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Element {
    pub key: Key,
    pub value: Value,
}

impl Element {
    /// Create a new element.
    pub fn new(key: impl Into<Key>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Combined size of key and value in bytes.
    pub fn size(&self) -> usize {
        self.key.len() + self.value.len()
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{:?},{:?}}}", self.key, self.value)
    }
}

/// Statistics reported by a storage instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Number of stored elements.
    pub size: usize,
    /// Total bytes held in keys.
    pub key_bytes: usize,
    /// Total bytes held in values.
    pub value_bytes: usize,
    /// Errors observed while collecting the statistics.
    pub errors: Vec<String>,
}

impl Metadata {
    /// Create empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one more stored element.
    pub fn add(&mut self, element: &Element) {
        self.size += 1;
        self.key_bytes += element.key.len();
        self.value_bytes += element.value.len();
    }

    /// Record an error.
    pub fn error(&mut self, err: impl fmt::Display) {
        self.errors.push(err.to_string());
    }

    /// Fold another node's metadata into this one.
    pub fn merge(&mut self, other: Metadata) {
        self.size += other.size;
        self.key_bytes += other.key_bytes;
        self.value_bytes += other.value_bytes;
        self.errors.extend(other.errors);
    }
}

/// A client command executed against a node's storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Store an element.
    Put(Element),
    /// Read the element stored under a key.
    Get(Key),
}

impl Command {
    /// Create a Put command.
    pub fn put(element: Element) -> Self {
        Command::Put(element)
    }

    /// Create a Get command.
    pub fn get(key: impl Into<Key>) -> Self {
        Command::Get(key.into())
    }

    /// The key this command operates on.
    pub fn key(&self) -> &Key {
        match self {
            Command::Put(element) => &element.key,
            Command::Get(key) => key,
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Put(_) => "put",
            Command::Get(_) => "get",
        }
    }
}

/// Successful outcome of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// The element was stored.
    Stored,
    /// The element that was read.
    Found(Element),
}

impl Response {
    /// Take the element out of a read response.
    pub fn into_element(self) -> Option<Element> {
        match self {
            Response::Found(element) => Some(element),
            Response::Stored => None,
        }
    }
}
