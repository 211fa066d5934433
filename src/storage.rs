//! Key-value storage behind the command dispatcher.
//!
//! The dispatcher only sees the [`Store`] trait. [`MemoryStore`] is the
//! in-process implementation the server runs with: a hash map behind a
//! read-write lock, shared by every connection on every front end.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{info, trace};

/// A stored value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// UTF-8 text
    Str(String),
    /// Bytes that are not valid UTF-8
    Raw(Bytes),
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(s) => Value::Str(s.to_string()),
            Err(_) => Value::Raw(Bytes::copy_from_slice(bytes)),
        }
    }
}

/// Failure reported by a store operation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("key not found")]
    KeyNotFound,
    #[error("store unavailable")]
    Poisoned,
}

/// Key-value mapping used by the dispatcher.
///
/// Implementations synchronize internally; callers never lock around them.
pub trait Store: Send + Sync {
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    fn get(&self, key: &str) -> Result<Value, StoreError>;
}

/// Thread-safe in-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    /// Create a new store, ready to be shared
    pub fn new() -> Arc<Self> {
        info!("Initializing storage");
        Arc::new(Self::default())
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Number of keys currently stored
    pub fn len(&self) -> usize {
        self.data.read().map(|data| data.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for MemoryStore {
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut data = self.data.write().map_err(|_| StoreError::Poisoned)?;
        data.insert(key.to_string(), value);
        trace!(key, "Item stored");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Value, StoreError> {
        let data = self.data.read().map_err(|_| StoreError::Poisoned)?;
        data.get(key).cloned().ok_or(StoreError::KeyNotFound)
    }
}
