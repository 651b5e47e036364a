//! Key-value storage collaborator.
//!
//! The orchestrator treats storage as opaque: string keys, JSON values, and
//! a change feed. Global storage holds users, pending requests and status
//! markers; each unlocked user gets its own storage for sessions, wallets,
//! seeds and origins.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

use crate::error::Result;

// ============================================================================
// Constants
// ============================================================================

/// Change feed buffer per storage.
const CHANGE_CAPACITY: usize = 256;

// ============================================================================
// KeyChange
// ============================================================================

/// A write observed on a storage.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyChange {
    /// Key written.
    pub key: String,
    /// New value, `None` when deleted.
    pub value: Option<Value>,
}

// ============================================================================
// Storage
// ============================================================================

/// Async key-value storage with a change feed.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Reads a key.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Writes a key and publishes the change.
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Deletes a key and publishes the change.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Subscribes to every subsequent write.
    fn watch(&self) -> broadcast::Receiver<KeyChange>;
}

// ============================================================================
// MemoryStorage
// ============================================================================

/// In-process [`Storage`].
pub struct MemoryStorage {
    entries: Mutex<FxHashMap<String, Value>>,
    changes: broadcast::Sender<KeyChange>,
}

impl MemoryStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            entries: Mutex::new(FxHashMap::default()),
            changes,
        }
    }

    /// Returns the number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn publish(&self, key: &str, value: Option<Value>) {
        // No receivers is fine.
        let _ = self.changes.send(KeyChange {
            key: key.to_string(),
            value,
        });
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("len", &self.len())
            .finish()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.clone());
        trace!(key, "Storage set");
        self.publish(key, Some(value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let removed = self.entries.lock().remove(key);
        if removed.is_some() {
            trace!(key, "Storage delete");
            self.publish(key, None);
        }
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<KeyChange> {
        self.changes.subscribe()
    }
}

// ============================================================================
// Tests
// ============================================================================
