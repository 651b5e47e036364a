//! Typed store with mutation serialization.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, broadcast};
use tracing::trace;

use crate::error::Result;

use super::indexer::{Change, Indexer};
use super::storage::{KeyChange, Storage};

// ============================================================================
// Store
// ============================================================================

/// A [`Storage`] plus the indexers that maintain its derived keys.
///
/// Writes are serialized: a read-modify-write through [`Store::mutate`]
/// and the indexer pass that follows it run under one async lock.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    storage: Arc<dyn Storage>,
    indexers: Vec<Arc<dyn Indexer>>,
    writes: Mutex<()>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("indexers", &self.inner.indexers.len())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Creates a store over `storage` with the given indexers.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, indexers: Vec<Arc<dyn Indexer>>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                storage,
                indexers,
                writes: Mutex::new(()),
            }),
        }
    }

    /// Returns the underlying storage.
    #[inline]
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.inner.storage
    }

    /// Subscribes to every write, including index writes.
    #[inline]
    pub fn watch(&self) -> broadcast::Receiver<KeyChange> {
        self.inner.storage.watch()
    }

    /// Reads a raw value.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.inner.storage.get(key).await
    }

    /// Reads and decodes a value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if the stored value does
    /// not decode into `T`.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.inner.storage.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Writes a value and updates indexes.
    pub async fn set_as<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        let _guard = self.inner.writes.lock().await;
        self.write_locked(key, Some(value)).await
    }

    /// Deletes a value and updates indexes.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.inner.writes.lock().await;
        self.write_locked(key, None).await
    }

    /// Read-modify-write of a typed value.
    ///
    /// `f` receives the current value and returns the next one; `None`
    /// deletes the key. Returns the value written.
    pub async fn mutate<T, F>(&self, key: &str, f: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce(Option<T>) -> Option<T> + Send,
    {
        let _guard = self.inner.writes.lock().await;

        let current = match self.inner.storage.get(key).await? {
            Some(value) => Some(serde_json::from_value(value)?),
            None => None,
        };

        let next = f(current);
        let value = next.as_ref().map(serde_json::to_value).transpose()?;

        self.write_locked(key, value).await?;
        Ok(next)
    }

    async fn write_locked(&self, key: &str, value: Option<Value>) -> Result<()> {
        let storage = self.inner.storage.as_ref();
        let previous = storage.get(key).await?;

        match &value {
            Some(value) => storage.set(key, value.clone()).await?,
            None => storage.delete(key).await?,
        }

        let change = Change {
            key,
            previous: previous.as_ref(),
            current: value.as_ref(),
        };

        for indexer in &self.inner.indexers {
            indexer.index(storage, &change).await?;
        }

        trace!(key, deleted = value.is_none(), "Store write");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
