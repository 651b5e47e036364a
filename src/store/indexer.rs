//! Derived index maintenance.
//!
//! An [`Indexer`] runs after every [`Store`](super::Store) write while the
//! store's write lock is still held. Indexers write through the raw
//! [`Storage`] so they never re-enter the store.

// ============================================================================
// Imports
// ============================================================================

use std::marker::PhantomData;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;

use super::storage::Storage;

// ============================================================================
// Change
// ============================================================================

/// A single key transition seen by indexers.
#[derive(Debug, Clone, Copy)]
pub struct Change<'a> {
    /// Key written.
    pub key: &'a str,
    /// Value before the write.
    pub previous: Option<&'a Value>,
    /// Value after the write, `None` when deleted.
    pub current: Option<&'a Value>,
}

impl Change<'_> {
    /// Decodes the previous value, ignoring foreign shapes.
    pub fn previous_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.previous
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Decodes the current value, ignoring foreign shapes.
    pub fn current_as<T: DeserializeOwned>(&self) -> Option<T> {
        self.current
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

// ============================================================================
// Indexer
// ============================================================================

/// Hook invoked on every store mutation.
#[async_trait]
pub trait Indexer: Send + Sync {
    /// Updates derived keys for `change`.
    async fn index(&self, storage: &dyn Storage, change: &Change<'_>) -> Result<()>;
}

// ============================================================================
// List helpers
// ============================================================================

/// Read-modify-write of a JSON list key.
///
/// An empty list is written as `[]`, not deleted, so observers can tell
/// "known empty" from "never written".
pub async fn update_list<T, F>(storage: &dyn Storage, key: &str, f: F) -> Result<()>
where
    T: Serialize + DeserializeOwned + Send,
    F: FnOnce(&mut Vec<T>) + Send,
{
    let mut list: Vec<T> = match storage.get(key).await? {
        Some(value) => serde_json::from_value(value)?,
        None => Vec::new(),
    };

    f(&mut list);

    storage.set(key, serde_json::to_value(&list)?).await
}

// ============================================================================
// ListIndexer
// ============================================================================

/// Entity that is listed by reference under a single key.
pub trait Indexed: DeserializeOwned {
    /// Lightweight reference stored in the list.
    type Ref: Serialize + DeserializeOwned + PartialEq + Send;

    /// Builds the reference.
    fn to_ref(&self) -> Self::Ref;
}

/// Keeps `list_key` in sync with every `prefix*` record.
pub struct ListIndexer<E> {
    prefix: &'static str,
    list_key: &'static str,
    _entity: PhantomData<fn() -> E>,
}

impl<E> ListIndexer<E> {
    /// Creates an indexer for records under `prefix`.
    #[must_use]
    pub const fn new(prefix: &'static str, list_key: &'static str) -> Self {
        Self {
            prefix,
            list_key,
            _entity: PhantomData,
        }
    }
}

#[async_trait]
impl<E: Indexed> Indexer for ListIndexer<E> {
    async fn index(&self, storage: &dyn Storage, change: &Change<'_>) -> Result<()> {
        if !change.key.starts_with(self.prefix) {
            return Ok(());
        }

        let previous = change.previous_as::<E>().map(|e| e.to_ref());
        let current = change.current_as::<E>().map(|e| e.to_ref());

        if previous.is_none() && current.is_none() {
            return Ok(());
        }

        update_list(storage, self.list_key, move |list: &mut Vec<E::Ref>| {
            if let Some(previous) = previous {
                list.retain(|item| *item != previous);
            }
            if let Some(current) = current
                && !list.contains(&current)
            {
                list.push(current);
            }
        })
        .await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde::Deserialize;
    use serde_json::json;

    use crate::store::MemoryStorage;

    #[derive(Deserialize)]
    struct Thing {
        id: u32,
    }

    impl Indexed for Thing {
        type Ref = u32;

        fn to_ref(&self) -> u32 {
            self.id
        }
    }

    #[tokio::test]
    async fn test_list_indexer_tracks_records() {
        let storage = MemoryStorage::new();
        let indexer = ListIndexer::<Thing>::new("thing/", "things");

        let value = json!({"id": 3});
        let change = Change {
            key: "thing/3",
            previous: None,
            current: Some(&value),
        };
        indexer.index(&storage, &change).await.expect("index");
        indexer.index(&storage, &change).await.expect("index twice");
        assert_eq!(storage.get("things").await.expect("get"), Some(json!([3])));

        let removal = Change {
            key: "thing/3",
            previous: Some(&value),
            current: None,
        };
        indexer.index(&storage, &removal).await.expect("index");
        assert_eq!(storage.get("things").await.expect("get"), Some(json!([])));
    }

    #[tokio::test]
    async fn test_list_indexer_ignores_other_prefixes() {
        let storage = MemoryStorage::new();
        let indexer = ListIndexer::<Thing>::new("thing/", "things");

        let value = json!({"id": 1});
        let change = Change {
            key: "other/1",
            previous: None,
            current: Some(&value),
        };
        indexer.index(&storage, &change).await.expect("index");
        assert_eq!(storage.get("things").await.expect("get"), None);
    }
}
