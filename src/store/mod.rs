//! Query-cache collaborator.
//!
//! | Type | Role |
//! |------|------|
//! | [`Storage`] | Raw async key-value storage with a change feed |
//! | [`MemoryStorage`] | In-process storage |
//! | [`Store`] | Typed access, serialized mutation, indexer hook |
//! | [`Indexer`] | Maintains derived keys on every write |

pub mod core;
pub mod indexer;
pub mod keys;
pub mod storage;

pub use self::core::Store;
pub use indexer::{Change, Indexed, Indexer, ListIndexer, update_list};
pub use storage::{KeyChange, MemoryStorage, Storage};
