//! Stored entities.
//!
//! | Module | Types |
//! |--------|-------|
//! | `chain` | [`EthereumChain`], [`ChainTable`] |
//! | `session` | [`Session`], [`SessionRef`], [`SessionKind`] |
//! | `request` | [`AppRequest`] |
//! | `wallet` | [`WalletRef`], [`WalletData`], [`UserData`], [`SeedData`] |
//! | `origin` | [`OriginData`], [`Blobby`] |
//! | `status` | [`StatusRecord`] |

use std::sync::Arc;

use crate::store::{Indexer, ListIndexer, keys};

pub mod chain;
pub mod origin;
pub mod request;
pub mod session;
pub mod status;
pub mod wallet;

pub use chain::{ChainTable, EthereumChain};
pub use origin::{Blobby, BlobbyRef, OriginData, PreOriginData};
pub use request::{AppRequest, AppRequestRef};
pub use session::{RelaySessionData, Session, SessionIndexer, SessionKind, SessionRef};
pub use status::StatusRecord;
pub use wallet::{SeedData, SeedRef, UserData, UserInit, UserRef, WalletData, WalletRef};

/// Indexers of the global storage.
#[must_use]
pub fn global_indexers() -> Vec<Arc<dyn Indexer>> {
    vec![
        Arc::new(ListIndexer::<UserData>::new(keys::USER_PREFIX, keys::USERS)),
        Arc::new(ListIndexer::<AppRequest>::new(
            keys::REQUEST_PREFIX,
            keys::REQUESTS,
        )),
    ]
}

/// Indexers of a user storage.
#[must_use]
pub fn user_indexers() -> Vec<Arc<dyn Indexer>> {
    vec![
        Arc::new(SessionIndexer),
        Arc::new(ListIndexer::<WalletData>::new(
            keys::WALLET_PREFIX,
            keys::WALLETS,
        )),
        Arc::new(ListIndexer::<SeedData>::new(keys::SEED_PREFIX, keys::SEEDS)),
    ]
}
