//! The logged-in user.

use std::fmt;
use std::sync::Arc;

use crate::entities::{UserData, user_indexers};
use crate::platform::{Crypter, UnlockedUser};
use crate::store::Store;

/// An unlocked user: record, storage and cipher.
#[derive(Clone)]
pub struct UserSession {
    /// Stored user record.
    pub user: UserData,
    /// User storage with the session, wallet and seed indexers.
    pub storage: Store,
    /// User cipher.
    pub crypter: Arc<dyn Crypter>,
}

impl UserSession {
    /// Wraps an unlocked user.
    #[must_use]
    pub fn new(user: UserData, unlocked: UnlockedUser) -> Self {
        Self {
            user,
            storage: Store::new(unlocked.storage, user_indexers()),
            crypter: unlocked.crypter,
        }
    }
}

impl fmt::Debug for UserSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserSession")
            .field("user", &self.user.uuid)
            .finish_non_exhaustive()
    }
}
