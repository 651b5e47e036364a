//! User key material and credential persistence.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entities::{UserData, UserInit};
use crate::error::Result;
use crate::identifiers::UserId;
use crate::store::Storage;

/// Login credential kept in platform session storage.
///
/// Replayed at startup so a restarted background is unlocked again.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// User to unlock.
    pub uuid: UserId,
    /// User password.
    pub password: String,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("uuid", &self.uuid)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Platform session storage for the login credential.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Loads the stored credential, if any.
    async fn load(&self) -> Result<Option<Credential>>;

    /// Replaces the stored credential.
    async fn save(&self, credential: &Credential) -> Result<()>;
}

/// Symmetric cipher bound to one unlocked user.
#[async_trait]
pub trait Crypter: Send + Sync {
    /// Encrypts `plain` with `iv`.
    async fn encrypt(&self, plain: &[u8], iv: &[u8]) -> Result<Vec<u8>>;

    /// Decrypts `cipher` with `iv`.
    async fn decrypt(&self, cipher: &[u8], iv: &[u8]) -> Result<Vec<u8>>;
}

/// A user's decrypted storage and cipher.
#[derive(Clone)]
pub struct UnlockedUser {
    /// Encrypted per-user key-value storage.
    pub storage: Arc<dyn Storage>,
    /// Cipher derived from the password.
    pub crypter: Arc<dyn Crypter>,
}

impl fmt::Debug for UnlockedUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockedUser").finish_non_exhaustive()
    }
}

/// Creates and unlocks users.
#[async_trait]
pub trait Keyring: Send + Sync {
    /// Derives the stored record of a new user.
    async fn create_user(&self, init: &UserInit) -> Result<UserData>;

    /// Unlocks `user` with `password`.
    ///
    /// Fails with [`Error::UserRejected`](crate::Error::UserRejected) on a
    /// wrong password.
    async fn unlock(&self, user: &UserData, password: &str) -> Result<UnlockedUser>;
}
