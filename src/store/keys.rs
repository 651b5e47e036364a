//! Storage key layout.
//!
//! | Key | Storage | Value |
//! |-----|---------|-------|
//! | `users`, `user/<uuid>` | global | user list, user record |
//! | `currentUser` | global | logged-in user ref |
//! | `requests`, `request/<id>` | global | pending approval queue |
//! | `status/<id>` | global | session liveness marker |
//! | `session/<id>` | user | full session |
//! | `sessionByOrigin/<origin>` | user | session ref |
//! | `sessionsByWallet/<uuid>` | user | session refs |
//! | `persistentSessions`, `temporarySessions` | user | session refs |
//! | `wallets`, `wallet/<uuid>` | user | wallet list, wallet record |
//! | `seeds`, `seed/<uuid>` | user | seed list, seed record |
//! | `origin/<origin>`, `blobby/<id>` | user | origin metadata, icon data |

use std::fmt::Display;

pub const USERS: &str = "users";
pub const CURRENT_USER: &str = "currentUser";
pub const REQUESTS: &str = "requests";
pub const PERSISTENT_SESSIONS: &str = "persistentSessions";
pub const TEMPORARY_SESSIONS: &str = "temporarySessions";
pub const WALLETS: &str = "wallets";
pub const SEEDS: &str = "seeds";

pub const USER_PREFIX: &str = "user/";
pub const REQUEST_PREFIX: &str = "request/";
pub const SESSION_PREFIX: &str = "session/";
pub const WALLET_PREFIX: &str = "wallet/";
pub const SEED_PREFIX: &str = "seed/";

#[inline]
pub fn user(uuid: impl Display) -> String {
    format!("{USER_PREFIX}{uuid}")
}

#[inline]
pub fn request(id: impl Display) -> String {
    format!("{REQUEST_PREFIX}{id}")
}

#[inline]
pub fn status(id: impl Display) -> String {
    format!("status/{id}")
}

#[inline]
pub fn session(id: impl Display) -> String {
    format!("{SESSION_PREFIX}{id}")
}

#[inline]
pub fn session_by_origin(origin: &str) -> String {
    format!("sessionByOrigin/{origin}")
}

#[inline]
pub fn sessions_by_wallet(uuid: impl Display) -> String {
    format!("sessionsByWallet/{uuid}")
}

#[inline]
pub fn wallet(uuid: impl Display) -> String {
    format!("{WALLET_PREFIX}{uuid}")
}

#[inline]
pub fn seed(uuid: impl Display) -> String {
    format!("{SEED_PREFIX}{uuid}")
}

#[inline]
pub fn origin(origin: &str) -> String {
    format!("origin/{origin}")
}

#[inline]
pub fn blobby(id: &str) -> String {
    format!("blobby/{id}")
}
