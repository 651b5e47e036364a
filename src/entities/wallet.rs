//! Wallets, users and seeds.
//!
//! Records carry opaque material (encrypted keys, mnemonics, avatars) that
//! the orchestrator stores but never interprets; it is kept in a flattened
//! map.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identifiers::{SeedId, UserId, WalletId};
use crate::store::Indexed;

// ============================================================================
// Wallet
// ============================================================================

/// Non-owning pointer to a wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalletRef {
    /// Wallet id.
    pub uuid: WalletId,
}

impl WalletRef {
    /// Creates a reference.
    #[inline]
    #[must_use]
    pub const fn new(uuid: WalletId) -> Self {
        Self { uuid }
    }
}

/// Full wallet record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletData {
    /// Wallet id.
    pub uuid: WalletId,
    /// Display name.
    pub name: String,
    /// Checksummed address.
    pub address: String,
    /// Key material and display extras.
    #[serde(flatten)]
    pub material: Map<String, Value>,
}

impl WalletData {
    /// Returns the reference for this wallet.
    #[inline]
    #[must_use]
    pub fn wallet_ref(&self) -> WalletRef {
        WalletRef::new(self.uuid)
    }
}

impl Indexed for WalletData {
    type Ref = WalletRef;

    fn to_ref(&self) -> WalletRef {
        self.wallet_ref()
    }
}

// ============================================================================
// User
// ============================================================================

/// Non-owning pointer to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserRef {
    /// User id.
    pub uuid: UserId,
}

/// User creation parameters sent by the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInit {
    /// Chosen user id.
    pub uuid: UserId,
    /// Display name.
    pub name: String,
    /// Password used to derive the user keys.
    pub password: String,
    /// Display extras.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Stored user record produced by the keyring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    /// User id.
    pub uuid: UserId,
    /// Display name.
    pub name: String,
    /// Salts, key checks and display extras.
    #[serde(flatten)]
    pub material: Map<String, Value>,
}

impl Indexed for UserData {
    type Ref = UserRef;

    fn to_ref(&self) -> UserRef {
        UserRef { uuid: self.uuid }
    }
}

// ============================================================================
// Seed
// ============================================================================

/// Non-owning pointer to a seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeedRef {
    /// Seed id.
    pub uuid: SeedId,
}

/// Seed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedData {
    /// Seed id.
    pub uuid: SeedId,
    /// Display name.
    pub name: String,
    /// Encrypted mnemonic or hardware descriptor.
    #[serde(flatten)]
    pub material: Map<String, Value>,
}

impl Indexed for SeedData {
    type Ref = SeedRef;

    fn to_ref(&self) -> SeedRef {
        SeedRef { uuid: self.uuid }
    }
}

// ============================================================================
// Tests
// ============================================================================
