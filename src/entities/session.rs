//! Sessions: authorizations between one origin and its wallets.
//!
//! A session is stored once under `session/<id>`. Everything else points at
//! it through a [`SessionRef`] maintained by [`SessionIndexer`]:
//!
//! ```text
//! session/<id> ──► sessionByOrigin/<origin>      SessionRef
//!              ──► sessionsByWallet/<uuid>       [SessionRef]
//!              ──► persistentSessions            [SessionRef]  (persist = true)
//!              ──► temporarySessions             [SessionRef]  (persist = false)
//! ```

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::relay::{RelayMetadata, SettlementReceipt};
use crate::store::{Change, Indexer, Storage, keys, update_list};

use super::chain::EthereumChain;
use super::wallet::WalletRef;

// ============================================================================
// SessionRef
// ============================================================================

/// Non-owning pointer to a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionRef {
    /// Session id.
    pub id: SessionId,
    /// Session origin.
    pub origin: String,
}

// ============================================================================
// Session
// ============================================================================

/// Authorization of one origin on one chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Session id.
    pub id: SessionId,
    /// Web origin, or `wc://<uuid>` for relay pairings.
    pub origin: String,
    /// Survives logout when `true`.
    pub persist: bool,
    /// Authorized wallets, never empty.
    pub wallets: Vec<WalletRef>,
    /// Current chain.
    pub chain: EthereumChain,
    /// Variant-specific payload.
    #[serde(flatten)]
    pub kind: SessionKind,
}

/// Session variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionKind {
    /// Content-script origin.
    #[serde(rename = "ex")]
    Direct,
    /// Relay pairing.
    #[serde(rename = "wc")]
    Relay(RelaySessionData),
}

/// Persisted relay pairing state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaySessionData {
    /// Peer metadata.
    pub metadata: RelayMetadata,
    /// Relay endpoint.
    pub relay: String,
    /// Relay topic.
    pub topic: String,
    /// Shared session key.
    pub session_key_base64: String,
    /// Local authentication keypair.
    pub auth_key_jwk: Value,
    /// Handshake still awaiting confirmation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement: Option<SettlementReceipt>,
}

impl Session {
    /// Creates a content-script session.
    #[must_use]
    pub fn direct(
        origin: impl Into<String>,
        persist: bool,
        wallet: WalletRef,
        chain: EthereumChain,
    ) -> Self {
        Self {
            id: SessionId::generate(),
            origin: origin.into(),
            persist,
            wallets: vec![wallet],
            chain,
            kind: SessionKind::Direct,
        }
    }

    /// Creates a relay session. Relay sessions always persist.
    #[must_use]
    pub fn relay(
        origin: impl Into<String>,
        wallet: WalletRef,
        chain: EthereumChain,
        data: RelaySessionData,
    ) -> Self {
        Self {
            id: SessionId::generate(),
            origin: origin.into(),
            persist: true,
            wallets: vec![wallet],
            chain,
            kind: SessionKind::Relay(data),
        }
    }

    /// Returns the reference for this session.
    #[must_use]
    pub fn session_ref(&self) -> SessionRef {
        SessionRef {
            id: self.id,
            origin: self.origin.clone(),
        }
    }

    /// Returns the primary wallet.
    pub fn first_wallet(&self) -> Result<WalletRef> {
        self.wallets
            .first()
            .copied()
            .ok_or_else(|| Error::missing("session wallet"))
    }

    /// Returns the relay payload, if this is a relay session.
    #[inline]
    #[must_use]
    pub fn relay_data(&self) -> Option<&RelaySessionData> {
        match &self.kind {
            SessionKind::Relay(data) => Some(data),
            SessionKind::Direct => None,
        }
    }

    /// Returns `true` for relay sessions.
    #[inline]
    #[must_use]
    pub fn is_relay(&self) -> bool {
        matches!(self.kind, SessionKind::Relay(_))
    }

    /// Returns the list key this session is indexed under.
    #[inline]
    #[must_use]
    pub fn lifetime_key(&self) -> &'static str {
        if self.persist {
            keys::PERSISTENT_SESSIONS
        } else {
            keys::TEMPORARY_SESSIONS
        }
    }
}

// ============================================================================
// SessionIndexer
// ============================================================================

/// Maintains the by-origin, by-wallet and lifetime indexes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionIndexer;

#[async_trait]
impl Indexer for SessionIndexer {
    async fn index(&self, storage: &dyn Storage, change: &Change<'_>) -> Result<()> {
        if !change.key.starts_with(keys::SESSION_PREFIX) {
            return Ok(());
        }

        let previous = change.previous_as::<Session>();
        let current = change.current_as::<Session>();

        if let Some(previous) = &previous {
            let reference = previous.session_ref();

            let moved = current
                .as_ref()
                .is_none_or(|current| current.origin != previous.origin);
            if moved {
                storage
                    .delete(&keys::session_by_origin(&previous.origin))
                    .await?;
            }

            for wallet in &previous.wallets {
                let reference = reference.clone();
                update_list(storage, &keys::sessions_by_wallet(wallet.uuid), move |list| {
                    list.retain(|item: &SessionRef| *item != reference);
                })
                .await?;
            }

            let reference = reference.clone();
            update_list(storage, previous.lifetime_key(), move |list| {
                list.retain(|item: &SessionRef| *item != reference);
            })
            .await?;
        }

        if let Some(current) = &current {
            let reference = current.session_ref();

            storage
                .set(
                    &keys::session_by_origin(&current.origin),
                    serde_json::to_value(&reference)?,
                )
                .await?;

            for wallet in &current.wallets {
                let reference = reference.clone();
                update_list(storage, &keys::sessions_by_wallet(wallet.uuid), move |list| {
                    push_unique(list, reference);
                })
                .await?;
            }

            update_list(storage, current.lifetime_key(), move |list| {
                push_unique(list, reference);
            })
            .await?;
        }

        Ok(())
    }
}

fn push_unique(list: &mut Vec<SessionRef>, reference: SessionRef) {
    if !list.contains(&reference) {
        list.push(reference);
    }
}

// ============================================================================
// Tests
// ============================================================================
