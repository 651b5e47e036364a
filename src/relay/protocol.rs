//! Pairing protocol collaborator.
//!
//! The cryptographic envelope and relay wire format live behind
//! [`RelayProtocol`] and [`RelaySession`]. The orchestrator only sees
//! sessions that can be subscribed, awaited, routed and closed.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64Standard;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::circuit::RelayBundle;
use crate::error::{Error, Result};
use crate::protocol::RpcPreRequest;

use super::uri::PairingUri;

// ============================================================================
// Constants
// ============================================================================

/// Method carrying a dapp request inside a relay session.
pub const SESSION_REQUEST: &str = "wc_sessionRequest";

// ============================================================================
// Metadata
// ============================================================================

/// Peer metadata announced during pairing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayMetadata {
    /// Dapp name.
    #[serde(default)]
    pub name: String,
    /// Dapp description.
    #[serde(default)]
    pub description: String,
    /// Dapp URL.
    #[serde(default)]
    pub url: String,
    /// Icon URLs.
    #[serde(default)]
    pub icons: Vec<String>,
}

/// Params of a [`SESSION_REQUEST`] call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequestParams {
    /// CAIP-2 chain reference, e.g. `eip155:1`.
    pub chain_id: String,
    /// Dapp request.
    pub request: RpcPreRequest,
}

// ============================================================================
// SettlementReceipt
// ============================================================================

/// Handle on a pending pairing handshake.
///
/// Issued by [`RelayProtocol::pair`] and persisted with the session before
/// being awaited, so a restarted process can await it again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettlementReceipt(Value);

impl SettlementReceipt {
    /// Wraps a protocol-specific receipt.
    #[inline]
    #[must_use]
    pub const fn new(value: Value) -> Self {
        Self(value)
    }

    /// Returns the protocol-specific receipt.
    #[inline]
    #[must_use]
    pub const fn as_value(&self) -> &Value {
        &self.0
    }
}

// ============================================================================
// Keys
// ============================================================================

/// Local Ed25519 authentication keypair, as a JWK.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthKey(Value);

impl AuthKey {
    /// Imports a private JWK.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParams`] unless the JWK is an `OKP`/`Ed25519`
    /// key carrying both `x` and `d`.
    pub fn from_jwk(jwk: Value) -> Result<Self> {
        let field = |name: &str| jwk.get(name).and_then(Value::as_str);

        if field("kty") != Some("OKP") || field("crv") != Some("Ed25519") {
            return Err(Error::invalid_params("auth key must be an Ed25519 OKP key"));
        }
        if field("x").is_none() || field("d").is_none() {
            return Err(Error::invalid_params("auth key must be a private key"));
        }

        Ok(Self(jwk))
    }

    /// Exports the JWK.
    #[inline]
    #[must_use]
    pub fn to_jwk(&self) -> Value {
        self.0.clone()
    }

    /// Returns the public component.
    #[must_use]
    pub fn public_x(&self) -> &str {
        self.0.get("x").and_then(Value::as_str).unwrap_or_default()
    }
}

impl fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AuthKey").field(&self.public_x()).finish()
    }
}

/// 32-byte symmetric session key.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    /// Wraps raw key bytes.
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Decodes a padded base64 key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParams`] if decoding fails or the key is not
    /// 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = Base64Standard
            .decode(encoded)
            .map_err(|e| Error::invalid_params(format!("session key: {e}")))?;

        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::invalid_params("session key must be 32 bytes"))?;

        Ok(Self(bytes))
    }

    /// Encodes as padded base64.
    #[must_use]
    pub fn to_base64(&self) -> String {
        Base64Standard.encode(self.0)
    }

    /// Returns the raw bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

// ============================================================================
// Session
// ============================================================================

/// Lifecycle events of a live relay session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// The relay connection closed.
    Close,
    /// The relay connection failed.
    Error(String),
}

/// Handles dapp requests arriving over a relay session.
///
/// Returning `None` means "not handled here".
#[async_trait]
pub trait RelayRouter: Send + Sync {
    /// Routes one inbound request.
    async fn route(&self, request: &RpcPreRequest) -> Option<Result<Value>>;
}

/// A live, encrypted relay session.
#[async_trait]
pub trait RelaySession: Send + Sync {
    /// Relay topic.
    fn topic(&self) -> &str;

    /// Shared symmetric key.
    fn session_key(&self) -> &SessionKey;

    /// Local authentication key.
    fn auth_key(&self) -> &AuthKey;

    /// Peer metadata.
    fn metadata(&self) -> &RelayMetadata;

    /// Subscribes to the topic on the relay.
    async fn subscribe(&self) -> Result<()>;

    /// Waits for a pending handshake to be confirmed.
    ///
    /// Returns `false` if the peer rejected it.
    async fn wait_settlement(&self, receipt: &SettlementReceipt) -> Result<bool>;

    /// Installs or removes the inbound request handler.
    fn set_router(&self, router: Option<Arc<dyn RelayRouter>>);

    /// Subscribes to close and error events.
    fn events(&self) -> broadcast::Receiver<RelayEvent>;

    /// Closes the session.
    async fn close(&self) -> Result<()>;
}

// ============================================================================
// Protocol
// ============================================================================

/// Result of a new pairing: the session and its pending handshake.
pub struct Pairing {
    /// New session.
    pub session: Arc<dyn RelaySession>,
    /// Receipt to await before the session is usable.
    pub settlement: SettlementReceipt,
}

/// Factory for relay sessions.
#[async_trait]
pub trait RelayProtocol: Send + Sync {
    /// Generates a fresh authentication keypair.
    async fn generate_auth_key(&self) -> Result<AuthKey>;

    /// Rebuilds a session from persisted material.
    async fn restore(
        &self,
        bundle: RelayBundle,
        topic: &str,
        key: SessionKey,
        metadata: RelayMetadata,
    ) -> Result<Arc<dyn RelaySession>>;

    /// Pairs with a dapp as `address`.
    async fn pair(&self, bundle: RelayBundle, uri: &PairingUri, address: &str) -> Result<Pairing>;
}

// ============================================================================
// Tests
// ============================================================================
