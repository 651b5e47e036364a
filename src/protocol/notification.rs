//! Outbound notifications pushed to scripts and UIs.
//!
//! Notifications are requests whose response the background ignores.
//!
//! | Notification | Target | Params |
//! |--------------|--------|--------|
//! | `brume_hello` | any port | `[]` |
//! | `brume_ping` | any port | `[]` |
//! | `brume_update` | subscribed UI | `[cacheKey, storedValue]` |
//! | `accountsChanged` | attached scripts | `[[address, ...]]` |
//! | `chainChanged` | attached scripts | `[chainIdHex]` |

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Value, json};

use super::RpcRequest;

// ============================================================================
// Method Names
// ============================================================================

/// Handshake sent right after a channel opens.
pub const HELLO: &str = "brume_hello";

/// Keep-alive probe.
pub const PING: &str = "brume_ping";

// ============================================================================
// Notification
// ============================================================================

/// A message pushed by the background without a caller waiting on it.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Channel handshake.
    Hello,

    /// Keep-alive probe.
    Ping,

    /// A subscribed cache key changed.
    Update {
        /// Cache key.
        key: String,
        /// New stored value (`null` when deleted).
        value: Option<Value>,
    },

    /// The session accounts changed (empty on disconnect).
    AccountsChanged(Vec<String>),

    /// The session chain changed.
    ChainChanged(String),
}

impl Notification {
    /// Returns the wire method name.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::Hello => HELLO,
            Self::Ping => PING,
            Self::Update { .. } => "brume_update",
            Self::AccountsChanged(_) => "accountsChanged",
            Self::ChainChanged(_) => "chainChanged",
        }
    }

    /// Returns the positional params.
    #[must_use]
    pub fn params(&self) -> Value {
        match self {
            Self::Hello | Self::Ping => json!([]),
            Self::Update { key, value } => json!([key, value]),
            Self::AccountsChanged(accounts) => json!([accounts]),
            Self::ChainChanged(chain_id) => json!([chain_id]),
        }
    }

    /// Builds the request envelope.
    #[must_use]
    pub fn into_request(self) -> RpcRequest {
        let params = self.params();
        RpcRequest::new(self.method(), params)
    }
}

// ============================================================================
// Tests
// ============================================================================
