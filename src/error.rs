//! Error types for the Brume background orchestrator.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use brume_background::{Error, Result};
//!
//! async fn example(orchestrator: &Orchestrator) -> Result<()> {
//!     orchestrator.login(uuid, "password").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants | Handling |
//! |----------|----------|----------|
//! | Transient resource | [`Error::CircuitUnavailable`], [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::HandshakeTimeout`], [`Error::RequestTimeout`], [`Error::Relay`] | Retried by pool restart or retry loop |
//! | User decision | [`Error::UserRejected`], [`Error::PopupDismissed`] | Surfaced to the origin, never retried |
//! | Protocol mismatch | [`Error::Protocol`], [`Error::MethodNotFound`], [`Error::InvalidParams`] | Logged or answered, never fatal |
//! | Missing precondition | [`Error::NotLoggedIn`], [`Error::MissingPrecondition`], [`Error::UnknownChain`] | Surfaced to the immediate caller |
//! | Configuration | [`Error::Config`] | Returned by the builder |
//! | External | [`Error::Storage`], [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] | Propagated |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::RequestId;
use crate::protocol::RpcError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// JSON-RPC Error Codes
// ============================================================================

/// EIP-1193 "user rejected the request".
pub const CODE_USER_REJECTED: i64 = 4001;

/// EIP-3326 "unrecognized chain".
pub const CODE_UNKNOWN_CHAIN: i64 = 4902;

/// JSON-RPC "method not found".
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC "invalid params".
pub const CODE_INVALID_PARAMS: i64 = -32602;

/// JSON-RPC "internal error".
pub const CODE_INTERNAL: i64 = -32603;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when the orchestrator builder is missing a collaborator.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Transient Resource Errors
    // ========================================================================
    /// No anonymous circuit could serve the request.
    #[error("Circuit unavailable: {message}")]
    CircuitUnavailable {
        /// Description of the circuit failure.
        message: String,
    },

    /// Channel or socket connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Channel closed while a call was outstanding.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Hello handshake not received in time.
    #[error("Handshake timeout after {timeout_ms}ms")]
    HandshakeTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Request sent over a port was not answered in time.
    #[error("Request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Relay (pairing protocol) failure.
    #[error("Relay error: {message}")]
    Relay {
        /// Description of the relay failure.
        message: String,
    },

    // ========================================================================
    // User Decision Errors
    // ========================================================================
    /// The user explicitly rejected the request.
    #[error("User rejected the request: {message}")]
    UserRejected {
        /// Message returned by the approval UI.
        message: String,
    },

    /// The approval popup was closed before answering.
    #[error("User dismissed the approval window")]
    PopupDismissed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or unexpected message.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// No router handles this method.
    #[error("Method not found: {method}")]
    MethodNotFound {
        /// The unhandled method.
        method: String,
    },

    /// Request parameters could not be decoded.
    #[error("Invalid params: {message}")]
    InvalidParams {
        /// Description of the decoding failure.
        message: String,
    },

    // ========================================================================
    // Missing Precondition Errors
    // ========================================================================
    /// No user is logged in.
    #[error("No user is logged in")]
    NotLoggedIn,

    /// A required record or state is missing.
    #[error("Missing {what}")]
    MissingPrecondition {
        /// What was expected to exist.
        what: String,
    },

    /// The chain id is not in the chain table.
    #[error("Unknown chain: {chain_id}")]
    UnknownChain {
        /// The requested chain id.
        chain_id: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// Storage collaborator failure.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a circuit unavailable error.
    #[inline]
    pub fn circuit(message: impl Into<String>) -> Self {
        Self::CircuitUnavailable {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a handshake timeout error.
    #[inline]
    pub fn handshake_timeout(timeout_ms: u64) -> Self {
        Self::HandshakeTimeout { timeout_ms }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(request_id: RequestId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            request_id,
            timeout_ms,
        }
    }

    /// Creates a relay error.
    #[inline]
    pub fn relay(message: impl Into<String>) -> Self {
        Self::Relay {
            message: message.into(),
        }
    }

    /// Creates a user rejection error.
    #[inline]
    pub fn user_rejected(message: impl Into<String>) -> Self {
        Self::UserRejected {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a method not found error.
    #[inline]
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::MethodNotFound {
            method: method.into(),
        }
    }

    /// Creates an invalid params error.
    #[inline]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    /// Creates a missing precondition error.
    #[inline]
    pub fn missing(what: impl Into<String>) -> Self {
        Self::MissingPrecondition { what: what.into() }
    }

    /// Creates an unknown chain error.
    #[inline]
    pub fn unknown_chain(chain_id: u64) -> Self {
        Self::UnknownChain { chain_id }
    }

    /// Creates a storage error.
    #[inline]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a transient resource error.
    ///
    /// Transient errors are retried by restarting a pool slot or by
    /// re-selecting a circuit.
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::CircuitUnavailable { .. }
                | Self::Connection { .. }
                | Self::ConnectionClosed
                | Self::HandshakeTimeout { .. }
                | Self::RequestTimeout { .. }
                | Self::Relay { .. }
                | Self::WebSocket(_)
                | Self::ChannelClosed(_)
        )
    }

    /// Returns `true` if this error comes from a user decision.
    #[inline]
    #[must_use]
    pub fn is_user_decision(&self) -> bool {
        matches!(self, Self::UserRejected { .. } | Self::PopupDismissed)
    }

    /// Returns `true` if this is a missing precondition error.
    #[inline]
    #[must_use]
    pub fn is_missing_precondition(&self) -> bool {
        matches!(
            self,
            Self::NotLoggedIn | Self::MissingPrecondition { .. } | Self::UnknownChain { .. }
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.is_transient()
    }

    /// Returns the JSON-RPC error code for this error.
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            Self::UserRejected { .. } | Self::PopupDismissed => CODE_USER_REJECTED,
            Self::UnknownChain { .. } => CODE_UNKNOWN_CHAIN,
            Self::MethodNotFound { .. } => CODE_METHOD_NOT_FOUND,
            Self::InvalidParams { .. } => CODE_INVALID_PARAMS,
            _ => CODE_INTERNAL,
        }
    }

    /// Converts this error into a JSON-RPC error object.
    #[must_use]
    pub fn to_rpc(&self) -> RpcError {
        RpcError::new(self.code(), self.to_string())
    }
}

impl From<RpcError> for Error {
    fn from(error: RpcError) -> Self {
        match error.code {
            CODE_USER_REJECTED => Self::user_rejected(error.message),
            CODE_METHOD_NOT_FOUND => Self::method_not_found(error.message),
            CODE_INVALID_PARAMS => Self::invalid_params(error.message),
            _ => Self::protocol(error.message),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
