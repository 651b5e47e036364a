//! Request and Response envelope types.
//!
//! Every message crossing a [`Port`](crate::transport::Port) uses the same
//! JSON-RPC-like envelope.
//!
//! # Format
//!
//! Request:
//! ```json
//! { "id": "uuid", "method": "brume_run", "params": [ ... ] }
//! ```
//!
//! Response:
//! ```json
//! { "id": "uuid", "result": { ... } }
//! { "id": "uuid", "error": { "code": 4001, "message": "..." } }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

// ============================================================================
// RpcRequest
// ============================================================================

/// A request with a correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Unique identifier for request/response correlation.
    pub id: RequestId,

    /// Method name.
    pub method: String,

    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    /// Creates a new request with auto-generated ID.
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            id: RequestId::generate(),
            method: method.into(),
            params,
        }
    }

    /// Creates a new request with a specific ID.
    #[inline]
    #[must_use]
    pub fn with_id(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    /// Decodes the params into a typed tuple or struct.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParams`] if the params do not match `T`.
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T> {
        decode_params(&self.method, &self.params)
    }
}

// ============================================================================
// RpcPreRequest
// ============================================================================

/// A request without correlation id.
///
/// Used for sub-requests nested in `brume_run` and for requests forwarded
/// from relay sessions, whose ids belong to the dapp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcPreRequest {
    /// Method name.
    pub method: String,

    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

impl RpcPreRequest {
    /// Creates a new pre-request.
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Decodes the params into a typed tuple or struct.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParams`] if the params do not match `T`.
    pub fn params_as<T: DeserializeOwned>(&self) -> Result<T> {
        decode_params(&self.method, &self.params)
    }

    /// Attaches a fresh id.
    #[inline]
    #[must_use]
    pub fn into_request(self) -> RpcRequest {
        RpcRequest::new(self.method, self.params)
    }
}

impl From<RpcRequest> for RpcPreRequest {
    fn from(request: RpcRequest) -> Self {
        Self {
            method: request.method,
            params: request.params,
        }
    }
}

fn decode_params<T: DeserializeOwned>(method: &str, params: &Value) -> Result<T> {
    serde_json::from_value(params.clone())
        .map_err(|e| Error::invalid_params(format!("{method}: {e}")))
}

// ============================================================================
// RpcError
// ============================================================================

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,

    /// Human readable message.
    pub message: String,
}

impl RpcError {
    /// Creates an error object.
    #[inline]
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

// ============================================================================
// RpcResponse
// ============================================================================

/// A response correlated to a request by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Matches the request `id`.
    pub id: RequestId,

    /// Result data (if success).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Error object (if error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    /// Creates a success response.
    #[inline]
    #[must_use]
    pub fn ok(id: RequestId, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Creates an error response.
    #[inline]
    #[must_use]
    pub fn err(id: RequestId, error: RpcError) -> Self {
        Self {
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Creates a response from a crate result.
    #[must_use]
    pub fn from_result(id: RequestId, result: Result<Value>) -> Self {
        match result {
            Ok(value) => Self::ok(id, value),
            Err(e) => Self::err(id, e.to_rpc()),
        }
    }

    /// Returns `true` if this is a success response.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Extracts the result value, returning error if response was error.
    ///
    /// # Errors
    ///
    /// Returns the error converted by [`Error::from`]; code 4001 maps to
    /// [`Error::UserRejected`].
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            None => Ok(self.result.unwrap_or(Value::Null)),
            Some(error) => Err(Error::from(error)),
        }
    }

    /// Extracts and decodes the result value.
    ///
    /// # Errors
    ///
    /// Returns the response error, or [`Error::InvalidParams`] if the
    /// result does not decode into `T`.
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<T> {
        let value = self.into_result()?;
        serde_json::from_value(value)
            .map_err(|e| Error::invalid_params(format!("unexpected result shape: {e}")))
    }
}

// ============================================================================
// Message
// ============================================================================

/// Any frame received on a port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    /// Inbound call.
    Request(RpcRequest),
    /// Reply to one of our calls.
    Response(RpcResponse),
}

// ============================================================================
// Tests
// ============================================================================
