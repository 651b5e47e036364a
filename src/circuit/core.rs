//! Anonymous circuit collaborator and its pool.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{Error, Result};
use crate::pool::{Pool, PoolOptions};

// ============================================================================
// HTTP
// ============================================================================

/// HTTP request sent through a circuit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: String,
    /// Absolute URL.
    pub url: String,
    /// Header pairs.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// `GET url`.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// `POST url` with a JSON body.
    pub fn post_json<T: serde::Serialize + ?Sized>(url: impl Into<String>, body: &T) -> Result<Self> {
        Ok(Self {
            method: "POST".to_string(),
            url: url.into(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Some(serde_json::to_vec(body)?),
        })
    }
}

/// HTTP response received through a circuit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// `Content-Type` header value.
    pub content_type: Option<String>,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns `true` for 2xx responses.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Fails on non-2xx statuses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CircuitUnavailable`] with the status code.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::circuit(format!("HTTP {}", self.status)))
        }
    }
}

// ============================================================================
// Circuit
// ============================================================================

/// One anonymous circuit.
#[async_trait]
pub trait Circuit: Send + Sync {
    /// Stable identifier for logs.
    fn id(&self) -> &str;

    /// Performs an HTTP exchange through the circuit.
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Tears the circuit down.
    async fn destroy(&self) {}
}

/// Builds circuits.
#[async_trait]
pub trait CircuitFactory: Send + Sync {
    /// Opens a new circuit for pool slot `index`.
    async fn create(&self, index: usize) -> Result<Arc<dyn Circuit>>;
}

/// Shared circuit handle.
pub type SharedCircuit = Arc<dyn Circuit>;

/// Pool of anonymous circuits.
pub type CircuitPool = Pool<SharedCircuit>;

impl fmt::Debug for dyn Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Circuit").field(&self.id()).finish()
    }
}

/// Creates the process-wide circuit pool.
///
/// Must be called inside a tokio runtime.
#[must_use]
pub fn create_circuit_pool(
    factory: Arc<dyn CircuitFactory>,
    capacity: usize,
    options: PoolOptions,
) -> CircuitPool {
    Pool::with_options(capacity, options, move |params| {
        let factory = Arc::clone(&factory);
        async move {
            let circuit = factory.create(params.index).await?;
            debug!(index = params.index, circuit = circuit.id(), "Circuit opened");
            Ok(circuit)
        }
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::testing::FakeCircuitFactory;

    #[test]
    fn test_post_json() {
        let request = HttpRequest::post_json("https://x", &json!({"tor": true})).expect("request");
        assert_eq!(request.method, "POST");
        assert_eq!(request.body.as_deref(), Some(br#"{"tor":true}"#.as_slice()));
    }

    #[test]
    fn test_error_for_status() {
        let ok = HttpResponse {
            status: 204,
            content_type: None,
            body: Vec::new(),
        };
        assert!(ok.error_for_status().is_ok());

        let bad = HttpResponse {
            status: 502,
            content_type: None,
            body: Vec::new(),
        };
        assert!(bad.error_for_status().unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_circuit_pool_fills() {
        let factory = Arc::new(FakeCircuitFactory::new());
        let pool = create_circuit_pool(factory.clone(), 3, PoolOptions::default());

        let entry = pool.take().await.expect("take");
        assert!(entry.value.id().starts_with("circuit-"));
        assert!(factory.created() >= 3);
    }
}
