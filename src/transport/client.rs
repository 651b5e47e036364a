//! Self-healing foreground connection to the background.
//!
//! The [`BackgroundClient`] keeps a pool with a single [`Port`]. When the
//! port closes, its slot is rebuilt: reconnect, wait for the background's
//! hello, start the ping loop and replay the stored login so a restarted
//! background is unlocked again.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio_tungstenite::connect_async;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::platform::CredentialStore;
use crate::pool::{Pool, PoolOptions};
use crate::protocol::{ForegroundMethod, RpcRequest, RpcResponse};

use super::port::{Port, PortKind, RequestRouter};
use super::websocket::websocket_port;

// ============================================================================
// Connector
// ============================================================================

/// Opens a raw port to the background.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects and returns a port that has not yet seen hello.
    async fn connect(&self) -> Result<Port>;
}

/// Connects over WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    /// Creates a connector for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Port> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::connection(format!("{}: {e}", self.url)))?;

        Ok(websocket_port(PortKind::Background, ws_stream))
    }
}

// ============================================================================
// Options
// ============================================================================

/// Timing of the client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    /// Deadline for the background's hello.
    pub hello_timeout: Duration,
    /// Keep-alive interval.
    pub ping_interval: Duration,
    /// Reconnect backoff.
    pub pool: PoolOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            hello_timeout: Duration::from_millis(1000),
            ping_interval: Duration::from_secs(1),
            pool: PoolOptions::default(),
        }
    }
}

// ============================================================================
// BackgroundClient
// ============================================================================

type Routers = Arc<Mutex<Vec<Arc<dyn RequestRouter>>>>;

/// Forwards requests to the client-level routers, whatever port is current.
struct Forwarder {
    routers: Routers,
}

#[async_trait]
impl RequestRouter for Forwarder {
    async fn route(&self, port: &Port, request: &RpcRequest) -> Option<Result<Value>> {
        let routers: Vec<Arc<dyn RequestRouter>> = self.routers.lock().clone();
        for router in routers {
            if let Some(result) = router.route(port, request).await {
                return Some(result);
            }
        }
        None
    }
}

/// Pooled, reconnecting port to the background.
#[derive(Clone)]
pub struct BackgroundClient {
    pool: Pool<Port>,
    routers: Routers,
    responses: broadcast::Sender<RpcResponse>,
}

impl BackgroundClient {
    /// Creates the client and starts connecting.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn new(
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialStore>,
        options: ClientOptions,
    ) -> Self {
        let routers: Routers = Arc::new(Mutex::new(Vec::new()));
        let (responses, _) = broadcast::channel(64);

        let pool = {
            let routers = Arc::clone(&routers);
            let responses = responses.clone();

            Pool::with_options(1, options.pool, move |params| {
                let connector = Arc::clone(&connector);
                let credentials = Arc::clone(&credentials);
                let routers = Arc::clone(&routers);
                let responses = responses.clone();

                async move {
                    let port = connector.connect().await?;

                    if let Err(e) = port.wait_hello(options.hello_timeout).await {
                        port.close();
                        return Err(e);
                    }

                    tokio::spawn(port.clone().run_ping_loop(options.ping_interval));

                    if let Some(credential) = credentials.load().await? {
                        let login = RpcRequest::new(
                            ForegroundMethod::Login.as_str(),
                            json!([credential.uuid, credential.password]),
                        );
                        if let Err(e) = port.request(login).await.and_then(RpcResponse::into_result) {
                            port.close();
                            return Err(e);
                        }
                        debug!(user = %credential.uuid, "Login replayed");
                    }

                    port.add_router(Arc::new(Forwarder { routers }));
                    port.on_response(move |response| {
                        let _ = responses.send(response.clone());
                    });

                    let index = params.index;
                    let pool = params.pool;
                    port.on_close(move || {
                        debug!(index, "Background port closed, reconnecting");
                        pool.restart(index);
                    });

                    info!(port_id = %port.id(), "Connected to background");
                    Ok(port)
                }
            })
        };

        Self {
            pool,
            routers,
            responses,
        }
    }

    /// Returns the current port, waiting for a connection.
    pub async fn port(&self) -> Result<Port> {
        self.pool.get(0).await
    }

    /// Sends a request to the background and returns its result.
    pub async fn request(&self, request: RpcRequest) -> Result<Value> {
        self.port().await?.request(request).await?.into_result()
    }

    /// Adds a router for requests pushed by the background.
    pub fn add_router(&self, router: Arc<dyn RequestRouter>) {
        self.routers.lock().push(router);
    }

    /// Subscribes to uncorrelated responses from the background.
    #[must_use]
    pub fn responses(&self) -> broadcast::Receiver<RpcResponse> {
        self.responses.subscribe()
    }

    /// Closes the client and its port.
    pub fn close(&self) {
        if let Ok(Some(port)) = self.pool.try_get(0) {
            self.pool.close();
            port.close();
        } else {
            self.pool.close();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
