//! Localhost WebSocket server accepting UI and script ports.
//!
//! # Connection Flow
//!
//! 1. The server binds to `localhost` (port 0 picks a free port)
//! 2. A content script or UI connects; the request path selects the kind:
//!    `/foreground` for UIs, anything else for content scripts
//! 3. The socket becomes a [`Port`] handed to the [`PortAcceptor`]
//! 4. The background sends `brume_hello` and starts the ping loop

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::result::Result as StdResult;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::PortId;

use super::port::{Port, PortKind};
use super::websocket::websocket_port;

// ============================================================================
// Constants
// ============================================================================

/// Default bind address (localhost).
pub const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Request path marking a foreground UI.
pub const FOREGROUND_PATH: &str = "/foreground";

/// Accept poll interval, bounds shutdown latency.
const ACCEPT_POLL: Duration = Duration::from_millis(100);

// ============================================================================
// PortAcceptor
// ============================================================================

/// Receives every newly connected port.
pub trait PortAcceptor: Send + Sync {
    /// Installs routers and listeners on `port`.
    fn accept(&self, port: Port);
}

// ============================================================================
// PortServer
// ============================================================================

/// WebSocket server turning each connection into a [`Port`].
///
/// # Example
///
/// ```ignore
/// let server = PortServer::bind(DEFAULT_BIND_IP, 0, orchestrator.clone(), ping).await?;
/// println!("{}", server.ws_url());
/// ```
pub struct PortServer {
    port: u16,
    ports: Mutex<FxHashMap<PortId, Port>>,
    acceptor: Arc<dyn PortAcceptor>,
    ping_interval: Duration,
    shutdown: AtomicBool,
}

impl PortServer {
    /// Binds the server and starts the accept loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(
        ip: IpAddr,
        port: u16,
        acceptor: Arc<dyn PortAcceptor>,
        ping_interval: Duration,
    ) -> Result<Arc<Self>> {
        let addr = SocketAddr::new(ip, port);
        let listener = TcpListener::bind(addr).await?;
        let actual_port = listener.local_addr()?.port();

        let server = Arc::new(Self {
            port: actual_port,
            ports: Mutex::new(FxHashMap::default()),
            acceptor,
            ping_interval,
            shutdown: AtomicBool::new(false),
        });

        tokio::spawn(Arc::clone(&server).accept_loop(listener));

        info!(port = actual_port, "Port server started");

        Ok(server)
    }

    /// Returns the bound port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns `ws://127.0.0.1:{port}`.
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }

    /// Returns the number of open ports.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.ports.lock().len()
    }

    /// Stops accepting and closes every open port.
    pub fn shutdown(&self) {
        info!(port = self.port, "Port server shutting down");
        self.shutdown.store(true, Ordering::SeqCst);

        let ports: Vec<Port> = self.ports.lock().drain().map(|(_, port)| port).collect();
        for port in ports {
            port.close();
        }
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("Accept loop started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                debug!("Accept loop shutting down");
                break;
            }

            match timeout(ACCEPT_POLL, listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream, addr).await {
                            warn!(error = %e, ?addr, "Connection handling failed");
                        }
                    });
                }
                Ok(Err(e)) => error!(error = %e, "Accept failed"),
                Err(_) => continue,
            }
        }

        debug!("Accept loop terminated");
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let mut path = String::new();
        let callback = |request: &Request, response: Response| -> StdResult<Response, ErrorResponse> {
            path = request.uri().path().to_string();
            Ok(response)
        };

        let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

        let kind = if path == FOREGROUND_PATH {
            PortKind::Foreground
        } else {
            PortKind::Script
        };

        let port = websocket_port(kind, ws_stream);
        let port_id = port.id();

        info!(?addr, %port_id, ?kind, "Port connected");

        if self.shutdown.load(Ordering::SeqCst) {
            port.close();
            return Ok(());
        }

        self.ports.lock().insert(port_id, port.clone());

        self.acceptor.accept(port.clone());
        port.send_hello();
        tokio::spawn(port.clone().run_ping_loop(self.ping_interval));

        port.closed().await;
        self.ports.lock().remove(&port_id);
        debug!(%port_id, "Port removed");

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
