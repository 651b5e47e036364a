//! Port transport layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Content script │         WebSocket            │                 │
//! │  Popup / tab    │◄────────────────────────────►│   PortServer    │
//! │                 │      localhost:PORT          │   → Port        │
//! │ BackgroundClient│                              │   → Orchestrator│
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Port Lifecycle
//!
//! 1. `PortServer::bind` - Bind to localhost
//! 2. A UI or script connects; the socket becomes a `Port`
//! 3. The background sends `brume_hello` and pings every second
//! 4. Requests flow both ways, correlated by id
//! 5. The port closes once; close listeners clean up attached state
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `port` | Request/response correlation, handshake, keep-alive |
//! | `websocket` | Socket ↔ port frame pump |
//! | `server` | WebSocket server |
//! | `client` | Reconnecting foreground client |

// ============================================================================
// Submodules
// ============================================================================

/// Reconnecting foreground client.
pub mod client;

/// RPC port.
pub mod port;

/// WebSocket server.
pub mod server;

/// WebSocket bridge.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::{BackgroundClient, ClientOptions, Connector, WebSocketConnector};
pub use port::{DEFAULT_REQUEST_TIMEOUT, Port, PortKind, RequestRouter};
pub use server::{DEFAULT_BIND_IP, FOREGROUND_PATH, PortAcceptor, PortServer};
pub use websocket::websocket_port;
