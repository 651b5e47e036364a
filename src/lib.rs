//! Brume background - session and connection-pool orchestrator for a
//! browser-extension wallet.
//!
//! The background sits between three kinds of peers and the outside world:
//!
//! - **Content scripts** forward dapp JSON-RPC calls through `brume_run`
//! - **Foreground UIs** (popup, tab) drive users, wallets and approvals
//! - **Relay sessions** (WalletConnect-style) forward requests of paired
//!   dapps
//!
//! Every network call goes over anonymous circuits, pooled and bundled per
//! wallet. Anything needing consent becomes a durable approval request that
//! a UI answers.
//!
//! # Architecture
//!
//! ```text
//!  content script ─┐                      ┌─► CircuitPool ─► EthBrume (per wallet)
//!                  ├─► Port ─► Orchestrator ─► RelayBundle ─► RelaySession
//!  foreground UI ──┘               │      └─► Store (global / per user)
//!                                  ▼
//!                     Correlator ◄─► PopupManager
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use brume_background::transport::DEFAULT_BIND_IP;
//! use brume_background::{Orchestrator, PortServer, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let orchestrator = Orchestrator::builder()
//!         .global_storage(storage)
//!         .circuit_factory(tor)
//!         .relay_protocol(walletconnect)
//!         .window_manager(browser.clone())
//!         .badge(browser.clone())
//!         .credential_store(session_storage)
//!         .keyring(keyring)
//!         .build()?;
//!
//!     orchestrator.init().await?;
//!
//!     let server = PortServer::bind(
//!         DEFAULT_BIND_IP,
//!         0,
//!         Arc::new(orchestrator.clone()),
//!         Duration::from_secs(1),
//!     )
//!     .await?;
//!     println!("Listening on {}", server.ws_url());
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown();
//!     orchestrator.close();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`orchestrator`] | The background façade and its routers |
//! | [`approval`] | Approval queue and popup lifecycle |
//! | [`circuit`] | Circuits, per-wallet bundles, relay bundles |
//! | [`pool`] | Self-refilling resource pools |
//! | [`relay`] | Relay session contracts and pairing URIs |
//! | [`session`] | Script attachments and the unlocked user |
//! | [`store`] | Key-value store with indexers |
//! | [`entities`] | Persisted records |
//! | [`ethereum`] | Cached Ethereum reads |
//! | [`platform`] | Browser and keyring collaborators |
//! | [`protocol`] | RPC envelopes and method names |
//! | [`transport`] | Ports, WebSocket bridge, foreground client |

// ============================================================================
// Modules
// ============================================================================

/// Approval queue and popup lifecycle.
pub mod approval;

/// Anonymous circuits and the bundles built on them.
pub mod circuit;

/// Persisted records and their indexers.
pub mod entities;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Cached Ethereum reads.
pub mod ethereum;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// The background orchestrator.
///
/// Use [`Orchestrator::builder()`] to create one.
pub mod orchestrator;

/// Browser and key-management collaborators.
pub mod platform;

/// Self-refilling resource pools.
pub mod pool;

/// RPC message types.
pub mod protocol;

/// Relay session contracts.
pub mod relay;

/// Script attachments and the unlocked user.
pub mod session;

/// Key-value store.
pub mod store;

/// Ports and their WebSocket transport.
pub mod transport;

#[cfg(test)]
mod testing;

// ============================================================================
// Re-exports
// ============================================================================

// Orchestrator types
pub use orchestrator::{BackgroundOptions, Orchestrator, OrchestratorBuilder};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{
    BrumeId, PortId, RequestId, SeedId, SessionId, TabId, UserId, WalletId, WindowId,
};

// Transport types
pub use transport::{BackgroundClient, Port, PortAcceptor, PortKind, PortServer};
