//! Builder pattern for orchestrator configuration.
//!
//! # Example
//!
//! ```ignore
//! use brume_background::Orchestrator;
//!
//! let orchestrator = Orchestrator::builder()
//!     .global_storage(storage)
//!     .circuit_factory(tor)
//!     .relay_protocol(walletconnect)
//!     .window_manager(browser.clone())
//!     .badge(browser.clone())
//!     .credential_store(session_storage)
//!     .keyring(keyring)
//!     .build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::approval::{Correlator, PopupManager};
use crate::circuit::{CircuitFactory, create_circuit_pool};
use crate::entities::global_indexers;
use crate::error::{Error, Result};
use crate::ethereum::{CachedEthereumFetcher, EthereumFetcher};
use crate::platform::{Badge, CredentialStore, Keyring, WindowManager};
use crate::relay::RelayProtocol;
use crate::store::{Storage, Store};

use super::core::{Collaborators, Orchestrator};
use super::options::BackgroundOptions;

// ============================================================================
// OrchestratorBuilder
// ============================================================================

/// Builder for an [`Orchestrator`].
///
/// Use [`Orchestrator::builder()`] to create one.
#[derive(Default)]
pub struct OrchestratorBuilder {
    options: BackgroundOptions,
    global: Option<Arc<dyn Storage>>,
    circuits: Option<Arc<dyn CircuitFactory>>,
    relay: Option<Arc<dyn RelayProtocol>>,
    windows: Option<Arc<dyn WindowManager>>,
    badge: Option<Arc<dyn Badge>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    keyring: Option<Arc<dyn Keyring>>,
    fetcher: Option<Arc<dyn EthereumFetcher>>,
}

impl fmt::Debug for OrchestratorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorBuilder")
            .field("options", &self.options)
            .field("global", &self.global.is_some())
            .field("circuits", &self.circuits.is_some())
            .field("relay", &self.relay.is_some())
            .field("windows", &self.windows.is_some())
            .field("badge", &self.badge.is_some())
            .field("credentials", &self.credentials.is_some())
            .field("keyring", &self.keyring.is_some())
            .field("fetcher", &self.fetcher.is_some())
            .finish()
    }
}

// ============================================================================
// OrchestratorBuilder Implementation
// ============================================================================

impl OrchestratorBuilder {
    /// Creates a builder with default options and no collaborators.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: BackgroundOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the global storage (users, pending requests, status markers).
    #[inline]
    #[must_use]
    pub fn global_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.global = Some(storage);
        self
    }

    /// Sets the anonymous circuit factory.
    #[inline]
    #[must_use]
    pub fn circuit_factory(mut self, factory: Arc<dyn CircuitFactory>) -> Self {
        self.circuits = Some(factory);
        self
    }

    /// Sets the relay pairing protocol.
    #[inline]
    #[must_use]
    pub fn relay_protocol(mut self, protocol: Arc<dyn RelayProtocol>) -> Self {
        self.relay = Some(protocol);
        self
    }

    /// Sets the browser window API.
    #[inline]
    #[must_use]
    pub fn window_manager(mut self, windows: Arc<dyn WindowManager>) -> Self {
        self.windows = Some(windows);
        self
    }

    /// Sets the action badge.
    #[inline]
    #[must_use]
    pub fn badge(mut self, badge: Arc<dyn Badge>) -> Self {
        self.badge = Some(badge);
        self
    }

    /// Sets the session-scoped credential store.
    #[inline]
    #[must_use]
    pub fn credential_store(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Sets the keyring.
    #[inline]
    #[must_use]
    pub fn keyring(mut self, keyring: Arc<dyn Keyring>) -> Self {
        self.keyring = Some(keyring);
        self
    }

    /// Replaces the default [`CachedEthereumFetcher`].
    #[inline]
    #[must_use]
    pub fn ethereum_fetcher(mut self, fetcher: Arc<dyn EthereumFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Builds the orchestrator.
    ///
    /// Must be called inside a tokio runtime: the circuit pool starts
    /// filling immediately.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if a required collaborator is missing
    /// - [`Error::Config`] if the options are invalid
    pub fn build(self) -> Result<Orchestrator> {
        self.options.validate().map_err(Error::config)?;

        let global = required(self.global, "Global storage", "global_storage")?;
        let factory = required(self.circuits, "Circuit factory", "circuit_factory")?;
        let relay = required(self.relay, "Relay protocol", "relay_protocol")?;
        let windows = required(self.windows, "Window manager", "window_manager")?;
        let badge = required(self.badge, "Badge", "badge")?;
        let credentials = required(self.credentials, "Credential store", "credential_store")?;
        let keyring = required(self.keyring, "Keyring", "keyring")?;
        let fetcher = self
            .fetcher
            .unwrap_or_else(|| Arc::new(CachedEthereumFetcher));

        let options = self.options;
        let global = Store::new(global, global_indexers());
        let circuits = create_circuit_pool(factory, options.circuit_capacity, options.pool);
        let popup = PopupManager::new(Arc::clone(&windows), options.popup());
        let correlator = Correlator::new(global.clone(), popup.clone(), Arc::clone(&windows), badge);

        Ok(Orchestrator::new(
            options,
            Collaborators {
                global,
                circuits,
                keyring,
                credentials,
                windows,
                relay,
                fetcher,
                popup,
                correlator,
            },
        ))
    }
}

// ============================================================================
// Validation
// ============================================================================

fn required<T: ?Sized>(value: Option<Arc<T>>, what: &str, setter: &str) -> Result<Arc<T>> {
    value.ok_or_else(|| {
        Error::config(format!(
            "{what} is required. Use .{setter}() to set it.\n\
             Example: Orchestrator::builder().{setter}(Arc::new(..))"
        ))
    })
}

// ============================================================================
// Tests
// ============================================================================
