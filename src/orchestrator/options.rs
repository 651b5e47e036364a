//! Background configuration.
//!
//! # Example
//!
//! ```ignore
//! use brume_background::BackgroundOptions;
//!
//! let options = BackgroundOptions::new()
//!     .with_circuit_capacity(4)
//!     .with_hello_timeout(Duration::from_millis(500));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::approval::PopupOptions;
use crate::entities::ChainTable;
use crate::platform::{POPUP_HEIGHT, POPUP_WIDTH};
use crate::pool::PoolOptions;

// ============================================================================
// Constants
// ============================================================================

/// Telemetry endpoint.
pub const DEFAULT_LOG_ENDPOINT: &str = "https://proxy.brume.money";

/// Relay endpoint recorded on new pairings.
pub const DEFAULT_RELAY_ENDPOINT: &str = "wss://relay.walletconnect.com";

// ============================================================================
// BackgroundOptions
// ============================================================================

/// Capacities, timeouts and endpoints of the background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundOptions {
    /// Anonymous circuits kept ready.
    pub circuit_capacity: usize,

    /// Per-wallet bundles kept ready.
    pub eth_brume_capacity: usize,

    /// Relay bundles kept ready.
    pub relay_bundle_capacity: usize,

    /// Circuits in each per-wallet bundle.
    pub circuits_per_brume: usize,

    /// Channel handshake deadline.
    pub hello_timeout: Duration,

    /// Keep-alive period.
    pub ping_interval: Duration,

    /// Popup handshake deadline.
    pub popup_hello_timeout: Duration,

    /// Popup size in pixels (width, height).
    pub popup_size: (u32, u32),

    /// Pool construction retries.
    pub pool: PoolOptions,

    /// Attempts of the telemetry loop.
    pub log_attempts: usize,

    /// Telemetry endpoint, [`DEFAULT_LOG_ENDPOINT`] if unset.
    pub log_endpoint: Option<String>,

    /// Relay endpoint, [`DEFAULT_RELAY_ENDPOINT`] if unset.
    pub relay_endpoint: Option<String>,

    /// Known chains, [`ChainTable::default`] if unset.
    pub chains: Option<ChainTable>,
}

impl Default for BackgroundOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl BackgroundOptions {
    /// Creates options with the production defaults.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            circuit_capacity: 9,
            eth_brume_capacity: 1,
            relay_bundle_capacity: 1,
            circuits_per_brume: 1,
            hello_timeout: Duration::from_millis(1000),
            ping_interval: Duration::from_secs(1),
            popup_hello_timeout: Duration::from_secs(30),
            popup_size: (POPUP_WIDTH, POPUP_HEIGHT),
            pool: PoolOptions {
                retry_delay: Duration::from_millis(100),
                max_retry_delay: Duration::from_secs(5),
            },
            log_attempts: 3,
            log_endpoint: None,
            relay_endpoint: None,
            chains: None,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl BackgroundOptions {
    /// Sets the number of ready circuits.
    #[inline]
    #[must_use]
    pub fn with_circuit_capacity(mut self, capacity: usize) -> Self {
        self.circuit_capacity = capacity;
        self
    }

    /// Sets the number of ready per-wallet bundles.
    #[inline]
    #[must_use]
    pub fn with_eth_brume_capacity(mut self, capacity: usize) -> Self {
        self.eth_brume_capacity = capacity;
        self
    }

    /// Sets the number of ready relay bundles.
    #[inline]
    #[must_use]
    pub fn with_relay_bundle_capacity(mut self, capacity: usize) -> Self {
        self.relay_bundle_capacity = capacity;
        self
    }

    /// Sets the number of circuits per wallet bundle.
    #[inline]
    #[must_use]
    pub fn with_circuits_per_brume(mut self, circuits: usize) -> Self {
        self.circuits_per_brume = circuits;
        self
    }

    /// Sets the channel handshake deadline.
    #[inline]
    #[must_use]
    pub fn with_hello_timeout(mut self, timeout: Duration) -> Self {
        self.hello_timeout = timeout;
        self
    }

    /// Sets the keep-alive period.
    #[inline]
    #[must_use]
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Sets the popup handshake deadline.
    #[inline]
    #[must_use]
    pub fn with_popup_hello_timeout(mut self, timeout: Duration) -> Self {
        self.popup_hello_timeout = timeout;
        self
    }

    /// Sets the popup size in pixels.
    #[inline]
    #[must_use]
    pub fn with_popup_size(mut self, width: u32, height: u32) -> Self {
        self.popup_size = (width, height);
        self
    }

    /// Sets pool construction retries.
    #[inline]
    #[must_use]
    pub fn with_pool_options(mut self, pool: PoolOptions) -> Self {
        self.pool = pool;
        self
    }

    /// Sets the attempts of the telemetry loop.
    #[inline]
    #[must_use]
    pub fn with_log_attempts(mut self, attempts: usize) -> Self {
        self.log_attempts = attempts;
        self
    }

    /// Sets the telemetry endpoint.
    #[inline]
    #[must_use]
    pub fn with_log_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.log_endpoint = Some(endpoint.into());
        self
    }

    /// Sets the relay endpoint.
    #[inline]
    #[must_use]
    pub fn with_relay_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.relay_endpoint = Some(endpoint.into());
        self
    }

    /// Replaces the chain table.
    #[inline]
    #[must_use]
    pub fn with_chains(mut self, chains: ChainTable) -> Self {
        self.chains = Some(chains);
        self
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl BackgroundOptions {
    /// Returns the telemetry endpoint.
    #[inline]
    #[must_use]
    pub fn log_endpoint(&self) -> &str {
        self.log_endpoint.as_deref().unwrap_or(DEFAULT_LOG_ENDPOINT)
    }

    /// Returns the relay endpoint.
    #[inline]
    #[must_use]
    pub fn relay_endpoint(&self) -> &str {
        self.relay_endpoint.as_deref().unwrap_or(DEFAULT_RELAY_ENDPOINT)
    }

    /// Returns the chain table.
    #[must_use]
    pub fn chains(&self) -> ChainTable {
        self.chains.clone().unwrap_or_default()
    }

    /// Returns the popup settings.
    #[must_use]
    pub fn popup(&self) -> PopupOptions {
        PopupOptions {
            width: self.popup_size.0,
            height: self.popup_size.1,
            hello_timeout: self.popup_hello_timeout,
        }
    }

    /// Validates capacities and timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error message for the first invalid setting.
    pub fn validate(&self) -> Result<(), String> {
        if self.circuit_capacity == 0 {
            return Err("Circuit capacity must be greater than zero".to_string());
        }
        if self.eth_brume_capacity == 0 || self.relay_bundle_capacity == 0 {
            return Err("Bundle capacities must be greater than zero".to_string());
        }
        if self.circuits_per_brume == 0 {
            return Err("A wallet bundle needs at least one circuit".to_string());
        }
        if self.hello_timeout.is_zero() || self.popup_hello_timeout.is_zero() {
            return Err("Handshake timeouts must be greater than zero".to_string());
        }
        if self.popup_size.0 == 0 || self.popup_size.1 == 0 {
            return Err("Popup dimensions must be greater than zero".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
