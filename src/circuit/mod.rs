//! Anonymous circuits and the bundles built on them.
//!
//! ```text
//! CircuitFactory ──► CircuitPool (capacity 9)
//!                        │ take()
//!                        ├──► EthBrume pool ──► one EthBrume per wallet
//!                        ├──► RelayBundle pool ──► one bundle per pairing
//!                        └──► send_log / icon fetches (one-shot)
//! ```

pub mod brume;
pub mod core;
pub mod log;

pub use self::core::{
    Circuit, CircuitFactory, CircuitPool, HttpRequest, HttpResponse, SharedCircuit,
    create_circuit_pool,
};
pub use brume::{EthBrume, RelayBundle, create_eth_brume_pool, create_relay_bundle_pool};
pub use log::send_log;
