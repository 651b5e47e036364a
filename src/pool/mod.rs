//! Bounded pool of lazily-constructed, disposable async resources.
//!
//! Anonymous circuits, circuit bundles, relay bundles and UI channels are all
//! expensive to build and can die at any time. A [`Pool`] keeps a fixed
//! number of slots, builds each one in the background, and rebuilds a slot
//! whenever its resource is taken or reported dead.
//!
//! # Slot Lifecycle
//!
//! ```text
//!            spawn create            Ok(value)
//!   Creating ──────────────► (await) ─────────► Ready(value)
//!      ▲                        │                    │
//!      │  retry after delay     │ Err                │ take() / restart()
//!      └────────────────────────┘                    ▼
//!                                                Creating (generation + 1)
//! ```
//!
//! A slot never leaves the pool: failed constructions are retried with
//! backoff so capacity is never lost permanently.

// ============================================================================
// Submodules
// ============================================================================

/// Pool implementation.
pub mod core;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::{Pool, PoolEntry, PoolOptions, PoolParams, WeakPool};
