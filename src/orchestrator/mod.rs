//! The background orchestrator.
//!
//! Owns the logged-in user, the circuit and bundle pools, the live relay
//! sessions and the approval machinery. Ports are routed to it through
//! [`PortAcceptor`](crate::transport::PortAcceptor).
//!
//! | File | Concern |
//! |------|---------|
//! | `core` | State, login, bundle memoization |
//! | `builder` | Collaborator wiring |
//! | `resolve` | Content-script session resolution |
//! | `content` | `brume_run` routing |
//! | `foreground` | UI method routing |
//! | `actions` | Wallet actions behind approvals |
//! | `relay` | Pairing and reconnection |

mod actions;
mod builder;
mod content;
mod core;
mod foreground;
mod options;
mod relay;
mod resolve;

pub use builder::OrchestratorBuilder;
pub use self::core::Orchestrator;
pub use options::{BackgroundOptions, DEFAULT_LOG_ENDPOINT, DEFAULT_RELAY_ENDPOINT};
