//! Wire message types.
//!
//! This module defines the envelope shared by every port and the method
//! names the orchestrator routes on.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `RpcRequest` | Both | Call with correlation id |
//! | `RpcResponse` | Both | `result` or `error` for an id |
//! | `Notification` | Background → UI/script | Push without waiting |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `method` | Method name enums |
//! | `notification` | Outbound notifications |
//! | `request` | Request, Response and error envelope |

// ============================================================================
// Submodules
// ============================================================================

/// Method name enums.
pub mod method;

/// Outbound notifications.
pub mod notification;

/// Request and Response message types.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use method::{ContentMethod, EthereumMethod, ForegroundMethod};
pub use notification::{HELLO, Notification, PING};
pub use request::{Message, RpcError, RpcPreRequest, RpcRequest, RpcResponse};
