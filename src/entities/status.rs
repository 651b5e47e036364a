//! Session liveness markers.

use serde::{Deserialize, Serialize};

use crate::identifiers::SessionId;
use crate::protocol::RpcError;

/// Present under `status/<id>` while a session has a live transport.
///
/// Relay sessions also record their last reconnect error here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Session id.
    pub id: SessionId,
    /// Last connection error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl StatusRecord {
    /// Healthy marker.
    #[inline]
    #[must_use]
    pub const fn ok(id: SessionId) -> Self {
        Self { id, error: None }
    }

    /// Marker carrying an error.
    #[inline]
    #[must_use]
    pub fn failed(id: SessionId, error: RpcError) -> Self {
        Self {
            id,
            error: Some(error),
        }
    }
}
