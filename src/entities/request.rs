//! Pending approval requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::{RequestId, SessionId};
use crate::store::Indexed;

/// A user-approval request waiting for a UI decision.
///
/// Written to `request/<id>` before the approval UI is shown and deleted
/// once the request settles, whatever the outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppRequest {
    /// Correlation id; the UI answers with the same id.
    pub id: RequestId,
    /// Requesting origin.
    pub origin: String,
    /// Method to approve.
    pub method: String,
    /// Method parameters shown to the user.
    #[serde(default)]
    pub params: Value,
    /// Session the request belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionId>,
}

impl AppRequest {
    /// Creates a request with a fresh id.
    #[must_use]
    pub fn new(origin: impl Into<String>, method: impl Into<String>, params: Value) -> Self {
        Self {
            id: RequestId::generate(),
            origin: origin.into(),
            method: method.into(),
            params,
            session: None,
        }
    }

    /// Attaches the owning session.
    #[must_use]
    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session = Some(session);
        self
    }
}

/// Entry of the `requests` queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppRequestRef {
    /// Request id.
    pub id: RequestId,
}

impl Indexed for AppRequest {
    type Ref = AppRequestRef;

    fn to_ref(&self) -> AppRequestRef {
        AppRequestRef { id: self.id }
    }
}
