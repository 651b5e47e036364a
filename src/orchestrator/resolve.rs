//! Session resolution for content scripts.
//!
//! ```text
//! script ──► attached? ──yes──► load session
//!               │no
//!               ▼
//!         brume_origin ──► (login popup) ──► store origin
//!               │
//!               ▼
//!       sessionByOrigin? ──yes──► attach
//!               │no
//!               ▼
//!     eth_requestAccounts approval ──► new session ──► attach
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde_json::json;
use tracing::{debug, info};

use crate::entities::{AppRequest, Blobby, OriginData, PreOriginData, Session, SessionRef};
use crate::error::{Error, Result};
use crate::identifiers::{SessionId, WalletId};
use crate::platform::Mouse;
use crate::protocol::RpcRequest;
use crate::session::UserSession;
use crate::store::keys;
use crate::transport::Port;

use super::core::{Orchestrator, load_wallet};

// ============================================================================
// Constants
// ============================================================================

/// Method asking a content script for its page metadata.
const ORIGIN_METHOD: &str = "brume_origin";

/// Approval granting an origin access to a wallet.
const REQUEST_ACCOUNTS: &str = "eth_requestAccounts";

// ============================================================================
// Resolution
// ============================================================================

impl Orchestrator {
    /// Returns the session authorizing `script`, creating one if needed.
    ///
    /// # Errors
    ///
    /// - [`Error::NotLoggedIn`] if the login popup did not unlock a user
    /// - [`Error::UserRejected`] / [`Error::PopupDismissed`] if the origin
    ///   is not approved
    /// - [`Error::MissingPrecondition`] for unknown wallets or sessions
    pub(super) async fn resolve_session(&self, script: &Port, mouse: Mouse) -> Result<Session> {
        let inner = &self.inner;

        if let Some(session) = self.attached_session(script).await? {
            return Ok(session);
        }

        let declared: PreOriginData = script
            .request(RpcRequest::new(ORIGIN_METHOD, json!([])))
            .await?
            .into_typed()?;

        if inner.state.user().is_none() {
            inner.popup.open_or_focus("/", mouse).await?;
        }
        let user = inner.state.require_user()?;

        let lock = inner.state.origin_lock(&declared.origin);
        let resolved = {
            let _resolving = lock.lock().await;
            self.resolve_origin(&user, script, &declared, mouse).await
        };
        inner.state.release_origin_lock(&declared.origin, lock);

        resolved
    }

    async fn attached_session(&self, script: &Port) -> Result<Option<Session>> {
        match self.inner.registry.session_of(script).await {
            Some(id) => {
                let user = self.inner.state.require_user()?;
                load_session(&user, id).await.map(Some)
            }
            None => Ok(None),
        }
    }

    /// Finds or authorizes the session of `declared.origin` and attaches
    /// `script`. Runs under the origin lock.
    async fn resolve_origin(
        &self,
        user: &UserSession,
        script: &Port,
        declared: &PreOriginData,
        mouse: Mouse,
    ) -> Result<Session> {
        // Another call for this script may have finished while we waited.
        if let Some(session) = self.attached_session(script).await? {
            return Ok(session);
        }

        store_origin(user, declared).await?;

        let existing: Option<SessionRef> = user
            .storage
            .get_as(&keys::session_by_origin(&declared.origin))
            .await?;

        let session = match existing {
            Some(reference) => {
                let session = load_session(user, reference.id).await?;
                debug!(session_id = %session.id, origin = %session.origin, "Known origin");
                session
            }
            None => self.authorize(user, &declared.origin, mouse).await?,
        };

        self.inner.registry.attach(script, session.id).await?;
        Ok(session)
    }

    /// Runs the account approval and persists the resulting session.
    async fn authorize(&self, user: &UserSession, origin: &str, mouse: Mouse) -> Result<Session> {
        let request = AppRequest::new(origin, REQUEST_ACCOUNTS, json!({}));

        let (persist, wallet_id, chain_id): (bool, WalletId, u64) = serde_json::from_value(
            self.inner.correlator.request(request, Some(mouse)).await?,
        )
        .map_err(|e| Error::invalid_params(format!("account approval: {e}")))?;

        let wallet = load_wallet(user, wallet_id).await?;
        let chain = self.inner.chains.resolve(chain_id)?.clone();

        let session = Session::direct(origin, persist, wallet.wallet_ref(), chain);
        user.storage
            .set_as(&keys::session(session.id), &session)
            .await?;

        info!(session_id = %session.id, %origin, persist, "Session created");
        Ok(session)
    }
}

/// Loads a session of the logged-in user.
pub(super) async fn load_session(user: &UserSession, id: SessionId) -> Result<Session> {
    user.storage
        .get_as(&keys::session(id))
        .await?
        .ok_or_else(|| Error::missing(format!("session {id}")))
}

async fn store_origin(user: &UserSession, declared: &PreOriginData) -> Result<()> {
    if let Some(icon) = &declared.icon {
        let blobby = Blobby {
            id: declared.origin.clone(),
            data: icon.clone(),
        };
        user.storage
            .set_as(&keys::blobby(&declared.origin), &blobby)
            .await?;
    }

    user.storage
        .set_as(
            &keys::origin(&declared.origin),
            &OriginData::from_declared(declared),
        )
        .await
}

// ============================================================================
// Tests
// ============================================================================
