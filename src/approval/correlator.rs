//! Pending approval requests and their responses.
//!
//! A request is written to `request/<id>` (which the UI watches through the
//! `requests` queue) and then waits for a response with the same id. The
//! record is deleted on every exit path: answered, dismissed, failed or
//! abandoned by the caller.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

use crate::entities::{AppRequest, AppRequestRef};
use crate::error::{Error, Result};
use crate::identifiers::{RequestId, WindowId};
use crate::platform::{BADGE_BACKGROUND, BADGE_TEXT, Badge, Mouse, WindowManager};
use crate::protocol::RpcResponse;
use crate::store::{Store, keys};

use super::popup::PopupManager;

// ============================================================================
// Types
// ============================================================================

type Waiters = FxHashMap<RequestId, oneshot::Sender<RpcResponse>>;

struct CorrelatorInner {
    global: Store,
    popup: PopupManager,
    windows: Arc<dyn WindowManager>,
    badge: Arc<dyn Badge>,
    waiters: Mutex<Waiters>,
}

/// Durable approval queue plus response matching.
#[derive(Clone)]
pub struct Correlator {
    inner: Arc<CorrelatorInner>,
}

impl fmt::Debug for Correlator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Correlator")
            .field("waiting", &self.inner.waiters.lock().len())
            .finish()
    }
}

/// Removes the waiter and the stored record when a request settles.
///
/// Dropping without [`PendingGuard::release`] (the caller's future was
/// abandoned) spawns the record deletion.
struct PendingGuard {
    correlator: Correlator,
    id: RequestId,
    armed: bool,
}

impl PendingGuard {
    async fn release(mut self) {
        self.armed = false;
        self.correlator.inner.waiters.lock().remove(&self.id);
        self.correlator.delete_record(self.id).await;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        self.correlator.inner.waiters.lock().remove(&self.id);

        let correlator = self.correlator.clone();
        let id = self.id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { correlator.delete_record(id).await });
        }
    }
}

// ============================================================================
// Correlator
// ============================================================================

impl Correlator {
    /// Creates a correlator writing records to `global`.
    #[must_use]
    pub fn new(
        global: Store,
        popup: PopupManager,
        windows: Arc<dyn WindowManager>,
        badge: Arc<dyn Badge>,
    ) -> Self {
        Self {
            inner: Arc::new(CorrelatorInner {
                global,
                popup,
                windows,
                badge,
                waiters: Mutex::new(Waiters::default()),
            }),
        }
    }

    /// Returns the number of requests waiting for a response.
    #[inline]
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.inner.waiters.lock().len()
    }

    /// Submits a request, showing the popup when `mouse` is given.
    pub async fn request(&self, request: AppRequest, mouse: Option<Mouse>) -> Result<Value> {
        match mouse {
            Some(mouse) => self.request_popup(request, mouse).await,
            None => self.request_no_popup(request).await,
        }
    }

    /// Submits a request without opening any window.
    ///
    /// An already open UI picks it up from the queue.
    pub async fn request_no_popup(&self, request: AppRequest) -> Result<Value> {
        let (guard, response_rx) = self.register(&request).await?;

        let result = match response_rx.await {
            Ok(response) => response.into_result(),
            Err(_) => Err(Error::ConnectionClosed),
        };

        guard.release().await;
        result
    }

    /// Submits a request and shows it in the approval popup.
    ///
    /// # Errors
    ///
    /// - [`Error::PopupDismissed`] if the popup is closed before answering
    /// - [`Error::UserRejected`] if the user rejects
    pub async fn request_popup(&self, request: AppRequest, mouse: Mouse) -> Result<Value> {
        let (guard, response_rx) = self.register(&request).await?;
        let removed = self.inner.windows.removed();

        let result = async {
            let path = popup_path(&request);
            let popup = self.inner.popup.open_or_focus(&path, mouse).await?;
            wait_popup_response(response_rx, removed, popup.window.id).await
        }
        .await;

        guard.release().await;
        result
    }

    /// Delivers a UI response.
    ///
    /// Responses for unknown ids are logged and dropped.
    pub fn respond(&self, response: RpcResponse) {
        let tx = self.inner.waiters.lock().remove(&response.id);

        match tx {
            Some(tx) => {
                debug!(request_id = %response.id, success = response.is_success(), "Approval answered");
                let _ = tx.send(response);
            }
            None => warn!(request_id = %response.id, "Response for unknown request"),
        }
    }

    async fn register(
        &self,
        request: &AppRequest,
    ) -> Result<(PendingGuard, oneshot::Receiver<RpcResponse>)> {
        let (tx, rx) = oneshot::channel();
        self.inner.waiters.lock().insert(request.id, tx);

        let guard = PendingGuard {
            correlator: self.clone(),
            id: request.id,
            armed: true,
        };

        if let Err(e) = self.inner.global.set_as(&keys::request(request.id), request).await {
            guard.release().await;
            return Err(e);
        }

        debug!(request_id = %request.id, method = %request.method, origin = %request.origin, "Approval requested");
        self.update_badge().await;

        Ok((guard, rx))
    }

    async fn delete_record(&self, id: RequestId) {
        if let Err(e) = self.inner.global.delete(&keys::request(id)).await {
            warn!(request_id = %id, error = %e, "Failed to delete pending request");
        }
        self.update_badge().await;
    }

    /// Mirrors the queue length on the badge. Failures are logged only.
    async fn update_badge(&self) {
        let count = match self
            .inner
            .global
            .get_as::<Vec<AppRequestRef>>(keys::REQUESTS)
            .await
        {
            Ok(requests) => requests.map_or(0, |requests| requests.len()),
            Err(e) => {
                debug!(error = %e, "Could not read request queue");
                return;
            }
        };

        let text = if count == 0 { String::new() } else { count.to_string() };

        if let Err(e) = self.inner.badge.set(&text, BADGE_BACKGROUND, BADGE_TEXT).await {
            debug!(error = %e, "Could not update badge");
        }
    }
}

/// Races the response against the popup window's removal.
async fn wait_popup_response(
    response_rx: oneshot::Receiver<RpcResponse>,
    mut removed: broadcast::Receiver<WindowId>,
    window_id: WindowId,
) -> Result<Value> {
    let dismissed = async {
        loop {
            match removed.recv().await {
                Ok(id) if id == window_id => return,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
            }
        }
    };

    tokio::select! {
        response = response_rx => match response {
            Ok(response) => response.into_result(),
            Err(_) => Err(Error::ConnectionClosed),
        },
        () = dismissed => Err(Error::PopupDismissed),
    }
}

/// `/{method}?id={id}` followed by the params as query pairs.
fn popup_path(request: &AppRequest) -> String {
    let mut path = format!("/{}?id={}", request.method, request.id);

    if let Value::Object(params) = &request.params {
        for (key, value) in params {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Null => continue,
                other => other.to_string(),
            };
            path.push('&');
            path.push_str(&urlencoding::encode(key));
            path.push('=');
            path.push_str(&urlencoding::encode(&value));
        }
    }

    path
}

// ============================================================================
// Tests
// ============================================================================
