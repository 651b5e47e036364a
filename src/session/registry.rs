//! Script ↔ session attachment and liveness status.
//!
//! A session has a [`StatusRecord`] under `status/<id>` exactly while at
//! least one transport is attached to it. Scripts attach on resolution and
//! detach when their port closes; live relay sessions write the record
//! directly.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use rustc_hash::FxHashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::entities::StatusRecord;
use crate::error::Result;
use crate::identifiers::{PortId, SessionId};
use crate::store::{Store, keys};
use crate::transport::Port;

// ============================================================================
// Types
// ============================================================================

#[derive(Default)]
struct RegistryState {
    session_by_script: FxHashMap<PortId, SessionId>,
    scripts_by_session: FxHashMap<SessionId, Vec<Port>>,
}

struct RegistryInner {
    global: Store,
    state: Mutex<RegistryState>,
}

/// Attachment maps plus status records. Cloning shares the registry.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry").finish_non_exhaustive()
    }
}

// ============================================================================
// SessionRegistry
// ============================================================================

impl SessionRegistry {
    /// Creates an empty registry writing status records to `global`.
    #[must_use]
    pub fn new(global: Store) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                global,
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    /// Returns the session `script` is attached to.
    pub async fn session_of(&self, script: &Port) -> Option<SessionId> {
        self.inner
            .state
            .lock()
            .await
            .session_by_script
            .get(&script.id())
            .copied()
    }

    /// Returns the scripts attached to `session`.
    pub async fn scripts(&self, session: SessionId) -> Vec<Port> {
        self.inner
            .state
            .lock()
            .await
            .scripts_by_session
            .get(&session)
            .cloned()
            .unwrap_or_default()
    }

    /// Attaches `script` to `session`.
    ///
    /// The first script of a session writes its status record. If that
    /// write fails the attachment is rolled back. A script already attached
    /// elsewhere moves over, and the session it leaves loses its status
    /// once no script remains. The script detaches itself when its port
    /// closes.
    pub async fn attach(&self, script: &Port, session: SessionId) -> Result<()> {
        let script_id = script.id();

        let previous = {
            let mut state = self.inner.state.lock().await;

            let previous = state.session_by_script.get(&script_id).copied();
            if previous == Some(session) {
                return Ok(());
            }

            let scripts = state.scripts_by_session.entry(session).or_default();
            scripts.push(script.clone());
            let first = scripts.len() == 1;

            if first
                && let Err(e) = self
                    .inner
                    .global
                    .set_as(&keys::status(session), &StatusRecord::ok(session))
                    .await
            {
                state.scripts_by_session.remove(&session);
                warn!(%session, error = %e, "Status write failed, attachment rolled back");
                return Err(e);
            }

            state.session_by_script.insert(script_id, session);

            if let Some(previous) = previous {
                Self::leave(&self.inner, &mut state, previous, script_id).await;
            }
            previous
        };

        debug!(%session, port_id = %script_id, ?previous, "Script attached");

        if previous.is_none() {
            let registry = Arc::downgrade(&self.inner);
            script.on_close(move || {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(detach_weak(registry, script_id));
                }
            });
        }

        Ok(())
    }

    /// Detaches a script; the last script of a session removes its status.
    pub async fn detach(&self, script_id: PortId) {
        Self::detach_inner(&self.inner, script_id).await;
    }

    /// Drops every attachment of `session` and its status record.
    ///
    /// Returns the scripts that were attached.
    pub async fn forget(&self, session: SessionId) -> Vec<Port> {
        let scripts = {
            let mut state = self.inner.state.lock().await;
            let scripts = state.scripts_by_session.remove(&session).unwrap_or_default();
            for script in &scripts {
                state.session_by_script.remove(&script.id());
            }
            scripts
        };

        self.clear_status(session).await;
        scripts
    }

    /// Writes a status record.
    pub async fn set_status(&self, record: &StatusRecord) -> Result<()> {
        self.inner
            .global
            .set_as(&keys::status(record.id), record)
            .await
    }

    /// Deletes a status record. Failures are logged only.
    pub async fn clear_status(&self, session: SessionId) {
        if let Err(e) = self.inner.global.delete(&keys::status(session)).await {
            warn!(%session, error = %e, "Failed to delete status");
        }
    }

    async fn detach_inner(inner: &RegistryInner, script_id: PortId) {
        let mut state = inner.state.lock().await;

        let Some(session) = state.session_by_script.remove(&script_id) else {
            return;
        };

        debug!(%session, port_id = %script_id, "Script detached");
        Self::leave(inner, &mut state, session, script_id).await;
    }

    /// Removes `script_id` from the scripts of `session`, deleting the
    /// status record when it was the last one.
    async fn leave(
        inner: &RegistryInner,
        state: &mut RegistryState,
        session: SessionId,
        script_id: PortId,
    ) {
        let last = match state.scripts_by_session.get_mut(&session) {
            Some(scripts) => {
                scripts.retain(|port| port.id() != script_id);
                scripts.is_empty()
            }
            None => true,
        };

        if last {
            state.scripts_by_session.remove(&session);
            if let Err(e) = inner.global.delete(&keys::status(session)).await {
                warn!(%session, error = %e, "Failed to delete status");
            }
        }
    }
}

async fn detach_weak(inner: Weak<RegistryInner>, script_id: PortId) {
    if let Some(inner) = inner.upgrade() {
        SessionRegistry::detach_inner(&inner, script_id).await;
    }
}

// ============================================================================
// Tests
// ============================================================================
