//! Singleton approval popup.
//!
//! At most one approval window exists process-wide. The slot is held under
//! an async lock for the whole open sequence (create window, wait for the
//! page's `popup_hello`), so concurrent callers queue and then find the
//! window already open.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::identifiers::WindowId;
use crate::platform::{Mouse, POPUP_HEIGHT, POPUP_WIDTH, PopupGeometry, WindowHandle, WindowManager};
use crate::transport::Port;

// ============================================================================
// Types
// ============================================================================

/// The open approval window and its port.
#[derive(Debug, Clone)]
pub struct PopupSlot {
    /// Popup window.
    pub window: WindowHandle,
    /// Port opened by the popup page.
    pub port: Port,
}

/// Popup size and handshake deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopupOptions {
    /// Window width.
    pub width: u32,
    /// Window height.
    pub height: u32,
    /// Deadline for `popup_hello`.
    pub hello_timeout: Duration,
}

impl Default for PopupOptions {
    fn default() -> Self {
        Self {
            width: POPUP_WIDTH,
            height: POPUP_HEIGHT,
            hello_timeout: Duration::from_secs(30),
        }
    }
}

// ============================================================================
// PopupManager
// ============================================================================

struct PopupInner {
    windows: Arc<dyn WindowManager>,
    slot: Mutex<Option<PopupSlot>>,
    hellos: broadcast::Sender<Port>,
    options: PopupOptions,
}

/// Owner of the approval window slot. Cloning shares the slot.
#[derive(Clone)]
pub struct PopupManager {
    inner: Arc<PopupInner>,
}

impl fmt::Debug for PopupManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PopupManager")
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl PopupManager {
    /// Creates a manager with an empty slot.
    #[must_use]
    pub fn new(windows: Arc<dyn WindowManager>, options: PopupOptions) -> Self {
        let (hellos, _) = broadcast::channel(8);
        Self {
            inner: Arc::new(PopupInner {
                windows,
                slot: Mutex::new(None),
                hellos,
                options,
            }),
        }
    }

    /// Records a `popup_hello` from a popup page.
    pub fn hello(&self, port: Port) {
        debug!(port_id = %port.id(), "Popup hello");
        let _ = self.inner.hellos.send(port);
    }

    /// Returns the open popup, if any.
    pub async fn current(&self) -> Option<PopupSlot> {
        self.inner.slot.lock().await.clone()
    }

    /// Focuses the open popup, or opens one centered on `mouse` at `path`.
    ///
    /// # Errors
    ///
    /// - [`Error::PopupDismissed`] if the window is closed before its hello
    /// - [`Error::HandshakeTimeout`] if the hello never arrives
    /// - Window manager errors
    pub async fn open_or_focus(&self, path: &str, mouse: Mouse) -> Result<PopupSlot> {
        let mut slot = self.inner.slot.lock().await;

        if let Some(current) = slot.as_ref() {
            self.inner.windows.focus(&current.window).await?;
            debug!(window = %current.window.id, "Popup focused");
            return Ok(current.clone());
        }

        let options = self.inner.options;
        let geometry = PopupGeometry::centered_on(mouse, options.width, options.height);

        let mut hellos = self.inner.hellos.subscribe();
        let mut removed = self.inner.windows.removed();

        let url = format!("popup.html#{path}");
        let window = self.inner.windows.create_popup(&url, geometry).await?;
        info!(window = %window.id, %url, "Popup opened");

        let wait = async {
            loop {
                tokio::select! {
                    hello = hellos.recv() => match hello {
                        Ok(port) => return Ok(port),
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return Err(Error::ConnectionClosed),
                    },
                    id = removed.recv() => match id {
                        Ok(id) if id == window.id => return Err(Error::PopupDismissed),
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return Err(Error::ConnectionClosed),
                    },
                }
            }
        };

        let port = match timeout(options.hello_timeout, wait).await {
            Ok(Ok(port)) => port,
            Ok(Err(e)) => {
                warn!(window = %window.id, error = %e, "Popup closed before hello");
                return Err(e);
            }
            Err(_) => {
                warn!(window = %window.id, "Popup hello timed out");
                return Err(Error::handshake_timeout(
                    options.hello_timeout.as_millis() as u64,
                ));
            }
        };

        let current = PopupSlot { window, port };
        *slot = Some(current.clone());

        tokio::spawn(Self::clear_on_removed(
            Arc::downgrade(&self.inner),
            window.id,
            removed,
        ));

        Ok(current)
    }

    async fn clear_on_removed(
        inner: std::sync::Weak<PopupInner>,
        window_id: WindowId,
        mut removed: broadcast::Receiver<WindowId>,
    ) {
        loop {
            match removed.recv().await {
                Ok(id) if id == window_id => break,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }

        let Some(inner) = inner.upgrade() else {
            return;
        };

        let mut slot = inner.slot.lock().await;
        if slot.as_ref().is_some_and(|current| current.window.id == window_id) {
            *slot = None;
            info!(window = %window_id, "Popup closed");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
