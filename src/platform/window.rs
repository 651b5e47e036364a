//! Browser window collaborator.
//!
//! The popup manager and the orchestrator only see these traits; the
//! extension host provides the implementation.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::identifiers::{TabId, WindowId};

// ============================================================================
// Constants
// ============================================================================

/// Approval popup width in pixels.
pub const POPUP_WIDTH: u32 = 400;

/// Approval popup height in pixels.
pub const POPUP_HEIGHT: u32 = 630;

/// Badge background color.
pub const BADGE_BACKGROUND: &str = "#ba77ff";

/// Badge text color.
pub const BADGE_TEXT: &str = "white";

// ============================================================================
// Geometry
// ============================================================================

/// Pointer position in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Mouse {
    /// Horizontal position.
    pub x: i32,
    /// Vertical position.
    pub y: i32,
}

impl Mouse {
    /// Creates a pointer position.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Position and size of a popup window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopupGeometry {
    /// Left edge.
    pub left: u32,
    /// Top edge.
    pub top: u32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

impl PopupGeometry {
    /// Centers a `width`×`height` window on `mouse`, clamped to the screen origin.
    #[must_use]
    pub fn centered_on(mouse: Mouse, width: u32, height: u32) -> Self {
        let half = |v: i32, size: u32| {
            let edge = i64::from(v) - i64::from(size / 2);
            u32::try_from(edge.max(0)).unwrap_or(u32::MAX)
        };

        Self {
            left: half(mouse.x, width),
            top: half(mouse.y, height),
            width,
            height,
        }
    }
}

// ============================================================================
// Window Manager
// ============================================================================

/// A browser window with its single tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHandle {
    /// Window id.
    pub id: WindowId,
    /// Tab inside the window.
    pub tab_id: Option<TabId>,
}

/// Browser window and tab API.
#[async_trait]
pub trait WindowManager: Send + Sync {
    /// Opens a popup window at `url`.
    async fn create_popup(&self, url: &str, geometry: PopupGeometry) -> Result<WindowHandle>;

    /// Brings the window and its tab to the front.
    async fn focus(&self, window: &WindowHandle) -> Result<()>;

    /// Opens a regular tab at `url`.
    async fn open_tab(&self, url: &str) -> Result<TabId>;

    /// Subscribes to window removal events.
    fn removed(&self) -> broadcast::Receiver<WindowId>;
}

/// Extension action badge.
#[async_trait]
pub trait Badge: Send + Sync {
    /// Sets badge text and colors. Empty text hides the badge.
    async fn set(&self, text: &str, background: &str, foreground: &str) -> Result<()>;
}

// ============================================================================
// Tests
// ============================================================================
