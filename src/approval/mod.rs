//! User approval: the singleton popup and the request correlator.

pub mod correlator;
pub mod popup;

pub use correlator::Correlator;
pub use popup::{PopupManager, PopupOptions, PopupSlot};
