//! Browser and key-management collaborators.

pub mod keyring;
pub mod window;

pub use keyring::{Credential, CredentialStore, Crypter, Keyring, UnlockedUser};
pub use window::{
    BADGE_BACKGROUND, BADGE_TEXT, Badge, Mouse, POPUP_HEIGHT, POPUP_WIDTH, PopupGeometry,
    WindowHandle, WindowManager,
};
