//! Session attachment state and the logged-in user.

pub mod registry;
pub mod user;

pub use registry::SessionRegistry;
pub use user::UserSession;
