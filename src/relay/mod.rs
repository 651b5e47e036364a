//! Relay pairing primitives.
//!
//! The session manager itself lives on the orchestrator; this module holds
//! the URI format, key material and the protocol collaborator traits.

pub mod protocol;
pub mod uri;

pub use protocol::{
    AuthKey, Pairing, RelayEvent, RelayMetadata, RelayProtocol, RelayRouter, RelaySession,
    SESSION_REQUEST, SessionKey, SessionRequestParams, SettlementReceipt,
};
pub use uri::PairingUri;
