//! Pairing URI parsing.
//!
//! Format: `wc:<topic>@2?relay-protocol=irn&symKey=<64 hex chars>`

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

const SCHEME: &str = "wc";
const SUPPORTED_VERSION: u32 = 2;
const DEFAULT_RELAY_PROTOCOL: &str = "irn";

// ============================================================================
// PairingUri
// ============================================================================

/// Parsed pairing URI.
#[derive(Clone, PartialEq, Eq)]
pub struct PairingUri {
    /// Pairing topic.
    pub topic: String,
    /// Protocol version.
    pub version: u32,
    /// Relay protocol name.
    pub relay_protocol: String,
    /// Symmetric pairing key.
    pub sym_key: [u8; 32],
}

impl fmt::Debug for PairingUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingUri")
            .field("topic", &self.topic)
            .field("version", &self.version)
            .field("relay_protocol", &self.relay_protocol)
            .finish_non_exhaustive()
    }
}

impl PairingUri {
    /// Parses a pairing URI.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParams`] if the URI is malformed, uses another
    /// scheme or version, or lacks a 32-byte `symKey`.
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw).map_err(|e| Error::invalid_params(format!("pairing uri: {e}")))?;

        if url.scheme() != SCHEME {
            return Err(Error::invalid_params(format!(
                "pairing uri scheme {}",
                url.scheme()
            )));
        }

        let (topic, version) = url
            .path()
            .split_once('@')
            .ok_or_else(|| Error::invalid_params("pairing uri without version"))?;

        if topic.is_empty() {
            return Err(Error::invalid_params("pairing uri without topic"));
        }

        let version: u32 = version
            .parse()
            .map_err(|_| Error::invalid_params(format!("pairing uri version {version}")))?;

        if version != SUPPORTED_VERSION {
            return Err(Error::invalid_params(format!(
                "unsupported pairing version {version}"
            )));
        }

        let mut relay_protocol = None;
        let mut sym_key = None;

        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "relay-protocol" => relay_protocol = Some(value.into_owned()),
                "symKey" => sym_key = Some(value.into_owned()),
                _ => {}
            }
        }

        let sym_key = sym_key.ok_or_else(|| Error::invalid_params("pairing uri without symKey"))?;
        let sym_key: [u8; 32] = hex::decode(&sym_key)
            .map_err(|e| Error::invalid_params(format!("symKey: {e}")))?
            .try_into()
            .map_err(|_| Error::invalid_params("symKey must be 32 bytes"))?;

        Ok(Self {
            topic: topic.to_string(),
            version,
            relay_protocol: relay_protocol.unwrap_or_else(|| DEFAULT_RELAY_PROTOCOL.to_string()),
            sym_key,
        })
    }
}

impl FromStr for PairingUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// ============================================================================
// Tests
// ============================================================================
