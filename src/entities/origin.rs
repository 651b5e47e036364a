//! Origin metadata and icon blobs.

// ============================================================================
// Imports
// ============================================================================

use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64Standard;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ============================================================================
// Origin
// ============================================================================

/// Metadata a content script declares for its page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreOriginData {
    /// Page origin.
    pub origin: String,
    /// Page title.
    #[serde(default)]
    pub title: Option<String>,
    /// Page description.
    #[serde(default)]
    pub description: Option<String>,
    /// Favicon as a data URL.
    #[serde(default)]
    pub icon: Option<String>,
}

/// Stored origin metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginData {
    /// Origin.
    pub origin: String,
    /// Title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Icons, stored separately as blobbies.
    #[serde(default)]
    pub icons: Vec<BlobbyRef>,
}

impl OriginData {
    /// Builds stored metadata from a declared one.
    ///
    /// The icon, if any, is referenced under the origin itself.
    #[must_use]
    pub fn from_declared(declared: &PreOriginData) -> Self {
        Self {
            origin: declared.origin.clone(),
            title: declared.title.clone(),
            description: declared.description.clone(),
            icons: vec![BlobbyRef::new(declared.origin.clone())],
        }
    }
}

// ============================================================================
// Blobby
// ============================================================================

/// Pointer to a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobbyRef {
    /// Blob id (origin or icon URL).
    pub id: String,
}

impl BlobbyRef {
    /// Creates a reference.
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// A stored blob, encoded as a data URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blobby {
    /// Blob id.
    pub id: String,
    /// `data:<mime>;base64,<payload>`.
    pub data: String,
}

impl Blobby {
    /// Encodes an image as a data URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParams`] if `mime` is not an image type.
    pub fn image(id: impl Into<String>, mime: &str, bytes: &[u8]) -> Result<Self> {
        if !mime.starts_with("image/") {
            return Err(Error::invalid_params(format!("not an image: {mime}")));
        }

        Ok(Self {
            id: id.into(),
            data: format!("data:{mime};base64,{}", Base64Standard.encode(bytes)),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_data_url() {
        let blobby = Blobby::image("https://x/icon.png", "image/png", b"abc").expect("image");
        assert_eq!(blobby.data, "data:image/png;base64,YWJj");
    }

    #[test]
    fn test_non_image_rejected() {
        assert!(Blobby::image("x", "text/html", b"<html>").is_err());
    }

    #[test]
    fn test_from_declared() {
        let declared = PreOriginData {
            origin: "https://dapp.example".into(),
            title: Some("Dapp".into()),
            description: None,
            icon: Some("data:image/png;base64,AA==".into()),
        };
        let origin = OriginData::from_declared(&declared);
        assert_eq!(origin.icons, vec![BlobbyRef::new("https://dapp.example")]);
    }
}
