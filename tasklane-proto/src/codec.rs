//! Binary encoding of a persisted document store.
//!
//! The in-process store can write its full contents to disk after every
//! mutation. The on-disk form is a postcard-encoded [`StoreImage`] prefixed
//! with a 4-byte magic and a format version byte.

use serde::{Deserialize, Serialize};

use crate::document::RawDocument;
use crate::scope::ScopePath;

/// File magic for store images.
const MAGIC: &[u8; 4] = b"TLST";

/// Current store image format version.
pub const IMAGE_VERSION: u8 = 1;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Header is missing, wrong, or from an unsupported version.
    #[error("invalid store image: {0}")]
    InvalidHeader(String),
}

/// One persisted collection and its documents in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionImage {
    /// Collection path.
    pub scope: ScopePath,
    /// Documents in insertion order.
    pub documents: Vec<RawDocument>,
}

/// Full contents of a document store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreImage {
    /// All non-empty collections.
    pub collections: Vec<CollectionImage>,
}

/// Encodes a [`StoreImage`] with its header.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the image cannot be serialized.
pub fn encode_image(image: &StoreImage) -> Result<Vec<u8>, CodecError> {
    let body = postcard::to_allocvec(image).map_err(|e| CodecError::Serialization(e.to_string()))?;
    let mut out = Vec::with_capacity(MAGIC.len() + 1 + body.len());
    out.extend_from_slice(MAGIC);
    out.push(IMAGE_VERSION);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decodes a [`StoreImage`], checking its header.
///
/// # Errors
///
/// Returns `CodecError::InvalidHeader` if the magic or version is wrong, or
/// `CodecError::Serialization` if the body cannot be deserialized.
pub fn decode_image(bytes: &[u8]) -> Result<StoreImage, CodecError> {
    let header_len = MAGIC.len() + 1;
    if bytes.len() < header_len {
        return Err(CodecError::InvalidHeader(format!(
            "need at least {header_len} bytes, got {}",
            bytes.len()
        )));
    }
    if &bytes[..MAGIC.len()] != MAGIC {
        return Err(CodecError::InvalidHeader("bad magic".to_string()));
    }
    let version = bytes[MAGIC.len()];
    if version != IMAGE_VERSION {
        return Err(CodecError::InvalidHeader(format!(
            "unsupported version {version} (expected {IMAGE_VERSION})"
        )));
    }
    postcard::from_bytes(&bytes[header_len..]).map_err(|e| CodecError::Serialization(e.to_string()))
}
