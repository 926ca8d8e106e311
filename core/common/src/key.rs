//! Reversible mapping between document names and remote-safe keys.
//!
//! Document names are arbitrary user strings (slashes, dots, unicode, even the
//! empty string). Remote paths cannot carry those, so each name is stored under
//! a key made of a fixed prefix followed by the unpadded URL-safe base64 of its
//! UTF-8 bytes. The alphabet is `[A-Za-z0-9_-]`, which every supported backend
//! accepts as a path segment. The mapping is lossless, not hashed.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::validate_segment;
use crate::{Error, Result};

/// Keeps the key non-empty for the empty document name.
const KEY_PREFIX: char = 'k';

/// Path-segment-safe identifier of a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteKey(String);

impl RemoteKey {
    /// Wrap a key read back from a backend.
    ///
    /// Keys of documents shared by other writers need not decode, so only the
    /// path segment rules are checked here.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        validate_segment(&key)?;
        Ok(Self(key))
    }

    /// Decode the document name this key stands for.
    pub fn name(&self) -> Result<String> {
        decode_key(&self.0)
    }

    /// Get the key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encode a document name into its remote key.
pub fn encode_key(name: &str) -> RemoteKey {
    let mut key = String::with_capacity(1 + name.len() * 4 / 3 + 2);
    key.push(KEY_PREFIX);
    URL_SAFE_NO_PAD.encode_string(name.as_bytes(), &mut key);
    RemoteKey(key)
}

/// Decode a remote key back into the document name.
///
/// # Errors
/// - Missing prefix, invalid base64, or bytes that are not UTF-8
pub fn decode_key(key: &str) -> Result<String> {
    let encoded = key
        .strip_prefix(KEY_PREFIX)
        .ok_or_else(|| Error::InvalidInput(format!("Not a document key: {:?}", key)))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| Error::InvalidInput(format!("Malformed document key {:?}: {}", key, e)))?;

    String::from_utf8(bytes)
        .map_err(|e| Error::InvalidInput(format!("Document key {:?} is not UTF-8: {}", key, e)))
}
