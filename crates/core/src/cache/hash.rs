//! Content-addressed cache key generation.
//!
//! Keys are a digest of the input, base64 encoded with `/` swapped for `.`
//! so the result is always a single path component.

use base64::{Engine, engine::general_purpose::STANDARD};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::Error;

/// Digest used to derive content-addressed keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyDigest {
    /// MD5, matching the historical on-disk key names.
    #[default]
    Md5,
    Sha256,
}

impl KeyDigest {
    /// Hash raw bytes into a filesystem-safe key.
    pub fn hash_bytes(self, input: &[u8]) -> String {
        let digest = match self {
            KeyDigest::Md5 => Md5::digest(input).to_vec(),
            KeyDigest::Sha256 => Sha256::digest(input).to_vec(),
        };
        STANDARD.encode(digest).replace('/', ".")
    }

    /// Hash the UTF-8 bytes of a string.
    pub fn hash(self, input: &str) -> String {
        self.hash_bytes(input.as_bytes())
    }

    /// Hash the serialized form of a value.
    ///
    /// Values that serialize identically share a key. The key is only as
    /// stable as the value's serde representation.
    pub fn hash_value<T: Serialize + ?Sized>(self, value: &T) -> Result<String, Error> {
        let bytes = serde_json::to_vec(value)?;
        Ok(self.hash_bytes(&bytes))
    }
}

/// Compute an MD5 content-addressed key for a string.
pub fn hash(input: &str) -> String {
    KeyDigest::Md5.hash(input)
}

/// Compute an MD5 content-addressed key for a serializable value.
pub fn hash_value<T: Serialize + ?Sized>(value: &T) -> Result<String, Error> {
    KeyDigest::Md5.hash_value(value)
}
