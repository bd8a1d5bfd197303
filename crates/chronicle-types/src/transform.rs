//! Descriptors for the byte transforms applied to persisted state payloads.
//!
//! A state row may carry a [`CompressionInfo`] and an [`EncryptionInfo`]
//! next to its data. An absent descriptor, or one whose `kind` is
//! [`TRANSFORM_NONE`], means the transform was not applied. Encryption is
//! always applied after compression, so loads decrypt first.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Descriptor `kind` meaning "not applied".
pub const TRANSFORM_NONE: &str = "none";

/// Records how a payload was compressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionInfo {
    /// Algorithm name (`gzip`, `lz4`, or `none`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Descriptor format version.
    pub version: u32,
    /// Compression level used.
    pub level: u32,
    /// Free-form details (original size, ratio, ...).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CompressionInfo {
    /// Whether a transform was actually applied.
    pub fn is_applied(&self) -> bool {
        !self.kind.is_empty() && self.kind != TRANSFORM_NONE
    }
}

/// Records how a payload was encrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionInfo {
    /// Cipher name (`aes-gcm` or `none`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Descriptor format version.
    pub version: u32,
    /// Key size in bits.
    pub key_size: u32,
    /// Free-form details (key id, nonce size, ...).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl EncryptionInfo {
    /// Whether a transform was actually applied.
    pub fn is_applied(&self) -> bool {
        !self.kind.is_empty() && self.kind != TRANSFORM_NONE
    }
}
