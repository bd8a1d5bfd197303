//! The save/load byte pipeline: compress, then encrypt; decrypt, then
//! decompress.

use std::sync::Arc;

use chronicle_types::{CompressionInfo, EncryptionInfo, StoreError, StoreResult};

use crate::compression::{CompressionConfig, Compressor, decompress};
use crate::encryption::{Encryptor, KeyProvider};

/// A payload after the save pipeline, with the descriptors needed to
/// reverse it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    /// Bytes to persist.
    pub data: Vec<u8>,
    /// Present when compression was applied.
    pub compression: Option<CompressionInfo>,
    /// Present when encryption was applied.
    pub encryption: Option<EncryptionInfo>,
}

/// Composes the optional compression and encryption stages.
#[derive(Debug, Clone, Default)]
pub struct PayloadCodec {
    compressor: Option<Compressor>,
    encryptor: Option<Encryptor>,
}

impl PayloadCodec {
    /// Build a codec. `None` disables a stage.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for an invalid compression level
    /// or key size.
    pub fn new(
        compression: Option<CompressionConfig>,
        key_provider: Option<Arc<dyn KeyProvider>>,
    ) -> StoreResult<Self> {
        Ok(Self {
            compressor: compression.map(Compressor::new).transpose()?,
            encryptor: key_provider.map(Encryptor::new).transpose()?,
        })
    }

    /// Whether the compression stage is configured.
    pub const fn compresses(&self) -> bool {
        self.compressor.is_some()
    }

    /// Whether the encryption stage is configured.
    pub const fn encrypts(&self) -> bool {
        self.encryptor.is_some()
    }

    /// Run the save pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CompressionFailed`] or
    /// [`StoreError::EncryptionFailed`] from the failing stage.
    pub fn encode(&self, data: &[u8]) -> StoreResult<EncodedPayload> {
        let compressed = self
            .compressor
            .as_ref()
            .map(|compressor| compressor.compress(data))
            .transpose()?
            .flatten();
        let (mut bytes, compression) = compressed
            .map_or_else(|| (data.to_vec(), None), |(bytes, info)| (bytes, Some(info)));

        let mut encryption = None;
        if let Some(encryptor) = &self.encryptor {
            let (sealed, info) = encryptor.encrypt(&bytes)?;
            bytes = sealed;
            encryption = Some(info);
        }

        Ok(EncodedPayload {
            data: bytes,
            compression,
            encryption,
        })
    }

    /// Run the load pipeline.
    ///
    /// Decompression needs no configuration, so rows written with
    /// compression still load after it is switched off. Encrypted rows need
    /// a key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::EncryptionFailed`] when the row is encrypted and
    /// no key is configured, or when either stage fails.
    pub fn decode(
        &self,
        data: &[u8],
        compression: Option<&CompressionInfo>,
        encryption: Option<&EncryptionInfo>,
    ) -> StoreResult<Vec<u8>> {
        let opened = match encryption.filter(|info| info.is_applied()) {
            Some(info) => {
                let encryptor = self.encryptor.as_ref().ok_or_else(|| {
                    StoreError::EncryptionFailed(
                        "payload is encrypted but no key is configured".to_owned(),
                    )
                })?;
                encryptor.decrypt(data, info)?
            }
            None => data.to_vec(),
        };
        let Some(info) = compression.filter(|info| info.is_applied()) else {
            return Ok(opened);
        };
        decompress(&opened, info)
    }
}
