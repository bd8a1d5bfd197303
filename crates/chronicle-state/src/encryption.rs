//! Authenticated encryption for state snapshots.
//!
//! Payloads are sealed with AES-GCM under a 128- or 256-bit key supplied by
//! a [`KeyProvider`]. Every call draws a fresh random 96-bit nonce, so
//! sealing the same plaintext twice yields different ciphertexts. The nonce
//! is stored in front of the ciphertext:
//!
//! ```text
//! [nonce: 12 bytes][ciphertext + 16-byte tag]
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chronicle_types::{EncryptionInfo, StoreError, StoreResult};
use rand::RngCore;

/// Environment variable holding base64 key material.
pub const ENCRYPTION_KEY_ENV_VAR: &str = "CHRONICLE_ENCRYPTION_KEY";

/// Cipher name recorded in the descriptor `type` field.
pub const CIPHER_AES_GCM: &str = "aes-gcm";

/// Format version written into every [`EncryptionInfo`].
pub const ENCRYPTION_FORMAT_VERSION: u32 = 1;

/// AES-GCM nonce size in bytes.
pub const NONCE_SIZE: usize = 12;

/// Accepted key sizes in bytes.
pub const KEY_SIZES: [usize; 2] = [16, 32];

/// Source of the encryption key.
///
/// Implementations may cache, rotate, or fetch keys from a secret manager.
pub trait KeyProvider: Send + Sync {
    /// Raw key bytes (16 or 32).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::EncryptionFailed`] when the key is unavailable.
    fn key(&self) -> StoreResult<Vec<u8>>;

    /// Identifier recorded next to each ciphertext.
    fn key_id(&self) -> &str;
}

fn check_key_size(len: usize) -> StoreResult<()> {
    if KEY_SIZES.contains(&len) {
        Ok(())
    } else {
        Err(StoreError::validation(
            "encryption.key",
            format!("key must be 16 or 32 bytes, got {len}"),
        ))
    }
}

/// Key held in memory.
#[derive(Clone)]
pub struct StaticKeyProvider {
    key: Vec<u8>,
    key_id: String,
}

impl StaticKeyProvider {
    /// Wrap raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] unless the key is 16 or 32 bytes.
    pub fn new(key: impl Into<Vec<u8>>) -> StoreResult<Self> {
        let key = key.into();
        check_key_size(key.len())?;
        Ok(Self {
            key,
            key_id: "default".to_owned(),
        })
    }

    /// Decode a base64 key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] for invalid base64 or a bad size.
    pub fn from_base64(encoded: &str) -> StoreResult<Self> {
        let key = STANDARD
            .decode(encoded.trim())
            .map_err(|e| StoreError::validation("encryption.key", format!("invalid base64: {e}")))?;
        Self::new(key)
    }

    /// Set the key id recorded with ciphertexts.
    #[must_use]
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = key_id.into();
        self
    }
}

impl fmt::Debug for StaticKeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticKeyProvider")
            .field("key_id", &self.key_id)
            .field("key_size", &self.key.len())
            .finish_non_exhaustive()
    }
}

impl KeyProvider for StaticKeyProvider {
    fn key(&self) -> StoreResult<Vec<u8>> {
        Ok(self.key.clone())
    }

    fn key_id(&self) -> &str {
        &self.key_id
    }
}

/// Key read once from [`ENCRYPTION_KEY_ENV_VAR`] (base64).
#[derive(Debug, Clone)]
pub struct EnvKeyProvider {
    inner: StaticKeyProvider,
}

impl EnvKeyProvider {
    /// Read the key from [`ENCRYPTION_KEY_ENV_VAR`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] when the variable is unset and
    /// [`StoreError::Validation`] when its value is not a valid key.
    pub fn from_env() -> StoreResult<Self> {
        Self::from_var(ENCRYPTION_KEY_ENV_VAR)
    }

    /// Read the key from the named variable.
    ///
    /// # Errors
    ///
    /// See [`EnvKeyProvider::from_env`].
    pub fn from_var(name: &str) -> StoreResult<Self> {
        let encoded = std::env::var(name)
            .map_err(|e| StoreError::Config(format!("{name}: {e}")))?;
        let inner = StaticKeyProvider::from_base64(&encoded)?.with_key_id(format!("env:{name}"));
        Ok(Self { inner })
    }
}

impl KeyProvider for EnvKeyProvider {
    fn key(&self) -> StoreResult<Vec<u8>> {
        self.inner.key()
    }

    fn key_id(&self) -> &str {
        self.inner.key_id()
    }
}

enum Cipher {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl Cipher {
    fn new(key: &[u8]) -> StoreResult<Self> {
        let invalid = |e| StoreError::EncryptionFailed(format!("invalid key: {e}"));
        match key.len() {
            16 => Ok(Self::Aes128(Box::new(Aes128Gcm::new_from_slice(key).map_err(invalid)?))),
            32 => Ok(Self::Aes256(Box::new(Aes256Gcm::new_from_slice(key).map_err(invalid)?))),
            other => Err(StoreError::EncryptionFailed(format!(
                "key must be 16 or 32 bytes, got {other}"
            ))),
        }
    }

    fn seal(&self, nonce: &[u8; NONCE_SIZE], data: &[u8]) -> Result<Vec<u8>, aes_gcm::Error> {
        let nonce = Nonce::from_slice(nonce);
        match self {
            Self::Aes128(c) => c.encrypt(nonce, data),
            Self::Aes256(c) => c.encrypt(nonce, data),
        }
    }

    fn open(&self, nonce: &[u8], data: &[u8]) -> Result<Vec<u8>, aes_gcm::Error> {
        let nonce = Nonce::from_slice(nonce);
        match self {
            Self::Aes128(c) => c.decrypt(nonce, data),
            Self::Aes256(c) => c.decrypt(nonce, data),
        }
    }
}

/// Seals and opens payloads with a provider's key.
#[derive(Clone)]
pub struct Encryptor {
    provider: Arc<dyn KeyProvider>,
}

impl fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encryptor")
            .field("key_id", &self.provider.key_id())
            .finish_non_exhaustive()
    }
}

impl Encryptor {
    /// Build an encryptor, checking the provider's key size once up front.
    ///
    /// # Errors
    ///
    /// Returns the provider's error or [`StoreError::Validation`] for a bad
    /// key size.
    pub fn new(provider: Arc<dyn KeyProvider>) -> StoreResult<Self> {
        check_key_size(provider.key()?.len())?;
        Ok(Self { provider })
    }

    /// Encrypt `data` under a fresh random nonce.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::EncryptionFailed`] when the key is unavailable
    /// or sealing fails.
    pub fn encrypt(&self, data: &[u8]) -> StoreResult<(Vec<u8>, EncryptionInfo)> {
        let key = self.provider.key()?;
        let cipher = Cipher::new(&key)?;

        let mut nonce = [0u8; NONCE_SIZE];
        rand::rng().fill_bytes(&mut nonce);

        let sealed = cipher
            .seal(&nonce, data)
            .map_err(|e| StoreError::EncryptionFailed(format!("seal: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_SIZE.saturating_add(sealed.len()));
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);

        let mut metadata = BTreeMap::new();
        metadata.insert("keyId".to_owned(), self.provider.key_id().to_owned());
        metadata.insert("nonceSize".to_owned(), NONCE_SIZE.to_string());

        let key_bits = u32::try_from(key.len().saturating_mul(8)).unwrap_or(0);
        let info = EncryptionInfo {
            kind: CIPHER_AES_GCM.to_owned(),
            version: ENCRYPTION_FORMAT_VERSION,
            key_size: key_bits,
            metadata,
        };
        Ok((out, info))
    }

    /// Reverse [`Encryptor::encrypt`].
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::EncryptionFailed`] for an unknown cipher, a key
    /// of the wrong size, a truncated payload, or a failed authentication
    /// check (wrong key or tampered data).
    pub fn decrypt(&self, data: &[u8], info: &EncryptionInfo) -> StoreResult<Vec<u8>> {
        if !info.is_applied() {
            return Ok(data.to_vec());
        }
        if info.kind != CIPHER_AES_GCM {
            return Err(StoreError::EncryptionFailed(format!(
                "unknown cipher '{}'",
                info.kind
            )));
        }
        let key = self.provider.key()?;
        let key_bits = u32::try_from(key.len().saturating_mul(8)).unwrap_or(0);
        if info.key_size != key_bits {
            return Err(StoreError::EncryptionFailed(format!(
                "payload sealed with a {}-bit key, provider holds a {key_bits}-bit key",
                info.key_size
            )));
        }
        if let Some(stored) = info.metadata.get("keyId") {
            if stored != self.provider.key_id() {
                tracing::warn!(
                    stored = %stored,
                    current = %self.provider.key_id(),
                    "Opening payload sealed under a different key id"
                );
            }
        }

        let (nonce, sealed) = data.split_at_checked(NONCE_SIZE).ok_or_else(|| {
            StoreError::EncryptionFailed("payload shorter than the nonce".to_owned())
        })?;
        Cipher::new(&key)?
            .open(nonce, sealed)
            .map_err(|e| StoreError::EncryptionFailed(format!("authentication failed: {e}")))
    }
}
