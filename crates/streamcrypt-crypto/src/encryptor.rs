//! Payload encryptor shared by every encrypting message store
//!
//! Couples the [`RecordCipher`] with the [`NonceManager`] so callers only see
//! `encrypt(payload) -> record` and `decrypt(record) -> payload`.

use std::sync::Arc;

use crate::{
    cipher::RecordCipher,
    error::CryptoError,
    key::resolve_secret,
    nonce::{EntropySource, NonceConfig, NonceManager, OsEntropy},
};

/// Key, cipher and nonce lifecycle for one encryption layer.
#[derive(Debug)]
pub struct Encryptor {
    cipher: RecordCipher,
    nonces: NonceManager,
}

impl Encryptor {
    /// Create an encryptor from an operator secret.
    ///
    /// An empty `secret` falls back to [`crate::ENCRYPTION_KEY_ENV`].
    ///
    /// # Errors
    ///
    /// - `MissingKey`: no secret passed and the environment variable is unset
    /// - `InvalidKey`: derived key rejected by the cipher
    /// - `InvalidConfig`: `config.max_calls_per_nonce` out of range
    /// - `NonceGeneration`: initial nonce could not be generated
    pub fn new(secret: &str, config: NonceConfig) -> Result<Self, CryptoError> {
        let secret = resolve_secret(secret)?;
        Self::with_entropy(&secret, config, Arc::new(OsEntropy))
    }

    /// Create an encryptor with an explicit entropy source.
    ///
    /// Does not consult the environment: an empty `secret` is `MissingKey`.
    pub fn with_entropy(
        secret: &str,
        config: NonceConfig,
        entropy: Arc<dyn EntropySource>,
    ) -> Result<Self, CryptoError> {
        if secret.is_empty() {
            return Err(CryptoError::MissingKey);
        }

        let cipher = RecordCipher::from_secret(secret)?;
        let nonces = NonceManager::new(config, entropy)?;

        Ok(Self { cipher, nonces })
    }

    /// Seal a payload into a `nonce || ciphertext || tag` record.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.nonces.with_nonce(|nonce| self.cipher.seal(nonce, plaintext))
    }

    /// Open a record produced by [`Self::encrypt`] under the same secret.
    pub fn decrypt(&self, record: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.cipher.open(record)
    }

    /// Underlying cipher.
    pub fn cipher(&self) -> &RecordCipher {
        &self.cipher
    }

    /// Nonce manager, for inspecting the active generation.
    pub fn nonces(&self) -> &NonceManager {
        &self.nonces
    }
}
