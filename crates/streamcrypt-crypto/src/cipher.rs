//! Record sealing using `ChaCha20-Poly1305`
//!
//! A sealed record is laid out as `nonce(12) || ciphertext || tag(16)`. The
//! layout is the on-disk format: changing either length breaks every record
//! already stored under the same key.

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, AeadInPlace, KeyInit},
};

use crate::{
    error::CryptoError,
    key::{KEY_SIZE, derive_key},
};

/// `ChaCha20` nonce size (12 bytes)
pub const NONCE_SIZE: usize = 12;

/// Poly1305 tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// AEAD cipher bound to the key derived from the operator secret.
///
/// Immutable after construction; shared by reference across threads.
pub struct RecordCipher {
    aead: ChaCha20Poly1305,
}

impl RecordCipher {
    /// Build the cipher from an operator secret.
    pub fn from_secret(secret: &str) -> Result<Self, CryptoError> {
        let key = derive_key(secret);
        Self::from_key(key.as_slice())
    }

    /// Build the cipher from raw key material.
    ///
    /// # Errors
    ///
    /// - `InvalidKey`: `key` is not exactly [`KEY_SIZE`] bytes
    pub fn from_key(key: &[u8]) -> Result<Self, CryptoError> {
        let aead = ChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| CryptoError::InvalidKey { expected: KEY_SIZE, actual: key.len() })?;

        Ok(Self { aead })
    }

    /// Nonce length prefixed to every record.
    pub fn nonce_size(&self) -> usize {
        NONCE_SIZE
    }

    /// Bytes added to a payload by sealing (tag only, excluding the nonce).
    pub fn overhead(&self) -> usize {
        TAG_SIZE
    }

    /// Seal `plaintext` under `nonce` into a `nonce || ciphertext || tag`
    /// record.
    ///
    /// The caller is responsible for nonce usage limits; see
    /// [`crate::NonceManager`].
    pub fn seal(&self, nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Vec<u8> {
        let mut record = Vec::with_capacity(NONCE_SIZE + plaintext.len() + TAG_SIZE);
        record.extend_from_slice(nonce);
        record.extend_from_slice(plaintext);

        let Ok(tag) =
            self.aead.encrypt_in_place_detached(Nonce::from_slice(nonce), &[], &mut record[NONCE_SIZE..])
        else {
            unreachable!("ChaCha20-Poly1305 encryption cannot fail for in-memory payloads");
        };

        record.extend_from_slice(&tag);
        record
    }

    /// Open a sealed record and return the plaintext.
    ///
    /// # Errors
    ///
    /// - `MalformedRecord`: record shorter than nonce plus tag
    /// - `AuthenticationFailed`: wrong key, corrupted or tampered record
    pub fn open(&self, record: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let min = NONCE_SIZE + TAG_SIZE;
        if record.len() < min {
            return Err(CryptoError::MalformedRecord { len: record.len(), min });
        }

        let (nonce, sealed) = record.split_at(NONCE_SIZE);

        self.aead
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::AuthenticationFailed)
    }
}

impl std::fmt::Debug for RecordCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCipher").field("aead", &"ChaCha20Poly1305").finish_non_exhaustive()
    }
}
