//! Error types for payload encryption

use thiserror::Error;

/// Errors from key derivation, nonce management and record sealing/opening
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// No secret was supplied and the environment fallback is unset or empty
    #[error("encryption requires a key (pass one or set {env})", env = crate::ENCRYPTION_KEY_ENV)]
    MissingKey,

    /// Derived key material was rejected by the cipher
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKey {
        /// Key length the cipher requires
        expected: usize,
        /// Key length that was supplied
        actual: usize,
    },

    /// The secure random source failed while creating a nonce
    #[error("nonce generation failed: {reason}")]
    NonceGeneration {
        /// Error reported by the entropy source
        reason: String,
    },

    /// Nonce limits are outside the range the construction allows
    #[error("invalid nonce config: max_calls_per_nonce {max_calls} not in 1..={limit}")]
    InvalidConfig {
        /// Configured seals per nonce
        max_calls: u64,
        /// Largest allowed value
        limit: u64,
    },

    /// AEAD open rejected the record (wrong key, corruption or tampering)
    #[error("payload authentication failed")]
    AuthenticationFailed,

    /// Record is too short to hold a nonce and an authentication tag
    #[error("malformed record: {len} bytes, need at least {min}")]
    MalformedRecord {
        /// Length of the stored record
        len: usize,
        /// Minimum length of a sealed record
        min: usize,
    },

    /// Nonce rotation did not complete within the configured bound
    #[error("nonce rotation stalled after {waited_ms}ms")]
    RotationStalled {
        /// Milliseconds spent waiting before giving up
        waited_ms: u64,
    },
}

impl CryptoError {
    /// Returns true if this error is fatal (unrecoverable)
    ///
    /// Fatal errors mean the layer or the record cannot be used as-is.
    /// Transient errors may succeed if the operation is attempted again.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::MissingKey => true,
            Self::InvalidKey { .. } => true,
            Self::InvalidConfig { .. } => true,
            Self::AuthenticationFailed => true,
            Self::MalformedRecord { .. } => true,

            // Rotation is re-attempted by the next caller
            Self::NonceGeneration { .. } => false,
            Self::RotationStalled { .. } => false,
        }
    }
}
