//! Streamcrypt Cryptographic Primitives
//!
//! Building blocks for encrypting message payloads at rest. One operator
//! secret is hashed into a single symmetric key; payloads are sealed with
//! `ChaCha20-Poly1305` under a shared random nonce that is rotated before it
//! reaches the construction's safe-use bound.
//!
//! # Key Lifecycle
//!
//! ```text
//! Operator Secret (argument or STREAMCRYPT_ENCRYPTION_KEY)
//!        │
//!        ▼
//! SHA-256 → Symmetric Key (32 bytes, zeroized after use)
//!        │
//!        ▼
//! ChaCha20-Poly1305 ← Active Nonce (rotated every max_calls_per_nonce seals)
//!        │
//!        ▼
//! Record: nonce(12) || ciphertext || tag(16)
//! ```
//!
//! # Security
//!
//! Confidentiality and integrity:
//! - Only the payload is protected; sequences, timestamps and channel names
//!   are stored in the clear
//! - Failed authentication tag -> reject record, never return partial plaintext
//!
//! Nonce reuse:
//! - A nonce is used at most `max_calls_per_nonce` times
//! - Rotation drains in-flight seals before installing the replacement
//! - The default threshold leaves headroom below 2^32 uses per nonce

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cipher;
pub mod encryptor;
pub mod error;
pub mod key;
pub mod nonce;

pub use cipher::{NONCE_SIZE, RecordCipher, TAG_SIZE};
pub use encryptor::Encryptor;
pub use error::CryptoError;
pub use key::{ENCRYPTION_KEY_ENV, KEY_SIZE, derive_key, resolve_secret, resolve_secret_with};
pub use nonce::{
    DEFAULT_MAX_CALLS_PER_NONCE, EntropySource, NonceConfig, NonceGeneration, NonceManager,
    OsEntropy,
};
