//! Storage error types.
//!
//! Defines errors that can occur during storage operations:
//! - `ChannelNotFound` / `ChannelExists`: channel lifecycle violations
//! - `Closed`: the store was closed
//! - `Serialization`: Failed to encode/decode data
//! - `Io`: Underlying storage system errors
//! - `Crypto`: payload encryption or decryption failed

use streamcrypt_crypto::CryptoError;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Channel does not exist
    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    /// Channel already exists
    #[error("channel already exists: {0}")]
    ChannelExists(String),

    /// Store has been closed
    #[error("store is closed")]
    Closed,

    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error (file system, database, etc.)
    #[error("I/O error: {0}")]
    Io(String),

    /// Payload encryption or decryption failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}
