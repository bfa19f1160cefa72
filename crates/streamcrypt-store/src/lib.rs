//! Streamcrypt message store.
//!
//! Channel-oriented message storage with transparent payload encryption at
//! rest. Engines persist opaque payloads; [`CryptoStore`] sits in front of any
//! engine and seals each payload with the primitives from
//! [`streamcrypt_crypto`].
//!
//! # Architecture
//!
//! ```text
//! publisher ──► CryptoStore ──► engine (MemoryStore | RedbStore)
//!                  │                  │
//!                  └─ Encryptor       └─ Channel { msgs: Arc<dyn MsgStore> }
//! ```
//!
//! # Components
//!
//! - [`Store`] / [`MsgStore`]: synchronous, object-safe storage traits
//! - [`MemoryStore`]: in-memory engine with optional retention
//! - [`RedbStore`]: durable engine backed by Redb
//! - [`ChaoticStore`]: fault-injecting wrapper for tests
//! - [`CryptoStore`]: encrypting wrapper over any engine

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod crypto;
pub mod storage;

pub use crypto::CryptoStore;
pub use storage::{
    ChaoticStore, Channel, ChannelMetadata, MemoryStore, Message, MsgStore, RecoveredState,
    RedbStore, Store, StorageError, StoreLimits,
};
pub use streamcrypt_crypto::{CryptoError, ENCRYPTION_KEY_ENV, NonceConfig};
