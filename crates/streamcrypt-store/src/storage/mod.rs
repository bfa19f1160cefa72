//! Storage abstraction for channels and their message logs
//!
//! Trait-based abstraction over a message store. The traits are synchronous
//! (no async) and object-safe: a [`Channel`] holds its log as an
//! `Arc<dyn MsgStore>`, which lets wrappers such as the encryption layer
//! replace the handle without the engine knowing.

mod chaotic;
mod error;
mod memory;
mod redb;

use std::{collections::BTreeMap, fmt, sync::Arc};

use bytes::Bytes;
pub use chaotic::ChaoticStore;
pub use error::StorageError;
pub use memory::{MemoryStore, StoreLimits};
use serde::{Deserialize, Serialize};

pub use self::redb::RedbStore;

/// A message as returned by a [`MsgStore`].
///
/// Cloning is shallow: `data` is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Per-channel sequence, starting at 1
    pub sequence: u64,
    /// Channel the message was published on
    pub subject: String,
    /// Opaque payload bytes
    pub data: Bytes,
    /// Unix timestamp in nanoseconds when the message was stored
    pub timestamp: i64,
}

/// Metadata about a channel, persisted separately from its messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMetadata {
    /// Stable numeric id used to key the channel's messages.
    pub id: u64,
    /// Unix timestamp (seconds) when the channel was created.
    pub created_at_secs: u64,
}

/// A channel and the message log backing it.
#[derive(Clone)]
pub struct Channel {
    /// Channel name
    pub name: String,
    /// Message log for this channel
    pub msgs: Arc<dyn MsgStore>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").field("name", &self.name).finish_non_exhaustive()
    }
}

/// State reconstructed from persisted data on startup.
#[derive(Debug, Clone, Default)]
pub struct RecoveredState {
    /// Recovered channels keyed by name
    pub channels: BTreeMap<String, Channel>,
}

/// Store-level operations: channel lifecycle and recovery
///
/// Must be Send + Sync (shared between publishers). Implementations typically
/// share internal state via Arc.
pub trait Store: Send + Sync + 'static {
    /// Short name identifying the engine (e.g. `"MEMORY"`, `"REDB"`).
    fn name(&self) -> String;

    /// Create a new channel.
    ///
    /// # Errors
    ///
    /// - `ChannelExists`: a channel with this name already exists
    fn create_channel(&self, name: &str) -> Result<Channel, StorageError>;

    /// Look up an existing channel.
    ///
    /// Returns `None` if no channel has this name.
    fn lookup_channel(&self, name: &str) -> Result<Option<Channel>, StorageError>;

    /// Delete a channel and all of its messages.
    fn delete_channel(&self, name: &str) -> Result<(), StorageError>;

    /// Names of all channels. Order is not guaranteed.
    fn channel_names(&self) -> Result<Vec<String>, StorageError>;

    /// Recover persisted state.
    ///
    /// Returns `None` if the engine has nothing to recover (e.g. in-memory).
    fn recover(&self) -> Result<Option<RecoveredState>, StorageError>;

    /// Close the store. Subsequent operations fail with `Closed`.
    fn close(&self) -> Result<(), StorageError>;
}

/// Per-channel message log
///
/// # Invariants
///
/// - Sequences are assigned by the store, start at 1 and never decrease
/// - Stored payload bytes are never mutated after `store` returns
pub trait MsgStore: Send + Sync {
    /// Append a payload and return its assigned sequence.
    fn store(&self, data: &[u8]) -> Result<u64, StorageError>;

    /// Message with the given sequence, `None` if absent or trimmed.
    fn lookup(&self, sequence: u64) -> Result<Option<Message>, StorageError>;

    /// Oldest message still stored.
    fn first_msg(&self) -> Result<Option<Message>, StorageError>;

    /// Most recently stored message.
    fn last_msg(&self) -> Result<Option<Message>, StorageError>;

    /// Sequence of the oldest stored message, 0 if empty.
    fn first_sequence(&self) -> Result<u64, StorageError>;

    /// Sequence of the newest stored message, 0 if empty.
    fn last_sequence(&self) -> Result<u64, StorageError>;

    /// Number of messages currently stored.
    fn msg_count(&self) -> Result<usize, StorageError>;
}

/// Unix time now, in nanoseconds.
pub(crate) fn unix_nanos() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
