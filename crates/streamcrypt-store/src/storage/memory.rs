#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use bytes::Bytes;

use super::{Channel, Message, MsgStore, RecoveredState, Store, StorageError, unix_nanos};

/// Retention limits applied to every channel of a [`MemoryStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreLimits {
    /// Maximum messages kept per channel; oldest are trimmed first. 0 means
    /// unlimited.
    pub max_msgs: usize,
}

/// In-memory store for testing and embedding
///
/// Channels live in a `HashMap` behind Arc<Mutex<>> to allow Clone and
/// concurrent access. Each channel's log is a `BTreeMap` keyed by sequence
/// with its own lock, so publishers on different channels do not contend.
/// Nothing is persisted: [`Store::recover`] always returns `None`.
///
/// Uses `lock().expect()` which will panic if a mutex is poisoned -
/// acceptable for test and simulation use.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, Arc<MemoryMsgStore>>>>,
    limits: StoreLimits,
    closed: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Create a new empty `MemoryStore` without retention limits
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new empty `MemoryStore` with retention limits
    pub fn with_limits(limits: StoreLimits) -> Self {
        Self { limits, ..Self::default() }
    }

    /// Total number of messages across all channels.
    ///
    /// Useful for debugging and testing.
    ///
    /// # Panics
    ///
    /// Panics if an internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn total_msg_count(&self) -> usize {
        let inner = self.inner.lock().expect("Mutex poisoned");
        inner.values().map(|c| c.log.lock().expect("Mutex poisoned").msgs.len()).sum()
    }

    fn check_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::SeqCst) { Err(StorageError::Closed) } else { Ok(()) }
    }

    fn channel(name: &str, msgs: &Arc<MemoryMsgStore>) -> Channel {
        Channel { name: name.to_string(), msgs: Arc::clone(msgs) as Arc<dyn MsgStore> }
    }
}

impl Store for MemoryStore {
    fn name(&self) -> String {
        "MEMORY".to_string()
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    fn create_channel(&self, name: &str) -> Result<Channel, StorageError> {
        self.check_open()?;
        let mut inner = self.inner.lock().expect("Mutex poisoned");

        if inner.contains_key(name) {
            return Err(StorageError::ChannelExists(name.to_string()));
        }

        let msgs = Arc::new(MemoryMsgStore::new(name, self.limits, Arc::clone(&self.closed)));
        inner.insert(name.to_string(), Arc::clone(&msgs));

        Ok(Self::channel(name, &msgs))
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    fn lookup_channel(&self, name: &str) -> Result<Option<Channel>, StorageError> {
        self.check_open()?;
        let inner = self.inner.lock().expect("Mutex poisoned");

        Ok(inner.get(name).map(|msgs| Self::channel(name, msgs)))
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    fn delete_channel(&self, name: &str) -> Result<(), StorageError> {
        self.check_open()?;
        self.inner
            .lock()
            .expect("Mutex poisoned")
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::ChannelNotFound(name.to_string()))
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    fn channel_names(&self) -> Result<Vec<String>, StorageError> {
        self.check_open()?;
        Ok(self.inner.lock().expect("Mutex poisoned").keys().cloned().collect())
    }

    fn recover(&self) -> Result<Option<RecoveredState>, StorageError> {
        self.check_open()?;
        Ok(None)
    }

    fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Message log of one in-memory channel.
struct MemoryMsgStore {
    subject: String,
    limits: StoreLimits,
    closed: Arc<AtomicBool>,
    log: Mutex<MsgLog>,
}

struct MsgLog {
    /// Last assigned sequence (kept when messages are trimmed)
    last_seq: u64,
    msgs: BTreeMap<u64, Message>,
}

impl MemoryMsgStore {
    fn new(subject: &str, limits: StoreLimits, closed: Arc<AtomicBool>) -> Self {
        Self {
            subject: subject.to_string(),
            limits,
            closed,
            log: Mutex::new(MsgLog { last_seq: 0, msgs: BTreeMap::new() }),
        }
    }

    fn check_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::SeqCst) { Err(StorageError::Closed) } else { Ok(()) }
    }
}

impl MsgStore for MemoryMsgStore {
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    fn store(&self, data: &[u8]) -> Result<u64, StorageError> {
        self.check_open()?;
        let mut log = self.log.lock().expect("Mutex poisoned");

        let sequence = log.last_seq + 1;
        let msg = Message {
            sequence,
            subject: self.subject.clone(),
            data: Bytes::copy_from_slice(data),
            timestamp: unix_nanos(),
        };
        log.msgs.insert(sequence, msg);
        log.last_seq = sequence;

        if self.limits.max_msgs > 0 {
            while log.msgs.len() > self.limits.max_msgs {
                log.msgs.pop_first();
            }
        }

        debug_assert!(log.msgs.last_key_value().is_some_and(|(seq, _)| *seq == sequence));

        Ok(sequence)
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    fn lookup(&self, sequence: u64) -> Result<Option<Message>, StorageError> {
        self.check_open()?;
        Ok(self.log.lock().expect("Mutex poisoned").msgs.get(&sequence).cloned())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    fn first_msg(&self) -> Result<Option<Message>, StorageError> {
        self.check_open()?;
        let log = self.log.lock().expect("Mutex poisoned");
        Ok(log.msgs.first_key_value().map(|(_, msg)| msg.clone()))
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    fn last_msg(&self) -> Result<Option<Message>, StorageError> {
        self.check_open()?;
        let log = self.log.lock().expect("Mutex poisoned");
        Ok(log.msgs.last_key_value().map(|(_, msg)| msg.clone()))
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    fn first_sequence(&self) -> Result<u64, StorageError> {
        self.check_open()?;
        let log = self.log.lock().expect("Mutex poisoned");
        Ok(log.msgs.first_key_value().map_or(0, |(seq, _)| *seq))
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    fn last_sequence(&self) -> Result<u64, StorageError> {
        self.check_open()?;
        Ok(self.log.lock().expect("Mutex poisoned").last_seq)
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    fn msg_count(&self) -> Result<usize, StorageError> {
        self.check_open()?;
        Ok(self.log.lock().expect("Mutex poisoned").msgs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_store_is_empty() {
        let store = MemoryStore::new();
        assert_eq!(store.total_msg_count(), 0);
        assert!(store.channel_names().unwrap().is_empty());
    }

    #[test]
    fn test_store_and_lookup() {
        let store = MemoryStore::new();
        let channel = store.create_channel("foo").expect("create failed");

        let seq = channel.msgs.store(b"hello").expect("store failed");
        assert_eq!(seq, 1);

        let msg = channel.msgs.lookup(1).expect("lookup failed").expect("message should exist");
        assert_eq!(msg.sequence, 1);
        assert_eq!(msg.subject, "foo");
        assert_eq!(msg.data.as_ref(), b"hello");
        assert!(msg.timestamp > 0);
    }

    #[test]
    fn test_sequential_messages() {
        let store = MemoryStore::new();
        let channel = store.create_channel("foo").unwrap();

        for i in 0..10 {
            let seq = channel.msgs.store(format!("msg{i}").as_bytes()).unwrap();
            assert_eq!(seq, i + 1);
        }

        assert_eq!(channel.msgs.first_sequence().unwrap(), 1);
        assert_eq!(channel.msgs.last_sequence().unwrap(), 10);
        assert_eq!(channel.msgs.msg_count().unwrap(), 10);
        assert_eq!(channel.msgs.first_msg().unwrap().unwrap().data.as_ref(), b"msg0");
        assert_eq!(channel.msgs.last_msg().unwrap().unwrap().data.as_ref(), b"msg9");
    }

    #[test]
    fn test_empty_channel() {
        let store = MemoryStore::new();
        let channel = store.create_channel("foo").unwrap();

        assert_eq!(channel.msgs.lookup(1).unwrap(), None);
        assert_eq!(channel.msgs.first_msg().unwrap(), None);
        assert_eq!(channel.msgs.last_msg().unwrap(), None);
        assert_eq!(channel.msgs.first_sequence().unwrap(), 0);
        assert_eq!(channel.msgs.last_sequence().unwrap(), 0);
    }

    #[test]
    fn test_empty_payload_stored_as_is() {
        let store = MemoryStore::new();
        let channel = store.create_channel("foo").unwrap();

        let seq = channel.msgs.store(&[]).unwrap();
        let msg = channel.msgs.lookup(seq).unwrap().unwrap();
        assert!(msg.data.is_empty());
    }

    #[test]
    fn test_create_channel_twice_conflicts() {
        let store = MemoryStore::new();
        store.create_channel("foo").unwrap();

        assert_eq!(
            store.create_channel("foo").unwrap_err(),
            StorageError::ChannelExists("foo".to_string())
        );
    }

    #[test]
    fn test_lookup_channel_shares_log() {
        let store = MemoryStore::new();
        let created = store.create_channel("foo").unwrap();
        created.msgs.store(b"a").unwrap();

        let found = store.lookup_channel("foo").unwrap().expect("channel should exist");
        assert_eq!(found.msgs.last_sequence().unwrap(), 1);
        assert!(store.lookup_channel("bar").unwrap().is_none());
    }

    #[test]
    fn test_delete_channel() {
        let store = MemoryStore::new();
        store.create_channel("foo").unwrap();

        store.delete_channel("foo").unwrap();
        assert!(store.lookup_channel("foo").unwrap().is_none());
        assert_eq!(
            store.delete_channel("foo").unwrap_err(),
            StorageError::ChannelNotFound("foo".to_string())
        );
    }

    #[test]
    fn test_retention_trims_oldest() {
        let store = MemoryStore::with_limits(StoreLimits { max_msgs: 3 });
        let channel = store.create_channel("foo").unwrap();

        for i in 0..5u8 {
            channel.msgs.store(&[i]).unwrap();
        }

        assert_eq!(channel.msgs.msg_count().unwrap(), 3);
        assert_eq!(channel.msgs.first_sequence().unwrap(), 3);
        assert_eq!(channel.msgs.last_sequence().unwrap(), 5);
        assert_eq!(channel.msgs.lookup(1).unwrap(), None);
        assert_eq!(channel.msgs.first_msg().unwrap().unwrap().data.as_ref(), &[2]);
    }

    #[test]
    fn test_multiple_channels() {
        let store = MemoryStore::new();
        let foo = store.create_channel("foo").unwrap();
        let bar = store.create_channel("bar").unwrap();

        for _ in 0..5 {
            foo.msgs.store(b"x").unwrap();
        }
        for _ in 0..3 {
            bar.msgs.store(b"y").unwrap();
        }

        assert_eq!(store.total_msg_count(), 8);
        let mut names = store.channel_names().unwrap();
        names.sort();
        assert_eq!(names, vec!["bar".to_string(), "foo".to_string()]);
    }

    #[test]
    fn test_recover_has_nothing() {
        let store = MemoryStore::new();
        store.create_channel("foo").unwrap();
        assert!(store.recover().unwrap().is_none());
    }

    #[test]
    fn test_closed_store_rejects_operations() {
        let store = MemoryStore::new();
        let channel = store.create_channel("foo").unwrap();
        store.close().unwrap();

        assert_eq!(channel.msgs.store(b"x").unwrap_err(), StorageError::Closed);
        assert_eq!(store.create_channel("bar").unwrap_err(), StorageError::Closed);
    }
}
