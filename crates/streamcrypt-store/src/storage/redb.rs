//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety.
//! Channels and messages survive close/reopen, and [`Store::recover`]
//! rebuilds every channel from disk.

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use bytes::Bytes;
use redb::{Database, ReadableTable, TableDefinition};

use super::{
    Channel, ChannelMetadata, Message, MsgStore, RecoveredState, Store, StorageError, unix_nanos,
};

/// Table: channels
/// Key: channel name (UTF-8 bytes)
/// Value: CBOR-encoded ChannelMetadata
const CHANNELS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("channels");

/// Table: messages
/// Key: (channel_id: u64, sequence: u64) as big-endian bytes [16 bytes]
/// Value: timestamp (8 bytes BE) + payload bytes
const MESSAGES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("messages");

/// Table: meta
/// Key: counter name
/// Value: counter value
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Next channel id to hand out. Only ever increases, so a deleted channel's
/// id is never given to a later channel.
const NEXT_CHANNEL_ID: &str = "next_channel_id";

/// Durable store backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc). The
/// database file stays locked until the store and every channel handle
/// obtained from it are dropped.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
    closed: Arc<AtomicBool>,
}

impl RedbStore {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates tables if they don't exist (CHANNELS, MESSAGES, META).
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(|e| StorageError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(CHANNELS).map_err(|e| StorageError::Io(e.to_string()))?;
            let _ = txn.open_table(MESSAGES).map_err(|e| StorageError::Io(e.to_string()))?;
            let _ = txn.open_table(META).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        tracing::debug!(path = %path.as_ref().display(), "opened redb store");

        Ok(Self { db: Arc::new(db), closed: Arc::new(AtomicBool::new(false)) })
    }

    fn check_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::SeqCst) { Err(StorageError::Closed) } else { Ok(()) }
    }

    fn channel(&self, name: &str, metadata: &ChannelMetadata) -> Channel {
        let msgs = RedbMsgStore {
            db: Arc::clone(&self.db),
            closed: Arc::clone(&self.closed),
            channel_id: metadata.id,
            subject: name.to_string(),
        };
        Channel { name: name.to_string(), msgs: Arc::new(msgs) }
    }

    /// Read every channel's metadata.
    fn load_channels(&self) -> Result<Vec<(String, ChannelMetadata)>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(CHANNELS).map_err(|e| StorageError::Io(e.to_string()))?;

        let mut channels = Vec::new();
        for result in table.iter().map_err(|e| StorageError::Io(e.to_string()))? {
            let (key, value) = result.map_err(|e| StorageError::Io(e.to_string()))?;
            let name = String::from_utf8(key.value().to_vec())
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            let metadata: ChannelMetadata = ciborium::from_reader(value.value())
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            channels.push((name, metadata));
        }

        Ok(channels)
    }
}

impl Store for RedbStore {
    fn name(&self) -> String {
        "REDB".to_string()
    }

    fn create_channel(&self, name: &str) -> Result<Channel, StorageError> {
        self.check_open()?;
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        let metadata = {
            let mut table =
                txn.open_table(CHANNELS).map_err(|e| StorageError::Io(e.to_string()))?;

            if table
                .get(name.as_bytes())
                .map_err(|e| StorageError::Io(e.to_string()))?
                .is_some()
            {
                return Err(StorageError::ChannelExists(name.to_string()));
            }

            let mut meta = txn.open_table(META).map_err(|e| StorageError::Io(e.to_string()))?;
            let stored =
                meta.get(NEXT_CHANNEL_ID).map_err(|e| StorageError::Io(e.to_string()))?.map(|v| v.value());

            // Files written before the counter existed start past the highest live id
            let id = match stored {
                Some(id) => id,
                None => {
                    let mut next_id = 1;
                    for result in table.iter().map_err(|e| StorageError::Io(e.to_string()))? {
                        let (_, value) = result.map_err(|e| StorageError::Io(e.to_string()))?;
                        let existing: ChannelMetadata = ciborium::from_reader(value.value())
                            .map_err(|e| StorageError::Serialization(e.to_string()))?;
                        next_id = next_id.max(existing.id + 1);
                    }
                    next_id
                },
            };

            meta.insert(NEXT_CHANNEL_ID, id + 1).map_err(|e| StorageError::Io(e.to_string()))?;

            let metadata = ChannelMetadata {
                id,
                created_at_secs: u64::try_from(unix_nanos() / 1_000_000_000).unwrap_or_default(),
            };

            let mut bytes = Vec::new();
            ciborium::into_writer(&metadata, &mut bytes)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;

            table
                .insert(name.as_bytes(), bytes.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?;

            metadata
        };

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(self.channel(name, &metadata))
    }

    fn lookup_channel(&self, name: &str) -> Result<Option<Channel>, StorageError> {
        self.check_open()?;
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(CHANNELS).map_err(|e| StorageError::Io(e.to_string()))?;

        match table.get(name.as_bytes()).map_err(|e| StorageError::Io(e.to_string()))? {
            Some(value) => {
                let metadata: ChannelMetadata = ciborium::from_reader(value.value())
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                Ok(Some(self.channel(name, &metadata)))
            },
            None => Ok(None),
        }
    }

    fn delete_channel(&self, name: &str) -> Result<(), StorageError> {
        self.check_open()?;
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        {
            let mut channels =
                txn.open_table(CHANNELS).map_err(|e| StorageError::Io(e.to_string()))?;

            let metadata: ChannelMetadata =
                match channels.remove(name.as_bytes()).map_err(|e| StorageError::Io(e.to_string()))? {
                    Some(value) => ciborium::from_reader(value.value())
                        .map_err(|e| StorageError::Serialization(e.to_string()))?,
                    None => return Err(StorageError::ChannelNotFound(name.to_string())),
                };

            let mut messages =
                txn.open_table(MESSAGES).map_err(|e| StorageError::Io(e.to_string()))?;

            let start_key = encode_msg_key(metadata.id, 0);
            let end_key = encode_msg_key(metadata.id, u64::MAX);

            let mut keys = Vec::new();
            for result in messages
                .range(start_key.as_slice()..=end_key.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?
            {
                let (key, _) = result.map_err(|e| StorageError::Io(e.to_string()))?;
                keys.push(key.value().to_vec());
            }

            for key in keys {
                messages.remove(key.as_slice()).map_err(|e| StorageError::Io(e.to_string()))?;
            }
        }

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(())
    }

    fn channel_names(&self) -> Result<Vec<String>, StorageError> {
        self.check_open()?;
        Ok(self.load_channels()?.into_iter().map(|(name, _)| name).collect())
    }

    fn recover(&self) -> Result<Option<RecoveredState>, StorageError> {
        self.check_open()?;
        let channels = self.load_channels()?;

        if channels.is_empty() {
            return Ok(None);
        }

        let channels = channels
            .iter()
            .map(|(name, metadata)| (name.clone(), self.channel(name, metadata)))
            .collect();

        Ok(Some(RecoveredState { channels }))
    }

    fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Message log of one Redb-backed channel.
struct RedbMsgStore {
    db: Arc<Database>,
    closed: Arc<AtomicBool>,
    channel_id: u64,
    subject: String,
}

impl RedbMsgStore {
    fn check_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::SeqCst) { Err(StorageError::Closed) } else { Ok(()) }
    }

    /// Sequence of the first or last stored message in this channel.
    fn edge_sequence<T: ReadableTable<&'static [u8], &'static [u8]>>(
        &self,
        table: &T,
        last: bool,
    ) -> Result<Option<u64>, StorageError> {
        let start_key = encode_msg_key(self.channel_id, 0);
        let end_key = encode_msg_key(self.channel_id, u64::MAX);

        let mut range = table
            .range(start_key.as_slice()..=end_key.as_slice())
            .map_err(|e| StorageError::Io(e.to_string()))?;

        let edge = if last { range.next_back() } else { range.next() };

        match edge {
            Some(result) => {
                let (key, _) = result.map_err(|e| StorageError::Io(e.to_string()))?;
                let (_, sequence) = decode_msg_key(key.value())?;
                Ok(Some(sequence))
            },
            None => Ok(None),
        }
    }

    fn load(&self, sequence: Option<u64>, last: bool) -> Result<Option<Message>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(MESSAGES).map_err(|e| StorageError::Io(e.to_string()))?;

        let sequence = match sequence {
            Some(sequence) => sequence,
            None => match self.edge_sequence(&table, last)? {
                Some(sequence) => sequence,
                None => return Ok(None),
            },
        };

        let key = encode_msg_key(self.channel_id, sequence);
        match table.get(key.as_slice()).map_err(|e| StorageError::Io(e.to_string()))? {
            Some(value) => Ok(Some(decode_message(&self.subject, sequence, value.value())?)),
            None => Ok(None),
        }
    }
}

impl MsgStore for RedbMsgStore {
    fn store(&self, data: &[u8]) -> Result<u64, StorageError> {
        self.check_open()?;
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        let sequence = {
            // A handle outliving its channel must not write into the log of a
            // channel created later under the same name.
            let channels = txn.open_table(CHANNELS).map_err(|e| StorageError::Io(e.to_string()))?;
            let live = match channels
                .get(self.subject.as_bytes())
                .map_err(|e| StorageError::Io(e.to_string()))?
            {
                Some(value) => {
                    let metadata: ChannelMetadata = ciborium::from_reader(value.value())
                        .map_err(|e| StorageError::Serialization(e.to_string()))?;
                    metadata.id == self.channel_id
                },
                None => false,
            };
            if !live {
                return Err(StorageError::ChannelNotFound(self.subject.clone()));
            }

            let mut table =
                txn.open_table(MESSAGES).map_err(|e| StorageError::Io(e.to_string()))?;

            let sequence = self.edge_sequence(&table, true)?.map_or(1, |last| last + 1);

            // Format: [timestamp: 8 bytes BE][payload bytes]
            let mut value = Vec::with_capacity(8 + data.len());
            value.extend_from_slice(&unix_nanos().to_be_bytes());
            value.extend_from_slice(data);

            let key = encode_msg_key(self.channel_id, sequence);
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?;

            sequence
        };

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(sequence)
    }

    fn lookup(&self, sequence: u64) -> Result<Option<Message>, StorageError> {
        self.check_open()?;
        self.load(Some(sequence), false)
    }

    fn first_msg(&self) -> Result<Option<Message>, StorageError> {
        self.check_open()?;
        self.load(None, false)
    }

    fn last_msg(&self) -> Result<Option<Message>, StorageError> {
        self.check_open()?;
        self.load(None, true)
    }

    fn first_sequence(&self) -> Result<u64, StorageError> {
        self.check_open()?;
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(MESSAGES).map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(self.edge_sequence(&table, false)?.unwrap_or(0))
    }

    fn last_sequence(&self) -> Result<u64, StorageError> {
        self.check_open()?;
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(MESSAGES).map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(self.edge_sequence(&table, true)?.unwrap_or(0))
    }

    fn msg_count(&self) -> Result<usize, StorageError> {
        self.check_open()?;
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(MESSAGES).map_err(|e| StorageError::Io(e.to_string()))?;

        let start_key = encode_msg_key(self.channel_id, 0);
        let end_key = encode_msg_key(self.channel_id, u64::MAX);

        let mut count = 0;
        for result in table
            .range(start_key.as_slice()..=end_key.as_slice())
            .map_err(|e| StorageError::Io(e.to_string()))?
        {
            result.map_err(|e| StorageError::Io(e.to_string()))?;
            count += 1;
        }

        Ok(count)
    }
}

/// Encode (channel_id, sequence) as 16-byte big-endian key.
///
/// Layout: [channel_id: 8 bytes BE][sequence: 8 bytes BE]
/// This ensures lexicographic ordering matches numeric ordering.
fn encode_msg_key(channel_id: u64, sequence: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&channel_id.to_be_bytes());
    key[8..].copy_from_slice(&sequence.to_be_bytes());
    key
}

/// Decode message key back to (channel_id, sequence).
fn decode_msg_key(key: &[u8]) -> Result<(u64, u64), StorageError> {
    let Some((channel_id, sequence)) = key.split_first_chunk::<8>() else {
        return Err(StorageError::Serialization("message key too short".to_string()));
    };
    let sequence: [u8; 8] = sequence
        .try_into()
        .map_err(|_| StorageError::Serialization("message key has wrong length".to_string()))?;

    Ok((u64::from_be_bytes(*channel_id), u64::from_be_bytes(sequence)))
}

/// Decode a stored value into a [`Message`].
fn decode_message(subject: &str, sequence: u64, value: &[u8]) -> Result<Message, StorageError> {
    let Some((timestamp, data)) = value.split_first_chunk::<8>() else {
        return Err(StorageError::Serialization("message value too short".to_string()));
    };

    Ok(Message {
        sequence,
        subject: subject.to_string(),
        data: Bytes::copy_from_slice(data),
        timestamp: i64::from_be_bytes(*timestamp),
    })
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_msg_key_encoding() {
        let channel_id: u64 = 0x1234_5678_9ABC_DEF0;
        let sequence: u64 = 42;

        let key = encode_msg_key(channel_id, sequence);
        assert_eq!(key.len(), 16);

        let (decoded_channel, decoded_sequence) = decode_msg_key(&key).unwrap();
        assert_eq!(decoded_channel, channel_id);
        assert_eq!(decoded_sequence, sequence);
    }

    #[test]
    fn test_msg_key_ordering() {
        assert!(encode_msg_key(1, 255) < encode_msg_key(1, 256));
        assert!(encode_msg_key(1, u64::MAX) < encode_msg_key(2, 0));
    }

    #[test]
    fn test_decode_short_value() {
        let result = decode_message("foo", 1, &[0u8; 4]);
        assert!(matches!(result, Err(StorageError::Serialization(_))));
    }

    #[test]
    fn test_store_sequential() {
        let dir = tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("test.redb")).unwrap();
        let channel = store.create_channel("foo").unwrap();

        for i in 0..3u64 {
            let seq = channel.msgs.store(&[i as u8; 16]).unwrap();
            assert_eq!(seq, i + 1);
        }

        assert_eq!(channel.msgs.first_sequence().unwrap(), 1);
        assert_eq!(channel.msgs.last_sequence().unwrap(), 3);
        assert_eq!(channel.msgs.msg_count().unwrap(), 3);
    }

    #[test]
    fn test_lookup_roundtrip() {
        let dir = tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("test.redb")).unwrap();
        let channel = store.create_channel("foo").unwrap();

        channel.msgs.store(b"hello world").unwrap();

        let msg = channel.msgs.lookup(1).unwrap().unwrap();
        assert_eq!(msg.sequence, 1);
        assert_eq!(msg.subject, "foo");
        assert_eq!(msg.data.as_ref(), b"hello world");
        assert!(msg.timestamp > 0);

        assert!(channel.msgs.lookup(2).unwrap().is_none());
    }

    #[test]
    fn test_first_and_last() {
        let dir = tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("test.redb")).unwrap();
        let channel = store.create_channel("foo").unwrap();

        assert!(channel.msgs.first_msg().unwrap().is_none());
        assert!(channel.msgs.last_msg().unwrap().is_none());

        for i in 0..10 {
            channel.msgs.store(format!("msg{i}").as_bytes()).unwrap();
        }

        assert_eq!(channel.msgs.first_msg().unwrap().unwrap().data.as_ref(), b"msg0");
        assert_eq!(channel.msgs.last_msg().unwrap().unwrap().data.as_ref(), b"msg9");
    }

    #[test]
    fn test_channels_are_isolated() {
        let dir = tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("test.redb")).unwrap();
        let foo = store.create_channel("foo").unwrap();
        let bar = store.create_channel("bar").unwrap();

        foo.msgs.store(b"a").unwrap();
        foo.msgs.store(b"b").unwrap();
        bar.msgs.store(b"c").unwrap();

        assert_eq!(foo.msgs.msg_count().unwrap(), 2);
        assert_eq!(bar.msgs.msg_count().unwrap(), 1);
        assert_eq!(bar.msgs.lookup(1).unwrap().unwrap().data.as_ref(), b"c");
    }

    #[test]
    fn test_create_channel_conflict() {
        let dir = tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("test.redb")).unwrap();

        store.create_channel("foo").unwrap();
        assert_eq!(
            store.create_channel("foo").unwrap_err(),
            StorageError::ChannelExists("foo".to_string())
        );
    }

    #[test]
    fn test_delete_channel_removes_messages() {
        let dir = tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("test.redb")).unwrap();

        let foo = store.create_channel("foo").unwrap();
        foo.msgs.store(b"a").unwrap();
        store.delete_channel("foo").unwrap();

        assert!(store.lookup_channel("foo").unwrap().is_none());

        // Recreated channel gets a fresh id and an empty log
        let foo = store.create_channel("foo").unwrap();
        assert_eq!(foo.msgs.msg_count().unwrap(), 0);
        assert_eq!(foo.msgs.store(b"b").unwrap(), 1);
    }

    #[test]
    fn test_deleted_channel_id_not_reused() {
        let dir = tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("test.redb")).unwrap();

        let foo = store.create_channel("foo").unwrap();
        store.delete_channel("foo").unwrap();
        let bar = store.create_channel("bar").unwrap();

        // Handle to the deleted channel cannot write into bar's log
        assert_eq!(
            foo.msgs.store(b"written to deleted foo").unwrap_err(),
            StorageError::ChannelNotFound("foo".to_string())
        );
        assert_eq!(bar.msgs.msg_count().unwrap(), 0);
        assert!(bar.msgs.lookup(1).unwrap().is_none());

        let ids: Vec<u64> = store.load_channels().unwrap().iter().map(|(_, m)| m.id).collect();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn test_stale_handle_after_recreate_is_rejected() {
        let dir = tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("test.redb")).unwrap();

        let old = store.create_channel("foo").unwrap();
        old.msgs.store(b"a").unwrap();
        store.delete_channel("foo").unwrap();
        let new = store.create_channel("foo").unwrap();

        assert_eq!(old.msgs.store(b"b").unwrap_err(), StorageError::ChannelNotFound("foo".to_string()));
        assert!(old.msgs.lookup(1).unwrap().is_none());
        assert_eq!(new.msgs.msg_count().unwrap(), 0);
    }

    #[test]
    fn test_channel_id_counter_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.redb");

        {
            let store = RedbStore::open(&path).unwrap();
            store.create_channel("a").unwrap();
            store.create_channel("b").unwrap();
            store.delete_channel("b").unwrap();
        }

        let store = RedbStore::open(&path).unwrap();
        store.create_channel("c").unwrap();

        let mut ids: Vec<(String, u64)> =
            store.load_channels().unwrap().into_iter().map(|(name, m)| (name, m.id)).collect();
        ids.sort();
        assert_eq!(ids, vec![("a".to_string(), 1), ("c".to_string(), 3)]);
    }

    #[test]
    fn test_recover_empty_store() {
        let dir = tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("test.redb")).unwrap();

        assert!(store.recover().unwrap().is_none());
    }

    #[test]
    fn test_recover_lists_channels() {
        let dir = tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("test.redb")).unwrap();

        for name in ["a", "b", "c"] {
            store.create_channel(name).unwrap().msgs.store(name.as_bytes()).unwrap();
        }

        let state = store.recover().unwrap().unwrap();
        assert_eq!(state.channels.keys().cloned().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(state.channels["b"].msgs.lookup(1).unwrap().unwrap().data.as_ref(), b"b");
    }

    #[test]
    fn test_closed_store_rejects_operations() {
        let dir = tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("test.redb")).unwrap();
        let channel = store.create_channel("foo").unwrap();

        store.close().unwrap();

        assert_eq!(channel.msgs.store(b"x").unwrap_err(), StorageError::Closed);
        assert_eq!(store.recover().unwrap_err(), StorageError::Closed);
    }
}
