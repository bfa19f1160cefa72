//! Transparent payload encryption over any [`Store`].
//!
//! [`CryptoStore`] owns an engine and hands out channels whose message logs
//! seal payloads on the way in and open them on the way out. Everything other
//! than the payload (sequence, subject, timestamp) is stored as the engine
//! stores it.

use std::sync::Arc;

use bytes::Bytes;
use streamcrypt_crypto::{Encryptor, NonceConfig};

use crate::storage::{Channel, Message, MsgStore, RecoveredState, Store, StorageError};

/// Store wrapper that encrypts every non-empty payload.
///
/// All channels obtained through this store (created, looked up or recovered)
/// share one [`Encryptor`], and therefore one key and one nonce manager.
pub struct CryptoStore<S: Store> {
    inner: S,
    encryptor: Arc<Encryptor>,
}

impl<S: Store> CryptoStore<S> {
    /// Wrap `store`, deriving the key from `secret`.
    ///
    /// An empty `secret` falls back to `STREAMCRYPT_ENCRYPTION_KEY`.
    ///
    /// # Errors
    ///
    /// - `Crypto(MissingKey)` if neither the secret nor the env var is set
    /// - `Crypto(NonceGeneration)` if the first nonce cannot be drawn
    pub fn new(store: S, secret: &str) -> Result<Self, StorageError> {
        Self::with_config(store, secret, NonceConfig::default())
    }

    /// Wrap `store` with a custom nonce rotation config.
    ///
    /// # Errors
    ///
    /// Same as [`CryptoStore::new`], plus `Crypto(InvalidConfig)` if
    /// `max_calls_per_nonce` is zero or above the safe-use bound.
    pub fn with_config(store: S, secret: &str, config: NonceConfig) -> Result<Self, StorageError> {
        let encryptor = Encryptor::new(secret, config)?;
        Ok(Self::with_encryptor(store, Arc::new(encryptor)))
    }

    /// Wrap `store` with an already constructed encryptor.
    pub fn with_encryptor(store: S, encryptor: Arc<Encryptor>) -> Self {
        Self { inner: store, encryptor }
    }

    /// Shared encryptor used by every channel of this store.
    pub fn encryptor(&self) -> &Arc<Encryptor> {
        &self.encryptor
    }

    /// Underlying engine. Reads through it return raw records.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn wrap(&self, channel: Channel) -> Channel {
        tracing::debug!(channel = %channel.name, "wrapping channel with encryption");

        let msgs = CryptoMsgStore {
            inner: channel.msgs,
            encryptor: Arc::clone(&self.encryptor),
            subject: channel.name.clone(),
        };
        Channel { name: channel.name, msgs: Arc::new(msgs) }
    }
}

impl<S: Store> std::fmt::Debug for CryptoStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoStore")
            .field("engine", &self.inner.name())
            .field("encryptor", &self.encryptor)
            .finish()
    }
}

impl<S: Store> Store for CryptoStore<S> {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn create_channel(&self, name: &str) -> Result<Channel, StorageError> {
        let channel = self.inner.create_channel(name)?;
        Ok(self.wrap(channel))
    }

    fn lookup_channel(&self, name: &str) -> Result<Option<Channel>, StorageError> {
        Ok(self.inner.lookup_channel(name)?.map(|channel| self.wrap(channel)))
    }

    fn delete_channel(&self, name: &str) -> Result<(), StorageError> {
        self.inner.delete_channel(name)
    }

    fn channel_names(&self) -> Result<Vec<String>, StorageError> {
        self.inner.channel_names()
    }

    fn recover(&self) -> Result<Option<RecoveredState>, StorageError> {
        let Some(state) = self.inner.recover()? else {
            return Ok(None);
        };

        let channels = state
            .channels
            .into_iter()
            .map(|(name, channel)| (name, self.wrap(channel)))
            .collect();

        Ok(Some(RecoveredState { channels }))
    }

    fn close(&self) -> Result<(), StorageError> {
        self.inner.close()
    }
}

/// Message log that seals payloads before delegating to the engine's log.
struct CryptoMsgStore {
    inner: Arc<dyn MsgStore>,
    encryptor: Arc<Encryptor>,
    subject: String,
}

impl CryptoMsgStore {
    /// Replace a loaded record with its plaintext.
    ///
    /// Absent messages and empty payloads are returned as loaded.
    fn open(&self, msg: Option<Message>) -> Result<Option<Message>, StorageError> {
        let Some(mut msg) = msg else {
            return Ok(None);
        };

        if msg.data.is_empty() {
            return Ok(Some(msg));
        }

        match self.encryptor.decrypt(&msg.data) {
            Ok(plaintext) => {
                msg.data = Bytes::from(plaintext);
                Ok(Some(msg))
            },
            Err(e) => {
                tracing::warn!(
                    channel = %self.subject,
                    sequence = msg.sequence,
                    error = %e,
                    "failed to decrypt stored payload"
                );
                Err(e.into())
            },
        }
    }
}

impl MsgStore for CryptoMsgStore {
    fn store(&self, data: &[u8]) -> Result<u64, StorageError> {
        // Empty payloads are stored as-is and consume no nonce budget.
        if data.is_empty() {
            return self.inner.store(data);
        }

        let record = self.encryptor.encrypt(data)?;
        self.inner.store(&record)
    }

    fn lookup(&self, sequence: u64) -> Result<Option<Message>, StorageError> {
        self.open(self.inner.lookup(sequence)?)
    }

    fn first_msg(&self) -> Result<Option<Message>, StorageError> {
        self.open(self.inner.first_msg()?)
    }

    fn last_msg(&self) -> Result<Option<Message>, StorageError> {
        self.open(self.inner.last_msg()?)
    }

    fn first_sequence(&self) -> Result<u64, StorageError> {
        self.inner.first_sequence()
    }

    fn last_sequence(&self) -> Result<u64, StorageError> {
        self.inner.last_sequence()
    }

    fn msg_count(&self) -> Result<usize, StorageError> {
        self.inner.msg_count()
    }
}
