//! Chaotic storage wrapper for fault injection testing
//!
//! Wraps any [`Store`] and randomly fails channel and message operations so
//! that callers (including the encryption layer) can be exercised against a
//! misbehaving engine. Channels handed out by the wrapper carry the same
//! failure injection on their message logs.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use super::{Channel, Message, MsgStore, RecoveredState, Store, StorageError};

/// Chaotic store wrapper that randomly injects failures
///
/// Delegates to an underlying store but fails operations with probability
/// `failure_rate`. The RNG is seeded, so a given seed always produces the same
/// failure pattern for the same sequence of calls.
#[derive(Clone)]
pub struct ChaoticStore<S: Store> {
    inner: S,
    chaos: Arc<Chaos>,
}

/// Failure injection state shared by the store and its channels.
struct Chaos {
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    rng: Mutex<ChaoticRng>,
    operation_count: AtomicUsize,
}

impl Chaos {
    /// Count the operation and decide whether it fails.
    fn inject(&self) -> Result<(), StorageError> {
        self.operation_count.fetch_add(1, Ordering::Relaxed);

        #[allow(clippy::expect_used)]
        let fail = self.rng.lock().expect("ChaoticRng mutex poisoned").should_fail(self.failure_rate);

        if fail { Err(StorageError::Io("chaotic failure injection".to_string())) } else { Ok(()) }
    }
}

/// Linear congruential generator; reproducible for a given seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // Numerical Recipes constants
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }

    fn should_fail(&mut self, failure_rate: f64) -> bool {
        self.next() < failure_rate
    }
}

impl<S: Store> ChaoticStore<S> {
    /// Wrap `inner` with the default seed.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Wrap `inner` with an explicit seed for reproducible chaos.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        let chaos = Chaos {
            failure_rate,
            rng: Mutex::new(ChaoticRng { state: seed }),
            operation_count: AtomicUsize::new(0),
        };

        Self { inner, chaos: Arc::new(chaos) }
    }

    /// Underlying store (for checking state after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Operations attempted through this store and its channels.
    pub fn operation_count(&self) -> usize {
        self.chaos.operation_count.load(Ordering::Relaxed)
    }

    fn wrap(&self, channel: Channel) -> Channel {
        let msgs = ChaoticMsgStore { inner: channel.msgs, chaos: Arc::clone(&self.chaos) };
        Channel { name: channel.name, msgs: Arc::new(msgs) }
    }
}

impl<S: Store> Store for ChaoticStore<S> {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn create_channel(&self, name: &str) -> Result<Channel, StorageError> {
        self.chaos.inject()?;
        self.inner.create_channel(name).map(|channel| self.wrap(channel))
    }

    fn lookup_channel(&self, name: &str) -> Result<Option<Channel>, StorageError> {
        self.chaos.inject()?;
        Ok(self.inner.lookup_channel(name)?.map(|channel| self.wrap(channel)))
    }

    fn delete_channel(&self, name: &str) -> Result<(), StorageError> {
        self.chaos.inject()?;
        self.inner.delete_channel(name)
    }

    fn channel_names(&self) -> Result<Vec<String>, StorageError> {
        self.chaos.inject()?;
        self.inner.channel_names()
    }

    fn recover(&self) -> Result<Option<RecoveredState>, StorageError> {
        self.chaos.inject()?;
        Ok(self.inner.recover()?.map(|state| RecoveredState {
            channels: state
                .channels
                .into_iter()
                .map(|(name, channel)| (name, self.wrap(channel)))
                .collect(),
        }))
    }

    // Closing is never failed, so tests can always shut the engine down.
    fn close(&self) -> Result<(), StorageError> {
        self.inner.close()
    }
}

struct ChaoticMsgStore {
    inner: Arc<dyn MsgStore>,
    chaos: Arc<Chaos>,
}

impl MsgStore for ChaoticMsgStore {
    fn store(&self, data: &[u8]) -> Result<u64, StorageError> {
        self.chaos.inject()?;
        self.inner.store(data)
    }

    fn lookup(&self, sequence: u64) -> Result<Option<Message>, StorageError> {
        self.chaos.inject()?;
        self.inner.lookup(sequence)
    }

    fn first_msg(&self) -> Result<Option<Message>, StorageError> {
        self.chaos.inject()?;
        self.inner.first_msg()
    }

    fn last_msg(&self) -> Result<Option<Message>, StorageError> {
        self.chaos.inject()?;
        self.inner.last_msg()
    }

    fn first_sequence(&self) -> Result<u64, StorageError> {
        self.chaos.inject()?;
        self.inner.first_sequence()
    }

    fn last_sequence(&self) -> Result<u64, StorageError> {
        self.chaos.inject()?;
        self.inner.last_sequence()
    }

    fn msg_count(&self) -> Result<usize, StorageError> {
        self.chaos.inject()?;
        self.inner.msg_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn test_chaotic_with_zero_failure_rate() {
        let chaotic = ChaoticStore::new(MemoryStore::new(), 0.0);
        let channel = chaotic.create_channel("foo").expect("should not fail with 0% rate");

        for _ in 0..100 {
            channel.msgs.store(b"x").expect("should not fail with 0% rate");
        }

        assert_eq!(channel.msgs.last_sequence().expect("query failed"), 100);
    }

    #[test]
    fn test_chaotic_with_100_failure_rate() {
        let memory = MemoryStore::new();
        memory.create_channel("foo").unwrap();
        let chaotic = ChaoticStore::new(memory, 1.0);

        assert!(chaotic.create_channel("bar").is_err());
        assert!(chaotic.lookup_channel("foo").is_err());
        assert!(chaotic.channel_names().is_err());
        assert!(chaotic.recover().is_err());
    }

    #[test]
    fn test_chaotic_channel_inherits_failures() {
        let memory = MemoryStore::new();
        let channel = memory.create_channel("foo").unwrap();
        channel.msgs.store(b"x").unwrap();

        let chaotic = ChaoticStore::new(memory, 0.0);
        let wrapped = chaotic.wrap(channel);

        // Zero rate wrapper still counts message operations
        let before = chaotic.operation_count();
        wrapped.msgs.lookup(1).unwrap();
        wrapped.msgs.msg_count().unwrap();
        assert_eq!(chaotic.operation_count(), before + 2);
    }

    #[test]
    fn test_chaotic_deterministic_with_seed() {
        let chaotic1 = ChaoticStore::with_seed(MemoryStore::new(), 0.5, 42);
        let chaotic2 = ChaoticStore::with_seed(MemoryStore::new(), 0.5, 42);

        for i in 0..100 {
            let name = format!("ch{i}");
            let result1 = chaotic1.create_channel(&name);
            let result2 = chaotic2.create_channel(&name);

            assert_eq!(result1.is_ok(), result2.is_ok(), "determinism violated at iteration {i}");
        }
    }

    #[test]
    fn test_chaotic_accesses_underlying_store() {
        let chaotic = ChaoticStore::new(MemoryStore::new(), 0.0);

        let channel = chaotic.create_channel("foo").expect("create failed");
        channel.msgs.store(b"hello").expect("store failed");

        let inner = chaotic.inner().lookup_channel("foo").unwrap().unwrap();
        assert_eq!(inner.msgs.msg_count().unwrap(), 1);
        assert_eq!(chaotic.name(), "MEMORY");
    }

    #[test]
    fn test_close_never_fails() {
        let chaotic = ChaoticStore::new(MemoryStore::new(), 1.0);
        assert!(chaotic.close().is_ok());
    }

    #[test]
    #[should_panic(expected = "failure_rate must be between 0.0 and 1.0")]
    fn test_chaotic_rejects_invalid_failure_rate() {
        let _chaotic = ChaoticStore::new(MemoryStore::new(), 1.5);
    }
}
