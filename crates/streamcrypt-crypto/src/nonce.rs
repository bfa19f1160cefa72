//! Shared nonce with bounded reuse and drain-then-rotate replacement
//!
//! Every seal uses the single active nonce until it has been used
//! `max_calls_per_nonce` times. The caller whose count lands exactly on the
//! threshold becomes the rotator: it waits for all in-flight seals of the
//! current generation to finish, installs a fresh random nonce, and resets the
//! count. Callers that overshoot the threshold park on the rotation lock and
//! retry against the new generation.
//!
//! # Invariants
//!
//! - A generation's nonce is never read while it is being replaced (`RwLock`)
//! - A new nonce is installed only after `in_flight` drains to zero
//! - Exactly one caller per threshold crossing performs the rotation
//! - `calls` is reset to zero exactly when a new nonce is installed

#![allow(clippy::disallowed_types, reason = "Short critical sections, no await points")]

use std::{
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use crate::{cipher::NONCE_SIZE, error::CryptoError};

/// Default threshold: a `ChaCha20-Poly1305` nonce may be used for at most
/// 2^32 seals. The margin covers overshoot calls still sealing while rotation
/// is pending. Also the largest accepted `max_calls_per_nonce`.
pub const DEFAULT_MAX_CALLS_PER_NONCE: u64 = (1 << 32) - 10_000;

/// Source of cryptographically secure random bytes for nonces.
pub trait EntropySource: Send + Sync {
    /// Fill `buffer` with random bytes.
    fn fill(&self, buffer: &mut [u8]) -> Result<(), CryptoError>;
}

/// OS cryptographic RNG (getrandom).
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, buffer: &mut [u8]) -> Result<(), CryptoError> {
        getrandom::fill(buffer)
            .map_err(|e| CryptoError::NonceGeneration { reason: e.to_string() })
    }
}

/// Nonce usage and rotation limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceConfig {
    /// Seal operations allowed per nonce before it is rotated
    pub max_calls_per_nonce: u64,
    /// Sleep between polls while the rotator waits for in-flight seals
    pub drain_poll_interval: Duration,
    /// Upper bound on the drain wait and on overshoot retries
    pub max_rotation_wait: Duration,
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            max_calls_per_nonce: DEFAULT_MAX_CALLS_PER_NONCE,
            drain_poll_interval: Duration::from_millis(15),
            max_rotation_wait: Duration::from_secs(30),
        }
    }
}

/// One installed nonce value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceGeneration {
    /// Monotonic id, bumped on every install
    pub id: u64,
    /// Nonce bytes shared by all seals of this generation
    pub nonce: [u8; NONCE_SIZE],
}

/// Owner of the active nonce and its call-count/rotation protocol.
pub struct NonceManager {
    active: RwLock<NonceGeneration>,
    /// Seals performed against the active generation
    calls: AtomicU64,
    /// Seals currently executing
    in_flight: AtomicU64,
    /// Serializes rotation; overshoot callers park here
    rotation: Mutex<()>,
    config: NonceConfig,
    entropy: Arc<dyn EntropySource>,
}

/// Decrements `in_flight` when a seal attempt leaves its critical region.
struct InFlight<'a>(&'a AtomicU64);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicU64) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl NonceManager {
    /// Create a manager and install the first nonce.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig`: `max_calls_per_nonce` is zero or above
    ///   [`DEFAULT_MAX_CALLS_PER_NONCE`]
    /// - `NonceGeneration`: the entropy source failed
    pub fn new(config: NonceConfig, entropy: Arc<dyn EntropySource>) -> Result<Self, CryptoError> {
        if !(1..=DEFAULT_MAX_CALLS_PER_NONCE).contains(&config.max_calls_per_nonce) {
            return Err(CryptoError::InvalidConfig {
                max_calls: config.max_calls_per_nonce,
                limit: DEFAULT_MAX_CALLS_PER_NONCE,
            });
        }

        let mut nonce = [0u8; NONCE_SIZE];
        entropy.fill(&mut nonce)?;

        Ok(Self {
            active: RwLock::new(NonceGeneration { id: 0, nonce }),
            calls: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            rotation: Mutex::new(()),
            config,
            entropy,
        })
    }

    /// Configured limits.
    pub fn config(&self) -> &NonceConfig {
        &self.config
    }

    /// Snapshot of the active generation.
    pub fn current(&self) -> NonceGeneration {
        *self.active.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seals counted against the active generation.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Run `seal` with the active nonce, rotating first if this call crosses
    /// the usage threshold.
    ///
    /// `seal` runs while the call is counted as in flight, so the nonce it
    /// receives cannot be replaced until it returns.
    ///
    /// # Errors
    ///
    /// - `NonceGeneration`: this call was the rotator and the entropy source
    ///   failed
    /// - `RotationStalled`: drain or rotation exceeded `max_rotation_wait`
    pub fn with_nonce<T, F>(&self, seal: F) -> Result<T, CryptoError>
    where
        F: FnOnce(&[u8; NONCE_SIZE]) -> T,
    {
        let started = Instant::now();
        let max = self.config.max_calls_per_nonce;

        loop {
            let guard = InFlight::enter(&self.in_flight);
            let count = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

            if count < max {
                let generation = self.current();
                let out = seal(&generation.nonce);
                drop(guard);
                return Ok(out);
            }

            // Rotator and overshoot callers must not hold a claim on the old
            // generation, or the drain below never completes.
            drop(guard);

            if count == max {
                let (generation, guard) = self.rotate(started)?;
                let out = seal(&generation.nonce);
                drop(guard);
                return Ok(out);
            }

            // Overshoot: wait for the rotator to release the lock, then retry.
            drop(self.rotation.lock().unwrap_or_else(PoisonError::into_inner));

            if started.elapsed() > self.config.max_rotation_wait {
                tracing::warn!(count, "nonce rotation did not complete, giving up");
                return Err(CryptoError::RotationStalled { waited_ms: elapsed_ms(started) });
            }

            std::thread::yield_now();
        }
    }

    /// Drain in-flight seals, install a fresh nonce and reset the count.
    ///
    /// The rotator's own claim on the new generation is taken before the lock
    /// is released, so a later rotation drains it too. On failure the count is
    /// rewound to `max - 1` so that the next caller becomes the rotator.
    fn rotate(&self, started: Instant) -> Result<(NonceGeneration, InFlight<'_>), CryptoError> {
        let _lock = self.rotation.lock().unwrap_or_else(PoisonError::into_inner);

        while self.in_flight.load(Ordering::SeqCst) > 0 {
            if started.elapsed() > self.config.max_rotation_wait {
                self.rewind();
                tracing::warn!(
                    in_flight = self.in_flight.load(Ordering::SeqCst),
                    "in-flight seals did not drain before rotation"
                );
                return Err(CryptoError::RotationStalled { waited_ms: elapsed_ms(started) });
            }
            std::thread::sleep(self.config.drain_poll_interval);
        }

        let mut nonce = [0u8; NONCE_SIZE];
        if let Err(e) = self.entropy.fill(&mut nonce) {
            self.rewind();
            tracing::warn!(error = %e, "failed to generate replacement nonce");
            return Err(e);
        }

        let generation = {
            let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
            active.id += 1;
            active.nonce = nonce;
            *active
        };
        self.calls.store(0, Ordering::SeqCst);
        let guard = InFlight::enter(&self.in_flight);

        tracing::debug!(generation = generation.id, "nonce rotated");

        Ok((generation, guard))
    }

    fn rewind(&self) {
        self.calls.store(self.config.max_calls_per_nonce - 1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for NonceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceManager")
            .field("generation", &self.current().id)
            .field("calls", &self.calls())
            .field("in_flight", &self.in_flight.load(Ordering::SeqCst))
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
