//! Fuzz target for the encrypted store pipeline under engine failures
//!
//! Drives a CryptoStore over a ChaoticStore with fuzzer-chosen operations and
//! failure rates, while tracking what was acknowledged.
//!
//! # Invariants
//!
//! - Engine errors surface as `Err`, never as panics
//! - Every acknowledged payload reads back byte-for-byte through a clean
//!   reader sharing the same key
//! - Empty payloads read back empty
//! - The active nonce is never used more than `max_calls_per_nonce` times

#![no_main]

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use streamcrypt_crypto::Encryptor;
use streamcrypt_store::{
    ChaoticStore, CryptoStore, MemoryStore, NonceConfig, Store, StorageError,
};

#[derive(Debug, Arbitrary)]
struct Scenario {
    chaos_seed: u64,
    /// Failure rate 0-9 maps to 0%-90%
    failure_rate_tenth: u8,
    /// Rotation threshold 2-17
    max_calls: u8,
    operations: Vec<Operation>,
}

#[derive(Debug, Arbitrary)]
enum Operation {
    Publish { channel: u8, payload: Vec<u8> },
    Lookup { channel: u8, sequence: u8 },
    First { channel: u8 },
    Last { channel: u8 },
    Delete { channel: u8 },
}

fn channel_name(channel: u8) -> String {
    format!("ch{}", channel % 4)
}

/// Reads may only fail with the I/O errors the chaos layer injects.
fn assert_injected<T>(result: Result<T, StorageError>) {
    match result {
        Ok(_) | Err(StorageError::Io(_)) => {},
        Err(e) => panic!("read failed with a non-injected error: {e}"),
    }
}

fuzz_target!(|scenario: Scenario| {
    let failure_rate = (scenario.failure_rate_tenth % 10) as f64 / 10.0;
    let config = NonceConfig {
        max_calls_per_nonce: u64::from(scenario.max_calls % 16) + 2,
        drain_poll_interval: Duration::from_millis(1),
        ..NonceConfig::default()
    };

    let Ok(encryptor) = Encryptor::new("fuzz", config) else {
        return;
    };
    let encryptor = Arc::new(encryptor);

    let memory = MemoryStore::new();
    let chaotic = ChaoticStore::with_seed(memory.clone(), failure_rate, scenario.chaos_seed);
    let store = CryptoStore::with_encryptor(chaotic, Arc::clone(&encryptor));
    let reader = CryptoStore::with_encryptor(memory, Arc::clone(&encryptor));

    // channel -> sequence -> payload, for acknowledged writes only
    let mut acked: BTreeMap<String, BTreeMap<u64, Vec<u8>>> = BTreeMap::new();

    for op in scenario.operations {
        match op {
            Operation::Publish { channel, payload } => {
                let name = channel_name(channel);
                let channel = match store.lookup_channel(&name) {
                    Ok(Some(channel)) => channel,
                    Ok(None) => match store.create_channel(&name) {
                        Ok(channel) => channel,
                        Err(StorageError::Io(_)) => continue,
                        Err(e) => panic!("unexpected create error: {e}"),
                    },
                    Err(_) => continue,
                };
                match channel.msgs.store(&payload) {
                    Ok(sequence) => {
                        acked.entry(name).or_default().insert(sequence, payload);
                    },
                    Err(StorageError::Io(_)) => {},
                    Err(e) => panic!("unexpected store error: {e}"),
                }
            },
            Operation::Lookup { channel, sequence } => {
                if let Ok(Some(channel)) = store.lookup_channel(&channel_name(channel)) {
                    assert_injected(channel.msgs.lookup(u64::from(sequence)));
                }
            },
            Operation::First { channel } => {
                if let Ok(Some(channel)) = store.lookup_channel(&channel_name(channel)) {
                    assert_injected(channel.msgs.first_msg());
                }
            },
            Operation::Last { channel } => {
                if let Ok(Some(channel)) = store.lookup_channel(&channel_name(channel)) {
                    assert_injected(channel.msgs.last_msg());
                }
            },
            Operation::Delete { channel } => {
                let name = channel_name(channel);
                if store.delete_channel(&name).is_ok() {
                    acked.remove(&name);
                }
            },
        }

        let max = encryptor.nonces().config().max_calls_per_nonce;
        assert!(encryptor.nonces().calls() <= max, "nonce used past its budget");
    }

    for (name, msgs) in acked {
        let channel = reader
            .lookup_channel(&name)
            .expect("clean reader never fails")
            .expect("acknowledged channel exists");

        for (sequence, payload) in msgs {
            let msg = channel
                .msgs
                .lookup(sequence)
                .expect("acknowledged record decrypts")
                .expect("acknowledged record exists");
            assert_eq!(msg.data.as_ref(), payload.as_slice());
        }
    }
});
