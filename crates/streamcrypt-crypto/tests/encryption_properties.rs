//! Property-based tests for payload encryption
//!
//! These tests verify the fundamental invariants of the encryption layer:
//!
//! 1. **Round-trip**: decrypt(encrypt(m)) == m for all non-empty payloads
//! 2. **Key isolation**: records sealed under one secret never open under another
//! 3. **Fail closed**: any single-bit flip in a record is rejected
//! 4. **Bounded reuse**: no nonce is used more than `max_calls_per_nonce` times

use std::{collections::HashMap, sync::Arc, time::Duration};

use proptest::prelude::*;
use streamcrypt_crypto::{
    CryptoError, Encryptor, NONCE_SIZE, NonceConfig, OsEntropy, RecordCipher, TAG_SIZE,
};

fn encryptor(secret: &str, max_calls_per_nonce: u64) -> Encryptor {
    let config = NonceConfig {
        max_calls_per_nonce,
        drain_poll_interval: Duration::from_millis(1),
        ..NonceConfig::default()
    };
    Encryptor::with_entropy(secret, config, Arc::new(OsEntropy)).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_encrypt_decrypt_roundtrip(
        plaintext in prop::collection::vec(any::<u8>(), 1..1000),
        secret in "[a-zA-Z0-9]{1,32}",
    ) {
        let enc = encryptor(&secret, 1 << 20);

        let record = enc.encrypt(&plaintext).unwrap();
        prop_assert_eq!(record.len(), NONCE_SIZE + plaintext.len() + TAG_SIZE);

        let decrypted = enc.decrypt(&record).unwrap();
        prop_assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn prop_wrong_secret_never_opens(
        plaintext in prop::collection::vec(any::<u8>(), 1..256),
        good in "[a-z]{1,16}",
        wrong in "[a-z]{1,16}",
    ) {
        prop_assume!(good != wrong);

        let sealer = encryptor(&good, 1 << 20);
        let opener = RecordCipher::from_secret(&wrong).unwrap();

        let record = sealer.encrypt(&plaintext).unwrap();
        prop_assert_eq!(opener.open(&record), Err(CryptoError::AuthenticationFailed));
    }

    #[test]
    fn prop_bit_flip_rejected(
        plaintext in prop::collection::vec(any::<u8>(), 1..256),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let enc = encryptor("ivan", 1 << 20);
        let mut record = enc.encrypt(&plaintext).unwrap();

        let i = position.index(record.len());
        record[i] ^= 1 << bit;

        prop_assert_eq!(enc.decrypt(&record), Err(CryptoError::AuthenticationFailed));
    }

    #[test]
    fn prop_truncated_record_rejected(len in 0usize..(NONCE_SIZE + TAG_SIZE)) {
        let cipher = RecordCipher::from_secret("ivan").unwrap();
        let record = vec![0u8; len];

        prop_assert_eq!(
            cipher.open(&record),
            Err(CryptoError::MalformedRecord { len, min: NONCE_SIZE + TAG_SIZE })
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_nonce_reuse_bounded(
        max in 2u64..20,
        seals in 1usize..200,
    ) {
        let enc = encryptor("ivan", max);

        let mut uses: HashMap<[u8; NONCE_SIZE], u64> = HashMap::new();
        for _ in 0..seals {
            let record = enc.encrypt(b"payload").unwrap();
            let mut nonce = [0u8; NONCE_SIZE];
            nonce.copy_from_slice(&record[..NONCE_SIZE]);
            *uses.entry(nonce).or_default() += 1;
        }

        for (nonce, count) in &uses {
            prop_assert!(*count <= max, "nonce {:?} used {} times, max {}", nonce, count, max);
        }
    }
}
