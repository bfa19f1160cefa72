//! Fuzz target for RecordCipher::open
//!
//! Feeds arbitrary bytes to the record decoder as if they had been read back
//! from a corrupted or hostile store:
//! - Records shorter than nonce + tag
//! - Valid-length records with random nonce, ciphertext and tag
//! - Real records with fuzzer-chosen bytes flipped
//!
//! The fuzzer should NEVER panic, and no mutated record may ever open.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use streamcrypt_crypto::{CryptoError, NONCE_SIZE, RecordCipher, TAG_SIZE};

#[derive(Debug, Arbitrary)]
struct Input {
    /// Raw bytes opened directly
    raw: Vec<u8>,
    /// Plaintext sealed and then mutated
    plaintext: Vec<u8>,
    nonce: [u8; NONCE_SIZE],
    /// (position, xor mask) pairs applied to the sealed record
    flips: Vec<(u16, u8)>,
}

fuzz_target!(|input: Input| {
    let Ok(cipher) = RecordCipher::from_secret("fuzz") else {
        return;
    };

    match cipher.open(&input.raw) {
        Ok(_) | Err(CryptoError::AuthenticationFailed) => {},
        Err(CryptoError::MalformedRecord { len, min }) => {
            assert_eq!(len, input.raw.len());
            assert_eq!(min, NONCE_SIZE + TAG_SIZE);
            assert!(len < min);
        },
        Err(e) => panic!("unexpected error opening raw bytes: {e}"),
    }

    let mut record = cipher.seal(&input.nonce, &input.plaintext);
    let original = record.clone();

    for (position, mask) in &input.flips {
        let i = *position as usize % record.len();
        record[i] ^= mask;
    }

    if record == original {
        assert_eq!(cipher.open(&record).ok(), Some(input.plaintext));
    } else {
        assert_eq!(cipher.open(&record), Err(CryptoError::AuthenticationFailed));
    }
});
