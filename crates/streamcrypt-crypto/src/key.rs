//! Secret resolution and key derivation
//!
//! The operator supplies a single secret. The symmetric key is its SHA-256
//! digest, so the same secret always opens records written under it.

use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Environment variable consulted when no secret is passed explicitly.
pub const ENCRYPTION_KEY_ENV: &str = "STREAMCRYPT_ENCRYPTION_KEY";

/// Size of the derived symmetric key (SHA-256 digest)
pub const KEY_SIZE: usize = 32;

/// Resolve the operator secret, falling back to [`ENCRYPTION_KEY_ENV`].
///
/// # Errors
///
/// - `MissingKey`: `explicit` is empty and the variable is unset or empty
pub fn resolve_secret(explicit: &str) -> Result<Zeroizing<String>, CryptoError> {
    resolve_secret_with(explicit, |name| std::env::var(name).ok())
}

/// Resolve the operator secret using `lookup` in place of the process
/// environment.
///
/// An explicit non-empty secret always wins over the environment.
pub fn resolve_secret_with<F>(explicit: &str, lookup: F) -> Result<Zeroizing<String>, CryptoError>
where
    F: FnOnce(&str) -> Option<String>,
{
    if !explicit.is_empty() {
        return Ok(Zeroizing::new(explicit.to_string()));
    }

    match lookup(ENCRYPTION_KEY_ENV) {
        Some(secret) if !secret.is_empty() => Ok(Zeroizing::new(secret)),
        _ => Err(CryptoError::MissingKey),
    }
}

/// Derive the 32-byte symmetric key from a secret.
///
/// Deterministic: changing this breaks every record stored under the old
/// derivation.
pub fn derive_key(secret: &str) -> Zeroizing<[u8; KEY_SIZE]> {
    let digest = Sha256::digest(secret.as_bytes());

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    key.copy_from_slice(&digest);
    key
}
