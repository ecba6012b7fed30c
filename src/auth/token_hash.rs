//! Salted hashing for refresh token verifiers.
//!
//! The stored form is `sha256(verifier || salt)` with a 32-byte random salt,
//! both hex encoded to a fixed 64 characters. The plaintext verifier never
//! reaches a store.

use anyhow::{Context, Result};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Length of the hex-encoded digest and salt.
pub const ENCODED_LEN: usize = 64;

const SALT_BYTES: usize = 32;

/// Hash a token with a fresh salt; returns `(hash, salt)`.
///
/// # Errors
///
/// Fails when the system entropy source does.
pub fn hash_token(token: &str) -> Result<(String, String)> {
    let mut salt = [0u8; SALT_BYTES];
    OsRng
        .try_fill_bytes(&mut salt)
        .context("failed to generate salt")?;

    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.update(salt);

    Ok((hex::encode(hasher.finalize()), hex::encode(salt)))
}

/// Unsalted digest of a whole token, used as a blocklist key so raw tokens
/// never reach a store.
#[must_use]
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Verify a plain token against a stored hash and salt.
///
/// Malformed inputs and mismatches are `false`; this never errors so lookup
/// failure paths stay uniform.
#[must_use]
pub fn verify_token(plain: &str, hashed: &str, salt: &str) -> bool {
    let Ok(salt_bytes) = hex::decode(salt) else {
        return false;
    };

    let mut hasher = Sha256::new();
    hasher.update(plain.as_bytes());
    hasher.update(&salt_bytes);
    let computed = hex::encode(hasher.finalize());

    computed.as_bytes().ct_eq(hashed.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_outputs_are_fixed_length() {
        let (hash, salt) = hash_token("verifier-value").expect("hash");
        assert_eq!(hash.len(), ENCODED_LEN);
        assert_eq!(salt.len(), ENCODED_LEN);
    }

    #[test]
    fn verify_round_trip() {
        let (hash, salt) = hash_token("verifier-value").expect("hash");
        assert!(verify_token("verifier-value", &hash, &salt));
        assert!(!verify_token("other-value", &hash, &salt));
    }

    #[test]
    fn same_token_gets_distinct_salts() {
        let (first_hash, first_salt) = hash_token("verifier-value").expect("hash");
        let (second_hash, second_salt) = hash_token("verifier-value").expect("hash");
        assert_ne!(first_salt, second_salt);
        assert_ne!(first_hash, second_hash);
    }

    #[test]
    fn verify_tolerates_garbage_inputs() {
        let (hash, _salt) = hash_token("verifier-value").expect("hash");
        assert!(!verify_token("verifier-value", &hash, "not-hex!"));
        assert!(!verify_token("verifier-value", "", ""));
    }
}
