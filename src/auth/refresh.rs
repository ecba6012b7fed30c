//! Refresh token codec.
//!
//! A refresh token is always the string `selector.verifier`: the selector is
//! the indexed, non-secret lookup key and the verifier is the secret half
//! that is only ever stored as a salted hash.

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{RngCore, rngs::OsRng};

use super::error::AuthError;

const SEPARATOR: char = '.';
const SELECTOR_BYTES: usize = 16;
const VERIFIER_BYTES: usize = 32;

/// Parsed components of a refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenParts {
    pub selector: String,
    pub verifier: String,
}

/// Generate a fresh refresh token.
///
/// Both halves are base64url without padding, so neither can contain the
/// separator.
///
/// # Errors
///
/// Fails when the system entropy source does.
pub fn generate_refresh_token() -> Result<String> {
    let mut selector_bytes = [0u8; SELECTOR_BYTES];
    OsRng
        .try_fill_bytes(&mut selector_bytes)
        .context("failed to generate refresh token selector")?;

    let mut verifier_bytes = [0u8; VERIFIER_BYTES];
    OsRng
        .try_fill_bytes(&mut verifier_bytes)
        .context("failed to generate refresh token verifier")?;

    Ok(build_refresh_token(
        &Base64UrlUnpadded::encode_string(&selector_bytes),
        &Base64UrlUnpadded::encode_string(&verifier_bytes),
    ))
}

/// Combine selector and verifier into the wire form.
#[must_use]
pub fn build_refresh_token(selector: &str, verifier: &str) -> String {
    format!("{selector}{SEPARATOR}{verifier}")
}

/// Split a refresh token into its two parts.
///
/// # Errors
///
/// Anything other than exactly two non-empty parts is
/// [`AuthError::MalformedRefreshToken`].
pub fn parse_refresh_token(refresh_token: &str) -> Result<RefreshTokenParts, AuthError> {
    let parts: Vec<&str> = refresh_token.split(SEPARATOR).collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(AuthError::MalformedRefreshToken);
    }

    Ok(RefreshTokenParts {
        selector: parts[0].to_string(),
        verifier: parts[1].to_string(),
    })
}

/// Bounds check on a selector before it is used for a store lookup.
///
/// # Errors
///
/// Out-of-bounds selectors are [`AuthError::MalformedRefreshToken`].
pub fn validate_selector(selector: &str) -> Result<(), AuthError> {
    if selector.len() < 8 || selector.len() > 64 {
        return Err(AuthError::MalformedRefreshToken);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_bounds() {
        assert!(validate_selector("selector-1").is_ok());
        assert!(validate_selector("short").is_err());
        assert!(validate_selector(&"x".repeat(64)).is_ok());
        assert!(validate_selector(&"x".repeat(65)).is_err());
    }

    #[test]
    fn generated_tokens_parse_back() {
        let token = generate_refresh_token().expect("generate");
        let parts = parse_refresh_token(&token).expect("parse");
        // 16 bytes -> 22 chars, 32 bytes -> 43 chars, base64url no padding.
        assert_eq!(parts.selector.len(), 22);
        assert_eq!(parts.verifier.len(), 43);
        assert_eq!(
            build_refresh_token(&parts.selector, &parts.verifier),
            token
        );
    }

    #[test]
    fn build_parse_round_trip() {
        let token = build_refresh_token("some-selector", "some-verifier");
        let parts = parse_refresh_token(&token).expect("parse");
        assert_eq!(parts.selector, "some-selector");
        assert_eq!(parts.verifier, "some-verifier");
    }

    #[test]
    fn malformed_tokens_rejected() {
        for bad in [
            "",
            "noseparator",
            ".verifier-only",
            "selector-only.",
            "a.b.c",
            ".",
            "..",
        ] {
            assert!(
                matches!(
                    parse_refresh_token(bad),
                    Err(AuthError::MalformedRefreshToken)
                ),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn successive_tokens_differ() {
        let first = generate_refresh_token().expect("generate");
        let second = generate_refresh_token().expect("generate");
        assert_ne!(first, second);
    }
}
