//! RFC 7636 (PKCE) S256 challenge verification.

use base64ct::{Base64UrlUnpadded, Encoding};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Compute the S256 code challenge for a verifier:
/// `base64url-no-padding(SHA256(verifier))`.
#[must_use]
pub fn code_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    Base64UrlUnpadded::encode_string(&digest)
}

/// Check a verifier against a stored S256 challenge.
///
/// The computed form is always the 43-character unpadded URL-safe encoding,
/// so padded or standard-alphabet challenge values can never match.
#[must_use]
pub fn verify_s256(stored_challenge: &str, verifier: &str) -> bool {
    let computed = code_challenge(verifier);
    computed.as_bytes().ct_eq(stored_challenge.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 appendix B vector.
    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn rfc7636_vector() {
        assert_eq!(code_challenge(VERIFIER), CHALLENGE);
        assert!(verify_s256(CHALLENGE, VERIFIER));
    }

    #[test]
    fn challenge_is_43_chars_unpadded() {
        let challenge = code_challenge("some-other-verifier");
        assert_eq!(challenge.len(), 43);
        assert!(!challenge.ends_with('='));
    }

    #[test]
    fn wrong_verifier_fails() {
        assert!(!verify_s256(CHALLENGE, "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXl"));
        assert!(!verify_s256(CHALLENGE, ""));
    }

    #[test]
    fn padded_and_standard_alphabet_variants_fail() {
        // The same digest in padded form must not verify.
        let padded = format!("{CHALLENGE}=");
        assert!(!verify_s256(&padded, VERIFIER));

        // Standard-alphabet encoding of the digest must not verify either.
        let standard = CHALLENGE.replace('-', "+").replace('_', "/");
        assert!(!verify_s256(&standard, VERIFIER));
    }
}
