//! PKCE Handler (spec §4.D) — RFC 7636 code-verifier/challenge generation and
//! constant-time verification.
//!
//! # ASCII-only inputs
//!
//! Verifiers and challenges here are always base64url — pure ASCII — so
//! comparing them byte-for-byte is equivalent to comparing them
//! char-for-char. The workspace's `[ASCII]` constraint documented here is
//! deliberate: the source behavior this was distilled from XORs 32-bit
//! character codes, which is only constant-time per *byte*, not per
//! *character*, once an input contains a multi-byte UTF-8 sequence (spec §9,
//! Open Questions). We sidestep the ambiguity entirely by operating on raw
//! ASCII bytes and documenting the precondition rather than reproducing it.

use bridgemcp_core::{Error, ErrorKind, Result};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const MIN_VERIFIER_LEN: usize = 43;
const MAX_VERIFIER_LEN: usize = 128;

/// Validates a code verifier against RFC 7636 §4.1: 43-128 characters drawn
/// from `[A-Z a-z 0-9 - . _ ~]`.
pub fn validate_verifier_format(verifier: &str) -> Result<()> {
    if !verifier.is_ascii() {
        return Err(Error::new(
            ErrorKind::InvalidRequest,
            "code_verifier must be ASCII",
        ));
    }
    let len = verifier.len();
    if !(MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&len) {
        return Err(Error::new(
            ErrorKind::InvalidRequest,
            format!("code_verifier length {len} outside [43, 128]"),
        ));
    }
    let valid_chars = verifier
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'));
    if !valid_chars {
        return Err(Error::new(
            ErrorKind::InvalidRequest,
            "code_verifier contains characters outside the unreserved set",
        ));
    }
    Ok(())
}

/// Derives the S256 code challenge from a verifier: base64url(sha256(v)),
/// no padding.
pub fn challenge_from_verifier(verifier: &str) -> String {
    use base64::Engine as _;
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

/// Verifies `verifier` against `challenge` in time independent of *where*
/// the two strings first differ (spec §4.D, §8 property 3). Inputs must be
/// ASCII (ensured by [`validate_verifier_format`] upstream and by
/// `challenge` always being base64url).
pub fn verify(challenge: &str, verifier: &str) -> bool {
    let derived = challenge_from_verifier(verifier);
    constant_time_eq(challenge, &derived)
}

/// Constant-time string comparison: pads the shorter input with zero bytes
/// up to the longer length, compares the padded buffers with
/// [`subtle::ConstantTimeEq`], and folds in a length check so two strings of
/// different length never short-circuit via the length check alone.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let max_len = a.len().max(b.len());
    let mut pa = vec![0u8; max_len];
    let mut pb = vec![0u8; max_len];
    pa[..a.len()].copy_from_slice(a.as_bytes());
    pb[..b.len()].copy_from_slice(b.as_bytes());

    let bytes_equal: bool = pa.ct_eq(&pb).into();
    let len_equal = a.len().ct_eq(&b.len()).unwrap_u8() == 1;
    bytes_equal && len_equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn verifier_of_43_and_128_accepted() {
        let v43 = "a".repeat(43);
        let v128 = "a".repeat(128);
        assert!(validate_verifier_format(&v43).is_ok());
        assert!(validate_verifier_format(&v128).is_ok());
    }

    #[test]
    fn verifier_of_42_and_129_rejected() {
        let v42 = "a".repeat(42);
        let v129 = "a".repeat(129);
        assert!(validate_verifier_format(&v42).is_err());
        assert!(validate_verifier_format(&v129).is_err());
    }

    #[test]
    fn challenge_matches_known_vector() {
        // RFC 7636 Appendix B.
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let expected_challenge = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";
        assert_eq!(challenge_from_verifier(verifier), expected_challenge);
    }

    #[test]
    fn verify_round_trips_for_any_valid_verifier() {
        let verifier = "0123456789abcdefghijklmnopqrstuvwxyzABCDEFG"; // 44 chars
        assert!(validate_verifier_format(verifier).is_ok());
        let challenge = challenge_from_verifier(verifier);
        assert!(verify(&challenge, verifier));
    }

    #[test]
    fn verify_rejects_wrong_verifier() {
        let challenge = challenge_from_verifier("0123456789abcdefghijklmnopqrstuvwxyzABCDEFG");
        assert!(!verify(&challenge, "zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz"));
    }

    #[test]
    fn constant_time_eq_handles_different_lengths() {
        assert!(!constant_time_eq("short", "much longer string"));
        assert!(constant_time_eq("same", "same"));
    }

    #[test]
    fn invalid_characters_rejected() {
        assert!(validate_verifier_format(&"a".repeat(42).replace('a', "!")).is_err());
    }

    fn valid_verifier_strategy() -> impl Strategy<Value = String> {
        "[A-Za-z0-9\\-._~]{43,128}"
    }

    proptest! {
        /// Property (spec §8, invariant 3): the derived challenge always
        /// equals base64url(sha256(verifier)) with padding stripped, for
        /// every verifier RFC 7636 allows.
        #[test]
        fn prop_challenge_is_unpadded_base64url_sha256(verifier in valid_verifier_strategy()) {
            use base64::Engine as _;
            let challenge = challenge_from_verifier(&verifier);
            let expected = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
            prop_assert_eq!(&challenge, &expected);
            prop_assert!(!challenge.contains('='));
        }

        /// Property (spec §8): `verify(Challenge(v), v)` holds for any valid
        /// verifier, and a verifier that differs by even one character is
        /// rejected.
        #[test]
        fn prop_verify_round_trips_and_rejects_tampering(verifier in valid_verifier_strategy()) {
            prop_assert!(validate_verifier_format(&verifier).is_ok());
            let challenge = challenge_from_verifier(&verifier);
            prop_assert!(verify(&challenge, &verifier));

            let mut tampered = verifier.clone();
            let flipped = if tampered.as_bytes()[0] == b'a' { 'b' } else { 'a' };
            tampered.replace_range(0..1, &flipped.to_string());
            prop_assert!(!verify(&challenge, &tampered));
        }
    }
}
