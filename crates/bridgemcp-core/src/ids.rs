//! Random identifier and secret generation.
//!
//! Tokens and codes must be cryptographically random (spec §3: "token string
//! is ≥ 32 bytes of cryptographically random data, base64url-encoded").
//! `ring::rand::SystemRandom` is the teacher's hard dependency for this kind
//! of thing (see `turbomcp-auth`'s use of `ring` for crypto primitives); we
//! reuse it here rather than reaching for the OS RNG directly.

use base64::Engine as _;
use ring::rand::{SecureRandom, SystemRandom};

/// Generates `n` cryptographically random bytes, base64url-encoded without
/// padding.
pub fn random_token(n: usize) -> String {
    let rng = SystemRandom::new();
    let mut buf = vec![0u8; n];
    rng.fill(&mut buf).expect("system RNG must be available");
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

/// A 32-byte (≥32 bytes per spec) random access/refresh token.
pub fn random_access_token() -> String {
    random_token(32)
}

/// A cryptographically random `client_id` (≥16 bytes per spec §4.E).
pub fn random_client_id() -> String {
    format!("cid_{}", random_token(16))
}

/// A cryptographically random `client_secret`.
pub fn random_client_secret() -> String {
    random_token(32)
}

/// A 32-character random state value for the upstream OAuth flow (spec §4.G).
pub fn random_state() -> String {
    // base64url of 24 raw bytes is exactly 32 characters with no padding.
    random_token(24)
}

/// An 8-character random tail for event ids (spec §4.I).
pub fn random_event_tail() -> String {
    let rng = SystemRandom::new();
    let mut buf = [0u8; 8];
    rng.fill(&mut buf).expect("system RNG must be available");
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    buf.iter()
        .map(|b| ALPHABET[(*b as usize) % ALPHABET.len()] as char)
        .collect()
}

/// A new session id.
pub fn new_session_id() -> String {
    format!("sess_{}", uuid::Uuid::new_v4().simple())
}

/// A new authorization code.
pub fn new_authorization_code() -> String {
    random_token(32)
}

/// A new request id, used for `RequestContext` and tracing correlation.
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_tokens_have_sufficient_entropy_and_are_url_safe() {
        let t = random_access_token();
        assert!(t.len() >= 32);
        assert!(t.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn random_tokens_are_not_repeated() {
        let a = random_access_token();
        let b = random_access_token();
        assert_ne!(a, b);
    }

    #[test]
    fn random_state_is_32_chars() {
        assert_eq!(random_state().len(), 32);
    }

    #[test]
    fn event_tail_is_8_chars_and_no_separator() {
        let tail = random_event_tail();
        assert_eq!(tail.len(), 8);
        assert!(!tail.contains('|'));
    }
}
