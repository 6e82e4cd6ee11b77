//! Tuple-keyed encoding.
//!
//! Keys are ordered tuples of strings (spec §4.A). We encode each segment
//! followed by a unit-separator byte (`0x1F`) so that the encoding of a
//! prefix `[a, b]` is a true byte-prefix of every key `[a, b, ...]` and never
//! accidentally a prefix of an unrelated key like `[ab, ...]` — the
//! separator after `a` guarantees the next byte starts a new segment rather
//! than continuing the current one.

const SEP: u8 = 0x1F;

/// A tuple key, e.g. `["creds", "github", "u1"]`.
pub type Key = Vec<String>;

pub fn key(parts: &[&str]) -> Key {
    parts.iter().map(|s| s.to_string()).collect()
}

pub fn encode(parts: &[impl AsRef<str>]) -> Vec<u8> {
    let mut out = Vec::new();
    for part in parts {
        out.extend_from_slice(part.as_ref().as_bytes());
        out.push(SEP);
    }
    out
}

pub fn decode(bytes: &[u8]) -> Key {
    bytes
        .split(|b| *b == SEP)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_does_not_alias_longer_segment() {
        let prefix = encode(&key(&["a"]));
        let other = encode(&key(&["ab", "c"]));
        assert!(!other.starts_with(&prefix));
    }

    #[test]
    fn prefix_matches_nested_key() {
        let prefix = encode(&key(&["a", "b"]));
        let nested = encode(&key(&["a", "b", "c"]));
        assert!(nested.starts_with(&prefix));
    }

    #[test]
    fn round_trips() {
        let k = key(&["creds", "github", "u1"]);
        let encoded = encode(&k);
        assert_eq!(decode(&encoded), k);
    }
}
