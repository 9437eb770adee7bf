//! Content-addressable object identifier (C1).
//!
//! A [`Key`] is a fixed-width SHA-256 digest. It parses from a full hex
//! string of the right width, or hashes an arbitrary string on the fly —
//! callers never need to know which case applies.

use std::fmt;

use sha2::{Digest, Sha256};

/// Width in bytes of a [`Key`]. The reference implementation uses 32 bytes
/// (a SHA-256 digest); this crate pins that choice (§3, Open Questions).
pub const KEY_LEN: usize = 32;

/// Fixed-width, totally-ordered, content-addressed identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key([u8; KEY_LEN]);

impl Key {
    /// Hashes arbitrary bytes into a Key via SHA-256.
    pub fn from_bytes(data: impl AsRef<[u8]>) -> Self {
        let digest = Sha256::digest(data.as_ref());
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&digest);
        Key(bytes)
    }

    /// Parses a textual key: a full lowercase-hex digest of `KEY_LEN` bytes
    /// is taken verbatim; any other string is hashed (§3).
    pub fn parse(text: &str) -> Self {
        if text.len() == KEY_LEN * 2 && text.bytes().all(|b| b.is_ascii_hexdigit()) {
            if let Ok(bytes) = hex::decode(text) {
                let mut arr = [0u8; KEY_LEN];
                arr.copy_from_slice(&bytes);
                return Key(arr);
            }
        }
        Key::from_bytes(text)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Lowercase hex textual form, used as the on-disk shard name and the
    /// wire representation in the remote backend (§4.3, §6.1).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First two hex characters, used as the disk backend's shard directory
    /// name (`objects/<hex[0:2]>/<hex>.dat`, §4.3).
    pub fn shard_prefix(&self) -> String {
        hex::encode(&self.0[..1])
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_arbitrary_strings() {
        let a = Key::parse("https://example.com/artifact.tar");
        let b = Key::parse("https://example.com/artifact.tar");
        assert_eq!(a, b);
        assert_eq!(a.to_hex().len(), KEY_LEN * 2);
    }

    #[test]
    fn parses_full_hex_digests_verbatim() {
        let hashed = Key::from_bytes("hello world");
        let roundtripped = Key::parse(&hashed.to_hex());
        assert_eq!(hashed, roundtripped);
    }

    #[test]
    fn distinct_inputs_hash_differently() {
        assert_ne!(Key::parse("a"), Key::parse("b"));
    }

    #[test]
    fn total_order_is_byte_order() {
        let a = Key::from_bytes("a");
        let b = Key::from_bytes("b");
        assert!(a < b || b < a);
    }
}
