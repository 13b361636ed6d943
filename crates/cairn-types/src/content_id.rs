use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CairnError, Result};

/// A short printable block identifier: lowercase hexadecimal, optionally
/// carrying a one-character namespace prefix.
///
/// The prefix is signalled by parity: an even-length ID is pure hex, an
/// odd-length ID starts with a single prefix letter followed by hex. This
/// keeps the packed form (`index_key`) fixed-width for all IDs of the same
/// hex length, with or without a prefix.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentId(String);

impl ContentId {
    /// Parse and validate an ID string.
    pub fn new(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        let valid = {
            let (prefix, hex_part) = split_raw(&s);
            let prefix_ok = prefix.map_or(true, |p| p.is_ascii_lowercase());
            prefix_ok && !hex_part.is_empty() && hex_part.bytes().all(is_lower_hex)
        };
        if valid {
            Ok(ContentId(s))
        } else {
            Err(CairnError::InvalidContentId(s))
        }
    }

    /// Build an ID from raw digest bytes, hex-encoding them under an
    /// optional namespace prefix.
    pub fn from_hash(prefix: Option<char>, digest: &[u8]) -> Self {
        match prefix {
            Some(p) => ContentId(format!("{p}{}", hex::encode(digest))),
            None => ContentId(hex::encode(digest)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The namespace prefix, if any.
    pub fn prefix(&self) -> Option<char> {
        split_raw(&self.0).0
    }

    fn hex_part(&self) -> &str {
        split_raw(&self.0).1
    }

    fn prefix_byte(&self) -> u8 {
        self.prefix().map(|c| c as u8).unwrap_or(0)
    }

    /// Pack into the fixed-width index key: one prefix byte (0 when there is
    /// no prefix) followed by the hex digits packed two-per-byte.
    pub fn index_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + self.hex_part().len() / 2);
        key.push(self.prefix_byte());
        key.extend_from_slice(&hex::decode(self.hex_part()).expect("validated hex"));
        key
    }

    /// Inverse of `index_key`.
    pub fn from_index_key(key: &[u8]) -> Result<Self> {
        if key.len() < 2 {
            return Err(CairnError::InvalidFormat(format!(
                "index key too short: {} bytes",
                key.len()
            )));
        }
        let hex_part = hex::encode(&key[1..]);
        match key[0] {
            0 => Ok(ContentId(hex_part)),
            p if p.is_ascii_lowercase() => Ok(ContentId(format!("{}{hex_part}", p as char))),
            p => Err(CairnError::InvalidFormat(format!(
                "invalid namespace prefix byte {p:#04x} in index key"
            ))),
        }
    }
}

fn is_lower_hex(b: u8) -> bool {
    b.is_ascii_digit() || (b'a'..=b'f').contains(&b)
}

fn split_raw(s: &str) -> (Option<char>, &str) {
    // A multi-byte first character can never be a valid prefix; returning
    // the whole string as the hex part makes validation reject it.
    if s.len() % 2 == 1 && s.is_char_boundary(1) {
        (s.chars().next(), &s[1..])
    } else {
        (None, s)
    }
}

// Ordered exactly like the packed `index_key` bytes so that sorting a set of
// IDs and sorting their keys agree (the index codec binary-searches keys).
impl Ord for ContentId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.prefix_byte()
            .cmp(&other.prefix_byte())
            .then_with(|| self.hex_part().cmp(other.hex_part()))
    }
}

impl PartialOrd for ContentId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.0)
    }
}

impl AsRef<str> for ContentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for ContentId {
    type Err = CairnError;

    fn from_str(s: &str) -> Result<Self> {
        ContentId::new(s)
    }
}

impl TryFrom<String> for ContentId {
    type Error = CairnError;

    fn try_from(s: String) -> Result<Self> {
        ContentId::new(s)
    }
}

impl From<ContentId> for String {
    fn from(id: ContentId) -> String {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_hex_roundtrip() {
        let id = ContentId::new("deadbeef").unwrap();
        assert_eq!(id.prefix(), None);
        let key = id.index_key();
        assert_eq!(key, vec![0x00, 0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(ContentId::from_index_key(&key).unwrap(), id);
    }

    #[test]
    fn prefixed_roundtrip() {
        let id = ContentId::new("xdeadbeef").unwrap();
        assert_eq!(id.prefix(), Some('x'));
        let key = id.index_key();
        assert_eq!(key[0], b'x');
        assert_eq!(ContentId::from_index_key(&key).unwrap(), id);
    }

    #[test]
    fn hex_letter_prefix_is_disambiguated_by_parity() {
        // "abc" is odd-length, so 'a' is a prefix even though it is a hex digit.
        let id = ContentId::new("abc").unwrap();
        assert_eq!(id.prefix(), Some('a'));
        assert_eq!(id.index_key(), vec![b'a', 0xbc]);
    }

    #[test]
    fn rejects_invalid() {
        assert!(ContentId::new("").is_err());
        assert!(ContentId::new("XY").is_err());
        assert!(ContentId::new("Gdeadbeef").is_err()); // uppercase prefix
        assert!(ContentId::new("dead beef").is_err());
        assert!(ContentId::new("x").is_err()); // prefix with no hex
        assert!(ContentId::new("é0").is_err()); // multi-byte first char
    }

    #[test]
    fn ordering_matches_index_key_bytes() {
        let mut ids = vec![
            ContentId::new("ff00").unwrap(),
            ContentId::new("a0011").unwrap(), // prefix 'a'
            ContentId::new("0001").unwrap(),
            ContentId::new("x0000").unwrap(), // prefix 'x'
        ];
        let mut by_id = ids.clone();
        by_id.sort();
        ids.sort_by(|a, b| a.index_key().cmp(&b.index_key()));
        assert_eq!(by_id, ids);
    }

    #[test]
    fn from_index_key_rejects_short_and_bad_prefix() {
        assert!(ContentId::from_index_key(&[]).is_err());
        assert!(ContentId::from_index_key(&[0x00]).is_err());
        assert!(ContentId::from_index_key(&[0xff, 0x01]).is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let id = ContentId::new("mdeadbeef01").unwrap();
        let bytes = rmp_serde::to_vec(&id).unwrap();
        let back: ContentId = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(id, back);
    }
}
