//! Physical key and value layout of versioned rows.
//!
//! A physical key is the escaped user key followed by the bitwise complement
//! of the version's sequence in big-endian order:
//!
//! ```text
//! escape(user_key) ++ be_u64(!sequence)
//! ```
//!
//! Escaping turns every `0x00` into `0x00 0x01` and terminates with
//! `0x00 0x00`, which keeps user keys in byte order and makes the escaped form
//! prefix-free. All versions of one key are therefore adjacent, newest first.
//!
//! A physical value is a one byte tag followed by the row bytes for puts.

use tabletdb_common::error::StorageError;

const SEQUENCE_LEN: usize = 8;

const TAG_DELETE: u8 = 0x00;
const TAG_PUT: u8 = 0x01;

/// Decoded physical value
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Version<'a> {
    Put(&'a [u8]),
    Delete,
}

/// Escaped form of a user key; a prefix of every physical key of its versions.
pub(crate) fn escape(user_key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(user_key.len() + 2 + SEQUENCE_LEN);
    for &b in user_key {
        if b == 0x00 {
            out.push(0x00);
            out.push(0x01);
        } else {
            out.push(b);
        }
    }
    out.push(0x00);
    out.push(0x00);
    out
}

pub(crate) fn unescape(escaped: &[u8]) -> Result<Vec<u8>, StorageError> {
    let mut out = Vec::with_capacity(escaped.len());
    let mut i = 0;
    while i < escaped.len() {
        if escaped[i] == 0x00 {
            match escaped.get(i + 1) {
                Some(0x00) if i + 2 == escaped.len() => return Ok(out),
                Some(0x01) => {
                    out.push(0x00);
                    i += 2;
                }
                _ => break,
            }
        } else {
            out.push(escaped[i]);
            i += 1;
        }
    }
    Err(StorageError::CorruptData("malformed escaped key".to_string()))
}

pub(crate) fn encode_key(user_key: &[u8], sequence: u64) -> Vec<u8> {
    let mut out = escape(user_key);
    out.extend_from_slice(&(!sequence).to_be_bytes());
    out
}

/// Split a physical key into its escaped user key and sequence.
pub(crate) fn split_key(raw: &[u8]) -> Result<(&[u8], u64), StorageError> {
    if raw.len() < SEQUENCE_LEN + 2 {
        return Err(StorageError::CorruptData(format!(
            "physical key of {} bytes is too short",
            raw.len()
        )));
    }
    let (escaped, suffix) = raw.split_at(raw.len() - SEQUENCE_LEN);
    let mut sequence = [0u8; SEQUENCE_LEN];
    sequence.copy_from_slice(suffix);
    Ok((escaped, !u64::from_be_bytes(sequence)))
}

pub(crate) fn encode_put(row: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(row.len() + 1);
    out.push(TAG_PUT);
    out.extend_from_slice(row);
    out
}

pub(crate) fn encode_delete() -> Vec<u8> {
    vec![TAG_DELETE]
}

pub(crate) fn decode_value(raw: &[u8]) -> Result<Version<'_>, StorageError> {
    match raw.split_first() {
        Some((&TAG_PUT, row)) => Ok(Version::Put(row)),
        Some((&TAG_DELETE, [])) => Ok(Version::Delete),
        _ => Err(StorageError::CorruptData("unknown version tag".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_user_key_order_preserved() {
        let keys: [&[u8]; 8] = [b"", b"\x00", b"\x00\x00", b"\x00\x01", b"a", b"a\x00", b"ab", b"b"];
        for pair in keys.windows(2) {
            assert!(
                encode_key(pair[0], 1) < encode_key(pair[1], 1),
                "{:?} should sort before {:?}",
                pair[0],
                pair[1]
            );
            // A newer version of the smaller key still sorts before any version of the larger.
            assert!(encode_key(pair[0], 1) < encode_key(pair[1], u64::MAX));
            assert!(encode_key(pair[0], u64::MAX) < encode_key(pair[1], 0));
        }
    }

    #[test]
    fn test_versions_newest_first() {
        assert!(encode_key(b"k", 9) < encode_key(b"k", 3));
        assert!(escape(b"k") < encode_key(b"k", u64::MAX));
    }

    #[test]
    fn test_split_key() {
        let raw = encode_key(b"a\x00b", 42);
        let (escaped, sequence) = split_key(&raw).unwrap();
        assert_eq!(sequence, 42);
        assert_eq!(unescape(escaped).unwrap(), b"a\x00b");
        assert!(split_key(b"short").is_err());
    }

    #[test]
    fn test_escaped_prefix_only_matches_own_versions() {
        let prefix = escape(b"a");
        assert!(encode_key(b"a", 5).starts_with(&prefix));
        assert!(!encode_key(b"a\x00", 5).starts_with(&prefix));
        assert!(!encode_key(b"ab", 5).starts_with(&prefix));
    }

    #[test]
    fn test_value_tags() {
        assert_eq!(decode_value(&encode_put(b"row")).unwrap(), Version::Put(b"row"));
        assert_eq!(decode_value(&encode_put(b"")).unwrap(), Version::Put(b""));
        assert_eq!(decode_value(&encode_delete()).unwrap(), Version::Delete);
        assert!(decode_value(&[]).is_err());
        assert!(decode_value(&[7, 1]).is_err());
    }

    proptest! {
        #[test]
        fn prop_physical_order_follows_user_key(
            a in proptest::collection::vec(any::<u8>(), 0..16),
            b in proptest::collection::vec(any::<u8>(), 0..16),
            sa in any::<u64>(),
            sb in any::<u64>(),
        ) {
            prop_assume!(a != b);
            prop_assert_eq!(a < b, encode_key(&a, sa) < encode_key(&b, sb));
            prop_assert_eq!(unescape(split_key(&encode_key(&a, sa)).unwrap().0).unwrap(), a);
        }
    }
}
