//! Ledger key schema and the source→destination key codec.
//!
//! ## Key Format Reference (destination layout)
//!
//! | Data             | Key format                          |
//! |------------------|-------------------------------------|
//! | Block header     | `"h" + num(8 BE) + hash(32)`        |
//! | Block body       | `"b" + num(8 BE) + hash(32)`        |
//! | Block receipts   | `"r" + num(8 BE) + hash(32)`        |
//! | Canonical hash   | `"n" + num(8 BE)`                   |
//! | Block number     | `"H" + hash(32)`                    |
//! | State trie node  | `"S" + hash(32)`                    |
//! | Tx lookup        | `"l" + hash(32)`                    |
//! | Contract code    | `"c" + hash(32)`                    |
//! | Hash preimage    | `"secure-key-" + hash(32)`          |
//! | Snapshot account | `"a" + hash(32)`                    |
//! | Snapshot storage | `"o" + hash(32) + hash(32)`         |
//! | Head block hash  | `"LastBlock"`                       |
//! | Head header hash | `"LastHeader"`                      |
//! | Fast-sync head   | `"LastFast"`                        |
//!
//! The source layout prefixes every one of these keys with a
//! fixed-length chain namespace (32 bytes in the deployments this tool
//! was written for). Stripping the namespace and validating the class
//! shape happen in one step so the codec never emits a key that belongs
//! to no class.

use ethereum_types::H256;

pub const HEADER_PREFIX: u8 = b'h';
pub const BODY_PREFIX: u8 = b'b';
pub const RECEIPTS_PREFIX: u8 = b'r';
pub const CANONICAL_PREFIX: u8 = b'n';
pub const HASH_INDEX_PREFIX: u8 = b'H';
pub const STATE_TRIE_PREFIX: u8 = b'S';
pub const TX_LOOKUP_PREFIX: u8 = b'l';
pub const CODE_PREFIX: u8 = b'c';
pub const SNAPSHOT_ACCOUNT_PREFIX: u8 = b'a';
pub const SNAPSHOT_STORAGE_PREFIX: u8 = b'o';
pub const PREIMAGE_PREFIX: &[u8] = b"secure-key-";

pub const HEAD_BLOCK_KEY: &[u8] = b"LastBlock";
pub const HEAD_HEADER_KEY: &[u8] = b"LastHeader";
pub const HEAD_FAST_KEY: &[u8] = b"LastFast";

/// Expected namespace prefix length in the source layout.
pub const NAMESPACE_LEN: usize = 32;

const NUM_LEN: usize = 8;
const HASH_LEN: usize = 32;

/// Class of a ledger record, determined by its key shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordClass {
    Header,
    Body,
    Receipts,
    CanonicalMapping,
    HashIndex,
    StateTrieNode,
    TxLookup,
    Code,
    Preimage,
    SnapshotEntry,
    HeadPointer,
}

impl RecordClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordClass::Header => "header",
            RecordClass::Body => "body",
            RecordClass::Receipts => "receipts",
            RecordClass::CanonicalMapping => "canonical",
            RecordClass::HashIndex => "hash-index",
            RecordClass::StateTrieNode => "state-trie",
            RecordClass::TxLookup => "tx-lookup",
            RecordClass::Code => "code",
            RecordClass::Preimage => "preimage",
            RecordClass::SnapshotEntry => "snapshot",
            RecordClass::HeadPointer => "head-pointer",
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("empty key")]
    Empty,

    #[error("key is {actual} bytes, shorter than the {expected}-byte namespace prefix")]
    NamespaceTooShort { expected: usize, actual: usize },

    #[error("key does not carry the expected namespace prefix")]
    NamespaceMismatch,

    #[error("unknown leading tag {tag:#04x}")]
    UnknownTag { tag: u8 },

    #[error("malformed {} key of {len} bytes", .class.as_str())]
    Malformed { class: RecordClass, len: usize },
}

impl CodecError {
    /// Unknown tags are counted against the operator tolerance; the
    /// other rejections are format errors for a known class.
    pub fn is_unknown_tag(&self) -> bool {
        matches!(self, CodecError::UnknownTag { .. } | CodecError::Empty)
    }
}

/// Pure mapping from source keys to destination keys.
///
/// With a namespace configured, the codec strips it after verifying it
/// byte-for-byte; without one, source keys are already in the logical
/// layout. Either way the logical key is validated against its class
/// shape, so the mapping is total over well-formed keys and rejects
/// everything else. Distinct valid source keys of one class always map
/// to distinct destination keys (the namespace strip is a fixed-length
/// prefix removal, the class rewrite is the identity).
#[derive(Debug, Clone, Default)]
pub struct KeyCodec {
    namespace: Option<Vec<u8>>,
}

impl KeyCodec {
    /// Codec for an already-flat source layout.
    pub fn flat() -> Self {
        Self { namespace: None }
    }

    /// Codec stripping the given namespace prefix off every source key.
    pub fn namespaced(namespace: Vec<u8>) -> Self {
        Self {
            namespace: Some(namespace),
        }
    }

    pub fn namespace(&self) -> Option<&[u8]> {
        self.namespace.as_deref()
    }

    /// Iteration bounds covering every source key this codec accepts.
    pub fn source_bounds(&self) -> (Vec<u8>, Option<Vec<u8>>) {
        match &self.namespace {
            Some(namespace) => (
                namespace.clone(),
                chainport_storage::prefix_upper_bound(namespace),
            ),
            None => (Vec::new(), None),
        }
    }

    /// Maps a source key to `(class, destination_key)` or rejects it.
    pub fn encode(&self, source_key: &[u8]) -> Result<(RecordClass, Vec<u8>), CodecError> {
        let logical = match &self.namespace {
            Some(namespace) => {
                if source_key.len() < namespace.len() {
                    return Err(CodecError::NamespaceTooShort {
                        expected: namespace.len(),
                        actual: source_key.len(),
                    });
                }
                let (prefix, rest) = source_key.split_at(namespace.len());
                if prefix != namespace.as_slice() {
                    return Err(CodecError::NamespaceMismatch);
                }
                rest
            }
            None => source_key,
        };
        let class = classify(logical)?;
        Ok((class, logical.to_vec()))
    }

    /// Classifies a destination-layout key.
    pub fn classify(&self, logical_key: &[u8]) -> Result<RecordClass, CodecError> {
        classify(logical_key)
    }
}

/// Classifies a logical (destination-layout) key by shape, rejecting
/// malformed keys of a known class.
pub fn classify(key: &[u8]) -> Result<RecordClass, CodecError> {
    if key.is_empty() {
        return Err(CodecError::Empty);
    }
    if key == HEAD_BLOCK_KEY || key == HEAD_HEADER_KEY || key == HEAD_FAST_KEY {
        return Ok(RecordClass::HeadPointer);
    }
    if key.starts_with(PREIMAGE_PREFIX) {
        return expect_len(
            RecordClass::Preimage,
            key,
            PREIMAGE_PREFIX.len() + HASH_LEN,
        );
    }
    match key[0] {
        HEADER_PREFIX => expect_len(RecordClass::Header, key, 1 + NUM_LEN + HASH_LEN),
        BODY_PREFIX => expect_len(RecordClass::Body, key, 1 + NUM_LEN + HASH_LEN),
        RECEIPTS_PREFIX => expect_len(RecordClass::Receipts, key, 1 + NUM_LEN + HASH_LEN),
        CANONICAL_PREFIX => expect_len(RecordClass::CanonicalMapping, key, 1 + NUM_LEN),
        HASH_INDEX_PREFIX => expect_len(RecordClass::HashIndex, key, 1 + HASH_LEN),
        STATE_TRIE_PREFIX => expect_len(RecordClass::StateTrieNode, key, 1 + HASH_LEN),
        TX_LOOKUP_PREFIX => expect_len(RecordClass::TxLookup, key, 1 + HASH_LEN),
        CODE_PREFIX => expect_len(RecordClass::Code, key, 1 + HASH_LEN),
        SNAPSHOT_ACCOUNT_PREFIX => expect_len(RecordClass::SnapshotEntry, key, 1 + HASH_LEN),
        SNAPSHOT_STORAGE_PREFIX => {
            expect_len(RecordClass::SnapshotEntry, key, 1 + HASH_LEN + HASH_LEN)
        }
        tag => Err(CodecError::UnknownTag { tag }),
    }
}

fn expect_len(class: RecordClass, key: &[u8], expected: usize) -> Result<RecordClass, CodecError> {
    if key.len() == expected {
        Ok(class)
    } else {
        Err(CodecError::Malformed {
            class,
            len: key.len(),
        })
    }
}

// --- Key builders for the destination layout ---

/// `"n" + num(8 BE)` → canonical block hash
pub fn canonical_key(number: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + NUM_LEN);
    key.push(CANONICAL_PREFIX);
    key.extend_from_slice(&number.to_be_bytes());
    key
}

/// `"h" + num(8 BE) + hash(32)` → block header
pub fn header_key(number: u64, hash: H256) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + NUM_LEN + HASH_LEN);
    key.push(HEADER_PREFIX);
    key.extend_from_slice(&number.to_be_bytes());
    key.extend_from_slice(hash.as_bytes());
    key
}

/// `"H" + hash(32)` → block number (8-byte BE)
pub fn hash_index_key(hash: H256) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + HASH_LEN);
    key.push(HASH_INDEX_PREFIX);
    key.extend_from_slice(hash.as_bytes());
    key
}

/// Parses `"h" + num(8 BE) + hash(32)` back into its parts.
pub fn parse_header_key(key: &[u8]) -> Option<(u64, H256)> {
    if key.len() != 1 + NUM_LEN + HASH_LEN || key[0] != HEADER_PREFIX {
        return None;
    }
    let number = u64::from_be_bytes(key[1..1 + NUM_LEN].try_into().ok()?);
    let hash = H256::from_slice(&key[1 + NUM_LEN..]);
    Some((number, hash))
}

/// Parses `"n" + num(8 BE)` back into a height.
pub fn parse_canonical_key(key: &[u8]) -> Option<u64> {
    if key.len() != 1 + NUM_LEN || key[0] != CANONICAL_PREFIX {
        return None;
    }
    u64::from_be_bytes(key[1..].try_into().ok()?).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    const NAMESPACE: [u8; 32] =
        hex!("337fb73f9bcdac8c31a2d5f7b877ab1e8a2b7f2a1e9bf02a0a0e6c6fd164f1d1");

    fn namespaced(logical: &[u8]) -> Vec<u8> {
        let mut key = NAMESPACE.to_vec();
        key.extend_from_slice(logical);
        key
    }

    fn tagged(tag: u8, rest: &[u8]) -> Vec<u8> {
        let mut key = vec![tag];
        key.extend_from_slice(rest);
        key
    }

    #[test]
    fn canonical_key_format() {
        assert_eq!(canonical_key(1), b"n\x00\x00\x00\x00\x00\x00\x00\x01");
    }

    #[test]
    fn header_key_format() {
        let hash = H256::repeat_byte(0xab);
        let key = header_key(7, hash);
        assert_eq!(key[0], HEADER_PREFIX);
        assert_eq!(&key[1..9], &7u64.to_be_bytes());
        assert_eq!(&key[9..], hash.as_bytes());
    }

    #[test]
    fn header_key_round_trips() {
        let hash = H256::repeat_byte(0x42);
        let key = header_key(123_456, hash);
        assert_eq!(parse_header_key(&key), Some((123_456, hash)));
        assert_eq!(classify(&key), Ok(RecordClass::Header));
    }

    #[test]
    fn namespace_strip_round_trips_header_key() {
        let hash = H256::repeat_byte(0x11);
        let logical = header_key(42, hash);
        let codec = KeyCodec::namespaced(NAMESPACE.to_vec());

        let (class, destination) = codec.encode(&namespaced(&logical)).unwrap();
        assert_eq!(class, RecordClass::Header);
        assert_eq!(destination, logical);
        assert_eq!(codec.classify(&destination), Ok(RecordClass::Header));
    }

    #[test]
    fn short_namespace_is_rejected_not_truncated() {
        let codec = KeyCodec::namespaced(NAMESPACE.to_vec());
        let result = codec.encode(&NAMESPACE[..16]);
        assert_eq!(
            result,
            Err(CodecError::NamespaceTooShort {
                expected: 32,
                actual: 16
            })
        );
    }

    #[test]
    fn wrong_namespace_bytes_are_rejected() {
        let codec = KeyCodec::namespaced(NAMESPACE.to_vec());
        let mut key = namespaced(&canonical_key(0));
        key[0] ^= 0xff;
        assert_eq!(codec.encode(&key), Err(CodecError::NamespaceMismatch));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let codec = KeyCodec::flat();
        let result = codec.encode(&[0x7f, 0x01, 0x02]);
        assert_eq!(result, Err(CodecError::UnknownTag { tag: 0x7f }));
        assert!(result.unwrap_err().is_unknown_tag());
    }

    #[test]
    fn malformed_known_class_is_a_format_error() {
        // A header tag with a truncated body is not an unknown key.
        let result = classify(b"h\x00\x00\x01");
        assert_eq!(
            result,
            Err(CodecError::Malformed {
                class: RecordClass::Header,
                len: 4
            })
        );
        assert!(!result.unwrap_err().is_unknown_tag());
    }

    #[test]
    fn classifies_every_class_shape() {
        let hash = H256::zero();
        let cases: Vec<(Vec<u8>, RecordClass)> = vec![
            (header_key(1, hash), RecordClass::Header),
            (
                {
                    let mut k = header_key(1, hash);
                    k[0] = BODY_PREFIX;
                    k
                },
                RecordClass::Body,
            ),
            (
                {
                    let mut k = header_key(1, hash);
                    k[0] = RECEIPTS_PREFIX;
                    k
                },
                RecordClass::Receipts,
            ),
            (canonical_key(1), RecordClass::CanonicalMapping),
            (hash_index_key(hash), RecordClass::HashIndex),
            (
                {
                    let mut k = hash_index_key(hash);
                    k[0] = STATE_TRIE_PREFIX;
                    k
                },
                RecordClass::StateTrieNode,
            ),
            (
                {
                    let mut k = hash_index_key(hash);
                    k[0] = TX_LOOKUP_PREFIX;
                    k
                },
                RecordClass::TxLookup,
            ),
            (
                {
                    let mut k = hash_index_key(hash);
                    k[0] = CODE_PREFIX;
                    k
                },
                RecordClass::Code,
            ),
            (
                [PREIMAGE_PREFIX, hash.as_bytes()].concat(),
                RecordClass::Preimage,
            ),
            (
                tagged(SNAPSHOT_ACCOUNT_PREFIX, hash.as_bytes()),
                RecordClass::SnapshotEntry,
            ),
            (
                tagged(
                    SNAPSHOT_STORAGE_PREFIX,
                    &[hash.as_bytes(), hash.as_bytes()].concat(),
                ),
                RecordClass::SnapshotEntry,
            ),
            (HEAD_BLOCK_KEY.to_vec(), RecordClass::HeadPointer),
            (HEAD_HEADER_KEY.to_vec(), RecordClass::HeadPointer),
            (HEAD_FAST_KEY.to_vec(), RecordClass::HeadPointer),
        ];
        for (key, expected) in cases {
            assert_eq!(classify(&key), Ok(expected), "key {:?}", key);
        }
    }

    #[test]
    fn distinct_source_keys_map_to_distinct_destinations() {
        let codec = KeyCodec::namespaced(NAMESPACE.to_vec());
        let a = namespaced(&canonical_key(1));
        let b = namespaced(&canonical_key(2));
        let (_, da) = codec.encode(&a).unwrap();
        let (_, db) = codec.encode(&b).unwrap();
        assert_ne!(da, db);
    }

    #[test]
    fn source_bounds_cover_the_namespace_range() {
        let codec = KeyCodec::namespaced(NAMESPACE.to_vec());
        let (lower, upper) = codec.source_bounds();
        assert_eq!(lower, NAMESPACE.to_vec());
        let upper = upper.unwrap();
        assert!(lower < upper);
        assert!(namespaced(b"zzz") < upper);
    }
}
