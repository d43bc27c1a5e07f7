//! SHA-1 object ids.
//!
//! Every object in the database is addressed by the SHA-1 of its canonical
//! serialization, `"<type> <size>\0"` followed by the content. Ids travel as
//! 40-character lowercase hex at interface boundaries and as raw 20-byte
//! arrays inside the pack codec.

use std::{fmt::Display, io, str::FromStr};

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::{errors::GitError, internal::object::types::ObjectType};

/// Raw byte length of a SHA-1 id.
pub const ID_RAW_LEN: usize = 20;
/// Hex string length of a SHA-1 id.
pub const ID_HEX_LEN: usize = 40;

/// A 20-byte SHA-1 object id.
///
/// Supports conversion to/from hex strings, byte slices, and stream reading.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Deserialize, Serialize,
)]
pub struct ObjectId([u8; ID_RAW_LEN]);

impl Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for ObjectId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Parse a 40-character hex string into an [`ObjectId`].
impl FromStr for ObjectId {
    type Err = GitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ID_HEX_LEN {
            return Err(GitError::Invalid(format!(
                "`{s}` is not a valid object id: expected {ID_HEX_LEN} hex chars"
            )));
        }
        let bytes = hex::decode(s)
            .map_err(|e| GitError::Invalid(format!("`{s}` is not a valid object id: {e}")))?;
        let mut h = [0u8; ID_RAW_LEN];
        h.copy_from_slice(&bytes);
        Ok(ObjectId(h))
    }
}

impl ObjectId {
    /// The all-zero id used on the wire for "no such ref".
    pub const ZERO: ObjectId = ObjectId([0u8; ID_RAW_LEN]);

    /// Construct directly from a raw 20-byte array.
    pub const fn from_raw(bytes: [u8; ID_RAW_LEN]) -> Self {
        ObjectId(bytes)
    }

    /// Compute the SHA-1 of `data`.
    pub fn hash_of(data: &[u8]) -> ObjectId {
        let digest = Sha1::digest(data);
        let mut bytes = [0u8; ID_RAW_LEN];
        bytes.copy_from_slice(digest.as_ref());
        ObjectId(bytes)
    }

    /// Compute the id of an object from its type and content, prefixing the
    /// canonical `"<type> <size>\0"` header before hashing.
    pub fn from_type_and_data(object_type: ObjectType, data: &[u8]) -> ObjectId {
        let mut hasher = Sha1::new();
        hasher.update(object_type.to_bytes());
        hasher.update(b" ");
        hasher.update(data.len().to_string().as_bytes());
        hasher.update(b"\x00");
        hasher.update(data);
        let mut bytes = [0u8; ID_RAW_LEN];
        bytes.copy_from_slice(hasher.finalize().as_ref());
        ObjectId(bytes)
    }

    /// Create an [`ObjectId`] from a raw 20-byte slice.
    pub fn from_bytes(bytes: &[u8]) -> Result<ObjectId, GitError> {
        if bytes.len() != ID_RAW_LEN {
            return Err(GitError::Invalid(format!(
                "invalid id byte length: got {}, expected {ID_RAW_LEN}",
                bytes.len()
            )));
        }
        let mut h = [0u8; ID_RAW_LEN];
        h.copy_from_slice(bytes);
        Ok(ObjectId(h))
    }

    /// Read 20 raw id bytes from a stream.
    pub fn from_stream(data: &mut impl io::Read) -> io::Result<ObjectId> {
        let mut h = [0u8; ID_RAW_LEN];
        data.read_exact(&mut h)?;
        Ok(ObjectId(h))
    }

    /// True for the all-zero id.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ID_RAW_LEN]
    }

    /// Return the raw bytes of the id.
    pub fn to_data(self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// First byte of the id, the fanout bucket in pack indexes.
    pub fn first_byte(&self) -> u8 {
        self.0[0]
    }
}

/// Incremental SHA-1 over an object's canonical serialization, seeded with the
/// `"<type> <size>\0"` header so content can be streamed through it.
#[derive(Clone)]
pub struct IdHasher {
    inner: Sha1,
}

impl IdHasher {
    /// Start a hasher seeded with the header for `object_type` and `size`.
    pub fn for_object(object_type: ObjectType, size: u64) -> Self {
        let mut inner = Sha1::new();
        inner.update(object_type.to_bytes());
        inner.update(b" ");
        inner.update(size.to_string().as_bytes());
        inner.update(b"\x00");
        IdHasher { inner }
    }

    /// Start a bare hasher with no header, for pack trailers and the like.
    pub fn new() -> Self {
        IdHasher { inner: Sha1::new() }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> ObjectId {
        let mut bytes = [0u8; ID_RAW_LEN];
        bytes.copy_from_slice(self.inner.finalize().as_ref());
        ObjectId(bytes)
    }
}

impl Default for IdHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    /// Hashing "Hello, world!" should match the known SHA-1 value.
    #[test]
    fn test_hash_of() {
        let data = "Hello, world!".as_bytes();
        let id = ObjectId::hash_of(data);
        assert_eq!(id.to_string(), "943a702d06f34599aee1f8da8ef9f7296031d699");
    }

    /// The header-prefixed hash of "hello\n" as a blob is the well-known git id.
    #[test]
    fn test_from_type_and_data() {
        let id = ObjectId::from_type_and_data(ObjectType::Blob, b"hello\n");
        assert_eq!(id.to_string(), "ce013625030ba8dba906f756967f9e9ca394464a");
    }

    /// Construct from raw bytes and round-trip through hex.
    #[test]
    fn test_from_bytes() {
        let id = ObjectId::from_bytes(&[
            0x8a, 0xb6, 0x86, 0xea, 0xfe, 0xb1, 0xf4, 0x47, 0x02, 0x73, 0x8c, 0x8b, 0x0f, 0x24,
            0xf2, 0x56, 0x7c, 0x36, 0xda, 0x6d,
        ])
        .unwrap();
        assert_eq!(id.to_string(), "8ab686eafeb1f44702738c8b0f24f2567c36da6d");
    }

    /// Wrong-length byte slices are rejected.
    #[test]
    fn test_from_bytes_wrong_len() {
        assert!(ObjectId::from_bytes(&[0u8; 19]).is_err());
        assert!(ObjectId::from_bytes(&[0u8; 21]).is_err());
    }

    /// Read an id from a stream.
    #[test]
    fn test_from_stream() {
        let source = [
            0x8a, 0xb6, 0x86, 0xea, 0xfe, 0xb1, 0xf4, 0x47, 0x02, 0x73, 0x8c, 0x8b, 0x0f, 0x24,
            0xf2, 0x56, 0x7c, 0x36, 0xda, 0x6d,
        ];
        let mut reader = std::io::Cursor::new(source);
        let id = ObjectId::from_stream(&mut reader).unwrap();
        assert_eq!(id.to_string(), "8ab686eafeb1f44702738c8b0f24f2567c36da6d");
    }

    /// Hex parse round-trips and rejects bad input.
    #[test]
    fn test_from_str() {
        let hex = "8ab686eafeb1f44702738c8b0f24f2567c36da6d";
        let id = ObjectId::from_str(hex).unwrap();
        assert_eq!(id.to_string(), hex);
        assert!(ObjectId::from_str("deadbeef").is_err());
        assert!(ObjectId::from_str(&"x".repeat(40)).is_err());
    }

    /// The zero id displays as forty zeros and reports is_zero.
    #[test]
    fn test_zero() {
        assert!(ObjectId::ZERO.is_zero());
        assert_eq!(
            ObjectId::ZERO.to_string(),
            "0000000000000000000000000000000000000000"
        );
    }

    /// IdHasher seeded with an object header matches from_type_and_data.
    #[test]
    fn test_id_hasher_matches_one_shot() {
        let mut hasher = IdHasher::for_object(ObjectType::Blob, 6);
        hasher.update(b"hel");
        hasher.update(b"lo\n");
        assert_eq!(
            hasher.finalize(),
            ObjectId::from_type_and_data(ObjectType::Blob, b"hello\n")
        );
    }
}
