//! Content-addressed object identifiers.
//!
//! Objects are addressed by the SHA-1 of their loose encoding
//! (`"<kind> <len>\0"` followed by the body), exactly as the repository does.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use thiserror::Error;

/// Length of an object id in bytes.
pub const OBJECT_ID_LEN: usize = 20;

/// Errors produced when parsing an object id from text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ObjectIdError {
    /// The text is not 40 hexadecimal characters.
    #[error("invalid object id {0:?}: expected 40 hex characters")]
    InvalidHex(String),
}

/// A 20-byte SHA-1 object id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId([u8; OBJECT_ID_LEN]);

impl ObjectId {
    /// The all-zero id, used as "no object".
    pub const NULL: ObjectId = ObjectId([0; OBJECT_ID_LEN]);

    /// Wraps raw id bytes.
    pub fn from_bytes(bytes: [u8; OBJECT_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Builds an id from a slice, returning `None` if the length is wrong.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; OBJECT_ID_LEN] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    /// Parses a 40-character hex id.
    pub fn from_hex(text: &str) -> Result<Self, ObjectIdError> {
        let decoded =
            hex::decode(text.trim()).map_err(|_| ObjectIdError::InvalidHex(text.to_string()))?;
        Self::from_slice(&decoded).ok_or_else(|| ObjectIdError::InvalidHex(text.to_string()))
    }

    /// Computes the id of an object body of the given kind.
    pub fn hash_object(kind: ObjectKind, body: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update(b" ");
        hasher.update(body.len().to_string().as_bytes());
        hasher.update([0u8]);
        hasher.update(body);
        Self(hasher.finalize().into())
    }

    /// Raw id bytes.
    pub fn as_bytes(&self) -> &[u8; OBJECT_ID_LEN] {
        &self.0
    }

    /// Lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// True for the all-zero id.
    pub fn is_null(&self) -> bool {
        self.0 == [0; OBJECT_ID_LEN]
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", &self.to_hex()[..12])
    }
}

impl FromStr for ObjectId {
    type Err = ObjectIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// The kind of a repository object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectKind {
    /// Name used in the loose-object header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Tree => "tree",
            Self::Blob => "blob",
            Self::Tag => "tag",
        }
    }

    /// Pack entry type code for this kind.
    pub fn pack_code(&self) -> u8 {
        match self {
            Self::Commit => 1,
            Self::Tree => 2,
            Self::Blob => 3,
            Self::Tag => 4,
        }
    }

    /// Kind for a pack entry type code, if it names a base object.
    pub fn from_pack_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Commit),
            2 => Some(Self::Tree),
            3 => Some(Self::Blob),
            4 => Some(Self::Tag),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_object_matches_git() {
        // `echo -n "hello world" | git hash-object --stdin`
        let id = ObjectId::hash_object(ObjectKind::Blob, b"hello world");
        assert_eq!(id.to_hex(), "95d09f2b10159347eece71399a7e2e907ea3df4f");
    }

    #[test]
    fn test_empty_blob_id() {
        let id = ObjectId::hash_object(ObjectKind::Blob, b"");
        assert_eq!(id.to_hex(), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
    }

    #[test]
    fn test_from_hex_accepts_valid_id() {
        let id: ObjectId = "95d09f2b10159347eece71399a7e2e907ea3df4f".parse().unwrap();
        assert_eq!(id.to_string(), "95d09f2b10159347eece71399a7e2e907ea3df4f");
    }

    #[test]
    fn test_from_hex_rejects_bad_input() {
        assert!(ObjectId::from_hex("xyz").is_err());
        assert!(ObjectId::from_hex("95d09f2b").is_err());
    }

    #[test]
    fn test_null_id() {
        assert!(ObjectId::NULL.is_null());
        assert!(!ObjectId::hash_object(ObjectKind::Blob, b"x").is_null());
    }

    #[test]
    fn test_pack_codes() {
        for kind in [ObjectKind::Commit, ObjectKind::Tree, ObjectKind::Blob, ObjectKind::Tag] {
            assert_eq!(ObjectKind::from_pack_code(kind.pack_code()), Some(kind));
        }
        assert_eq!(ObjectKind::from_pack_code(6), None);
    }
}
