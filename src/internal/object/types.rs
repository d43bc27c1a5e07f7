//! Object type enumeration used across the object and pack modules.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::errors::GitError;

/// In Git, each object type is assigned a unique integer value, which is used
/// to identify the type of the object in pack entry headers.
///
/// * `Commit` (1): a snapshot of the project with author, committer, message
///   and parent links.
/// * `Tree` (2): a directory listing of `(mode, name, id)` entries.
/// * `Blob` (3): opaque file content.
/// * `Tag` (4): an annotated tag pointing at another object.
/// * `OffsetDelta` (6): a delta whose base is addressed by a negative offset
///   within the same pack.
/// * `HashDelta` (7): a delta whose base is addressed by its object id.
///
/// When parsing a pack, the 3-bit type code in each entry header determines
/// how the entry's payload is interpreted.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Commit = 1,
    Tree,
    Blob,
    Tag,
    OffsetDelta = 6,
    HashDelta = 7,
}

const COMMIT_OBJECT_TYPE: &[u8] = b"commit";
const TREE_OBJECT_TYPE: &[u8] = b"tree";
const BLOB_OBJECT_TYPE: &[u8] = b"blob";
const TAG_OBJECT_TYPE: &[u8] = b"tag";

impl Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ObjectType::Blob => write!(f, "blob"),
            ObjectType::Tree => write!(f, "tree"),
            ObjectType::Commit => write!(f, "commit"),
            ObjectType::Tag => write!(f, "tag"),
            ObjectType::OffsetDelta => write!(f, "ofs-delta"),
            ObjectType::HashDelta => write!(f, "ref-delta"),
        }
    }
}

impl ObjectType {
    /// The canonical ASCII name written in loose object headers.
    ///
    /// Delta kinds never appear in loose headers; calling this on one is a
    /// programming error guarded by the pack codec.
    pub fn to_bytes(&self) -> &'static [u8] {
        match self {
            ObjectType::Commit => COMMIT_OBJECT_TYPE,
            ObjectType::Tree => TREE_OBJECT_TYPE,
            ObjectType::Blob => BLOB_OBJECT_TYPE,
            ObjectType::Tag => TAG_OBJECT_TYPE,
            ObjectType::OffsetDelta | ObjectType::HashDelta => b"",
        }
    }

    /// Parses a string representation of an object type.
    pub fn from_string(s: &str) -> Result<ObjectType, GitError> {
        match s {
            "blob" => Ok(ObjectType::Blob),
            "tree" => Ok(ObjectType::Tree),
            "commit" => Ok(ObjectType::Commit),
            "tag" => Ok(ObjectType::Tag),
            _ => Err(GitError::Invalid(format!(
                "`{s}` is not a valid git object type"
            ))),
        }
    }

    /// Convert to the 3-bit pack header type code.
    pub fn to_u8(&self) -> u8 {
        match self {
            ObjectType::Commit => 1,
            ObjectType::Tree => 2,
            ObjectType::Blob => 3,
            ObjectType::Tag => 4,
            ObjectType::OffsetDelta => 6,
            ObjectType::HashDelta => 7,
        }
    }

    /// Decode a 3-bit pack header type code.
    pub fn from_u8(number: u8) -> Result<ObjectType, GitError> {
        match number {
            1 => Ok(ObjectType::Commit),
            2 => Ok(ObjectType::Tree),
            3 => Ok(ObjectType::Blob),
            4 => Ok(ObjectType::Tag),
            6 => Ok(ObjectType::OffsetDelta),
            7 => Ok(ObjectType::HashDelta),
            _ => Err(GitError::Invalid(format!(
                "invalid pack object type number: {number}"
            ))),
        }
    }

    /// True for the four base kinds; false for the two delta encodings.
    pub fn is_base(&self) -> bool {
        !matches!(self, ObjectType::OffsetDelta | ObjectType::HashDelta)
    }
}
