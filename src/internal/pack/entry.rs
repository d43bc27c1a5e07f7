//! Lightweight representation of a decoded Git object coming out of a pack
//! stream, with helpers to convert to/from strongly typed objects.

use std::hash::{Hash, Hasher};

use crate::{
    errors::GitError,
    hash::ObjectId,
    internal::object::{
        GitObject, ObjectTrait, blob::Blob, commit::Commit, tag::Tag, tree::Tree,
        types::ObjectType,
    },
};

///
/// Git object data from a pack file: fully resolved, never a delta.
///
#[derive(Eq, Clone, Debug)]
pub struct Entry {
    pub obj_type: ObjectType,
    pub data: Vec<u8>,
    pub hash: ObjectId,
    /// Length of the delta chain this entry was reconstructed through.
    pub chain_len: usize,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.obj_type == other.obj_type && self.hash == other.hash
    }
}

impl Hash for Entry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.obj_type.hash(state);
        self.hash.hash(state);
    }
}

impl Entry {
    /// Wrap raw content of a known type, computing the id.
    pub fn from_raw(obj_type: ObjectType, data: Vec<u8>) -> Entry {
        let hash = ObjectId::from_type_and_data(obj_type, &data);
        Entry {
            obj_type,
            data,
            hash,
            chain_len: 0,
        }
    }

    /// Decode into the strongly typed object model.
    pub fn to_object(&self) -> Result<GitObject, GitError> {
        GitObject::parse(self.obj_type, &self.data, self.hash)
    }
}

impl From<Blob> for Entry {
    fn from(value: Blob) -> Self {
        Self {
            obj_type: ObjectType::Blob,
            hash: value.id,
            data: value.data,
            chain_len: 0,
        }
    }
}

impl From<Commit> for Entry {
    fn from(value: Commit) -> Self {
        Self {
            obj_type: ObjectType::Commit,
            data: value.to_data().expect("commit serialization cannot fail"),
            hash: value.id,
            chain_len: 0,
        }
    }
}

impl From<Tree> for Entry {
    fn from(value: Tree) -> Self {
        Self {
            obj_type: ObjectType::Tree,
            data: value.to_data().expect("tree serialization cannot fail"),
            hash: value.id,
            chain_len: 0,
        }
    }
}

impl From<Tag> for Entry {
    fn from(value: Tag) -> Self {
        Self {
            obj_type: ObjectType::Tag,
            data: value.to_data().expect("tag serialization cannot fail"),
            hash: value.id,
            chain_len: 0,
        }
    }
}
