//! The Blob object stores raw file content. It is the only object kind with
//! no internal structure: the codec is the identity function and the id is the
//! hash of the header plus the bytes.

use std::fmt::Display;

use crate::errors::GitError;
use crate::hash::ObjectId;
use crate::internal::object::ObjectTrait;
use crate::internal::object::types::ObjectType;

/// Opaque file content addressed by its hash.
#[derive(Eq, Debug, Clone)]
pub struct Blob {
    pub id: ObjectId,
    pub data: Vec<u8>,
}

impl PartialEq for Blob {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "blob {}", self.id)
    }
}

impl Blob {
    /// Build a blob from raw bytes, computing its id.
    pub fn from_content_bytes(data: Vec<u8>) -> Blob {
        let id = ObjectId::from_type_and_data(ObjectType::Blob, &data);
        Blob { id, data }
    }

    /// Build a blob from string content.
    pub fn from_content(content: &str) -> Blob {
        Blob::from_content_bytes(content.as_bytes().to_vec())
    }
}

impl ObjectTrait for Blob {
    fn from_bytes(data: &[u8], hash: ObjectId) -> Result<Self, GitError> {
        Ok(Blob {
            id: hash,
            data: data.to_vec(),
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Blob
    }

    fn get_size(&self) -> usize {
        self.data.len()
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        Ok(self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// "hello\n" hashes to the well-known git blob id.
    #[test]
    fn test_known_id() {
        let blob = Blob::from_content("hello\n");
        assert_eq!(
            blob.id.to_string(),
            "ce013625030ba8dba906f756967f9e9ca394464a"
        );
    }

    /// from_bytes + to_data is the identity.
    #[test]
    fn test_identity_codec() {
        let data = b"\x00\x01binary\xff".to_vec();
        let id = ObjectId::from_type_and_data(ObjectType::Blob, &data);
        let blob = Blob::from_bytes(&data, id).unwrap();
        assert_eq!(blob.to_data().unwrap(), data);
        assert_eq!(blob.object_hash().unwrap(), id);
        assert_eq!(blob.get_size(), data.len());
    }
}
