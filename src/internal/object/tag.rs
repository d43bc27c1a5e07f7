//! The annotated Tag object marks a specific object (almost always a commit)
//! with a name, an optional tagger identity, and a message. Lightweight tags
//! are plain references and never produce a tag object.

use std::fmt::Display;

use bstr::{BString, ByteSlice};

use crate::errors::GitError;
use crate::hash::ObjectId;
use crate::internal::object::ObjectTrait;
use crate::internal::object::commit::{ExtraHeader, parse_id_value, split_headers};
use crate::internal::object::signature::Signature;
use crate::internal::object::types::ObjectType;

/// An annotated tag: target object id and type, tag name, optional tagger,
/// optional extra headers, message (which carries any PGP signature block).
#[derive(Eq, Debug, Clone)]
pub struct Tag {
    pub id: ObjectId,
    pub object_id: ObjectId,
    pub object_type: ObjectType,
    pub tag_name: String,
    pub tagger: Option<Signature>,
    pub extra_headers: Vec<ExtraHeader>,
    pub message: BString,
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "object {}", self.object_id)?;
        writeln!(f, "type {}", self.object_type)?;
        writeln!(f, "tag {}", self.tag_name)?;
        if let Some(tagger) = &self.tagger {
            writeln!(f, "tagger {tagger}")?;
        }
        writeln!(f)?;
        writeln!(f, "{}", self.message)
    }
}

impl Tag {
    pub fn new(
        object_id: ObjectId,
        object_type: ObjectType,
        tag_name: impl Into<String>,
        tagger: Option<Signature>,
        message: &str,
    ) -> Tag {
        let mut tag = Tag {
            id: ObjectId::default(),
            object_id,
            object_type,
            tag_name: tag_name.into(),
            tagger,
            extra_headers: vec![],
            message: BString::from(message),
        };
        tag.id = tag.object_hash().expect("tag serialization cannot fail");
        tag
    }
}

impl ObjectTrait for Tag {
    fn from_bytes(data: &[u8], hash: ObjectId) -> Result<Self, GitError> {
        let (headers, message) = split_headers(data)?;
        let mut object_id = None;
        let mut object_type = None;
        let mut tag_name = None;
        let mut tagger = None;
        let mut extra_headers = Vec::new();

        for (name, value) in headers {
            match name.as_str() {
                "object" => object_id = Some(parse_id_value(&value)?),
                "type" => {
                    let text = value.to_str().map_err(|_| {
                        GitError::CorruptObject("tag type is not UTF-8".to_string())
                    })?;
                    object_type = Some(ObjectType::from_string(text).map_err(|e| {
                        GitError::CorruptObject(format!("tag target type: {e}"))
                    })?);
                }
                "tag" => {
                    tag_name = Some(
                        value
                            .to_str()
                            .map_err(|_| {
                                GitError::CorruptObject("tag name is not UTF-8".to_string())
                            })?
                            .to_string(),
                    );
                }
                "tagger" => {
                    let mut line = b"tagger ".to_vec();
                    line.extend_from_slice(&value);
                    tagger = Some(Signature::from_data(line)?);
                }
                _ => extra_headers.push(ExtraHeader { name, value }),
            }
        }

        Ok(Tag {
            id: hash,
            object_id: object_id.ok_or_else(|| {
                GitError::CorruptObject("tag missing object header".to_string())
            })?,
            object_type: object_type
                .ok_or_else(|| GitError::CorruptObject("tag missing type header".to_string()))?,
            tag_name: tag_name
                .ok_or_else(|| GitError::CorruptObject("tag missing tag header".to_string()))?,
            tagger,
            extra_headers,
            message,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tag
    }

    fn get_size(&self) -> usize {
        self.message.len()
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::new();

        data.extend_from_slice(b"object ");
        data.extend_from_slice(self.object_id.to_string().as_bytes());
        data.push(b'\n');

        data.extend_from_slice(b"type ");
        data.extend_from_slice(self.object_type.to_bytes());
        data.push(b'\n');

        data.extend_from_slice(b"tag ");
        data.extend_from_slice(self.tag_name.as_bytes());
        data.push(b'\n');

        if let Some(tagger) = &self.tagger {
            data.extend(tagger.to_data()?);
            data.push(b'\n');
        }

        for header in &self.extra_headers {
            header.encode_into(&mut data);
        }

        data.push(b'\n');
        data.extend_from_slice(&self.message);

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use crate::internal::object::signature::SignatureKind;

    /// An annotated tag round-trips byte-for-byte.
    #[test]
    fn test_round_trip() {
        let target = ObjectId::from_str("009e87432e2767c0b40443fce48ad6bdcd21f4f5").unwrap();
        let tagger = Signature::new(SignatureKind::Tagger, "A", "a@x", 1700000000, "+0000");
        let tag = Tag::new(target, ObjectType::Commit, "v1.0", Some(tagger), "release\n");

        let data = tag.to_data().unwrap();
        let reparsed = Tag::from_bytes(&data, tag.id).unwrap();
        assert_eq!(reparsed.object_id, target);
        assert_eq!(reparsed.object_type, ObjectType::Commit);
        assert_eq!(reparsed.tag_name, "v1.0");
        assert!(reparsed.tagger.is_some());
        assert_eq!(reparsed.object_hash().unwrap(), tag.id);
    }

    /// A tagger-less tag (old git allowed it) still round-trips.
    #[test]
    fn test_without_tagger() {
        let target = ObjectId::from_str("4b825dc642cb6eb9a060e54bf8d69288fbee4904").unwrap();
        let tag = Tag::new(target, ObjectType::Tree, "tree-tag", None, "");
        let data = tag.to_data().unwrap();
        let reparsed = Tag::from_bytes(&data, tag.id).unwrap();
        assert!(reparsed.tagger.is_none());
        assert_eq!(reparsed.object_hash().unwrap(), tag.id);
    }

    /// Missing mandatory headers are rejected.
    #[test]
    fn test_rejects_missing_headers() {
        let hash = ObjectId::default();
        assert!(Tag::from_bytes(b"type commit\ntag v1\n\nmsg", hash).is_err());
        assert!(
            Tag::from_bytes(
                b"object 4b825dc642cb6eb9a060e54bf8d69288fbee4904\ntag v1\n\nmsg",
                hash
            )
            .is_err()
        );
    }
}
