//! The content-addressed object store.
//!
//! Frames content with the canonical `"<type> <size>\0"` header, hashes it
//! into an id while streaming, and persists the zlib-deflated result through
//! a [`RawStore`] under `<xx>/<38-hex>`. Loading strips and validates the
//! header. Storing the same bytes twice is idempotent by construction.

use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;

use crate::{
    config::StoreConfig,
    errors::GitError,
    hash::{IdHasher, ObjectId},
    internal::{
        object::{
            GitObject, ObjectTrait, blob::Blob, commit::Commit, tag::Tag, tree::Tree,
            types::ObjectType,
        },
        zlib::Zlib,
    },
    storage::{ByteStream, raw::RawStore, stream_from_bytes, volatile::VolatileBuffer},
};

/// Loose-store key for an id: first hex byte as the bucket directory.
pub fn key_for(id: &ObjectId) -> String {
    let hex = id.to_string();
    format!("{}/{}", &hex[..2], &hex[2..])
}

/// Parse a loose-store key back into an id.
pub fn id_for_key(key: &str) -> Option<ObjectId> {
    let (bucket, rest) = key.split_once('/')?;
    if bucket.len() != 2 || rest.len() != 38 {
        return None;
    }
    ObjectId::from_str(&format!("{bucket}{rest}")).ok()
}

/// Content-addressed store over a raw backend, with the compression
/// capability carried explicitly.
pub struct ObjectStore {
    raw: Arc<dyn RawStore>,
    zlib: Zlib,
    volatile: VolatileBuffer,
}

impl ObjectStore {
    pub fn new(raw: Arc<dyn RawStore>, zlib: Zlib, config: &StoreConfig) -> Self {
        ObjectStore {
            raw,
            zlib,
            volatile: VolatileBuffer::new(config),
        }
    }

    /// Store content of unknown size: buffer first, then hash and persist.
    pub async fn store(
        &self,
        object_type: ObjectType,
        stream: ByteStream,
    ) -> Result<ObjectId, GitError> {
        let buffered = self.volatile.fill(stream).await?;
        let size = buffered.size();
        self.store_with_size(object_type, size, buffered.read().await?)
            .await
    }

    /// Store content whose size is declared up front. Fails with
    /// [`GitError::SizeMismatch`] when the stream length disagrees.
    pub async fn store_with_size(
        &self,
        object_type: ObjectType,
        size: u64,
        mut stream: ByteStream,
    ) -> Result<ObjectId, GitError> {
        let mut hasher = IdHasher::for_object(object_type, size);
        let mut content = Vec::with_capacity(size as usize);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            content.extend_from_slice(&chunk);
        }
        if content.len() as u64 != size {
            return Err(GitError::SizeMismatch {
                declared: size,
                actual: content.len() as u64,
            });
        }
        let id = hasher.finalize();

        let key = key_for(&id);
        if self.raw.has(&key).await? {
            // Content-addressed: same bytes, same id, nothing to do.
            return Ok(id);
        }

        let mut framed = Vec::with_capacity(content.len() + 32);
        framed.extend_from_slice(object_type.to_bytes());
        framed.push(b' ');
        framed.extend_from_slice(size.to_string().as_bytes());
        framed.push(0);
        framed.extend_from_slice(&content);
        let deflated = self.zlib.deflate(&framed)?;
        self.raw.store_bytes(&key, Bytes::from(deflated)).await?;
        Ok(id)
    }

    /// Store raw content held in memory.
    pub async fn store_raw(
        &self,
        object_type: ObjectType,
        content: &[u8],
    ) -> Result<ObjectId, GitError> {
        self.store_with_size(
            object_type,
            content.len() as u64,
            stream_from_bytes(Bytes::copy_from_slice(content)),
        )
        .await
    }

    /// Store a typed object.
    pub async fn store_object(&self, object: &impl ObjectTrait) -> Result<ObjectId, GitError> {
        self.store_raw(object.get_type(), &object.to_data()?).await
    }

    /// Load type and content.
    pub async fn load(&self, id: &ObjectId) -> Result<(ObjectType, Bytes), GitError> {
        let deflated = self
            .raw
            .load_bytes(&key_for(id))
            .await
            .map_err(|e| match e {
                GitError::NotFound(_) => GitError::object_not_found(id),
                other => other,
            })?;
        let framed = self.zlib.inflate(&deflated)?;
        let (object_type, size, header_len) = parse_header(&framed)?;
        let content = Bytes::from(framed).slice(header_len..);
        if content.len() as u64 != size {
            return Err(GitError::CorruptObject(format!(
                "object {id} header declares {size} bytes, payload has {}",
                content.len()
            )));
        }
        Ok((object_type, content))
    }

    /// Read only the header of an object, abandoning the rest of the stream.
    pub async fn header(&self, id: &ObjectId) -> Result<(ObjectType, u64), GitError> {
        let deflated = self
            .raw
            .load_bytes(&key_for(id))
            .await
            .map_err(|e| match e {
                GitError::NotFound(_) => GitError::object_not_found(id),
                other => other,
            })?;
        // `"<type> <size>\0"` always fits well within 64 bytes.
        let prefix = self.zlib.inflate_prefix(&deflated, 64)?;
        let (object_type, size, _) = parse_header(&prefix)?;
        Ok((object_type, size))
    }

    pub async fn has(&self, id: &ObjectId) -> Result<bool, GitError> {
        self.raw.has(&key_for(id)).await
    }

    pub async fn remove(&self, id: &ObjectId) -> Result<bool, GitError> {
        self.raw.remove(&key_for(id)).await
    }

    /// Every object id visible through the backend.
    pub async fn list(&self) -> Result<Vec<ObjectId>, GitError> {
        Ok(self
            .raw
            .keys()
            .await?
            .iter()
            .filter_map(|key| id_for_key(key))
            .collect())
    }

    /// Load any object into the typed model, verifying its id.
    pub async fn load_object(&self, id: &ObjectId) -> Result<GitObject, GitError> {
        let (object_type, content) = self.load(id).await?;
        let object = GitObject::parse(object_type, &content, *id)?;
        let actual = ObjectId::from_type_and_data(object_type, &content);
        if actual != *id {
            return Err(GitError::CorruptObject(format!(
                "object {id} re-hashes to {actual}"
            )));
        }
        Ok(object)
    }

    pub async fn load_commit(&self, id: &ObjectId) -> Result<Commit, GitError> {
        match self.load_object(id).await? {
            GitObject::Commit(commit) => Ok(commit),
            other => Err(GitError::Invalid(format!(
                "object {id} is a {}, expected commit",
                other.object_type()
            ))),
        }
    }

    pub async fn load_tree(&self, id: &ObjectId) -> Result<Tree, GitError> {
        match self.load_object(id).await? {
            GitObject::Tree(tree) => Ok(tree),
            other => Err(GitError::Invalid(format!(
                "object {id} is a {}, expected tree",
                other.object_type()
            ))),
        }
    }

    pub async fn load_blob(&self, id: &ObjectId) -> Result<Blob, GitError> {
        match self.load_object(id).await? {
            GitObject::Blob(blob) => Ok(blob),
            other => Err(GitError::Invalid(format!(
                "object {id} is a {}, expected blob",
                other.object_type()
            ))),
        }
    }

    pub async fn load_tag(&self, id: &ObjectId) -> Result<Tag, GitError> {
        match self.load_object(id).await? {
            GitObject::Tag(tag) => Ok(tag),
            other => Err(GitError::Invalid(format!(
                "object {id} is a {}, expected tag",
                other.object_type()
            ))),
        }
    }
}

fn parse_header(framed: &[u8]) -> Result<(ObjectType, u64, usize), GitError> {
    let nul = memchr::memchr(0, framed)
        .ok_or_else(|| GitError::CorruptObject("loose header missing NUL".to_string()))?;
    let header = &framed[..nul];
    let space = memchr::memchr(b' ', header)
        .ok_or_else(|| GitError::CorruptObject("loose header missing space".to_string()))?;
    let object_type = std::str::from_utf8(&header[..space])
        .ok()
        .and_then(|s| ObjectType::from_string(s).ok())
        .ok_or_else(|| GitError::CorruptObject("loose header has unknown type".to_string()))?;
    let size: u64 = std::str::from_utf8(&header[space + 1..])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| GitError::CorruptObject("loose header has invalid size".to_string()))?;
    Ok((object_type, size, nul + 1))
}
