//! Opaque key → byte-stream stores.
//!
//! Everything the repository persists outside of packs flows through
//! [`RawStore`]: loose objects, references, reflogs, the staging index, the
//! resolution cache. Implementations here cover memory, the filesystem (with
//! temp-file + rename writes), a composite with read-only fallbacks, and the
//! pack-directory adapter in [`super::packdir`].

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::io::AsyncWriteExt;

use crate::errors::GitError;

use super::{ByteStream, collect_stream, stream_from_bytes};

/// Optional byte range for partial reads; `end` is exclusive.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    fn slice(&self, data: &Bytes) -> Bytes {
        let len = data.len() as u64;
        let start = self.start.min(len) as usize;
        let end = self.end.unwrap_or(len).min(len) as usize;
        if start >= end {
            return Bytes::new();
        }
        data.slice(start..end)
    }
}

/// Opaque streaming key/value store.
///
/// `store` is write-through; there are no transactions at this layer.
#[async_trait]
pub trait RawStore: Send + Sync {
    async fn store(&self, key: &str, data: ByteStream) -> Result<(), GitError>;

    async fn load(&self, key: &str, range: Option<ByteRange>) -> Result<ByteStream, GitError>;

    async fn has(&self, key: &str) -> Result<bool, GitError>;

    /// Remove `key`, reporting whether it existed.
    async fn remove(&self, key: &str) -> Result<bool, GitError>;

    async fn size(&self, key: &str) -> Result<u64, GitError>;

    /// Every key in the store, sorted.
    async fn keys(&self) -> Result<Vec<String>, GitError>;

    /// Convenience: store a single buffer.
    async fn store_bytes(&self, key: &str, data: Bytes) -> Result<(), GitError> {
        self.store(key, stream_from_bytes(data)).await
    }

    /// Convenience: load a key fully into memory.
    async fn load_bytes(&self, key: &str) -> Result<Bytes, GitError> {
        let stream = self.load(key, None).await?;
        collect_stream(stream).await
    }
}

/// In-memory raw store backed by a concurrent map.
#[derive(Default)]
pub struct MemoryStore {
    map: DashMap<String, Bytes>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RawStore for MemoryStore {
    async fn store(&self, key: &str, data: ByteStream) -> Result<(), GitError> {
        let bytes = collect_stream(data).await?;
        self.map.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn load(&self, key: &str, range: Option<ByteRange>) -> Result<ByteStream, GitError> {
        let data = self
            .map
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| GitError::NotFound(format!("key {key}")))?;
        let data = match range {
            Some(range) => range.slice(&data),
            None => data,
        };
        Ok(stream_from_bytes(data))
    }

    async fn has(&self, key: &str) -> Result<bool, GitError> {
        Ok(self.map.contains_key(key))
    }

    async fn remove(&self, key: &str) -> Result<bool, GitError> {
        Ok(self.map.remove(key).is_some())
    }

    async fn size(&self, key: &str) -> Result<u64, GitError> {
        self.map
            .get(key)
            .map(|entry| entry.value().len() as u64)
            .ok_or_else(|| GitError::NotFound(format!("key {key}")))
    }

    async fn keys(&self) -> Result<Vec<String>, GitError> {
        let mut keys: Vec<String> = self.map.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }
}

/// Filesystem raw store rooted at a directory. Keys are `/`-separated
/// POSIX-style paths; writes go to a temp file in the same directory and are
/// renamed into place so readers never observe partial content.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, GitError> {
        let relative = Path::new(key);
        for component in relative.components() {
            match component {
                Component::Normal(_) => {}
                _ => {
                    return Err(GitError::Invalid(format!(
                        "key `{key}` escapes the store root"
                    )));
                }
            }
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl RawStore for FileStore {
    async fn store(&self, key: &str, data: ByteStream) -> Result<(), GitError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write-then-rename keeps concurrent readers off partial files.
        let tmp_path = path.with_extension(format!("tmp-{}", std::process::id()));
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        let bytes = collect_stream(data).await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn load(&self, key: &str, range: Option<ByteRange>) -> Result<ByteStream, GitError> {
        let path = self.path_for(key)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => Bytes::from(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GitError::NotFound(format!("key {key}")));
            }
            Err(e) => return Err(e.into()),
        };
        let data = match range {
            Some(range) => range.slice(&data),
            None => data,
        };
        Ok(stream_from_bytes(data))
    }

    async fn has(&self, key: &str) -> Result<bool, GitError> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn remove(&self, key: &str) -> Result<bool, GitError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn size(&self, key: &str) -> Result<u64, GitError> {
        let path = self.path_for(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(GitError::NotFound(format!("key {key}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, GitError> {
        let mut keys = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    stack.push(path);
                } else if let Ok(relative) = path.strip_prefix(&self.root) {
                    let key = relative
                        .components()
                        .filter_map(|c| c.as_os_str().to_str())
                        .collect::<Vec<_>>()
                        .join("/");
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// A primary read/write store with an ordered list of read-only fallbacks.
///
/// `store` and `remove` touch the primary only; `load`, `has` and `size`
/// consult the primary then each fallback in turn; `keys()` is the
/// deduplicated union.
pub struct CompositeStore {
    primary: std::sync::Arc<dyn RawStore>,
    fallbacks: Vec<std::sync::Arc<dyn RawStore>>,
}

impl CompositeStore {
    pub fn new(
        primary: std::sync::Arc<dyn RawStore>,
        fallbacks: Vec<std::sync::Arc<dyn RawStore>>,
    ) -> Self {
        CompositeStore { primary, fallbacks }
    }
}

#[async_trait]
impl RawStore for CompositeStore {
    async fn store(&self, key: &str, data: ByteStream) -> Result<(), GitError> {
        self.primary.store(key, data).await
    }

    async fn load(&self, key: &str, range: Option<ByteRange>) -> Result<ByteStream, GitError> {
        match self.primary.load(key, range).await {
            Err(GitError::NotFound(_)) => {}
            other => return other,
        }
        for fallback in &self.fallbacks {
            match fallback.load(key, range).await {
                Err(GitError::NotFound(_)) => continue,
                other => return other,
            }
        }
        Err(GitError::NotFound(format!("key {key}")))
    }

    async fn has(&self, key: &str) -> Result<bool, GitError> {
        if self.primary.has(key).await? {
            return Ok(true);
        }
        for fallback in &self.fallbacks {
            if fallback.has(key).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn remove(&self, key: &str) -> Result<bool, GitError> {
        self.primary.remove(key).await
    }

    async fn size(&self, key: &str) -> Result<u64, GitError> {
        match self.primary.size(key).await {
            Err(GitError::NotFound(_)) => {}
            other => return other,
        }
        for fallback in &self.fallbacks {
            match fallback.size(key).await {
                Err(GitError::NotFound(_)) => continue,
                other => return other,
            }
        }
        Err(GitError::NotFound(format!("key {key}")))
    }

    async fn keys(&self) -> Result<Vec<String>, GitError> {
        let mut all = BTreeSet::new();
        all.extend(self.primary.keys().await?);
        for fallback in &self.fallbacks {
            all.extend(fallback.keys().await?);
        }
        Ok(all.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    /// Memory store basic operations.
    #[tokio::test]
    async fn memory_store_basics() {
        let store = MemoryStore::new();
        store
            .store_bytes("a/b", Bytes::from_static(b"hello"))
            .await
            .unwrap();
        assert!(store.has("a/b").await.unwrap());
        assert_eq!(store.size("a/b").await.unwrap(), 5);
        assert_eq!(store.load_bytes("a/b").await.unwrap().as_ref(), b"hello");
        assert!(store.remove("a/b").await.unwrap());
        assert!(!store.remove("a/b").await.unwrap());
        assert!(matches!(
            store.load_bytes("a/b").await,
            Err(GitError::NotFound(_))
        ));
    }

    /// Range loads honour start and exclusive end.
    #[tokio::test]
    async fn range_reads() {
        let store = MemoryStore::new();
        store
            .store_bytes("k", Bytes::from_static(b"0123456789"))
            .await
            .unwrap();
        let mid = store
            .load(
                "k",
                Some(ByteRange {
                    start: 2,
                    end: Some(5),
                }),
            )
            .await
            .unwrap();
        assert_eq!(collect_stream(mid).await.unwrap().as_ref(), b"234");

        let tail = store
            .load("k", Some(ByteRange { start: 7, end: None }))
            .await
            .unwrap();
        assert_eq!(collect_stream(tail).await.unwrap().as_ref(), b"789");
    }

    /// File store round-trips through disk with nested keys.
    #[tokio::test]
    async fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store
            .store_bytes("objects/ab/cdef", Bytes::from_static(b"payload"))
            .await
            .unwrap();
        assert_eq!(
            store.load_bytes("objects/ab/cdef").await.unwrap().as_ref(),
            b"payload"
        );
        assert_eq!(store.keys().await.unwrap(), vec!["objects/ab/cdef"]);
        assert!(store.remove("objects/ab/cdef").await.unwrap());
    }

    /// Escaping keys are rejected.
    #[tokio::test]
    async fn file_store_rejects_escape() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.load_bytes("../outside").await.is_err());
        assert!(store.load_bytes("/absolute").await.is_err());
    }

    /// Composite: writes hit the primary, reads fall back, keys union.
    #[tokio::test]
    async fn composite_semantics() {
        let primary = Arc::new(MemoryStore::new());
        let fallback = Arc::new(MemoryStore::new());
        fallback
            .store_bytes("shared", Bytes::from_static(b"from-fallback"))
            .await
            .unwrap();
        fallback
            .store_bytes("only-fallback", Bytes::from_static(b"x"))
            .await
            .unwrap();

        let composite = CompositeStore::new(primary.clone(), vec![fallback.clone()]);
        composite
            .store_bytes("shared", Bytes::from_static(b"from-primary"))
            .await
            .unwrap();

        // Primary shadows the fallback.
        assert_eq!(
            composite.load_bytes("shared").await.unwrap().as_ref(),
            b"from-primary"
        );
        assert_eq!(
            composite.load_bytes("only-fallback").await.unwrap().as_ref(),
            b"x"
        );

        // remove only touches the primary; the fallback copy shines through.
        assert!(composite.remove("shared").await.unwrap());
        assert_eq!(
            composite.load_bytes("shared").await.unwrap().as_ref(),
            b"from-fallback"
        );

        let keys = composite.keys().await.unwrap();
        assert_eq!(keys, vec!["only-fallback", "shared"]);
    }
}
