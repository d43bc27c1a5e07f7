//! The worktree abstraction: a file namespace that checkout writes through
//! and status reads through. Two implementations: an in-memory map and a
//! directory on disk.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::{errors::GitError, internal::object::tree::TreeItemMode};

/// What a path is, as reported by [`Worktree::stat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Dir,
    Symlink,
}

/// Stat result for a worktree path.
#[derive(Debug, Clone, Copy)]
pub struct WorktreeStat {
    pub kind: FileKind,
    pub size: u64,
    pub mtime: i64,
}

/// A file namespace addressed by `/`-separated relative paths.
#[async_trait]
pub trait Worktree: Send + Sync {
    /// Every file path (not directories), sorted.
    async fn list(&self) -> Result<Vec<String>, GitError>;

    async fn read_blob(&self, path: &str) -> Result<Bytes, GitError>;

    async fn write_blob(&self, path: &str, data: Bytes, mode: TreeItemMode)
    -> Result<(), GitError>;

    /// Remove a path, reporting whether it existed. Empty parent directories
    /// are pruned on file backends.
    async fn remove(&self, path: &str) -> Result<bool, GitError>;

    async fn stat(&self, path: &str) -> Result<Option<WorktreeStat>, GitError>;

    /// The file mode recorded for a path, when the backend can tell.
    async fn mode_of(&self, path: &str) -> Result<Option<TreeItemMode>, GitError>;
}

/// In-memory worktree.
#[derive(Default)]
pub struct MemoryWorktree {
    files: DashMap<String, (TreeItemMode, Bytes)>,
}

impl MemoryWorktree {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Worktree for MemoryWorktree {
    async fn list(&self) -> Result<Vec<String>, GitError> {
        let mut paths: Vec<String> = self.files.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        Ok(paths)
    }

    async fn read_blob(&self, path: &str) -> Result<Bytes, GitError> {
        self.files
            .get(path)
            .map(|e| e.value().1.clone())
            .ok_or_else(|| GitError::NotFound(format!("worktree path {path}")))
    }

    async fn write_blob(
        &self,
        path: &str,
        data: Bytes,
        mode: TreeItemMode,
    ) -> Result<(), GitError> {
        if mode == TreeItemMode::Commit {
            return Err(GitError::Unsupported(
                "cannot write submodule entries".to_string(),
            ));
        }
        self.files.insert(path.to_string(), (mode, data));
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<bool, GitError> {
        Ok(self.files.remove(path).is_some())
    }

    async fn stat(&self, path: &str) -> Result<Option<WorktreeStat>, GitError> {
        Ok(self.files.get(path).map(|e| WorktreeStat {
            kind: match e.value().0 {
                TreeItemMode::Link => FileKind::Symlink,
                _ => FileKind::File,
            },
            size: e.value().1.len() as u64,
            mtime: 0,
        }))
    }

    async fn mode_of(&self, path: &str) -> Result<Option<TreeItemMode>, GitError> {
        Ok(self.files.get(path).map(|e| e.value().0))
    }
}

/// Worktree over a directory on disk.
pub struct FileWorktree {
    root: PathBuf,
}

impl FileWorktree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileWorktree { root: root.into() }
    }

    fn path_for(&self, path: &str) -> Result<PathBuf, GitError> {
        let relative = Path::new(path);
        for component in relative.components() {
            match component {
                Component::Normal(name) => {
                    if name == ".git" {
                        return Err(GitError::Invalid(
                            "worktree paths may not enter .git".to_string(),
                        ));
                    }
                }
                _ => {
                    return Err(GitError::Invalid(format!(
                        "worktree path `{path}` escapes the root"
                    )));
                }
            }
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl Worktree for FileWorktree {
    async fn list(&self) -> Result<Vec<String>, GitError> {
        let mut paths = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_name() == ".git" {
                    continue;
                }
                if entry.file_type().await?.is_dir() {
                    stack.push(path);
                } else if let Ok(relative) = path.strip_prefix(&self.root) {
                    let joined = relative
                        .components()
                        .filter_map(|c| c.as_os_str().to_str())
                        .collect::<Vec<_>>()
                        .join("/");
                    paths.push(joined);
                }
            }
        }
        paths.sort();
        Ok(paths)
    }

    async fn read_blob(&self, path: &str) -> Result<Bytes, GitError> {
        let full = self.path_for(path)?;
        #[cfg(unix)]
        {
            let meta = tokio::fs::symlink_metadata(&full).await;
            if let Ok(meta) = meta
                && meta.file_type().is_symlink()
            {
                let target = tokio::fs::read_link(&full).await?;
                return Ok(Bytes::from(
                    target.to_string_lossy().into_owned().into_bytes(),
                ));
            }
        }
        match tokio::fs::read(&full).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(GitError::NotFound(format!("worktree path {path}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_blob(
        &self,
        path: &str,
        data: Bytes,
        mode: TreeItemMode,
    ) -> Result<(), GitError> {
        if mode == TreeItemMode::Commit {
            return Err(GitError::Unsupported(
                "cannot write submodule entries".to_string(),
            ));
        }
        let full = self.path_for(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        #[cfg(unix)]
        if mode == TreeItemMode::Link {
            let target = String::from_utf8_lossy(&data).into_owned();
            let _ = tokio::fs::remove_file(&full).await;
            tokio::fs::symlink(target, &full).await?;
            return Ok(());
        }

        tokio::fs::write(&full, &data).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = if mode == TreeItemMode::BlobExecutable {
                std::fs::Permissions::from_mode(0o755)
            } else {
                std::fs::Permissions::from_mode(0o644)
            };
            tokio::fs::set_permissions(&full, perms).await?;
        }
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<bool, GitError> {
        let full = self.path_for(path)?;
        let removed = match tokio::fs::remove_file(&full).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        // Prune now-empty parents up to the root.
        let mut parent = full.parent().map(Path::to_path_buf);
        while let Some(dir) = parent {
            if dir == self.root || tokio::fs::remove_dir(&dir).await.is_err() {
                break;
            }
            parent = dir.parent().map(Path::to_path_buf);
        }
        Ok(removed)
    }

    async fn stat(&self, path: &str) -> Result<Option<WorktreeStat>, GitError> {
        let full = self.path_for(path)?;
        match tokio::fs::symlink_metadata(&full).await {
            Ok(meta) => {
                let kind = if meta.file_type().is_symlink() {
                    FileKind::Symlink
                } else if meta.is_dir() {
                    FileKind::Dir
                } else {
                    FileKind::File
                };
                let mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0);
                Ok(Some(WorktreeStat {
                    kind,
                    size: meta.len(),
                    mtime,
                }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn mode_of(&self, path: &str) -> Result<Option<TreeItemMode>, GitError> {
        let full = self.path_for(path)?;
        match tokio::fs::symlink_metadata(&full).await {
            Ok(meta) => {
                if meta.file_type().is_symlink() {
                    return Ok(Some(TreeItemMode::Link));
                }
                if meta.is_dir() {
                    return Ok(Some(TreeItemMode::Tree));
                }
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    if meta.permissions().mode() & 0o111 != 0 {
                        return Ok(Some(TreeItemMode::BlobExecutable));
                    }
                }
                Ok(Some(TreeItemMode::Blob))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Flatten a worktree into path → (mode, content) for diffing against trees.
pub async fn snapshot(
    worktree: &dyn Worktree,
) -> Result<BTreeMap<String, (TreeItemMode, Bytes)>, GitError> {
    let mut out = BTreeMap::new();
    for path in worktree.list().await? {
        let data = worktree.read_blob(&path).await?;
        let mode = worktree
            .mode_of(&path)
            .await?
            .unwrap_or(TreeItemMode::Blob);
        out.insert(path, (mode, data));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Memory worktree basic CRUD.
    #[tokio::test]
    async fn memory_worktree_crud() {
        let tree = MemoryWorktree::new();
        tree.write_blob("a/b.txt", Bytes::from_static(b"data"), TreeItemMode::Blob)
            .await
            .unwrap();
        assert_eq!(tree.list().await.unwrap(), vec!["a/b.txt"]);
        assert_eq!(tree.read_blob("a/b.txt").await.unwrap().as_ref(), b"data");
        assert_eq!(
            tree.mode_of("a/b.txt").await.unwrap(),
            Some(TreeItemMode::Blob)
        );
        assert!(tree.stat("a/b.txt").await.unwrap().is_some());
        assert!(tree.remove("a/b.txt").await.unwrap());
        assert!(!tree.remove("a/b.txt").await.unwrap());
    }

    /// File worktree round-trips nested paths and prunes empty directories.
    #[tokio::test]
    async fn file_worktree_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let tree = FileWorktree::new(dir.path());

        tree.write_blob(
            "deep/nested/file.txt",
            Bytes::from_static(b"content"),
            TreeItemMode::Blob,
        )
        .await
        .unwrap();
        assert_eq!(tree.list().await.unwrap(), vec!["deep/nested/file.txt"]);
        assert_eq!(
            tree.read_blob("deep/nested/file.txt").await.unwrap().as_ref(),
            b"content"
        );

        assert!(tree.remove("deep/nested/file.txt").await.unwrap());
        assert!(!dir.path().join("deep").exists());
    }

    /// The .git directory is invisible to listing and unreachable by path.
    #[tokio::test]
    async fn git_dir_is_off_limits() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), b"ref: x").unwrap();
        let tree = FileWorktree::new(dir.path());

        assert!(tree.list().await.unwrap().is_empty());
        assert!(tree.read_blob(".git/HEAD").await.is_err());
        assert!(tree.read_blob("../escape").await.is_err());
    }

    /// Executable mode survives on unix.
    #[cfg(unix)]
    #[tokio::test]
    async fn executable_mode() {
        let dir = tempfile::tempdir().unwrap();
        let tree = FileWorktree::new(dir.path());
        tree.write_blob(
            "run.sh",
            Bytes::from_static(b"#!/bin/sh\n"),
            TreeItemMode::BlobExecutable,
        )
        .await
        .unwrap();
        assert_eq!(
            tree.mode_of("run.sh").await.unwrap(),
            Some(TreeItemMode::BlobExecutable)
        );
    }

    /// Submodule writes are refused.
    #[tokio::test]
    async fn submodule_write_refused() {
        let tree = MemoryWorktree::new();
        assert!(matches!(
            tree.write_blob("sub", Bytes::new(), TreeItemMode::Commit).await,
            Err(GitError::Unsupported(_))
        ));
    }
}
