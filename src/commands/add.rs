//! Stage worktree paths: hash their content into blobs and record them at
//! stage 0.

use crate::{
    errors::GitError,
    hash::ObjectId,
    internal::index::StageEntry,
    internal::object::blob::Blob,
    repository::Repository,
    worktree::Worktree,
};

pub struct AddCommand<'a> {
    repo: &'a Repository,
    paths: Vec<String>,
    all: bool,
}

impl<'a> AddCommand<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        AddCommand {
            repo,
            paths: Vec::new(),
            all: false,
        }
    }

    /// Stage one path; may be called repeatedly.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.paths.push(path.into());
        self
    }

    /// Stage every worktree file and record deletions of staged paths that
    /// vanished.
    pub fn all(mut self) -> Self {
        self.all = true;
        self
    }

    /// Returns the blob ids staged, in input order.
    pub async fn call(self) -> Result<Vec<ObjectId>, GitError> {
        let worktree = self.repo.worktree();
        let mut staging = self.repo.staging().lock().await;

        let paths = if self.all {
            let mut paths = worktree.list().await?;
            // Staged paths that vanished from the worktree become deletions.
            for (path, stage, _) in staging.entries(None) {
                if stage == 0 && worktree.stat(&path).await?.is_none() {
                    staging.remove(&path);
                }
            }
            paths.sort();
            paths
        } else {
            self.paths
        };

        let mut staged_ids = Vec::with_capacity(paths.len());
        for path in &paths {
            let Some(stat) = worktree.stat(path).await? else {
                if staging.remove(path) {
                    continue;
                }
                return Err(GitError::NotFound(format!(
                    "pathspec `{path}` did not match any files"
                )));
            };
            let data = worktree.read_blob(path).await?;
            let mode = worktree
                .mode_of(path)
                .await?
                .unwrap_or(crate::internal::object::tree::TreeItemMode::Blob);
            let blob = Blob::from_content_bytes(data.to_vec());
            self.repo.odb().store_object(&blob).await?;

            let mut entry = StageEntry::new(mode, blob.id);
            entry.size = stat.size as u32;
            entry.mtime = stat.mtime as u32;
            staging.add(path, entry);
            staged_ids.push(blob.id);
        }

        self.repo.save_staging(&staging).await?;
        Ok(staged_ids)
    }
}
