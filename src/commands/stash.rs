//! Stash: park the working copy on `refs/stash` and restore it later.
//!
//! A stash tip is a commit with two parents (HEAD and a snapshot of the
//! staging area) or three (plus an orphan commit holding untracked files).
//! Older stashes live in the reflog of `refs/stash`.

use std::collections::BTreeSet;

use bytes::Bytes;

use crate::{
    errors::GitError,
    hash::ObjectId,
    internal::object::commit::Commit,
    internal::object::signature::SignatureKind,
    internal::object::tree::TreeItemMode,
    internal::object::blob::Blob,
    merge::{MergeApplyOptions, apply_merge, classify_trees, flatten_tree},
    repository::{Repository, build_tree_from_entries},
    storage::raw::RawStore,
    worktree::{Worktree, snapshot},
};

const STASH_REF: &str = "refs/stash";

/// One row of `stash list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StashEntry {
    pub index: usize,
    pub id: ObjectId,
    pub message: String,
}

pub struct StashCommand<'a> {
    repo: &'a Repository,
    include_untracked: bool,
    restore_index: bool,
}

impl<'a> StashCommand<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        StashCommand {
            repo,
            include_untracked: false,
            restore_index: false,
        }
    }

    /// `push` also stashes untracked files as a third parent.
    pub fn include_untracked(mut self) -> Self {
        self.include_untracked = true;
        self
    }

    /// `apply`/`pop` also restore the staged state from the index parent.
    pub fn restore_index(mut self) -> Self {
        self.restore_index = true;
        self
    }

    /// Save the working copy and reset it to HEAD. Returns the stash commit.
    pub async fn push(self, message: Option<&str>) -> Result<ObjectId, GitError> {
        let head = self
            .repo
            .head_id()
            .await?
            .ok_or_else(|| GitError::NotFound("cannot stash without an initial commit".to_string()))?;
        let head_commit = self.repo.odb().load_commit(&head).await?;
        let head_tree = head_commit.tree_id;
        let branch = self
            .repo
            .current_branch()
            .await?
            .unwrap_or_else(|| "(no branch)".to_string());
        let label = format!("{branch}: {}", head_commit.subject());

        let mut staging = self.repo.staging().lock().await;
        if staging.has_conflicts() {
            return Err(GitError::Conflict(
                "cannot stash with unmerged paths".to_string(),
            ));
        }
        let index_tree = staging.write_tree(self.repo.odb()).await?;

        let signature = self.repo.signature(SignatureKind::Committer);
        let index_commit = Commit::new(
            signature.clone().with_kind(SignatureKind::Author),
            signature.clone(),
            index_tree,
            vec![head],
            &format!("index on {label}\n"),
        );
        let index_commit_id = self.repo.odb().store_object(&index_commit).await?;

        // Partition the worktree into tracked and untracked paths.
        let tracked: BTreeSet<String> = staging
            .entries(None)
            .into_iter()
            .map(|(path, _, _)| path)
            .chain(
                flatten_tree(self.repo.odb(), head_tree)
                    .await?
                    .into_keys(),
            )
            .collect();

        let mut tracked_rows: Vec<(String, TreeItemMode, ObjectId)> = Vec::new();
        let mut untracked_rows: Vec<(String, TreeItemMode, ObjectId)> = Vec::new();
        for (path, (mode, data)) in snapshot(self.repo.worktree()).await? {
            let blob = Blob::from_content_bytes(data.to_vec());
            self.repo.odb().store_object(&blob).await?;
            if tracked.contains(&path) {
                tracked_rows.push((path, mode, blob.id));
            } else {
                untracked_rows.push((path, mode, blob.id));
            }
        }
        let worktree_tree = build_tree_from_entries(self.repo.odb(), &tracked_rows).await?;

        let mut parents = vec![head, index_commit_id];
        if self.include_untracked && !untracked_rows.is_empty() {
            let untracked_tree =
                build_tree_from_entries(self.repo.odb(), &untracked_rows).await?;
            let untracked_commit = Commit::new(
                signature.clone().with_kind(SignatureKind::Author),
                signature.clone(),
                untracked_tree,
                vec![],
                &format!("untracked files on {label}\n"),
            );
            parents.push(self.repo.odb().store_object(&untracked_commit).await?);
        }

        let short = &head.to_string()[..7];
        let message = message
            .map(str::to_string)
            .unwrap_or_else(|| format!("WIP on {branch}: {short} {}", head_commit.subject()));
        let stash_commit = Commit::new(
            signature.clone().with_kind(SignatureKind::Author),
            signature,
            worktree_tree,
            parents,
            &message,
        );
        let stash_id = self.repo.odb().store_object(&stash_commit).await?;

        let log = self.repo.log_context(message);
        self.repo.refs().set(STASH_REF, stash_id, Some(&log)).await?;

        // Reset the working copy to HEAD.
        self.repo
            .write_tree_to_worktree(Some(worktree_tree), head_tree)
            .await?;
        if self.include_untracked {
            for (path, _, _) in &untracked_rows {
                self.repo.worktree().remove(path).await?;
            }
        }
        staging.read_tree(self.repo.odb(), head_tree).await?;
        self.repo.save_staging(&staging).await?;

        Ok(stash_id)
    }

    /// Stashes, newest first.
    pub async fn list(self) -> Result<Vec<StashEntry>, GitError> {
        Ok(self
            .repo
            .refs()
            .reflog(STASH_REF)
            .await?
            .into_iter()
            .enumerate()
            .map(|(index, entry)| StashEntry {
                index,
                id: entry.new_id,
                message: entry.message,
            })
            .collect())
    }

    /// Reapply stash `index` onto the current HEAD; conflicts surface as
    /// [`GitError::MergeConflict`] with stages populated.
    pub async fn apply(self, index: usize) -> Result<(), GitError> {
        let restore_index = self.restore_index;
        let stash_id = self.entry_id(index).await?;
        let stash = self.repo.odb().load_commit(&stash_id).await?;
        let stash_base = *stash.parent_ids.first().ok_or_else(|| {
            GitError::CorruptObject(format!("stash commit {stash_id} has no parents"))
        })?;

        let head = self
            .repo
            .head_id()
            .await?
            .ok_or_else(|| GitError::NotFound("HEAD has no commits yet".to_string()))?;
        let base_tree = self.repo.tree_of(stash_base).await?;
        let our_tree = self.repo.tree_of(head).await?;

        let entries =
            classify_trees(self.repo.odb(), base_tree, our_tree, stash.tree_id).await?;
        let mut staging = self.repo.staging().lock().await;
        let options = MergeApplyOptions {
            ours_label: "HEAD",
            theirs_label: "stash",
            write_markers: true,
            rr_cache: None,
        };
        let outcome = apply_merge(
            self.repo.odb(),
            &mut staging,
            self.repo.worktree(),
            &entries,
            &options,
        )
        .await?;

        // Untracked files saved as a third parent come back as plain files.
        if let Some(untracked_commit) = stash.parent_ids.get(2) {
            let untracked_tree = self.repo.tree_of(*untracked_commit).await?;
            for (path, (mode, blob_id)) in
                flatten_tree(self.repo.odb(), untracked_tree).await?
            {
                if self.repo.worktree().stat(&path).await?.is_none() {
                    let blob = self.repo.odb().load_blob(&blob_id).await?;
                    self.repo
                        .worktree()
                        .write_blob(&path, Bytes::from(blob.data), mode)
                        .await?;
                }
            }
        }

        if !outcome.conflicts.is_empty() {
            self.repo.save_staging(&staging).await?;
            return Err(GitError::MergeConflict(outcome.conflicts));
        }

        if restore_index
            && let Some(index_commit) = stash.parent_ids.get(1)
        {
            let index_tree = self.repo.tree_of(*index_commit).await?;
            staging.read_tree(self.repo.odb(), index_tree).await?;
        }
        self.repo.save_staging(&staging).await?;
        Ok(())
    }

    /// Apply then drop.
    pub async fn pop(self, index: usize) -> Result<(), GitError> {
        let repo = self.repo;
        let restore_index = self.restore_index;
        let mut apply = StashCommand::new(repo);
        if restore_index {
            apply = apply.restore_index();
        }
        apply.apply(index).await?;
        StashCommand::new(repo).drop_entry(index).await
    }

    /// Remove stash `index` from the reflog, retargeting `refs/stash`.
    pub async fn drop_entry(self, index: usize) -> Result<(), GitError> {
        let entries = self.repo.refs().reflog(STASH_REF).await?;
        if index >= entries.len() {
            return Err(GitError::NotFound(format!("stash@{{{index}}}")));
        }

        // The log is stored oldest-first; newest-first index i maps to line
        // len-1-i.
        let key = format!("logs/{STASH_REF}");
        let data = self.repo.git_store().load_bytes(&key).await?;
        let mut lines: Vec<&[u8]> = data
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .collect();
        let drop_at = lines.len() - 1 - index;
        lines.remove(drop_at);

        if lines.is_empty() {
            self.repo.refs().delete(STASH_REF).await?;
            return Ok(());
        }

        let mut rebuilt = Vec::with_capacity(data.len());
        for line in &lines {
            rebuilt.extend_from_slice(line);
            rebuilt.push(b'\n');
        }
        self.repo
            .git_store()
            .store_bytes(&key, Bytes::from(rebuilt))
            .await?;

        let remaining = self.repo.refs().reflog(STASH_REF).await?;
        let newest = remaining
            .first()
            .expect("non-empty reflog has a newest entry");
        self.repo.refs().set(STASH_REF, newest.new_id, None).await?;
        Ok(())
    }

    /// Remove every stash.
    pub async fn clear(self) -> Result<(), GitError> {
        self.repo.refs().delete(STASH_REF).await?;
        Ok(())
    }

    async fn entry_id(&self, index: usize) -> Result<ObjectId, GitError> {
        let entries = self.repo.refs().reflog(STASH_REF).await?;
        entries
            .get(index)
            .map(|entry| entry.new_id)
            .ok_or_else(|| GitError::NotFound(format!("stash@{{{index}}}")))
    }
}
