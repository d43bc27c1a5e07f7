//! Merge another head into the current branch: fast-forward when possible,
//! three-way tree merge otherwise.

use bytes::Bytes;

use crate::{
    errors::GitError,
    hash::ObjectId,
    history,
    merge::{MergeApplyOptions, apply_merge, classify_trees},
    repository::Repository,
    storage::raw::RawStore,
};

/// Outcome of a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStatus {
    /// Their head was already reachable from ours.
    AlreadyUpToDate,
    /// Our head moved forward to theirs without a merge commit.
    FastForward(ObjectId),
    /// A merge commit was created.
    Merged(ObjectId),
    /// The merged tree is staged but, by request, not committed.
    MergedNotCommitted,
    /// Conflicts were staged (stages 1/2/3); paths listed.
    Conflicting(Vec<String>),
}

pub struct MergeCommand<'a> {
    repo: &'a Repository,
    theirs: String,
    no_ff: bool,
    no_commit: bool,
    message: Option<String>,
}

impl<'a> MergeCommand<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        MergeCommand {
            repo,
            theirs: String::new(),
            no_ff: false,
            no_commit: false,
            message: None,
        }
    }

    /// The head to merge in: branch name, tag, or id.
    pub fn theirs(mut self, rev: impl Into<String>) -> Self {
        self.theirs = rev.into();
        self
    }

    /// Always create a merge commit, even for fast-forwards.
    pub fn no_ff(mut self) -> Self {
        self.no_ff = true;
        self
    }

    /// Stage the merged result without committing.
    pub fn no_commit(mut self) -> Self {
        self.no_commit = true;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub async fn call(self) -> Result<MergeStatus, GitError> {
        let our_commit = self
            .repo
            .head_id()
            .await?
            .ok_or_else(|| GitError::NotFound("HEAD has no commits yet".to_string()))?;
        let their_rev = self.repo.resolve_rev(&self.theirs).await?;
        let their_commit = self.repo.peel_to_commit(their_rev).await?;

        {
            let staging = self.repo.staging().lock().await;
            if staging.has_conflicts() {
                return Err(GitError::Conflict(
                    "cannot merge with unmerged paths staged".to_string(),
                ));
            }
        }

        let bases = history::find_merge_base(self.repo.odb(), our_commit, their_commit).await?;
        let Some(base) = bases.first().copied() else {
            return Err(GitError::Invalid(
                "refusing to merge unrelated histories".to_string(),
            ));
        };

        if base == their_commit {
            return Ok(MergeStatus::AlreadyUpToDate);
        }
        if base == our_commit && !self.no_ff {
            super::checkout::advance_to_commit(
                self.repo,
                their_commit,
                &format!("merge {}: Fast-forward", self.theirs),
            )
            .await?;
            return Ok(MergeStatus::FastForward(their_commit));
        }

        let base_tree = self.repo.tree_of(base).await?;
        let our_tree = self.repo.tree_of(our_commit).await?;
        let their_tree = self.repo.tree_of(their_commit).await?;

        let entries = classify_trees(self.repo.odb(), base_tree, our_tree, their_tree).await?;
        let mut staging = self.repo.staging().lock().await;
        let options = MergeApplyOptions {
            ours_label: "HEAD",
            theirs_label: &self.theirs,
            write_markers: true,
            rr_cache: Some(self.repo.resolutions()),
        };
        let outcome = apply_merge(
            self.repo.odb(),
            &mut staging,
            self.repo.worktree(),
            &entries,
            &options,
        )
        .await?;
        self.repo.save_staging(&staging).await?;

        if !outcome.conflicts.is_empty() {
            // Leave the merge in progress the way git does.
            self.repo
                .git_store()
                .store_bytes("MERGE_HEAD", Bytes::from(format!("{their_commit}\n")))
                .await?;
            tracing::debug!(
                "merge of {} stopped on {} conflict(s)",
                self.theirs,
                outcome.conflicts.len()
            );
            return Ok(MergeStatus::Conflicting(outcome.conflicts));
        }
        drop(staging);

        if self.no_commit {
            return Ok(MergeStatus::MergedNotCommitted);
        }

        let branch = self.repo.current_branch().await?;
        let message = self.message.unwrap_or_else(|| {
            format!(
                "Merge {} into {}\n",
                self.theirs,
                branch.as_deref().unwrap_or("HEAD")
            )
        });
        let merge_commit = self
            .repo
            .commit()
            .message(message)
            .allow_empty()
            .extra_parent(their_commit)
            .call()
            .await?;
        self.repo.git_store().remove("MERGE_HEAD").await?;
        Ok(MergeStatus::Merged(merge_commit))
    }
}
