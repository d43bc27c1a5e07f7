//! Revert: apply the inverse of a commit onto HEAD. The three-way roles are
//! the mirror of cherry-pick: the reverted commit's tree is the base, its
//! parent the "theirs" side.

use crate::{
    errors::GitError,
    merge::{MergeApplyOptions, apply_merge, classify_trees},
    repository::Repository,
};

pub use super::cherry_pick::PickStatus;

pub struct RevertCommand<'a> {
    repo: &'a Repository,
    source: String,
}

impl<'a> RevertCommand<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        RevertCommand {
            repo,
            source: String::new(),
        }
    }

    pub fn source(mut self, rev: impl Into<String>) -> Self {
        self.source = rev.into();
        self
    }

    pub async fn call(self) -> Result<PickStatus, GitError> {
        let head = self
            .repo
            .head_id()
            .await?
            .ok_or_else(|| GitError::NotFound("HEAD has no commits yet".to_string()))?;
        let source_id = self.repo.resolve_rev(&self.source).await?;
        let source_id = self.repo.peel_to_commit(source_id).await?;
        let source = self.repo.odb().load_commit(&source_id).await?;

        let parent_tree = match source.parent_ids.first() {
            Some(parent) => self.repo.tree_of(*parent).await?,
            None => {
                self.repo
                    .odb()
                    .store_object(&crate::internal::object::tree::Tree::empty())
                    .await?
            }
        };
        let our_tree = self.repo.tree_of(head).await?;

        let entries =
            classify_trees(self.repo.odb(), source.tree_id, our_tree, parent_tree).await?;
        let mut staging = self.repo.staging().lock().await;
        let options = MergeApplyOptions {
            ours_label: "HEAD",
            theirs_label: &self.source,
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
            return Ok(PickStatus::Conflicting(outcome.conflicts));
        }
        drop(staging);

        let message = format!(
            "Revert \"{}\"\n\nThis reverts commit {}.\n",
            source.subject(),
            source_id
        );
        let commit_id = self.repo.commit().message(message).call().await?;
        Ok(PickStatus::Committed(commit_id))
    }
}
