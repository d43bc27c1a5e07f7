//! Cherry-pick: replay one commit's change onto HEAD using its parent as the
//! merge base. The original author is preserved; the committer is the
//! caller.

use crate::{
    errors::GitError,
    hash::ObjectId,
    internal::object::signature::SignatureKind,
    merge::{MergeApplyOptions, apply_merge, classify_trees},
    repository::Repository,
};

/// Outcome of cherry-pick and revert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickStatus {
    Committed(ObjectId),
    Conflicting(Vec<String>),
}

pub struct CherryPickCommand<'a> {
    repo: &'a Repository,
    source: String,
}

impl<'a> CherryPickCommand<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        CherryPickCommand {
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

        // Base is the picked commit's (first) parent; a root commit replays
        // against the empty tree.
        let base_tree = match source.parent_ids.first() {
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
            classify_trees(self.repo.odb(), base_tree, our_tree, source.tree_id).await?;
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

        let message = source.message_str();
        let commit_id = self
            .repo
            .commit()
            .message(message)
            .author(source.author.clone())
            .committer(self.repo.signature(SignatureKind::Committer))
            .call()
            .await?;
        Ok(PickStatus::Committed(commit_id))
    }
}
