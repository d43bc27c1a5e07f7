//! Reset: move the current head, optionally replacing staging (mixed) and
//! the worktree (hard).

use crate::{errors::GitError, hash::ObjectId, refs::Ref, repository::Repository};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetMode {
    /// Move the ref only.
    Soft,
    /// Move the ref and replace staging.
    #[default]
    Mixed,
    /// Move the ref, staging, and the worktree.
    Hard,
}

pub struct ResetCommand<'a> {
    repo: &'a Repository,
    mode: ResetMode,
    target: String,
}

impl<'a> ResetCommand<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        ResetCommand {
            repo,
            mode: ResetMode::default(),
            target: "HEAD".to_string(),
        }
    }

    pub fn mode(mut self, mode: ResetMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn target(mut self, rev: impl Into<String>) -> Self {
        self.target = rev.into();
        self
    }

    pub async fn call(self) -> Result<ObjectId, GitError> {
        let target_id = self.repo.resolve_rev(&self.target).await?;
        let target_commit = self.repo.peel_to_commit(target_id).await?;
        let previous = self.repo.head_id().await?;

        let log = self
            .repo
            .log_context(format!("reset: moving to {}", self.target));
        match self.repo.head().await? {
            Some(Ref::Symbolic { target: branch, .. }) => {
                self.repo
                    .refs()
                    .set(&branch, target_commit, Some(&log))
                    .await?;
                self.repo
                    .refs()
                    .log_only("HEAD", previous, target_commit, &log)
                    .await?;
            }
            _ => {
                self.repo
                    .refs()
                    .set("HEAD", target_commit, Some(&log))
                    .await?;
            }
        }

        if matches!(self.mode, ResetMode::Mixed | ResetMode::Hard) {
            let tree = self.repo.tree_of(target_commit).await?;
            let mut staging = self.repo.staging().lock().await;
            staging.read_tree(self.repo.odb(), tree).await?;
            self.repo.save_staging(&staging).await?;
        }

        if self.mode == ResetMode::Hard {
            let previous_tree = match previous {
                Some(commit) => Some(self.repo.tree_of(commit).await?),
                None => None,
            };
            let tree = self.repo.tree_of(target_commit).await?;
            self.repo
                .reset_tree_to_worktree(previous_tree, tree)
                .await?;
        }

        Ok(target_commit)
    }
}
