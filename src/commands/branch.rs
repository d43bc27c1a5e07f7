//! Branch manipulation under `refs/heads/`.

use crate::{errors::GitError, hash::ObjectId, history, repository::Repository};

/// A branch row from [`BranchCommand::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchInfo {
    pub name: String,
    pub id: ObjectId,
    pub is_current: bool,
}

pub struct BranchCommand<'a> {
    repo: &'a Repository,
    force: bool,
}

impl<'a> BranchCommand<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        BranchCommand { repo, force: false }
    }

    /// Skip the merged check on delete and allow overwriting on create.
    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    fn full_name(name: &str) -> Result<String, GitError> {
        if name.is_empty() || name.contains("..") || name.contains(' ') || name.ends_with('/') {
            return Err(GitError::Invalid(format!("invalid branch name `{name}`")));
        }
        Ok(format!("refs/heads/{name}"))
    }

    /// Create a branch at `start_point` (default: HEAD).
    pub async fn create(
        self,
        name: &str,
        start_point: Option<&str>,
    ) -> Result<ObjectId, GitError> {
        let full = Self::full_name(name)?;
        let target = match start_point {
            Some(rev) => {
                let id = self.repo.resolve_rev(rev).await?;
                self.repo.peel_to_commit(id).await?
            }
            None => self
                .repo
                .head_id()
                .await?
                .ok_or_else(|| GitError::NotFound("HEAD has no commits yet".to_string()))?,
        };

        if !self.force && self.repo.refs().get(&full).await?.is_some() {
            return Err(GitError::Conflict(format!(
                "branch `{name}` already exists"
            )));
        }
        let log = self.repo.log_context(format!("branch: Created from {target}"));
        self.repo.refs().set(&full, target, Some(&log)).await?;
        Ok(target)
    }

    /// Delete a branch; refuses the current branch, and unmerged branches
    /// without `force`.
    pub async fn delete(self, name: &str) -> Result<(), GitError> {
        let full = Self::full_name(name)?;
        if self.repo.current_branch().await?.as_deref() == Some(name) {
            return Err(GitError::Conflict(format!(
                "cannot delete the checked-out branch `{name}`"
            )));
        }
        let Some(tip) = self.repo.refs().resolve_id(&full).await? else {
            return Err(GitError::ref_not_found(&full));
        };

        if !self.force
            && let Some(head) = self.repo.head_id().await?
            && !history::is_ancestor(self.repo.odb(), tip, head).await?
        {
            return Err(GitError::Conflict(format!(
                "branch `{name}` is not fully merged"
            )));
        }

        self.repo.refs().delete(&full).await?;
        Ok(())
    }

    /// Rename a branch, carrying its tip; HEAD follows when it pointed there.
    pub async fn rename(self, old: &str, new: &str) -> Result<(), GitError> {
        let old_full = Self::full_name(old)?;
        let new_full = Self::full_name(new)?;

        let Some(tip) = self.repo.refs().resolve_id(&old_full).await? else {
            return Err(GitError::ref_not_found(&old_full));
        };
        if !self.force && self.repo.refs().get(&new_full).await?.is_some() {
            return Err(GitError::Conflict(format!("branch `{new}` already exists")));
        }

        let log = self
            .repo
            .log_context(format!("branch: renamed {old_full} to {new_full}"));
        self.repo.refs().set(&new_full, tip, Some(&log)).await?;
        let was_current = self.repo.current_branch().await?.as_deref() == Some(old);
        self.repo.refs().delete(&old_full).await?;
        if was_current {
            self.repo.refs().set_symbolic("HEAD", &new_full).await?;
        }
        Ok(())
    }

    /// All branches sorted by name, the current one flagged.
    pub async fn list(self) -> Result<Vec<BranchInfo>, GitError> {
        let current = self.repo.current_branch().await?;
        let mut out = Vec::new();
        for reference in self.repo.refs().list("refs/heads/").await? {
            let name = reference
                .name()
                .trim_start_matches("refs/heads/")
                .to_string();
            if let Some(id) = reference.id() {
                out.push(BranchInfo {
                    is_current: current.as_deref() == Some(&name),
                    name,
                    id,
                });
            }
        }
        Ok(out)
    }
}
