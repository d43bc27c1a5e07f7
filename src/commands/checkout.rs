//! Checkout: apply a target commit's tree to the worktree and staging, then
//! move HEAD (symbolic for branches, direct when detaching).

use crate::{
    errors::GitError,
    hash::ObjectId,
    internal::object::ObjectTrait,
    internal::object::blob::Blob,
    merge::flatten_tree,
    refs::Ref,
    repository::Repository,
    worktree::Worktree,
};

#[derive(Debug, Clone)]
pub struct CheckoutResult {
    pub previous: Option<ObjectId>,
    pub new_head: ObjectId,
    pub detached: bool,
}

pub struct CheckoutCommand<'a> {
    repo: &'a Repository,
    target: String,
    force: bool,
    detach: bool,
}

impl<'a> CheckoutCommand<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        CheckoutCommand {
            repo,
            target: String::new(),
            force: false,
            detach: false,
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// Discard local modifications instead of refusing.
    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    /// Detach even when the target names a branch.
    pub fn detach(mut self) -> Self {
        self.detach = true;
        self
    }

    pub async fn call(self) -> Result<CheckoutResult, GitError> {
        if self.target.is_empty() {
            return Err(GitError::Invalid("checkout needs a target".to_string()));
        }

        // Branch targets keep HEAD symbolic; anything else detaches.
        let branch_ref = format!("refs/heads/{}", self.target);
        let (target_commit, new_branch) =
            match self.repo.refs().resolve_id(&branch_ref).await? {
                Some(id) if !self.detach => (id, Some(branch_ref)),
                Some(id) => (id, None),
                None => {
                    let id = self.repo.resolve_rev(&self.target).await?;
                    (self.repo.peel_to_commit(id).await?, None)
                }
            };

        let previous = self.repo.head_id().await?;
        let current_tree = match previous {
            Some(commit) => Some(self.repo.tree_of(commit).await?),
            None => None,
        };
        let target_tree = self.repo.tree_of(target_commit).await?;

        if self.force {
            // Forced checkout discards local edits outright.
            self.repo
                .reset_tree_to_worktree(current_tree, target_tree)
                .await?;
        } else {
            self.ensure_no_overwrite(current_tree, target_tree).await?;
            self.repo
                .write_tree_to_worktree(current_tree, target_tree)
                .await?;
        }

        let mut staging = self.repo.staging().lock().await;
        staging.read_tree(self.repo.odb(), target_tree).await?;
        self.repo.save_staging(&staging).await?;
        drop(staging);

        let from = previous
            .map(|id| id.to_string())
            .unwrap_or_else(|| "(unborn)".to_string());
        let log = self
            .repo
            .log_context(format!("checkout: moving from {from} to {}", self.target));
        match &new_branch {
            Some(branch) => {
                self.repo.refs().set_symbolic("HEAD", branch).await?;
                self.repo
                    .refs()
                    .log_only("HEAD", previous, target_commit, &log)
                    .await?;
            }
            None => {
                self.repo
                    .refs()
                    .set("HEAD", target_commit, Some(&log))
                    .await?;
            }
        }

        Ok(CheckoutResult {
            previous,
            new_head: target_commit,
            detached: new_branch.is_none(),
        })
    }

    /// Refuse when a path that changes between the trees carries local
    /// modifications relative to the current tree.
    async fn ensure_no_overwrite(
        &self,
        current_tree: Option<ObjectId>,
        target_tree: ObjectId,
    ) -> Result<(), GitError> {
        let current = match current_tree {
            Some(tree) => flatten_tree(self.repo.odb(), tree).await?,
            None => Default::default(),
        };
        let target = flatten_tree(self.repo.odb(), target_tree).await?;
        let worktree = self.repo.worktree();

        let mut dirty = Vec::new();
        for (path, target_entry) in &target {
            let current_entry = current.get(path);
            if current_entry == Some(target_entry) {
                continue;
            }
            if let Ok(data) = worktree.read_blob(path).await {
                let on_disk = Blob::from_content_bytes(data.to_vec()).object_hash()?;
                match current_entry {
                    Some((_, id)) if *id == on_disk => {}
                    // An untracked file whose content already matches the
                    // target is not clobbered, just adopted.
                    None if target_entry.1 == on_disk => {}
                    _ => dirty.push(path.clone()),
                }
            }
        }
        for (path, current_entry) in &current {
            if target.contains_key(path) {
                continue;
            }
            if let Ok(data) = worktree.read_blob(path).await {
                let on_disk = Blob::from_content_bytes(data.to_vec()).object_hash()?;
                if on_disk != current_entry.1 {
                    dirty.push(path.clone());
                }
            }
        }

        if dirty.is_empty() {
            Ok(())
        } else {
            dirty.sort();
            Err(GitError::Conflict(format!(
                "your local changes to {} would be overwritten by checkout",
                dirty.join(", ")
            )))
        }
    }
}

/// Shared by merge fast-forward: move a branch tip and materialize its tree.
pub(crate) async fn advance_to_commit(
    repo: &Repository,
    target_commit: ObjectId,
    reason: &str,
) -> Result<(), GitError> {
    let previous = repo.head_id().await?;
    let current_tree = match previous {
        Some(commit) => Some(repo.tree_of(commit).await?),
        None => None,
    };
    let target_tree = repo.tree_of(target_commit).await?;

    repo.write_tree_to_worktree(current_tree, target_tree)
        .await?;
    let mut staging = repo.staging().lock().await;
    staging.read_tree(repo.odb(), target_tree).await?;
    repo.save_staging(&staging).await?;
    drop(staging);

    let log = repo.log_context(reason);
    match repo.head().await? {
        Some(Ref::Symbolic { target, .. }) => {
            let outcome = repo
                .refs()
                .compare_and_swap(&target, previous, target_commit, Some(&log))
                .await?;
            if !outcome.swapped {
                return Err(GitError::Conflict(format!("{target} moved concurrently")));
            }
            repo.refs()
                .log_only("HEAD", previous, target_commit, &log)
                .await
        }
        _ => repo.refs().set("HEAD", target_commit, Some(&log)).await,
    }
}
