//! Record the staging area as a new commit and advance the current branch.

use crate::{
    errors::GitError,
    hash::ObjectId,
    internal::object::commit::Commit,
    internal::object::signature::{Signature, SignatureKind},
    refs::Ref,
    repository::Repository,
    storage::raw::RawStore,
};

pub struct CommitCommand<'a> {
    repo: &'a Repository,
    message: String,
    author: Option<Signature>,
    committer: Option<Signature>,
    allow_empty: bool,
    extra_parents: Vec<ObjectId>,
}

impl<'a> CommitCommand<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        CommitCommand {
            repo,
            message: String::new(),
            author: None,
            committer: None,
            allow_empty: false,
            extra_parents: Vec::new(),
        }
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn author(mut self, author: Signature) -> Self {
        self.author = Some(author);
        self
    }

    pub fn committer(mut self, committer: Signature) -> Self {
        self.committer = Some(committer);
        self
    }

    /// Permit a commit whose tree equals its parent's.
    pub fn allow_empty(mut self) -> Self {
        self.allow_empty = true;
        self
    }

    /// Additional parents beyond HEAD; used by merge to record both sides.
    pub fn extra_parent(mut self, parent: ObjectId) -> Self {
        self.extra_parents.push(parent);
        self
    }

    pub async fn call(self) -> Result<ObjectId, GitError> {
        if self.message.trim().is_empty() {
            return Err(GitError::Invalid("empty commit message".to_string()));
        }

        let staging = self.repo.staging().lock().await;
        if staging.has_conflicts() {
            return Err(GitError::Conflict(
                "cannot commit with unmerged paths".to_string(),
            ));
        }
        let tree_id = staging.write_tree(self.repo.odb()).await?;
        drop(staging);

        let head = self.repo.head_id().await?;
        if !self.allow_empty
            && let Some(parent) = head
        {
            let parent_tree = self.repo.tree_of(parent).await?;
            if parent_tree == tree_id {
                return Err(GitError::Invalid(
                    "nothing to commit, working tree clean".to_string(),
                ));
            }
        }
        if !self.allow_empty && head.is_none() && tree_id == crate::repository::EMPTY_TREE_ID {
            return Err(GitError::Invalid(
                "nothing to commit, working tree clean".to_string(),
            ));
        }

        let mut parents: Vec<ObjectId> = head.into_iter().collect();
        parents.extend(self.extra_parents);

        // A resolved in-progress merge contributes its second parent.
        let merge_head = match self.repo.git_store().load_bytes("MERGE_HEAD").await {
            Ok(data) => std::str::from_utf8(&data)
                .ok()
                .and_then(|text| text.trim().parse::<ObjectId>().ok()),
            Err(_) => None,
        };
        if let Some(merge_head) = merge_head
            && !parents.contains(&merge_head)
        {
            parents.push(merge_head);
        }

        let author = self
            .author
            .unwrap_or_else(|| self.repo.signature(SignatureKind::Author));
        let committer = self
            .committer
            .unwrap_or_else(|| self.repo.signature(SignatureKind::Committer));
        let commit = Commit::new(author, committer, tree_id, parents, &self.message);
        let commit_id = self.repo.odb().store_object(&commit).await?;

        advance_head(self.repo, head, commit_id, &format!("commit: {}", commit.subject()))
            .await?;
        if merge_head.is_some() {
            self.repo.git_store().remove("MERGE_HEAD").await?;
        }
        tracing::debug!("committed {commit_id}");
        Ok(commit_id)
    }
}

/// CAS the current branch (or detached HEAD) from `expected` to `new_id`,
/// logging against both the branch and HEAD.
pub(crate) async fn advance_head(
    repo: &Repository,
    expected: Option<ObjectId>,
    new_id: ObjectId,
    reason: &str,
) -> Result<(), GitError> {
    let log = repo.log_context(reason);
    let refs = repo.refs();
    match repo.head().await? {
        Some(Ref::Symbolic { target, .. }) => {
            let outcome = refs
                .compare_and_swap(&target, expected, new_id, Some(&log))
                .await?;
            if !outcome.swapped {
                return Err(GitError::Conflict(format!(
                    "{target} moved concurrently (expected {expected:?}, found {:?})",
                    outcome.previous
                )));
            }
            refs.log_only("HEAD", expected, new_id, &log).await
        }
        Some(Ref::Direct { .. }) | None => {
            let outcome = refs
                .compare_and_swap("HEAD", expected, new_id, Some(&log))
                .await?;
            if !outcome.swapped {
                return Err(GitError::Conflict(format!(
                    "HEAD moved concurrently (expected {expected:?}, found {:?})",
                    outcome.previous
                )));
            }
            Ok(())
        }
    }
}
