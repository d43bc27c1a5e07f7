//! Log: read-only history listing from a start point.

use crate::{
    errors::GitError, history, internal::object::commit::Commit, repository::Repository,
};

pub struct LogCommand<'a> {
    repo: &'a Repository,
    start: Option<String>,
    max_count: Option<usize>,
}

impl<'a> LogCommand<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        LogCommand {
            repo,
            start: None,
            max_count: None,
        }
    }

    /// Start point (default HEAD).
    pub fn start(mut self, rev: impl Into<String>) -> Self {
        self.start = Some(rev.into());
        self
    }

    pub fn max_count(mut self, count: usize) -> Self {
        self.max_count = Some(count);
        self
    }

    /// Commits newest-first.
    pub async fn call(self) -> Result<Vec<Commit>, GitError> {
        let start = match &self.start {
            Some(rev) => {
                let id = self.repo.resolve_rev(rev).await?;
                self.repo.peel_to_commit(id).await?
            }
            None => match self.repo.head_id().await? {
                Some(id) => id,
                None => return Ok(Vec::new()),
            },
        };

        let ids = history::walk_ancestry(self.repo.odb(), start, self.max_count).await?;
        let mut commits = Vec::with_capacity(ids.len());
        for id in ids {
            commits.push(self.repo.odb().load_commit(&id).await?);
        }
        Ok(commits)
    }
}
