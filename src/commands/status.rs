//! Status: compare HEAD, staging and the worktree.

use std::collections::BTreeMap;

use crate::{
    errors::GitError,
    internal::object::ObjectTrait,
    internal::object::blob::Blob,
    merge::flatten_tree,
    repository::Repository,
    worktree::Worktree,
};

use super::ChangeKind;

/// The three buckets of `status`, plus conflicts.
#[derive(Debug, Clone, Default)]
pub struct StatusReport {
    pub branch: Option<String>,
    /// Staging vs HEAD.
    pub staged: Vec<(String, ChangeKind)>,
    /// Worktree vs staging.
    pub unstaged: Vec<(String, ChangeKind)>,
    /// Worktree paths unknown to staging.
    pub untracked: Vec<String>,
    pub conflicted: Vec<String>,
}

impl StatusReport {
    pub fn is_clean(&self) -> bool {
        self.staged.is_empty()
            && self.unstaged.is_empty()
            && self.untracked.is_empty()
            && self.conflicted.is_empty()
    }
}

pub struct StatusCommand<'a> {
    repo: &'a Repository,
}

impl<'a> StatusCommand<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        StatusCommand { repo }
    }

    pub async fn call(self) -> Result<StatusReport, GitError> {
        let mut report = StatusReport {
            branch: self.repo.current_branch().await?,
            ..Default::default()
        };

        let head_map = match self.repo.head_id().await? {
            Some(head) => {
                let tree = self.repo.tree_of(head).await?;
                flatten_tree(self.repo.odb(), tree).await?
            }
            None => BTreeMap::new(),
        };

        let staging = self.repo.staging().lock().await;
        report.conflicted = staging.conflicted_paths();

        let staged_map: BTreeMap<String, (crate::internal::object::tree::TreeItemMode, crate::hash::ObjectId)> =
            staging
                .entries(None)
                .into_iter()
                .filter(|(_, stage, _)| *stage == 0)
                .map(|(path, _, entry)| (path, (entry.mode, entry.id)))
                .collect();

        // Staging vs HEAD.
        for (path, entry) in &staged_map {
            match head_map.get(path) {
                None => report.staged.push((path.clone(), ChangeKind::Added)),
                Some(head_entry) if head_entry != entry => {
                    report.staged.push((path.clone(), ChangeKind::Modified));
                }
                Some(_) => {}
            }
        }
        for path in head_map.keys() {
            if !staged_map.contains_key(path) && !report.conflicted.contains(path) {
                report.staged.push((path.clone(), ChangeKind::Deleted));
            }
        }

        // Worktree vs staging.
        let worktree = self.repo.worktree();
        let mut worktree_paths: Vec<String> = worktree.list().await?;
        worktree_paths.sort();
        for path in &worktree_paths {
            match staged_map.get(path) {
                Some((_, staged_id)) => {
                    let data = worktree.read_blob(path).await?;
                    let on_disk = Blob::from_content_bytes(data.to_vec()).object_hash()?;
                    if on_disk != *staged_id {
                        report.unstaged.push((path.clone(), ChangeKind::Modified));
                    }
                }
                None => {
                    if !report.conflicted.contains(path) {
                        report.untracked.push(path.clone());
                    }
                }
            }
        }
        for path in staged_map.keys() {
            if worktree.stat(path).await?.is_none() {
                report.unstaged.push((path.clone(), ChangeKind::Deleted));
            }
        }

        report.staged.sort();
        report.unstaged.sort();
        Ok(report)
    }
}
