//! Diff: structural tree-level comparison (added / modified / deleted, with
//! modes and ids), the same view the three-way engine builds on.

use crate::{
    errors::GitError,
    merge::{SideEntry, flatten_tree},
    repository::Repository,
};

use super::ChangeKind;

/// One changed path between two trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub path: String,
    pub kind: ChangeKind,
    pub old: Option<SideEntry>,
    pub new: Option<SideEntry>,
}

pub struct DiffCommand<'a> {
    repo: &'a Repository,
    from: String,
    to: Option<String>,
}

impl<'a> DiffCommand<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        DiffCommand {
            repo,
            from: "HEAD".to_string(),
            to: None,
        }
    }

    /// Old side (default HEAD).
    pub fn from(mut self, rev: impl Into<String>) -> Self {
        self.from = rev.into();
        self
    }

    /// New side; defaults to the staging area.
    pub fn to(mut self, rev: impl Into<String>) -> Self {
        self.to = Some(rev.into());
        self
    }

    pub async fn call(self) -> Result<Vec<DiffEntry>, GitError> {
        let from_id = self.repo.resolve_rev(&self.from).await?;
        let from_commit = self.repo.peel_to_commit(from_id).await?;
        let from_tree = self.repo.tree_of(from_commit).await?;
        let old = flatten_tree(self.repo.odb(), from_tree).await?;

        let new = match &self.to {
            Some(rev) => {
                let id = self.repo.resolve_rev(rev).await?;
                let commit = self.repo.peel_to_commit(id).await?;
                let tree = self.repo.tree_of(commit).await?;
                flatten_tree(self.repo.odb(), tree).await?
            }
            None => {
                let staging = self.repo.staging().lock().await;
                staging
                    .entries(None)
                    .into_iter()
                    .filter(|(_, stage, _)| *stage == 0)
                    .map(|(path, _, entry)| (path, (entry.mode, entry.id)))
                    .collect()
            }
        };

        let mut paths: std::collections::BTreeSet<&String> = old.keys().collect();
        paths.extend(new.keys());

        let mut out = Vec::new();
        for path in paths {
            let old_entry = old.get(path).copied();
            let new_entry = new.get(path).copied();
            let kind = match (old_entry, new_entry) {
                (None, Some(_)) => ChangeKind::Added,
                (Some(_), None) => ChangeKind::Deleted,
                (Some(a), Some(b)) if a != b => ChangeKind::Modified,
                _ => continue,
            };
            out.push(DiffEntry {
                path: path.clone(),
                kind,
                old: old_entry,
                new: new_entry,
            });
        }
        Ok(out)
    }
}
