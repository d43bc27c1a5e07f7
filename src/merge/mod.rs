//! Tree-level three-way merge.
//!
//! Collects every path across base/ours/theirs, classifies each per the
//! presence table, applies non-conflicts to stage 0 and the worktree, and
//! records conflicts as stages 1/2/3 with conflict-marker files. Previously
//! recorded resolutions short-circuit re-encountered conflicts.

pub mod rr_cache;

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::{
    errors::GitError,
    hash::ObjectId,
    internal::index::{StageEntry, Staging},
    internal::object::tree::TreeItemMode,
    storage::objects::ObjectStore,
    worktree::Worktree,
};

/// `(mode, id)` of a path on one side of the merge.
pub type SideEntry = (TreeItemMode, ObjectId);

/// Classification of one path across (base, ours, theirs). Equality compares
/// both id and mode. Swapping ours/theirs swaps the `*ByUs`/`*ByThem`
/// variants and preserves conflict flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeClass {
    Unchanged,
    ModifiedByUs,
    ModifiedByThem,
    ModifiedBothSame,
    ModifiedBothDiffer,
    AddedByUs,
    AddedByThem,
    AddedBothSame,
    AddedBothDiffer,
    DeletedByUs,
    DeletedByThem,
    DeletedBoth,
    DeleteModify,
    ModifyDelete,
}

impl ChangeClass {
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ChangeClass::ModifiedBothDiffer
                | ChangeClass::AddedBothDiffer
                | ChangeClass::DeleteModify
                | ChangeClass::ModifyDelete
        )
    }

    /// The mirror classification with ours and theirs swapped.
    pub fn swapped(&self) -> ChangeClass {
        match self {
            ChangeClass::ModifiedByUs => ChangeClass::ModifiedByThem,
            ChangeClass::ModifiedByThem => ChangeClass::ModifiedByUs,
            ChangeClass::AddedByUs => ChangeClass::AddedByThem,
            ChangeClass::AddedByThem => ChangeClass::AddedByUs,
            ChangeClass::DeletedByUs => ChangeClass::DeletedByThem,
            ChangeClass::DeletedByThem => ChangeClass::DeletedByUs,
            ChangeClass::DeleteModify => ChangeClass::ModifyDelete,
            ChangeClass::ModifyDelete => ChangeClass::DeleteModify,
            other => *other,
        }
    }
}

/// One classified path.
#[derive(Debug, Clone)]
pub struct MergeEntry {
    pub path: String,
    pub class: ChangeClass,
    pub base: Option<SideEntry>,
    pub ours: Option<SideEntry>,
    pub theirs: Option<SideEntry>,
}

impl MergeEntry {
    /// The side a non-conflicting path resolves to (`None` = deleted).
    pub fn resolution(&self) -> Option<SideEntry> {
        match self.class {
            ChangeClass::Unchanged
            | ChangeClass::ModifiedByUs
            | ChangeClass::ModifiedBothSame
            | ChangeClass::AddedByUs
            | ChangeClass::AddedBothSame => self.ours,
            ChangeClass::ModifiedByThem | ChangeClass::AddedByThem => self.theirs,
            ChangeClass::DeletedByUs | ChangeClass::DeletedByThem | ChangeClass::DeletedBoth => {
                None
            }
            // Conflicts have no single-sided resolution.
            _ => None,
        }
    }
}

/// Classify a single path from its three sides. Total over all presence
/// combinations except all-absent, which callers never produce.
pub fn classify(
    base: Option<SideEntry>,
    ours: Option<SideEntry>,
    theirs: Option<SideEntry>,
) -> ChangeClass {
    match (base, ours, theirs) {
        (Some(b), Some(o), Some(t)) => {
            if o == t {
                if b == o {
                    ChangeClass::Unchanged
                } else {
                    ChangeClass::ModifiedBothSame
                }
            } else if b == o {
                ChangeClass::ModifiedByThem
            } else if b == t {
                ChangeClass::ModifiedByUs
            } else {
                ChangeClass::ModifiedBothDiffer
            }
        }
        (Some(b), None, Some(t)) => {
            if b == t {
                ChangeClass::DeletedByUs
            } else {
                ChangeClass::DeleteModify
            }
        }
        (Some(b), Some(o), None) => {
            if b == o {
                ChangeClass::DeletedByThem
            } else {
                ChangeClass::ModifyDelete
            }
        }
        (Some(_), None, None) => ChangeClass::DeletedBoth,
        (None, Some(o), Some(t)) => {
            if o == t {
                ChangeClass::AddedBothSame
            } else {
                ChangeClass::AddedBothDiffer
            }
        }
        (None, Some(_), None) => ChangeClass::AddedByUs,
        (None, None, Some(_)) => ChangeClass::AddedByThem,
        (None, None, None) => ChangeClass::Unchanged,
    }
}

/// Flatten a tree (recursively) into path → (mode, id). Submodule entries
/// participate like any other leaf.
pub async fn flatten_tree(
    odb: &ObjectStore,
    tree_id: ObjectId,
) -> Result<BTreeMap<String, SideEntry>, GitError> {
    let mut out = BTreeMap::new();
    let mut stack: Vec<(String, ObjectId)> = vec![(String::new(), tree_id)];
    while let Some((prefix, id)) = stack.pop() {
        let tree = odb.load_tree(&id).await?;
        for item in tree.tree_items {
            let path = if prefix.is_empty() {
                item.name.clone()
            } else {
                format!("{prefix}/{}", item.name)
            };
            if item.mode.is_tree() {
                stack.push((path, item.id));
            } else {
                out.insert(path, (item.mode, item.id));
            }
        }
    }
    Ok(out)
}

/// Classify every path across three trees.
pub async fn classify_trees(
    odb: &ObjectStore,
    base: ObjectId,
    ours: ObjectId,
    theirs: ObjectId,
) -> Result<Vec<MergeEntry>, GitError> {
    let base_map = flatten_tree(odb, base).await?;
    let ours_map = flatten_tree(odb, ours).await?;
    let theirs_map = flatten_tree(odb, theirs).await?;

    let mut paths: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    paths.extend(base_map.keys().cloned());
    paths.extend(ours_map.keys().cloned());
    paths.extend(theirs_map.keys().cloned());

    Ok(paths
        .into_iter()
        .map(|path| {
            let base = base_map.get(&path).copied();
            let ours = ours_map.get(&path).copied();
            let theirs = theirs_map.get(&path).copied();
            MergeEntry {
                class: classify(base, ours, theirs),
                path,
                base,
                ours,
                theirs,
            }
        })
        .collect())
}

/// Outcome of applying a classified merge.
#[derive(Debug, Default)]
pub struct MergeApply {
    /// Paths left in conflict (stages 1/2/3 populated).
    pub conflicts: Vec<String>,
    /// Conflicts silently settled from the resolution cache.
    pub reused_resolutions: Vec<String>,
}

/// Options for [`apply_merge`].
pub struct MergeApplyOptions<'a> {
    pub ours_label: &'a str,
    pub theirs_label: &'a str,
    /// Write conflict-marker files into the worktree.
    pub write_markers: bool,
    /// Consult and populate the recorded-resolution cache.
    pub rr_cache: Option<&'a rr_cache::ResolutionCache>,
}

impl Default for MergeApplyOptions<'_> {
    fn default() -> Self {
        MergeApplyOptions {
            ours_label: "ours",
            theirs_label: "theirs",
            write_markers: true,
            rr_cache: None,
        }
    }
}

/// Apply classified entries: non-conflicts land in stage 0 and the worktree,
/// conflicts populate stages 1/2/3 and (optionally) conflict-marker files.
pub async fn apply_merge(
    odb: &ObjectStore,
    staging: &mut Staging,
    worktree: &dyn Worktree,
    entries: &[MergeEntry],
    options: &MergeApplyOptions<'_>,
) -> Result<MergeApply, GitError> {
    let mut outcome = MergeApply::default();

    for entry in entries {
        if !entry.class.is_conflict() {
            match entry.resolution() {
                Some((mode, id)) => {
                    staging.add(&entry.path, StageEntry::new(mode, id));
                    // Leave untouched files alone; write only what changed
                    // relative to our side.
                    if entry.ours != Some((mode, id)) || worktree.stat(&entry.path).await?.is_none()
                    {
                        let blob = odb.load_blob(&id).await?;
                        worktree
                            .write_blob(&entry.path, Bytes::from(blob.data), mode)
                            .await?;
                    }
                }
                None => {
                    staging.remove(&entry.path);
                    worktree.remove(&entry.path).await?;
                }
            }
            continue;
        }

        // Conflict path: a recorded resolution may settle it outright.
        if let Some(cache) = options.rr_cache {
            let signature = rr_cache::signature(
                entry.base.map(|(_, id)| id),
                entry.ours.map(|(_, id)| id),
                entry.theirs.map(|(_, id)| id),
            );
            if let Some(postimage) = cache.postimage(&signature).await? {
                let (mode, _) = entry
                    .ours
                    .or(entry.theirs)
                    .unwrap_or((TreeItemMode::Blob, ObjectId::ZERO));
                let blob_id = odb
                    .store_raw(
                        crate::internal::object::types::ObjectType::Blob,
                        &postimage,
                    )
                    .await?;
                staging.add(&entry.path, StageEntry::new(mode, blob_id));
                worktree.write_blob(&entry.path, postimage, mode).await?;
                outcome.reused_resolutions.push(entry.path.clone());
                continue;
            }
        }

        staging.set_conflict(
            &entry.path,
            entry.base.map(|(mode, id)| StageEntry::new(mode, id)),
            entry.ours.map(|(mode, id)| StageEntry::new(mode, id)),
            entry.theirs.map(|(mode, id)| StageEntry::new(mode, id)),
        );

        if options.write_markers {
            let marked = conflict_markers(odb, entry, options).await?;
            let (mode, _) = entry
                .ours
                .or(entry.theirs)
                .unwrap_or((TreeItemMode::Blob, ObjectId::ZERO));
            worktree
                .write_blob(&entry.path, marked.clone(), mode)
                .await?;

            if let Some(cache) = options.rr_cache {
                let signature = rr_cache::signature(
                    entry.base.map(|(_, id)| id),
                    entry.ours.map(|(_, id)| id),
                    entry.theirs.map(|(_, id)| id),
                );
                cache.record_preimage(&signature, marked).await?;
            }
        }
        outcome.conflicts.push(entry.path.clone());
    }

    Ok(outcome)
}

/// Render a conflicted path with git-style markers. Delete/modify conflicts
/// keep the surviving side's content under the markers with an empty other
/// half.
async fn conflict_markers(
    odb: &ObjectStore,
    entry: &MergeEntry,
    options: &MergeApplyOptions<'_>,
) -> Result<Bytes, GitError> {
    async fn side_bytes(odb: &ObjectStore, side: Option<SideEntry>) -> Result<Vec<u8>, GitError> {
        match side {
            Some((_, id)) => Ok(odb.load_blob(&id).await?.data),
            None => Ok(Vec::new()),
        }
    }

    let ours = side_bytes(odb, entry.ours).await?;
    let theirs = side_bytes(odb, entry.theirs).await?;

    let mut out = Vec::with_capacity(ours.len() + theirs.len() + 64);
    out.extend_from_slice(format!("<<<<<<< {}\n", options.ours_label).as_bytes());
    out.extend_from_slice(&ours);
    if !ours.is_empty() && !ours.ends_with(b"\n") {
        out.push(b'\n');
    }
    out.extend_from_slice(b"=======\n");
    out.extend_from_slice(&theirs);
    if !theirs.is_empty() && !theirs.ends_with(b"\n") {
        out.push(b'\n');
    }
    out.extend_from_slice(format!(">>>>>>> {}\n", options.theirs_label).as_bytes());
    Ok(Bytes::from(out))
}
