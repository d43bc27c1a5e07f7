//! The staging area (index): path → (mode, id, stage) with stages 0-3, and
//! the Git index v2 file codec that persists it.
//!
//! Stage 0 holds merged entries; stages 1/2/3 hold base/ours/theirs of an
//! unresolved conflict. A path has either a stage-0 entry or conflict
//! stages, never both.

use std::collections::BTreeMap;

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;

use crate::{
    errors::GitError,
    hash::{ID_RAW_LEN, ObjectId},
    internal::object::tree::{Tree, TreeItem, TreeItemMode},
    storage::objects::ObjectStore,
    storage::raw::RawStore,
};

const INDEX_MAGIC: &[u8; 4] = b"DIRC";
const INDEX_VERSION: u32 = 2;
/// Fixed bytes per on-disk entry before the path.
const ENTRY_FIXED_LEN: usize = 62;

/// Conflict side, the stage number above 0.
pub const STAGE_BASE: u8 = 1;
pub const STAGE_OURS: u8 = 2;
pub const STAGE_THEIRS: u8 = 3;

/// One staging entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageEntry {
    pub mode: TreeItemMode,
    pub id: ObjectId,
    pub size: u32,
    pub mtime: u32,
}

impl StageEntry {
    pub fn new(mode: TreeItemMode, id: ObjectId) -> Self {
        StageEntry {
            mode,
            id,
            size: 0,
            mtime: 0,
        }
    }
}

/// In-memory staging state; persistence goes through
/// [`Staging::to_bytes`]/[`Staging::from_bytes`].
#[derive(Debug, Default, Clone)]
pub struct Staging {
    entries: BTreeMap<(String, u8), StageEntry>,
}

impl Staging {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage an entry at stage 0, clearing any conflict stages for the path.
    pub fn add(&mut self, path: &str, entry: StageEntry) {
        self.clear_path(path);
        self.entries.insert((path.to_string(), 0), entry);
    }

    /// Remove every stage of a path; reports whether anything was there.
    pub fn remove(&mut self, path: &str) -> bool {
        let mut removed = false;
        for stage in 0..=STAGE_THEIRS {
            removed |= self.entries.remove(&(path.to_string(), stage)).is_some();
        }
        removed
    }

    fn clear_path(&mut self, path: &str) {
        self.remove(path);
    }

    /// Record an unresolved conflict: stages 1/2/3 replace stage 0.
    pub fn set_conflict(
        &mut self,
        path: &str,
        base: Option<StageEntry>,
        ours: Option<StageEntry>,
        theirs: Option<StageEntry>,
    ) {
        self.clear_path(path);
        if let Some(entry) = base {
            self.entries.insert((path.to_string(), STAGE_BASE), entry);
        }
        if let Some(entry) = ours {
            self.entries.insert((path.to_string(), STAGE_OURS), entry);
        }
        if let Some(entry) = theirs {
            self.entries.insert((path.to_string(), STAGE_THEIRS), entry);
        }
    }

    /// Resolve a conflicted path with a merged entry.
    pub fn resolve(&mut self, path: &str, entry: StageEntry) {
        self.add(path, entry);
    }

    /// All entries, optionally filtered by path prefix, in index order.
    pub fn entries(&self, prefix: Option<&str>) -> Vec<(String, u8, StageEntry)> {
        self.entries
            .iter()
            .filter(|((path, _), _)| prefix.is_none_or(|p| path.starts_with(p)))
            .map(|((path, stage), entry)| (path.clone(), *stage, *entry))
            .collect()
    }

    /// Every stage present for one path.
    pub fn entries_at(&self, path: &str) -> Vec<(u8, StageEntry)> {
        (0..=STAGE_THEIRS)
            .filter_map(|stage| {
                self.entries
                    .get(&(path.to_string(), stage))
                    .map(|entry| (stage, *entry))
            })
            .collect()
    }

    /// The stage-0 entry of a path.
    pub fn get(&self, path: &str) -> Option<StageEntry> {
        self.entries.get(&(path.to_string(), 0)).copied()
    }

    pub fn has_conflicts(&self) -> bool {
        self.entries.keys().any(|(_, stage)| *stage > 0)
    }

    pub fn conflicted_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .entries
            .keys()
            .filter(|(_, stage)| *stage > 0)
            .map(|(path, _)| path.clone())
            .collect();
        paths.dedup();
        paths
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Materialize the stage-0 map as nested trees, store them, and return
    /// the root id. Refuses while conflicts are unresolved.
    pub async fn write_tree(&self, odb: &ObjectStore) -> Result<ObjectId, GitError> {
        if self.has_conflicts() {
            return Err(GitError::Conflict(
                "index has unmerged entries".to_string(),
            ));
        }
        let flat: Vec<(Vec<String>, StageEntry)> = self
            .entries
            .iter()
            .filter(|((_, stage), _)| *stage == 0)
            .map(|((path, _), entry)| {
                (path.split('/').map(str::to_string).collect(), *entry)
            })
            .collect();
        store_level(odb, flat).await
    }

    /// Replace the staging contents from a tree (recursively), clearing any
    /// previous entries including conflicts.
    pub async fn read_tree(&mut self, odb: &ObjectStore, tree_id: ObjectId) -> Result<(), GitError> {
        self.clear();
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
                    self.entries
                        .insert((path, 0), StageEntry::new(item.mode, item.id));
                }
            }
        }
        Ok(())
    }

    /// Serialize as a Git index v2 file, including the trailing hash.
    pub fn to_bytes(&self) -> Result<Vec<u8>, GitError> {
        let mut out = Vec::new();
        out.extend_from_slice(INDEX_MAGIC);
        out.extend_from_slice(&INDEX_VERSION.to_be_bytes());
        out.extend_from_slice(&(self.entries.len() as u32).to_be_bytes());

        for ((path, stage), entry) in &self.entries {
            let start = out.len();
            let mut fixed = [0u8; ENTRY_FIXED_LEN];
            // ctime/dev/ino/uid/gid stay zero: only mode, mtime, size and id
            // are semantically meaningful to this model.
            BigEndian::write_u32(&mut fixed[8..12], entry.mtime);
            BigEndian::write_u32(&mut fixed[24..28], entry.mode.mode_bits());
            BigEndian::write_u32(&mut fixed[36..40], entry.size);
            fixed[40..60].copy_from_slice(entry.id.as_ref());
            let name_len = path.len().min(0xFFF) as u16;
            let flags = ((*stage as u16) << 12) | name_len;
            BigEndian::write_u16(&mut fixed[60..62], flags);
            out.extend_from_slice(&fixed);
            out.extend_from_slice(path.as_bytes());

            // NUL padding to an 8-byte boundary, at least one byte.
            let written = out.len() - start;
            let padding = 8 - (written % 8);
            out.extend(std::iter::repeat_n(0u8, padding));
        }

        let digest = ObjectId::hash_of(&out);
        out.extend_from_slice(digest.as_ref());
        Ok(out)
    }

    /// Parse a Git index v2 file.
    pub fn from_bytes(data: &[u8]) -> Result<Self, GitError> {
        if data.len() < 12 + ID_RAW_LEN {
            return Err(GitError::Invalid("index file too short".to_string()));
        }
        if &data[0..4] != INDEX_MAGIC {
            return Err(GitError::Invalid("index signature mismatch".to_string()));
        }
        let version = BigEndian::read_u32(&data[4..8]);
        if version != INDEX_VERSION {
            return Err(GitError::Invalid(format!(
                "unsupported index version {version}"
            )));
        }

        let declared = ObjectId::from_bytes(&data[data.len() - ID_RAW_LEN..])
            .map_err(|e| GitError::Invalid(e.to_string()))?;
        let computed = ObjectId::hash_of(&data[..data.len() - ID_RAW_LEN]);
        if declared != computed {
            return Err(GitError::Invalid("index checksum mismatch".to_string()));
        }

        let count = BigEndian::read_u32(&data[8..12]) as usize;
        let mut entries = BTreeMap::new();
        let mut cursor = 12usize;
        for _ in 0..count {
            if cursor + ENTRY_FIXED_LEN > data.len() {
                return Err(GitError::Invalid("index entry truncated".to_string()));
            }
            let fixed = &data[cursor..cursor + ENTRY_FIXED_LEN];
            let mtime = BigEndian::read_u32(&fixed[8..12]);
            let mode_bits = BigEndian::read_u32(&fixed[24..28]);
            let size = BigEndian::read_u32(&fixed[36..40]);
            let id = ObjectId::from_bytes(&fixed[40..60])
                .map_err(|e| GitError::Invalid(e.to_string()))?;
            let flags = BigEndian::read_u16(&fixed[60..62]);
            let stage = ((flags >> 12) & 0x3) as u8;
            let name_len = (flags & 0xFFF) as usize;

            let name_start = cursor + ENTRY_FIXED_LEN;
            let name_end = name_start + name_len;
            if name_end > data.len() {
                return Err(GitError::Invalid("index path truncated".to_string()));
            }
            let path = std::str::from_utf8(&data[name_start..name_end])
                .map_err(|_| GitError::Invalid("index path is not UTF-8".to_string()))?
                .to_string();

            entries.insert(
                (path, stage),
                StageEntry {
                    mode: TreeItemMode::from_mode_bits(mode_bits)?,
                    id,
                    size,
                    mtime,
                },
            );

            let entry_len = ENTRY_FIXED_LEN + name_len;
            let padding = 8 - (entry_len % 8);
            cursor += entry_len + padding;
        }

        Ok(Staging { entries })
    }
}

/// Store one directory level of stage-0 entries as a tree, recursing into
/// subdirectories.
fn store_level(
    odb: &ObjectStore,
    entries: Vec<(Vec<String>, StageEntry)>,
) -> futures::future::BoxFuture<'_, Result<ObjectId, GitError>> {
    Box::pin(async move {
        let mut files: Vec<TreeItem> = Vec::new();
        let mut directories: BTreeMap<String, Vec<(Vec<String>, StageEntry)>> = BTreeMap::new();

        for (segments, entry) in entries {
            match segments.as_slice() {
                [] => {
                    return Err(GitError::Invalid("empty path in index".to_string()));
                }
                [name] => {
                    files.push(TreeItem::new(entry.mode, entry.id, name.clone()));
                }
                [directory, rest @ ..] => {
                    directories
                        .entry(directory.clone())
                        .or_default()
                        .push((rest.to_vec(), entry));
                }
            }
        }

        for (name, children) in directories {
            let subtree = store_level(odb, children).await?;
            files.push(TreeItem::new(TreeItemMode::Tree, subtree, name));
        }

        let tree = Tree::from_tree_items(files)?;
        odb.store_object(&tree).await
    })
}

/// Persisted index helpers over the repository store.
pub async fn load_staging(
    raw: &dyn crate::storage::raw::RawStore,
) -> Result<Staging, GitError> {
    match raw.load_bytes("index").await {
        Ok(data) => Staging::from_bytes(&data),
        Err(GitError::NotFound(_)) => Ok(Staging::new()),
        Err(e) => Err(e),
    }
}

pub async fn flush_staging(
    raw: &dyn crate::storage::raw::RawStore,
    staging: &Staging,
) -> Result<(), GitError> {
    raw.store_bytes("index", Bytes::from(staging.to_bytes()?))
        .await
}
