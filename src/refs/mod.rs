//! The reference namespace: loose refs, `packed-refs`, symbolic refs,
//! compare-and-swap updates, and reflogs.
//!
//! Refs are stored through the repository's raw store: a loose ref is the
//! file named like the ref, `packed-refs` is a single shadowed snapshot
//! (loose wins), and reflogs append under `logs/<name>`. Writers serialise
//! per name through an in-process lock table; the raw store's temp-file +
//! rename discipline keeps readers off partial files.

pub mod reflog;

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::{errors::GitError, hash::ObjectId, storage::raw::RawStore};

pub use reflog::{LogContext, ReflogEntry};

/// Upper bound on symbolic-ref chains, matching git's own limit.
const MAX_SYMREF_DEPTH: usize = 5;

const PACKED_REFS_KEY: &str = "packed-refs";
const SYMREF_PREFIX: &str = "ref: ";

/// A reference: either direct (name → id) or symbolic (name → other ref).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ref {
    Direct { name: String, id: ObjectId },
    Symbolic { name: String, target: String },
}

impl Ref {
    pub fn name(&self) -> &str {
        match self {
            Ref::Direct { name, .. } => name,
            Ref::Symbolic { name, .. } => name,
        }
    }

    pub fn id(&self) -> Option<ObjectId> {
        match self {
            Ref::Direct { id, .. } => Some(*id),
            Ref::Symbolic { .. } => None,
        }
    }
}

/// Result of a compare-and-swap: what was there before, and whether the swap
/// happened.
#[derive(Debug, Clone, Copy)]
pub struct CasOutcome {
    pub previous: Option<ObjectId>,
    pub swapped: bool,
}

#[derive(Debug, Default, Clone)]
struct PackedRefs {
    /// name → (id, optional peeled target for annotated tags)
    entries: BTreeMap<String, (ObjectId, Option<ObjectId>)>,
}

impl PackedRefs {
    fn parse(data: &[u8]) -> Result<Self, GitError> {
        let mut entries: BTreeMap<String, (ObjectId, Option<ObjectId>)> = BTreeMap::new();
        let mut last: Option<String> = None;
        for line in data.split(|b| *b == b'\n') {
            if line.is_empty() || line[0] == b'#' {
                continue;
            }
            let text = std::str::from_utf8(line)
                .map_err(|_| GitError::Invalid("packed-refs is not UTF-8".to_string()))?;
            if let Some(peeled) = text.strip_prefix('^') {
                let peeled = ObjectId::from_str(peeled.trim())?;
                let name = last.clone().ok_or_else(|| {
                    GitError::Invalid("packed-refs peel line without a ref".to_string())
                })?;
                if let Some(entry) = entries.get_mut(&name) {
                    entry.1 = Some(peeled);
                }
                continue;
            }
            let (id, name) = text.split_once(' ').ok_or_else(|| {
                GitError::Invalid(format!("malformed packed-refs line `{text}`"))
            })?;
            let id = ObjectId::from_str(id)?;
            entries.insert(name.trim().to_string(), (id, None));
            last = Some(name.trim().to_string());
        }
        Ok(PackedRefs { entries })
    }

    fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"# pack-refs with: peeled fully-peeled sorted \n");
        for (name, (id, peeled)) in &self.entries {
            out.extend_from_slice(format!("{id} {name}\n").as_bytes());
            if let Some(peeled) = peeled {
                out.extend_from_slice(format!("^{peeled}\n").as_bytes());
            }
        }
        out
    }
}

/// Options for [`RefStore::pack_refs`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PackRefsOptions {
    /// Pack every loose ref, not only tags.
    pub all: bool,
    /// Remove the loose files after packing.
    pub delete_loose: bool,
}

/// Loose + packed reference store over a raw backend.
pub struct RefStore {
    raw: Arc<dyn RawStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RefStore {
    pub fn new(raw: Arc<dyn RawStore>) -> Self {
        RefStore {
            raw,
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn packed(&self) -> Result<PackedRefs, GitError> {
        match self.raw.load_bytes(PACKED_REFS_KEY).await {
            Ok(data) => PackedRefs::parse(&data),
            Err(GitError::NotFound(_)) => Ok(PackedRefs::default()),
            Err(e) => Err(e),
        }
    }

    async fn write_packed(&self, packed: &PackedRefs) -> Result<(), GitError> {
        self.raw
            .store_bytes(PACKED_REFS_KEY, Bytes::from(packed.serialize()))
            .await
    }

    /// Read a single ref without following symbolic links. Loose shadows
    /// packed.
    pub async fn get(&self, name: &str) -> Result<Option<Ref>, GitError> {
        match self.raw.load_bytes(name).await {
            Ok(data) => {
                let text = std::str::from_utf8(&data)
                    .map_err(|_| GitError::Invalid(format!("ref {name} is not UTF-8")))?
                    .trim()
                    .to_string();
                if let Some(target) = text.strip_prefix(SYMREF_PREFIX) {
                    return Ok(Some(Ref::Symbolic {
                        name: name.to_string(),
                        target: target.trim().to_string(),
                    }));
                }
                Ok(Some(Ref::Direct {
                    name: name.to_string(),
                    id: ObjectId::from_str(&text)?,
                }))
            }
            Err(GitError::NotFound(_)) => {
                let packed = self.packed().await?;
                Ok(packed.entries.get(name).map(|(id, _)| Ref::Direct {
                    name: name.to_string(),
                    id: *id,
                }))
            }
            Err(e) => Err(e),
        }
    }

    /// Follow symbolic chains to a direct ref, bounded against cycles.
    pub async fn resolve(&self, name: &str) -> Result<Option<Ref>, GitError> {
        let mut current = name.to_string();
        for _ in 0..=MAX_SYMREF_DEPTH {
            match self.get(&current).await? {
                Some(Ref::Symbolic { target, .. }) => current = target,
                other => return Ok(other),
            }
        }
        Err(GitError::Invalid(format!(
            "symbolic ref chain starting at {name} exceeds depth {MAX_SYMREF_DEPTH}"
        )))
    }

    /// The id a ref ultimately points at, if it exists.
    pub async fn resolve_id(&self, name: &str) -> Result<Option<ObjectId>, GitError> {
        Ok(self.resolve(name).await?.and_then(|r| r.id()))
    }

    /// Enumerate refs under a prefix, sorted by name; the loose namespace
    /// shadows packed entries.
    pub async fn list(&self, prefix: &str) -> Result<Vec<Ref>, GitError> {
        let mut merged: BTreeMap<String, Ref> = BTreeMap::new();
        for (name, (id, _)) in self.packed().await?.entries {
            if name.starts_with(prefix) {
                merged.insert(name.clone(), Ref::Direct { name, id });
            }
        }
        for key in self.raw.keys().await? {
            if !key.starts_with(prefix) || !is_ref_key(&key) {
                continue;
            }
            if let Some(found) = self.get(&key).await? {
                merged.insert(key, found);
            }
        }
        Ok(merged.into_values().collect())
    }

    /// Write a direct ref, unconditionally.
    pub async fn set(
        &self,
        name: &str,
        id: ObjectId,
        log: Option<&LogContext>,
    ) -> Result<(), GitError> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;
        let previous = self.resolve_id(name).await?;
        self.raw
            .store_bytes(name, Bytes::from(format!("{id}\n")))
            .await?;
        if let Some(log) = log {
            self.append_reflog(name, previous, id, log).await?;
        }
        Ok(())
    }

    /// Write a symbolic ref (`ref: <target>`).
    pub async fn set_symbolic(&self, name: &str, target: &str) -> Result<(), GitError> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;
        self.raw
            .store_bytes(name, Bytes::from(format!("{SYMREF_PREFIX}{target}\n")))
            .await
    }

    /// Delete a ref from both the loose and packed namespaces, along with its
    /// reflog. Reports whether anything existed.
    pub async fn delete(&self, name: &str) -> Result<bool, GitError> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let loose = self.raw.remove(name).await?;
        let mut packed = self.packed().await?;
        let was_packed = packed.entries.remove(name).is_some();
        if was_packed {
            self.write_packed(&packed).await?;
        }
        self.raw.remove(&reflog::log_key(name)).await?;
        Ok(loose || was_packed)
    }

    /// Compare-and-swap: succeeds iff the currently resolved id equals
    /// `expected` (`None` = the ref must not exist). Returns the previous
    /// value and whether the swap happened; mismatches do not error.
    pub async fn compare_and_swap(
        &self,
        name: &str,
        expected: Option<ObjectId>,
        new: ObjectId,
        log: Option<&LogContext>,
    ) -> Result<CasOutcome, GitError> {
        let lock = self.lock_for(name);
        let _guard = lock.lock().await;

        let previous = self.resolve_id(name).await?;
        if previous != expected {
            return Ok(CasOutcome {
                previous,
                swapped: false,
            });
        }
        self.raw
            .store_bytes(name, Bytes::from(format!("{new}\n")))
            .await?;
        if let Some(log) = log {
            self.append_reflog(name, previous, new, log).await?;
        }
        Ok(CasOutcome {
            previous,
            swapped: true,
        })
    }

    /// Move loose refs into `packed-refs` atomically. `peeled` supplies the
    /// dereferenced commit for annotated tags, recorded as `^` lines.
    pub async fn pack_refs(
        &self,
        options: PackRefsOptions,
        peeled: &std::collections::HashMap<String, ObjectId>,
    ) -> Result<usize, GitError> {
        let mut packed = self.packed().await?;
        let mut moved = Vec::new();

        for key in self.raw.keys().await? {
            if !is_ref_key(&key) || !key.starts_with("refs/") {
                continue;
            }
            if !options.all && !key.starts_with("refs/tags/") {
                continue;
            }
            // Symbolic refs never pack.
            if let Some(Ref::Direct { id, .. }) = self.get(&key).await? {
                packed
                    .entries
                    .insert(key.clone(), (id, peeled.get(&key).copied()));
                moved.push(key);
            }
        }

        self.write_packed(&packed).await?;
        if options.delete_loose {
            for key in &moved {
                self.raw.remove(key).await?;
            }
        }
        Ok(moved.len())
    }

    /// Newest-first reflog entries for a ref.
    pub async fn reflog(&self, name: &str) -> Result<Vec<ReflogEntry>, GitError> {
        reflog::read(self.raw.as_ref(), name).await
    }

    async fn append_reflog(
        &self,
        name: &str,
        old: Option<ObjectId>,
        new: ObjectId,
        log: &LogContext,
    ) -> Result<(), GitError> {
        reflog::append(self.raw.as_ref(), name, old, new, log).await
    }

    /// Append a reflog entry without changing the ref; used by operations
    /// that log against `HEAD` on top of a branch update.
    pub async fn log_only(
        &self,
        name: &str,
        old: Option<ObjectId>,
        new: ObjectId,
        log: &LogContext,
    ) -> Result<(), GitError> {
        self.append_reflog(name, old, new, log).await
    }
}

/// Keys in the repository store that belong to the ref namespace.
fn is_ref_key(key: &str) -> bool {
    key == "HEAD" || (key.starts_with("refs/") && !key.ends_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::raw::MemoryStore;

    fn store() -> RefStore {
        RefStore::new(Arc::new(MemoryStore::new()))
    }

    fn id(n: u8) -> ObjectId {
        ObjectId::from_raw([n; 20])
    }

    fn log() -> LogContext {
        LogContext {
            name: "A".to_string(),
            email: "a@x".to_string(),
            timestamp: 1700000000,
            timezone: "+0000".to_string(),
            message: "test: update".to_string(),
        }
    }

    /// Direct set/get/resolve round trip.
    #[tokio::test]
    async fn direct_round_trip() {
        let refs = store();
        refs.set("refs/heads/main", id(1), None).await.unwrap();
        let found = refs.get("refs/heads/main").await.unwrap().unwrap();
        assert_eq!(found.id(), Some(id(1)));
        assert_eq!(
            refs.resolve_id("refs/heads/main").await.unwrap(),
            Some(id(1))
        );
    }

    /// HEAD as a symbolic ref resolves through to the branch id.
    #[tokio::test]
    async fn symbolic_resolution() {
        let refs = store();
        refs.set_symbolic("HEAD", "refs/heads/main").await.unwrap();
        refs.set("refs/heads/main", id(2), None).await.unwrap();

        match refs.get("HEAD").await.unwrap().unwrap() {
            Ref::Symbolic { target, .. } => assert_eq!(target, "refs/heads/main"),
            other => panic!("expected symbolic HEAD, got {other:?}"),
        }
        assert_eq!(refs.resolve_id("HEAD").await.unwrap(), Some(id(2)));

        // A dangling symref resolves to nothing rather than erroring.
        refs.set_symbolic("HEAD", "refs/heads/gone").await.unwrap();
        assert_eq!(refs.resolve_id("HEAD").await.unwrap(), None);
    }

    /// Symbolic cycles are cut off with an error.
    #[tokio::test]
    async fn symbolic_cycle_bounded() {
        let refs = store();
        refs.set_symbolic("refs/a", "refs/b").await.unwrap();
        refs.set_symbolic("refs/b", "refs/a").await.unwrap();
        assert!(refs.resolve("refs/a").await.is_err());
    }

    /// CAS succeeds once against a given expectation, then fails.
    #[tokio::test]
    async fn cas_semantics() {
        let refs = store();
        let created = refs
            .compare_and_swap("refs/heads/main", None, id(1), Some(&log()))
            .await
            .unwrap();
        assert!(created.swapped);
        assert_eq!(created.previous, None);

        let updated = refs
            .compare_and_swap("refs/heads/main", Some(id(1)), id(2), Some(&log()))
            .await
            .unwrap();
        assert!(updated.swapped);

        let stale = refs
            .compare_and_swap("refs/heads/main", Some(id(1)), id(3), None)
            .await
            .unwrap();
        assert!(!stale.swapped);
        assert_eq!(stale.previous, Some(id(2)));
        assert_eq!(
            refs.resolve_id("refs/heads/main").await.unwrap(),
            Some(id(2))
        );
    }

    /// Reflog records updates newest-first.
    #[tokio::test]
    async fn reflog_newest_first() {
        let refs = store();
        refs.compare_and_swap("refs/heads/main", None, id(1), Some(&log()))
            .await
            .unwrap();
        refs.compare_and_swap("refs/heads/main", Some(id(1)), id(2), Some(&log()))
            .await
            .unwrap();

        let entries = refs.reflog("refs/heads/main").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].new_id, id(2));
        assert_eq!(entries[1].new_id, id(1));
        assert_eq!(entries[1].old_id, ObjectId::ZERO);
    }

    /// pack_refs moves loose refs into the packed file; loose still shadows
    /// until deleted, and deletion erases both layers.
    #[tokio::test]
    async fn pack_refs_and_shadowing() {
        let refs = store();
        refs.set("refs/heads/main", id(1), None).await.unwrap();
        refs.set("refs/tags/v1", id(2), None).await.unwrap();

        let moved = refs
            .pack_refs(
                PackRefsOptions {
                    all: true,
                    delete_loose: true,
                },
                &std::collections::HashMap::new(),
            )
            .await
            .unwrap();
        assert_eq!(moved, 2);

        // Entries survive via packed-refs.
        assert_eq!(
            refs.resolve_id("refs/heads/main").await.unwrap(),
            Some(id(1))
        );

        // A fresh loose write shadows the packed value.
        refs.set("refs/heads/main", id(9), None).await.unwrap();
        assert_eq!(
            refs.resolve_id("refs/heads/main").await.unwrap(),
            Some(id(9))
        );

        assert!(refs.delete("refs/heads/main").await.unwrap());
        assert_eq!(refs.resolve_id("refs/heads/main").await.unwrap(), None);
    }

    /// list unions loose and packed, sorted, with loose preferred.
    #[tokio::test]
    async fn list_union() {
        let refs = store();
        refs.set("refs/heads/b", id(1), None).await.unwrap();
        refs.set("refs/heads/a", id(2), None).await.unwrap();
        refs.pack_refs(
            PackRefsOptions {
                all: true,
                delete_loose: true,
            },
            &std::collections::HashMap::new(),
        )
        .await
        .unwrap();
        refs.set("refs/heads/b", id(3), None).await.unwrap();

        let listed = refs.list("refs/heads/").await.unwrap();
        let names: Vec<_> = listed.iter().map(|r| r.name().to_string()).collect();
        assert_eq!(names, vec!["refs/heads/a", "refs/heads/b"]);
        assert_eq!(listed[1].id(), Some(id(3)));
    }

    /// Peeled ids survive a packed-refs round trip.
    #[tokio::test]
    async fn packed_refs_peel_round_trip() {
        let mut packed = PackedRefs::default();
        packed
            .entries
            .insert("refs/tags/v1".to_string(), (id(1), Some(id(2))));
        let reparsed = PackedRefs::parse(&packed.serialize()).unwrap();
        assert_eq!(
            reparsed.entries.get("refs/tags/v1"),
            Some(&(id(1), Some(id(2))))
        );
    }
}
