//! History traversal over the commit graph: ancestry walks, merge-base
//! computation, and the reachable-object enumeration that feeds pack
//! building.

use std::collections::{BinaryHeap, HashSet, VecDeque};

use crate::{
    cancel::CancelToken,
    errors::GitError,
    hash::ObjectId,
    internal::object::{GitObject, types::ObjectType},
    storage::objects::ObjectStore,
};

/// Heap item ordered by commit time (newest first), insertion order breaking
/// ties.
#[derive(PartialEq, Eq)]
struct QueueItem {
    time: i64,
    order: u64,
    id: ObjectId,
}

impl Ord for QueueItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| other.order.cmp(&self.order))
    }
}

impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Lazy ancestry iterator: yields each reachable commit exactly once, newest
/// first, starting with the seed itself. Callers can stop (or cancel)
/// between items.
pub struct AncestryWalk<'a> {
    odb: &'a ObjectStore,
    heap: BinaryHeap<QueueItem>,
    seen: HashSet<ObjectId>,
    counter: u64,
}

impl<'a> AncestryWalk<'a> {
    pub async fn new(odb: &'a ObjectStore, start: ObjectId) -> Result<AncestryWalk<'a>, GitError> {
        let mut walk = AncestryWalk {
            odb,
            heap: BinaryHeap::new(),
            seen: HashSet::new(),
            counter: 0,
        };
        walk.push(start).await?;
        Ok(walk)
    }

    async fn push(&mut self, id: ObjectId) -> Result<(), GitError> {
        if !self.seen.insert(id) {
            return Ok(());
        }
        let commit = self.odb.load_commit(&id).await?;
        self.heap.push(QueueItem {
            time: commit.committer.timestamp,
            order: self.counter,
            id,
        });
        self.counter += 1;
        Ok(())
    }

    /// The next commit id, or `None` when history is exhausted.
    pub async fn next(&mut self) -> Result<Option<ObjectId>, GitError> {
        let Some(item) = self.heap.pop() else {
            return Ok(None);
        };
        let commit = self.odb.load_commit(&item.id).await?;
        for parent in commit.parent_ids {
            self.push(parent).await?;
        }
        Ok(Some(item.id))
    }
}

/// Collect up to `limit` ancestors of `start` (including `start`), newest
/// first.
pub async fn walk_ancestry(
    odb: &ObjectStore,
    start: ObjectId,
    limit: Option<usize>,
) -> Result<Vec<ObjectId>, GitError> {
    let mut walk = AncestryWalk::new(odb, start).await?;
    let mut out = Vec::new();
    while let Some(id) = walk.next().await? {
        out.push(id);
        if limit.is_some_and(|limit| out.len() >= limit) {
            break;
        }
    }
    Ok(out)
}

/// Whether `ancestor` is reachable from `descendant` (inclusive).
pub async fn is_ancestor(
    odb: &ObjectStore,
    ancestor: ObjectId,
    descendant: ObjectId,
) -> Result<bool, GitError> {
    let mut walk = AncestryWalk::new(odb, descendant).await?;
    while let Some(id) = walk.next().await? {
        if id == ancestor {
            return Ok(true);
        }
    }
    Ok(false)
}

/// A non-fast-forward update: `old` must be an ancestor of `new`.
pub async fn validate_fast_forward(
    odb: &ObjectStore,
    old: ObjectId,
    new: ObjectId,
) -> Result<bool, GitError> {
    if old == new {
        return Ok(true);
    }
    is_ancestor(odb, old, new).await
}

/// All *best* common ancestors of `a` and `b`: common ancestors that are not
/// themselves ancestors of another common ancestor. Sorted newest first;
/// callers wanting a single base take the first.
pub async fn find_merge_base(
    odb: &ObjectStore,
    a: ObjectId,
    b: ObjectId,
) -> Result<Vec<ObjectId>, GitError> {
    // Paint everything reachable from `a`, then walk from `b` collecting
    // painted nodes without expanding past them: ancestors of a common
    // commit are common too, but dominated.
    let mut ancestors_of_a = HashSet::new();
    {
        let mut walk = AncestryWalk::new(odb, a).await?;
        while let Some(id) = walk.next().await? {
            ancestors_of_a.insert(id);
        }
    }

    let mut candidates: Vec<ObjectId> = Vec::new();
    let mut queue = VecDeque::from([b]);
    let mut seen = HashSet::new();
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        if ancestors_of_a.contains(&id) {
            candidates.push(id);
            continue;
        }
        match odb.load_commit(&id).await {
            Ok(commit) => queue.extend(commit.parent_ids),
            Err(e) => return Err(e),
        }
    }

    if candidates.len() > 1 {
        // Criss-cross histories can surface dominated candidates reached
        // along independent paths; strip any candidate that is a strict
        // ancestor of another.
        let mut dominated = HashSet::new();
        let mut queue: VecDeque<ObjectId> = VecDeque::new();
        let mut seen = HashSet::new();
        for candidate in &candidates {
            let commit = odb.load_commit(candidate).await?;
            queue.extend(commit.parent_ids);
        }
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            dominated.insert(id);
            let commit = odb.load_commit(&id).await?;
            queue.extend(commit.parent_ids);
        }
        candidates.retain(|candidate| !dominated.contains(candidate));
    }

    // Newest first for deterministic selection.
    let mut with_time = Vec::with_capacity(candidates.len());
    for id in candidates {
        let commit = odb.load_commit(&id).await?;
        with_time.push((commit.committer.timestamp, id));
    }
    with_time.sort_by(|x, y| y.0.cmp(&x.0).then_with(|| x.1.cmp(&y.1)));
    Ok(with_time.into_iter().map(|(_, id)| id).collect())
}

/// Enumerate every object reachable from `wants` (commits pull in their
/// trees and parents, trees their children, tags their targets), stopping at
/// anything in `haves` or already visited. Delta bases always precede
/// dependents in the returned order because parents/children follow their
/// referrer.
pub async fn collect_reachable(
    odb: &ObjectStore,
    wants: &[ObjectId],
    haves: &[ObjectId],
    cancel: &CancelToken,
) -> Result<Vec<(ObjectId, ObjectType)>, GitError> {
    let stop: HashSet<ObjectId> = haves.iter().copied().collect();
    let mut out: Vec<(ObjectId, ObjectType)> = Vec::new();
    let mut seen: HashSet<ObjectId> = HashSet::new();
    let mut queue: VecDeque<ObjectId> = wants.iter().copied().collect();

    while let Some(id) = queue.pop_front() {
        cancel.check()?;
        if stop.contains(&id) || !seen.insert(id) {
            continue;
        }
        let object = odb.load_object(&id).await?;
        out.push((id, object.object_type()));
        match object {
            GitObject::Commit(commit) => {
                queue.push_back(commit.tree_id);
                queue.extend(commit.parent_ids);
            }
            GitObject::Tree(tree) => {
                for item in tree.tree_items {
                    // Submodule entries point outside this object store.
                    if item.mode != crate::internal::object::tree::TreeItemMode::Commit {
                        queue.push_back(item.id);
                    }
                }
            }
            GitObject::Tag(tag) => queue.push_back(tag.object_id),
            GitObject::Blob(_) => {}
        }
    }
    Ok(out)
}

/// Commits reachable from `start` in recency order; the negotiation `have`
/// source.
pub async fn recent_commits(
    odb: &ObjectStore,
    starts: &[ObjectId],
    limit: usize,
) -> Result<Vec<ObjectId>, GitError> {
    let mut heap: BinaryHeap<QueueItem> = BinaryHeap::new();
    let mut seen = HashSet::new();
    let mut counter = 0u64;

    for start in starts {
        if seen.insert(*start)
            && let Ok(commit) = odb.load_commit(start).await
        {
            heap.push(QueueItem {
                time: commit.committer.timestamp,
                order: counter,
                id: *start,
            });
            counter += 1;
        }
    }

    let mut out = Vec::new();
    while let Some(item) = heap.pop() {
        out.push(item.id);
        if out.len() >= limit {
            break;
        }
        let commit = odb.load_commit(&item.id).await?;
        for parent in commit.parent_ids {
            if seen.insert(parent)
                && let Ok(parent_commit) = odb.load_commit(&parent).await
            {
                heap.push(QueueItem {
                    time: parent_commit.committer.timestamp,
                    order: counter,
                    id: parent,
                });
                counter += 1;
            }
        }
    }
    Ok(out)
}
