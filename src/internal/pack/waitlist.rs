//! Temporary storage for delta entries whose base object has not been decoded
//! yet, keyed by both pack offset and object id.

use dashmap::DashMap;

use crate::{hash::ObjectId, internal::pack::decode::PendingDelta};

/// Waitlist for delta entries while their base object is not ready.
#[derive(Default, Debug)]
pub struct Waitlist {
    pub map_offset: DashMap<usize, Vec<PendingDelta>>,
    pub map_ref: DashMap<ObjectId, Vec<PendingDelta>>,
}

impl Waitlist {
    /// Create a new, empty Waitlist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a delta waiting for the base at `offset`.
    pub fn insert_offset(&self, offset: usize, obj: PendingDelta) {
        self.map_offset.entry(offset).or_default().push(obj);
    }

    /// Park a delta waiting for the base with id `hash`.
    pub fn insert_ref(&self, hash: ObjectId, obj: PendingDelta) {
        self.map_ref.entry(hash).or_default().push(obj);
    }

    /// Take objects out (get & remove).
    /// <br> Returns an empty Vec if nothing is waiting.
    pub fn take(&self, offset: usize, hash: ObjectId) -> Vec<PendingDelta> {
        let mut res = Vec::new();
        if let Some((_, vec)) = self.map_offset.remove(&offset) {
            res.extend(vec);
        }
        if let Some((_, vec)) = self.map_ref.remove(&hash) {
            res.extend(vec);
        }
        res
    }

    /// Ids of every delta still waiting on an external (by-id) base.
    pub fn pending_ref_bases(&self) -> Vec<ObjectId> {
        self.map_ref.iter().map(|entry| *entry.key()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.map_offset.is_empty() && self.map_ref.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::pack::decode::DeltaBase;

    /// Helper to build a pending delta parked on the given base.
    fn make_pending(offset: usize, base: DeltaBase) -> PendingDelta {
        PendingDelta {
            offset,
            crc32: 0,
            base,
            data: vec![],
        }
    }

    /// Insert and take by offset.
    #[test]
    fn test_waitlist_offset() {
        let waitlist = Waitlist::new();
        waitlist.insert_offset(100, make_pending(10, DeltaBase::Offset(100)));
        waitlist.insert_offset(100, make_pending(20, DeltaBase::Offset(100)));

        let res = waitlist.take(100, ObjectId::default());
        assert_eq!(res.len(), 2);
        assert_eq!(res[0].offset, 10);
        assert_eq!(res[1].offset, 20);

        assert!(waitlist.take(100, ObjectId::default()).is_empty());
    }

    /// Insert and take by object id.
    #[test]
    fn test_waitlist_ref() {
        let waitlist = Waitlist::new();
        let hash = ObjectId::hash_of(b"test_hash");
        waitlist.insert_ref(hash, make_pending(30, DeltaBase::Ref(hash)));

        assert_eq!(waitlist.pending_ref_bases(), vec![hash]);
        let res = waitlist.take(0, hash);
        assert_eq!(res.len(), 1);
        assert_eq!(res[0].offset, 30);
        assert!(waitlist.is_empty());
    }

    /// Taking with both keys drains both maps.
    #[test]
    fn test_waitlist_mixed() {
        let waitlist = Waitlist::new();
        let hash = ObjectId::hash_of(b"test_hash");
        let offset = 200;

        waitlist.insert_offset(offset, make_pending(1, DeltaBase::Offset(offset)));
        waitlist.insert_ref(hash, make_pending(2, DeltaBase::Ref(hash)));

        let res = waitlist.take(offset, hash);
        assert_eq!(res.len(), 2);
        assert!(res.iter().any(|o| o.offset == 1));
        assert!(res.iter().any(|o| o.offset == 2));
        assert!(waitlist.map_offset.is_empty());
        assert!(waitlist.map_ref.is_empty());
    }
}
