//! Streaming pack decoder.
//!
//! Reads a pack front to back through a hashing [`Wrapper`], inflating each
//! entry with [`ReadBoxed`] and resolving OFS/REF delta chains against the
//! entries decoded so far. Deltas whose base has not appeared yet park in the
//! [`Waitlist`]; deltas whose base lives outside the pack entirely (thin
//! packs) are surfaced so the caller can complete them from its own object
//! store.

use std::collections::HashMap;
use std::io::{BufRead, Read};
use std::sync::Arc;

use crate::{
    config::PackConfig,
    delta::delta_decode,
    errors::GitError,
    hash::ObjectId,
    internal::{
        object::types::ObjectType,
        pack::{entry::Entry, waitlist::Waitlist, wrapper::Wrapper},
        zlib::stream::inflate::ReadBoxed,
    },
    utils,
};

const PACK_MAGIC: &[u8; 4] = b"PACK";
const PACK_VERSION: u32 = 2;

/// Where a parked delta finds its base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaBase {
    /// Base entry starts at this pack offset (OFS_DELTA).
    Offset(usize),
    /// Base object addressed by id (REF_DELTA), possibly outside the pack.
    Ref(ObjectId),
}

/// A delta entry whose base was not available when it was read.
#[derive(Debug, Clone)]
pub struct PendingDelta {
    /// Offset of the delta entry itself.
    pub offset: usize,
    /// CRC32 of the entry's raw pack bytes.
    pub crc32: u32,
    pub base: DeltaBase,
    /// Inflated delta instruction stream.
    pub data: Vec<u8>,
}

#[derive(Clone)]
struct CachedEntry {
    obj_type: ObjectType,
    data: Arc<Vec<u8>>,
    chain_len: usize,
}

/// Representation of a Git pack being decoded.
pub struct Pack {
    /// Declared object count from the pack header.
    pub number: usize,
    /// Trailer checksum, filled in after a successful decode.
    pub signature: ObjectId,
    max_delta_depth: usize,
    by_offset: HashMap<usize, CachedEntry>,
    by_id: HashMap<ObjectId, usize>,
    waitlist: Waitlist,
}

impl Pack {
    pub fn new(config: &PackConfig) -> Self {
        Pack {
            number: 0,
            signature: ObjectId::ZERO,
            max_delta_depth: config.max_delta_depth,
            by_offset: HashMap::new(),
            by_id: HashMap::new(),
            waitlist: Waitlist::new(),
        }
    }

    /// Decode a whole pack stream, invoking `callback` with every fully
    /// resolved entry and its offset.
    ///
    /// Returns the ids of external bases still needed to resolve the pack; an
    /// empty vector means the pack was self-contained. Feed the missing bases
    /// through [`Pack::resolve_external`] to finish a thin pack.
    pub fn decode<F>(
        &mut self,
        pack: &mut (impl BufRead + Send),
        mut callback: F,
    ) -> Result<Vec<ObjectId>, GitError>
    where
        F: FnMut(Entry, usize),
    {
        let mut reader = Wrapper::new(pack);

        let magic = utils::read_bytes(&mut reader, 4)?;
        if magic != PACK_MAGIC {
            return Err(GitError::CorruptPack(format!(
                "invalid pack magic {magic:x?}"
            )));
        }
        let version = u32::from_be_bytes(
            utils::read_bytes(&mut reader, 4)?
                .try_into()
                .expect("read_bytes returned 4 bytes"),
        );
        if version != PACK_VERSION {
            return Err(GitError::CorruptPack(format!(
                "unsupported pack version {version}"
            )));
        }
        self.number = u32::from_be_bytes(
            utils::read_bytes(&mut reader, 4)?
                .try_into()
                .expect("read_bytes returned 4 bytes"),
        ) as usize;
        tracing::debug!("pack header: {} objects", self.number);

        for _ in 0..self.number {
            let offset = reader.bytes_read();
            reader.reset_crc();
            let (type_code, size) = utils::read_entry_header(&mut reader)?;
            let obj_type = ObjectType::from_u8(type_code)
                .map_err(|e| GitError::CorruptPack(e.to_string()))?;

            match obj_type {
                ObjectType::OffsetDelta => {
                    let distance = utils::read_offset_encoding(&mut reader)? as usize;
                    if distance == 0 || distance > offset {
                        return Err(GitError::CorruptPack(format!(
                            "ofs-delta at {offset} has invalid base distance {distance}"
                        )));
                    }
                    let base_offset = offset - distance;
                    let data = inflate_delta(&mut reader, size)?;
                    let pending = PendingDelta {
                        offset,
                        crc32: reader.crc(),
                        base: DeltaBase::Offset(base_offset),
                        data,
                    };
                    self.queue_delta(base_offset, None, pending, &mut callback)?;
                }
                ObjectType::HashDelta => {
                    let base_id = ObjectId::from_stream(&mut reader)?;
                    let data = inflate_delta(&mut reader, size)?;
                    let pending = PendingDelta {
                        offset,
                        crc32: reader.crc(),
                        base: DeltaBase::Ref(base_id),
                        data,
                    };
                    let base_offset = self.by_id.get(&base_id).copied();
                    match base_offset {
                        Some(bo) => self.queue_delta(bo, Some(base_id), pending, &mut callback)?,
                        None => self.waitlist.insert_ref(base_id, pending),
                    }
                }
                _ => {
                    let (id, data) = inflate_base(&mut reader, obj_type, size)?;
                    self.settle(
                        offset,
                        id,
                        CachedEntry {
                            obj_type,
                            data: Arc::new(data),
                            chain_len: 0,
                        },
                        &mut callback,
                    )?;
                }
            }
        }

        let computed = reader.final_hash();
        let declared = ObjectId::from_stream(&mut reader)?;
        if computed != declared {
            return Err(GitError::CorruptPack(format!(
                "pack checksum mismatch: computed {computed}, trailer {declared}"
            )));
        }
        self.signature = declared;

        // Anything still parked on an offset lost its base inside this very
        // pack, which cannot be completed externally.
        if !self.waitlist.map_offset.is_empty() {
            return Err(GitError::CorruptPack(
                "ofs-delta base missing from pack".to_string(),
            ));
        }

        Ok(self.waitlist.pending_ref_bases())
    }

    /// Provide an external base object (thin-pack completion), resolving every
    /// delta that was waiting for it, recursively.
    pub fn resolve_external<F>(
        &mut self,
        base_id: ObjectId,
        obj_type: ObjectType,
        data: Vec<u8>,
        callback: &mut F,
    ) -> Result<(), GitError>
    where
        F: FnMut(Entry, usize),
    {
        let base = CachedEntry {
            obj_type,
            data: Arc::new(data),
            chain_len: 0,
        };
        let waiting = self.waitlist.take(usize::MAX, base_id);
        self.resolve_waiting(&base, waiting, callback)
    }

    /// True when no delta is waiting for a base.
    pub fn is_fully_resolved(&self) -> bool {
        self.waitlist.is_empty()
    }

    /// Queue a delta whose base offset is known: resolve right away if the
    /// base has been decoded, park it otherwise.
    fn queue_delta<F>(
        &mut self,
        base_offset: usize,
        base_id: Option<ObjectId>,
        pending: PendingDelta,
        callback: &mut F,
    ) -> Result<(), GitError>
    where
        F: FnMut(Entry, usize),
    {
        match self.by_offset.get(&base_offset).cloned() {
            Some(base) => self.resolve_waiting(&base, vec![pending], callback),
            None => {
                match base_id {
                    Some(id) => self.waitlist.insert_ref(id, pending),
                    None => self.waitlist.insert_offset(base_offset, pending),
                }
                Ok(())
            }
        }
    }

    /// Record a fully resolved entry and cascade through any deltas that were
    /// waiting for it.
    fn settle<F>(
        &mut self,
        offset: usize,
        id: ObjectId,
        entry: CachedEntry,
        callback: &mut F,
    ) -> Result<(), GitError>
    where
        F: FnMut(Entry, usize),
    {
        callback(
            Entry {
                obj_type: entry.obj_type,
                data: entry.data.as_ref().clone(),
                hash: id,
                chain_len: entry.chain_len,
            },
            offset,
        );
        self.by_offset.insert(offset, entry.clone());
        self.by_id.insert(id, offset);

        let waiting = self.waitlist.take(offset, id);
        self.resolve_waiting(&entry, waiting, callback)
    }

    fn resolve_waiting<F>(
        &mut self,
        base: &CachedEntry,
        waiting: Vec<PendingDelta>,
        callback: &mut F,
    ) -> Result<(), GitError>
    where
        F: FnMut(Entry, usize),
    {
        // Iterative worklist: resolving one delta can unlock a chain.
        let mut work: Vec<(CachedEntry, PendingDelta)> = waiting
            .into_iter()
            .map(|pending| (base.clone(), pending))
            .collect();

        while let Some((base, pending)) = work.pop() {
            let chain_len = base.chain_len + 1;
            if chain_len > self.max_delta_depth {
                return Err(GitError::CorruptPack(format!(
                    "delta chain exceeds depth limit {}",
                    self.max_delta_depth
                )));
            }
            let data = delta_decode(&mut std::io::Cursor::new(&pending.data), &base.data)?;
            let id = ObjectId::from_type_and_data(base.obj_type, &data);
            let entry = CachedEntry {
                obj_type: base.obj_type,
                data: Arc::new(data),
                chain_len,
            };

            callback(
                Entry {
                    obj_type: entry.obj_type,
                    data: entry.data.as_ref().clone(),
                    hash: id,
                    chain_len,
                },
                pending.offset,
            );
            self.by_offset.insert(pending.offset, entry.clone());
            self.by_id.insert(id, pending.offset);

            for next in self.waitlist.take(pending.offset, id) {
                work.push((entry.clone(), next));
            }
        }
        Ok(())
    }
}

fn inflate_base(
    reader: &mut (impl BufRead + Send),
    obj_type: ObjectType,
    size: u64,
) -> Result<(ObjectId, Vec<u8>), GitError> {
    let mut boxed = ReadBoxed::new(reader, obj_type, size);
    let mut data = Vec::with_capacity(size as usize);
    boxed
        .read_to_end(&mut data)
        .map_err(|e| GitError::CorruptPack(format!("entry payload: {e}")))?;
    if data.len() as u64 != size {
        return Err(GitError::CorruptPack(format!(
            "entry inflated to {} bytes, header declared {size}",
            data.len()
        )));
    }
    let id = boxed.hash.clone().finalize();
    Ok((id, data))
}

fn inflate_delta(
    reader: &mut (impl BufRead + Send),
    size: u64,
) -> Result<Vec<u8>, GitError> {
    let mut boxed = ReadBoxed::new_for_delta(reader);
    let mut data = Vec::with_capacity(size as usize);
    boxed
        .read_to_end(&mut data)
        .map_err(|e| GitError::CorruptPack(format!("delta payload: {e}")))?;
    if data.len() as u64 != size {
        return Err(GitError::CorruptPack(format!(
            "delta inflated to {} bytes, header declared {size}",
            data.len()
        )));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::internal::object::blob::Blob;
    use crate::internal::pack::encode::PackEncoder;

    /// Decode a pack produced by our own encoder: every object comes back and
    /// the trailer verifies.
    #[tokio::test]
    async fn decode_own_encoding() {
        let blobs: Vec<Blob> = (0..4)
            .map(|i| Blob::from_content(&format!("content number {i}\n").repeat(20)))
            .collect();
        let entries: Vec<Entry> = blobs.iter().cloned().map(Entry::from).collect();
        let (pack_bytes, _, _) = PackEncoder::encode_all(entries, 10).await.unwrap();

        let mut pack = Pack::new(&PackConfig::default());
        let mut seen = Vec::new();
        let missing = pack
            .decode(&mut Cursor::new(&pack_bytes), |entry, _offset| {
                seen.push(entry.hash);
            })
            .unwrap();

        assert!(missing.is_empty());
        assert!(pack.is_fully_resolved());
        assert_eq!(seen.len(), 4);
        for blob in &blobs {
            assert!(seen.contains(&blob.id));
        }
    }

    /// A flipped byte in the body breaks the trailer checksum.
    #[tokio::test]
    async fn corrupt_checksum_detected() {
        let entries = vec![Entry::from(Blob::from_content("payload"))];
        let (mut pack_bytes, _, _) = PackEncoder::encode_all(entries, 10).await.unwrap();
        let mid = pack_bytes.len() / 2;
        pack_bytes[mid] ^= 0xff;

        let mut pack = Pack::new(&PackConfig::default());
        let result = pack.decode(&mut Cursor::new(&pack_bytes), |_, _| {});
        assert!(result.is_err());
    }

    /// Garbage magic is rejected immediately.
    #[test]
    fn bad_magic_rejected() {
        let mut pack = Pack::new(&PackConfig::default());
        let err = pack
            .decode(&mut Cursor::new(b"JUNKJUNKJUNK".to_vec()), |_, _| {})
            .unwrap_err();
        assert!(matches!(err, GitError::CorruptPack(_)));
    }
}
