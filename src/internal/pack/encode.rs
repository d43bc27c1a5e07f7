//! Pack writer.
//!
//! Emits the 12-byte `PACK` header, each entry with its varint header and
//! zlib-deflated payload, and the trailing SHA-1. While writing, a sliding
//! window of recently added objects (per type) feeds the delta compressor:
//! an object is stored as a delta against the window member that yields the
//! smallest instruction stream, provided the deflated delta stays below a
//! configured fraction of the deflated full content. Bases inside the pack
//! are referenced by offset (OFS_DELTA); explicit deltas against objects the
//! receiver already has become REF_DELTA entries.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::{
    config::PackConfig,
    delta::DeltaDiff,
    errors::GitError,
    hash::{IdHasher, ObjectId},
    internal::{
        object::types::ObjectType,
        pack::{entry::Entry, index_entry::IndexEntry},
        zlib::Zlib,
    },
    utils,
};

/// One unit of input to the encoder.
pub enum PackItem {
    /// A full object; the window may still turn it into an OFS_DELTA.
    Full(Entry),
    /// A precomputed delta against a base that may live outside the pack.
    Delta {
        target: ObjectId,
        base: ObjectId,
        data: Vec<u8>,
    },
}

impl From<Entry> for PackItem {
    fn from(entry: Entry) -> Self {
        PackItem::Full(entry)
    }
}

struct WindowEntry {
    id: ObjectId,
    offset: usize,
    data: Arc<Vec<u8>>,
}

/// Streaming pack encoder; create with the object count, feed items through
/// [`PackEncoder::encode`], collect chunks from the channel passed in.
pub struct PackEncoder {
    object_number: usize,
    window_size: usize,
    delta_ratio: f64,
    sender: Option<mpsc::Sender<Vec<u8>>>,
    buffer: Vec<u8>,
    zlib: Zlib,
    hash: IdHasher,
    offset: usize,
    written: usize,
    windows: HashMap<ObjectType, VecDeque<WindowEntry>>,
    by_id: HashMap<ObjectId, usize>,
    index_entries: Vec<IndexEntry>,
}

impl PackEncoder {
    /// Channel-driven encoder: pack bytes stream out through `sender`.
    pub fn new(object_number: usize, window_size: usize, sender: mpsc::Sender<Vec<u8>>) -> Self {
        Self::build(object_number, window_size, Some(sender))
    }

    /// Buffering encoder: pack bytes accumulate internally, returned by
    /// [`PackEncoder::into_buffer`] after `encode` completes.
    pub fn new_buffered(object_number: usize, window_size: usize) -> Self {
        Self::build(object_number, window_size, None)
    }

    fn build(
        object_number: usize,
        window_size: usize,
        sender: Option<mpsc::Sender<Vec<u8>>>,
    ) -> Self {
        PackEncoder {
            object_number,
            window_size,
            delta_ratio: PackConfig::default().delta_ratio,
            sender,
            buffer: Vec::new(),
            zlib: Zlib::new(),
            hash: IdHasher::new(),
            offset: 0,
            written: 0,
            windows: HashMap::new(),
            by_id: HashMap::new(),
            index_entries: Vec::new(),
        }
    }

    /// Consume items until the channel closes, writing the header first and
    /// the trailer last. Returns the pack hash and the index rows for a
    /// sibling `.idx` file, sorted by id.
    pub async fn encode(
        &mut self,
        mut rx: mpsc::Receiver<PackItem>,
    ) -> Result<(ObjectId, Vec<IndexEntry>), GitError> {
        self.write_header().await?;

        while let Some(item) = rx.recv().await {
            match item {
                PackItem::Full(entry) => self.write_full(entry).await?,
                PackItem::Delta { target, base, data } => {
                    self.write_explicit_delta(target, base, data).await?
                }
            }
        }

        if self.written != self.object_number {
            return Err(GitError::CorruptPack(format!(
                "pack encoder received {} objects, header declared {}",
                self.written, self.object_number
            )));
        }

        let pack_hash = self.hash.clone().finalize();
        self.send(pack_hash.to_data()).await?;
        tracing::debug!("encoded pack {pack_hash} with {} objects", self.written);

        let mut entries = std::mem::take(&mut self.index_entries);
        entries.sort_by(|a, b| a.hash.cmp(&b.hash));
        Ok((pack_hash, entries))
    }

    /// One-shot encoding of an in-memory object list.
    pub async fn encode_all(
        items: Vec<impl Into<PackItem>>,
        window_size: usize,
    ) -> Result<(Vec<u8>, ObjectId, Vec<IndexEntry>), GitError> {
        let count = items.len();
        let (tx, rx) = mpsc::channel(count.max(1));
        for item in items {
            tx.send(item.into())
                .await
                .map_err(|_| GitError::CorruptPack("pack item channel closed".to_string()))?;
        }
        drop(tx);

        let mut encoder = PackEncoder::new_buffered(count, PackConfig::default().delta_window);
        encoder.window_size = window_size;
        let (hash, entries) = encoder.encode(rx).await?;
        Ok((encoder.into_buffer(), hash, entries))
    }

    /// The accumulated pack bytes of a buffering encoder.
    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }

    async fn write_header(&mut self) -> Result<(), GitError> {
        let mut header = Vec::with_capacity(12);
        header.extend_from_slice(b"PACK");
        header.extend_from_slice(&2u32.to_be_bytes());
        header.extend_from_slice(&(self.object_number as u32).to_be_bytes());
        self.send(header).await
    }

    async fn write_full(&mut self, entry: Entry) -> Result<(), GitError> {
        let offset = self.offset;
        let full_deflated = self.zlib.deflate(&entry.data)?;

        // Try the window: smallest instruction stream wins, then the deflated
        // delta must beat the configured fraction of the deflated content.
        let mut chosen: Option<(usize, Vec<u8>)> = None; // (base offset, delta)
        if let Some(window) = self.windows.get(&entry.obj_type) {
            for candidate in window {
                let delta = DeltaDiff::new(&candidate.data, &entry.data).encode();
                if chosen.as_ref().is_none_or(|(_, best)| delta.len() < best.len()) {
                    chosen = Some((candidate.offset, delta));
                }
            }
        }

        let mut bytes: Vec<u8> = Vec::new();
        let mut stored_delta = false;
        if let Some((base_offset, delta)) = chosen {
            let delta_deflated = self.zlib.deflate(&delta)?;
            if (delta_deflated.len() as f64) < self.delta_ratio * full_deflated.len() as f64 {
                bytes.extend(utils::write_entry_header(
                    ObjectType::OffsetDelta.to_u8(),
                    delta.len() as u64,
                ));
                bytes.extend(utils::write_offset_encoding((offset - base_offset) as u64));
                bytes.extend(&delta_deflated);
                stored_delta = true;
            }
        }
        if !stored_delta {
            bytes.extend(utils::write_entry_header(
                entry.obj_type.to_u8(),
                entry.data.len() as u64,
            ));
            bytes.extend(&full_deflated);
        }

        self.push_index_row(entry.hash, &bytes, offset);
        self.send(bytes).await?;

        let window = self.windows.entry(entry.obj_type).or_default();
        window.push_back(WindowEntry {
            id: entry.hash,
            offset,
            data: Arc::new(entry.data),
        });
        if window.len() > self.window_size {
            window.pop_front();
        }
        Ok(())
    }

    async fn write_explicit_delta(
        &mut self,
        target: ObjectId,
        base: ObjectId,
        data: Vec<u8>,
    ) -> Result<(), GitError> {
        let offset = self.offset;
        let deflated = self.zlib.deflate(&data)?;

        let mut bytes: Vec<u8> = Vec::new();
        match self.by_id.get(&base) {
            // Base landed in this pack earlier: the offset form is smaller.
            Some(base_offset) => {
                bytes.extend(utils::write_entry_header(
                    ObjectType::OffsetDelta.to_u8(),
                    data.len() as u64,
                ));
                bytes.extend(utils::write_offset_encoding((offset - base_offset) as u64));
            }
            None => {
                bytes.extend(utils::write_entry_header(
                    ObjectType::HashDelta.to_u8(),
                    data.len() as u64,
                ));
                bytes.extend(base.as_ref());
            }
        }
        bytes.extend(&deflated);

        self.push_index_row(target, &bytes, offset);
        self.send(bytes).await
    }

    fn push_index_row(&mut self, id: ObjectId, entry_bytes: &[u8], offset: usize) {
        self.index_entries.push(IndexEntry::new(
            id,
            crc32fast::hash(entry_bytes),
            offset as u64,
        ));
        self.by_id.insert(id, offset);
        self.written += 1;
    }

    async fn send(&mut self, data: Vec<u8>) -> Result<(), GitError> {
        self.hash.update(&data);
        self.offset += data.len();
        match &self.sender {
            Some(sender) => sender.send(data).await.map_err(|e| {
                GitError::IOError(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    format!("Failed to send pack data: {e}"),
                ))
            }),
            None => {
                self.buffer.extend_from_slice(&data);
                Ok(())
            }
        }
    }
}

/// Write pipeline per the two-phase model: accumulate full objects and
/// explicit deltas, then `flush` into a pack + index pair.
#[derive(Default)]
pub struct PendingPack {
    items: Vec<PackItem>,
}

impl PendingPack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a full object.
    pub fn add_object(&mut self, obj_type: ObjectType, content: Vec<u8>) -> ObjectId {
        let entry = Entry::from_raw(obj_type, content);
        let id = entry.hash;
        self.items.push(PackItem::Full(entry));
        id
    }

    /// Queue an entry that already carries its id.
    pub fn add_entry(&mut self, entry: Entry) {
        self.items.push(PackItem::Full(entry));
    }

    /// Queue a precomputed delta; `base_id` may denote an object outside the
    /// pack (thin pack), in which case a REF_DELTA entry is written.
    pub fn add_delta(&mut self, target_id: ObjectId, base_id: ObjectId, delta: Vec<u8>) {
        self.items.push(PackItem::Delta {
            target: target_id,
            base: base_id,
            data: delta,
        });
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Emit the pack and its v2 index.
    pub async fn flush(
        self,
        window_size: usize,
    ) -> Result<(Vec<u8>, Vec<u8>, ObjectId), GitError> {
        let (pack, pack_hash, entries) = PackEncoder::encode_all(self.items, window_size).await?;
        let idx = super::pack_index::IdxBuilder::build_buffer(entries, pack_hash).await?;
        Ok((pack, idx, pack_hash))
    }
}
