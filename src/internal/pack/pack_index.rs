//! Git pack index (.idx) v2: a channel-streaming builder for writing and a
//! zero-copy reader for fanout lookups.

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use tokio::sync::mpsc;

pub use crate::internal::pack::index_entry::IndexEntry;
use crate::{
    errors::GitError,
    hash::{ID_RAW_LEN, IdHasher, ObjectId},
};

/// Magic plus version: `\xFFtOc` then 2.
const IDX_HEADER: [u8; 8] = [0xFF, 0x74, 0x4F, 0x63, 0, 0, 0, 2];

/// Builder for Git pack index (.idx) files that streams data through an async
/// channel.
///
/// # Arguments
/// * `object_number` - Total number of objects in the pack file.
/// * `sender` - Async channel sender to stream idx data.
/// * `pack_hash` - Hash of the corresponding pack file (used in the idx trailer).
pub struct IdxBuilder {
    sender: Option<mpsc::Sender<Vec<u8>>>,
    inner_hash: IdHasher, // idx trailer
    object_number: usize,
    pack_hash: ObjectId,
}

impl IdxBuilder {
    /// Create a new IdxBuilder.
    pub fn new(object_number: usize, sender: mpsc::Sender<Vec<u8>>, pack_hash: ObjectId) -> Self {
        Self {
            sender: Some(sender),
            inner_hash: IdHasher::new(),
            object_number,
            pack_hash,
        }
    }

    /// Drop the sender to close the channel.
    pub fn drop_sender(&mut self) {
        self.sender.take();
    }

    /// Send data through the channel and update the inner hash.
    async fn send_data(&mut self, data: Vec<u8>) -> Result<(), GitError> {
        if let Some(sender) = &self.sender {
            self.inner_hash.update(&data);
            sender.send(data).await.map_err(|e| {
                GitError::IOError(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    format!("Failed to send idx data: {e}"),
                ))
            })?;
        }
        Ok(())
    }

    /// Send data through the channel without updating the inner hash.
    async fn send_data_without_update_hash(&mut self, data: Vec<u8>) -> Result<(), GitError> {
        if let Some(sender) = &self.sender {
            sender.send(data).await.map_err(|e| {
                GitError::IOError(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    format!("Failed to send idx data: {e}"),
                ))
            })?;
        }
        Ok(())
    }

    /// send u32 value (big-endian)
    async fn send_u32(&mut self, v: u32) -> Result<(), GitError> {
        self.send_data(v.to_be_bytes().to_vec()).await
    }

    /// send u64 value (big-endian)
    async fn send_u64(&mut self, v: u64) -> Result<(), GitError> {
        self.send_data(v.to_be_bytes().to_vec()).await
    }

    /// Write the idx v2 header: magic `\377tOc`, version 2.
    async fn write_header(&mut self) -> Result<(), GitError> {
        self.send_data(IDX_HEADER.to_vec()).await
    }

    /// Write the fanout table: cumulative id counts per first byte.
    async fn write_fanout(&mut self, entries: &mut [IndexEntry]) -> Result<(), GitError> {
        entries.sort_by(|a, b| a.hash.cmp(&b.hash));
        let mut fanout = [0u32; 256];
        for entry in entries.iter() {
            fanout[entry.hash.first_byte() as usize] += 1;
        }

        // Calculate cumulative counts
        for i in 1..fanout.len() {
            fanout[i] += fanout[i - 1];
        }

        for &count in fanout.iter() {
            self.send_u32(count).await?;
        }

        Ok(())
    }

    /// Write the sorted object ids.
    async fn write_names(&mut self, entries: &Vec<IndexEntry>) -> Result<(), GitError> {
        for e in entries {
            self.send_data(e.hash.to_data()).await?;
        }

        Ok(())
    }

    /// Write the CRC32 checksums for each object in the index.
    async fn write_crc32(&mut self, entries: &Vec<IndexEntry>) -> Result<(), GitError> {
        for e in entries {
            self.send_u32(e.crc32).await?;
        }

        Ok(())
    }

    /// Write the offsets for each object in the index, handling large offsets.
    async fn write_offsets(&mut self, entries: &Vec<IndexEntry>) -> Result<(), GitError> {
        let mut large = vec![];
        for e in entries {
            if e.offset <= 0x7FFF_FFFF {
                // normal 31-bit offset
                self.send_u32(e.offset as u32).await?;
            } else {
                // MSB=1 => index into the 64-bit offset table
                let marker = 0x8000_0000 | large.len() as u32;
                self.send_u32(marker).await?;
                large.push(e.offset);
            }
        }
        for v in large {
            self.send_u64(v).await?;
        }
        Ok(())
    }

    /// Write the idx trailer containing the pack hash and idx file hash.
    async fn write_trailer(&mut self) -> Result<(), GitError> {
        self.send_data_without_update_hash(self.pack_hash.to_data())
            .await?;

        let idx_hash = self.inner_hash.clone().finalize();
        self.send_data(idx_hash.to_data()).await?;
        Ok(())
    }

    /// Write the complete idx file: header, fanout, names, CRCs, offsets,
    /// trailer.
    pub async fn write_idx(&mut self, mut entries: Vec<IndexEntry>) -> Result<(), GitError> {
        if entries.len() != self.object_number {
            return Err(GitError::CorruptPack(format!(
                "entries length {} != object_number {}",
                entries.len(),
                self.object_number
            )));
        }

        self.write_header().await?;
        self.write_fanout(&mut entries).await?;
        self.write_names(&entries).await?;
        self.write_crc32(&entries).await?;
        self.write_offsets(&entries).await?;
        self.write_trailer().await?;
        self.drop_sender();
        Ok(())
    }

    /// Build a whole idx file in memory.
    pub async fn build_buffer(
        entries: Vec<IndexEntry>,
        pack_hash: ObjectId,
    ) -> Result<Vec<u8>, GitError> {
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
        let count = entries.len();
        let collector = tokio::spawn(async move {
            let mut out = Vec::new();
            while let Some(chunk) = rx.recv().await {
                out.extend_from_slice(&chunk);
            }
            out
        });
        let mut builder = IdxBuilder::new(count, tx, pack_hash);
        builder.write_idx(entries).await?;
        collector.await.map_err(|e| {
            GitError::IOError(std::io::Error::other(format!("idx collector failed: {e}")))
        })
    }
}

/// Parsed view of a v2 pack index: fanout lookup, binary search on the sorted
/// id table, and 64-bit offset resolution.
pub struct IdxReader {
    data: Bytes,
    count: usize,
    names_start: usize,
    crc_start: usize,
    offsets_start: usize,
    large_start: usize,
}

impl IdxReader {
    pub fn parse(data: Bytes) -> Result<Self, GitError> {
        if data.len() < 8 + 256 * 4 + 2 * ID_RAW_LEN {
            return Err(GitError::CorruptPack("idx file too short".to_string()));
        }
        if data[0..8] != IDX_HEADER {
            return Err(GitError::CorruptPack(
                "idx magic or version mismatch".to_string(),
            ));
        }
        let fanout_start = 8;
        let count =
            BigEndian::read_u32(&data[fanout_start + 255 * 4..fanout_start + 256 * 4]) as usize;

        let names_start = fanout_start + 256 * 4;
        let crc_start = names_start + count * ID_RAW_LEN;
        let offsets_start = crc_start + count * 4;
        let large_start = offsets_start + count * 4;
        if data.len() < large_start + 2 * ID_RAW_LEN {
            return Err(GitError::CorruptPack(
                "idx file truncated before trailer".to_string(),
            ));
        }

        Ok(IdxReader {
            data,
            count,
            names_start,
            crc_start,
            offsets_start,
            large_start,
        })
    }

    pub fn count(&self) -> usize {
        self.count
    }

    fn fanout(&self, byte: u8) -> (usize, usize) {
        let lo = if byte == 0 {
            0
        } else {
            BigEndian::read_u32(&self.data[8 + (byte as usize - 1) * 4..]) as usize
        };
        let hi = BigEndian::read_u32(&self.data[8 + byte as usize * 4..]) as usize;
        (lo, hi)
    }

    /// Id at sorted position `index`.
    pub fn nth_id(&self, index: usize) -> Result<ObjectId, GitError> {
        if index >= self.count {
            return Err(GitError::CorruptPack(format!(
                "idx position {index} out of range {}",
                self.count
            )));
        }
        let start = self.names_start + index * ID_RAW_LEN;
        ObjectId::from_bytes(&self.data[start..start + ID_RAW_LEN])
            .map_err(|e| GitError::CorruptPack(e.to_string()))
    }

    /// Sorted position of `id`, via fanout + binary search.
    pub fn position_of(&self, id: &ObjectId) -> Option<usize> {
        let (mut lo, mut hi) = self.fanout(id.first_byte());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let start = self.names_start + mid * ID_RAW_LEN;
            let mid_id = &self.data[start..start + ID_RAW_LEN];
            match id.as_ref().cmp(mid_id) {
                std::cmp::Ordering::Equal => return Some(mid),
                std::cmp::Ordering::Less => hi = mid,
                std::cmp::Ordering::Greater => lo = mid + 1,
            }
        }
        None
    }

    pub fn has(&self, id: &ObjectId) -> bool {
        self.position_of(id).is_some()
    }

    /// Pack byte offset of `id`, resolving the 64-bit spill table.
    pub fn offset_of(&self, id: &ObjectId) -> Option<u64> {
        let position = self.position_of(id)?;
        let raw = BigEndian::read_u32(&self.data[self.offsets_start + position * 4..]);
        if raw & 0x8000_0000 == 0 {
            Some(raw as u64)
        } else {
            let large_index = (raw & 0x7FFF_FFFF) as usize;
            Some(BigEndian::read_u64(
                &self.data[self.large_start + large_index * 8..],
            ))
        }
    }

    /// CRC32 recorded for `id`.
    pub fn crc_of(&self, id: &ObjectId) -> Option<u32> {
        let position = self.position_of(id)?;
        Some(BigEndian::read_u32(
            &self.data[self.crc_start + position * 4..],
        ))
    }

    /// All ids in sorted order.
    pub fn ids(&self) -> Vec<ObjectId> {
        (0..self.count)
            .filter_map(|i| self.nth_id(i).ok())
            .collect()
    }

    /// All (id, offset) pairs.
    pub fn entries(&self) -> Vec<(ObjectId, u64)> {
        self.ids()
            .into_iter()
            .filter_map(|id| self.offset_of(&id).map(|offset| (id, offset)))
            .collect()
    }

    /// Hash of the pack this index describes, from the trailer.
    pub fn pack_hash(&self) -> Result<ObjectId, GitError> {
        // The large-offset table sits between offsets and the trailer; its
        // length is whatever remains before the two trailing hashes.
        let trailer = self.data.len() - 2 * ID_RAW_LEN;
        ObjectId::from_bytes(&self.data[trailer..trailer + ID_RAW_LEN])
            .map_err(|e| GitError::CorruptPack(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::sync::mpsc;

    use super::*;

    /// construct a fake id
    fn fake_id(n: u8) -> ObjectId {
        ObjectId::from_raw([n; 20])
    }

    /// construct entries (first bytes 0, 1, 2... for fanout testing)
    fn build_entries(n: usize) -> Vec<IndexEntry> {
        (0..n)
            .map(|i| IndexEntry {
                hash: fake_id(i as u8),
                crc32: 0x12345678 + i as u32,
                offset: 0x10 + (i as u64) * 3,
            })
            .collect()
    }

    /// Basic idx building: header, fanout, names, CRCs, offsets, trailer.
    #[tokio::test]
    async fn test_idx_builder_basic() -> Result<(), GitError> {
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(4096);

        let object_number = 3;
        let pack_hash = fake_id(0xAA);

        let mut builder = IdxBuilder::new(object_number, tx, pack_hash);
        builder.write_idx(build_entries(object_number)).await?;

        let mut out: Vec<u8> = Vec::new();
        while let Some(chunk) = rx.recv().await {
            out.extend_from_slice(&chunk);
        }

        // header
        assert_eq!(&out[0..8], &IDX_HEADER);

        // fanout: ids start with bytes 0, 1, 2 so the table accumulates 1, 2, 3.
        let fanout_start = 8;
        for i in 0..256 {
            let expected = match i {
                0 => 1u32,
                1 => 2,
                _ => 3,
            };
            let idx = fanout_start + i * 4;
            let v = u32::from_be_bytes(out[idx..idx + 4].try_into().unwrap());
            assert_eq!(v, expected, "fanout mismatch at index {i}");
        }

        // names
        let names_start = fanout_start + 256 * 4;
        for i in 0..object_number {
            let name = &out[names_start + i * 20..names_start + i * 20 + 20];
            assert!(name.iter().all(|b| *b == i as u8));
        }

        // trailer pack hash
        let trailer = out.len() - 40;
        assert!(out[trailer..trailer + 20].iter().all(|b| *b == 0xAA));

        Ok(())
    }

    /// The reader finds every id the builder wrote, with matching offsets and
    /// CRCs, and misses absent ids.
    #[tokio::test]
    async fn test_reader_round_trip() {
        let entries = build_entries(5);
        let pack_hash = fake_id(0xBB);
        let buffer = IdxBuilder::build_buffer(entries.clone(), pack_hash)
            .await
            .unwrap();

        let reader = IdxReader::parse(Bytes::from(buffer)).unwrap();
        assert_eq!(reader.count(), 5);
        assert_eq!(reader.pack_hash().unwrap(), pack_hash);

        for entry in &entries {
            assert!(reader.has(&entry.hash));
            assert_eq!(reader.offset_of(&entry.hash), Some(entry.offset));
            assert_eq!(reader.crc_of(&entry.hash), Some(entry.crc32));
        }
        assert!(!reader.has(&fake_id(0x77)));
        assert_eq!(reader.ids().len(), 5);
    }

    /// Offsets above 2^31 go through the 64-bit spill table.
    #[tokio::test]
    async fn test_large_offsets() {
        let mut entries = build_entries(2);
        entries[1].offset = 0x1_2345_6789;
        let buffer = IdxBuilder::build_buffer(entries.clone(), fake_id(0xCC))
            .await
            .unwrap();

        let reader = IdxReader::parse(Bytes::from(buffer)).unwrap();
        assert_eq!(reader.offset_of(&entries[1].hash), Some(0x1_2345_6789));
        assert_eq!(reader.offset_of(&entries[0].hash), Some(entries[0].offset));
    }

    /// Truncated or mislabeled files are rejected.
    #[test]
    fn test_reader_rejects_garbage() {
        assert!(IdxReader::parse(Bytes::from_static(b"short")).is_err());
        let mut bogus = vec![0u8; 8 + 256 * 4 + 40];
        bogus[0] = 0xFF;
        assert!(IdxReader::parse(Bytes::from(bogus)).is_err());
    }
}
