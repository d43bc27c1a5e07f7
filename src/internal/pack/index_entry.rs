//! Representation of a single `.idx` entry: object id, CRC32 of the entry's
//! raw pack bytes, and its byte offset within the pack.

use serde::{Deserialize, Serialize};

use crate::hash::ObjectId;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexEntry {
    pub hash: ObjectId,
    pub crc32: u32,
    pub offset: u64, // 64-bit because offsets may exceed 32-bit
}

impl IndexEntry {
    pub fn new(hash: ObjectId, crc32: u32, offset: u64) -> Self {
        IndexEntry {
            hash,
            crc32,
            offset,
        }
    }
}
