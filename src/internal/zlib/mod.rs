//! The zlib compression capability.
//!
//! Loose objects and pack entry payloads are raw zlib (deflate) streams with
//! no extra framing. The capability is carried explicitly by the stores and
//! the pack codec rather than installed process-wide.

pub mod stream;

use std::io::{Read, Write};

use flate2::{Compression, bufread::ZlibDecoder, write::ZlibEncoder};

use crate::errors::GitError;

/// Explicit deflate/inflate handle, cloneable and free to construct.
#[derive(Debug, Clone, Copy, Default)]
pub struct Zlib;

impl Zlib {
    pub fn new() -> Self {
        Zlib
    }

    /// Deflate `data` into a raw zlib stream.
    pub fn deflate(&self, data: &[u8]) -> Result<Vec<u8>, GitError> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        Ok(encoder.finish()?)
    }

    /// Inflate a whole zlib stream.
    pub fn inflate(&self, data: &[u8]) -> Result<Vec<u8>, GitError> {
        let mut decoder = ZlibDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| GitError::CorruptObject(format!("corrupt deflate stream: {e}")))?;
        Ok(out)
    }

    /// Inflate only the first `limit` bytes of output, then abandon the
    /// stream. Used to read a loose object header without inflating the body.
    pub fn inflate_prefix(&self, data: &[u8], limit: usize) -> Result<Vec<u8>, GitError> {
        let mut decoder = ZlibDecoder::new(data);
        let mut out = vec![0u8; limit];
        let mut filled = 0;
        while filled < limit {
            let n = decoder
                .read(&mut out[filled..])
                .map_err(|e| GitError::CorruptObject(format!("corrupt deflate stream: {e}")))?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        out.truncate(filled);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// deflate then inflate is the identity.
    #[test]
    fn round_trip() {
        let zlib = Zlib::new();
        let data = b"the quick brown fox jumps over the lazy dog".repeat(10);
        let compressed = zlib.deflate(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(zlib.inflate(&compressed).unwrap(), data);
    }

    /// Prefix inflation stops at the requested length.
    #[test]
    fn prefix_stops_early() {
        let zlib = Zlib::new();
        let data = b"blob 11\0hello world".to_vec();
        let compressed = zlib.deflate(&data).unwrap();
        let prefix = zlib.inflate_prefix(&compressed, 8).unwrap();
        assert_eq!(prefix, b"blob 11\0");
    }

    /// Garbage input is a corrupt-object error.
    #[test]
    fn garbage_rejected() {
        let zlib = Zlib::new();
        assert!(zlib.inflate(b"not zlib at all").is_err());
    }
}
