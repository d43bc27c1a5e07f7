//! Reader wrapper that tracks how many bytes of a pack have been consumed
//! while keeping a running SHA-1 for trailer verification and a resettable
//! CRC32 for per-entry index rows.

use std::io::{self, BufRead, Read};

use sha1::{Digest, Sha1};

use crate::hash::ObjectId;

/// [`Wrapper`] is a reader that also computes the SHA-1 of the data read and
/// a CRC32 that the decoder resets at each entry boundary.
///
/// It is designed to work with any reader that implements `BufRead`.
pub struct Wrapper<R> {
    inner: R,
    hash: Sha1,
    crc: crc32fast::Hasher,
    bytes_read: usize,
}

impl<R> Wrapper<R>
where
    R: BufRead,
{
    /// Constructs a new [`Wrapper`] with the given reader.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hash: Sha1::new(),
            crc: crc32fast::Hasher::new(),
            bytes_read: 0,
        }
    }

    /// Returns the number of bytes read so far.
    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }

    /// Returns the SHA-1 of the data read so far.
    ///
    /// This clones the internal hash state; reading may continue afterwards.
    pub fn final_hash(&self) -> ObjectId {
        let digest: [u8; 20] = self.hash.clone().finalize().into();
        ObjectId::from_raw(digest)
    }

    /// Restart CRC accumulation at the current position.
    pub fn reset_crc(&mut self) {
        self.crc = crc32fast::Hasher::new();
    }

    /// CRC32 of the bytes consumed since the last [`Self::reset_crc`].
    pub fn crc(&self) -> u32 {
        self.crc.clone().finalize()
    }

    fn record(&mut self, data: &[u8]) {
        self.hash.update(data);
        self.crc.update(data);
        self.bytes_read += data.len();
    }
}

impl<R> BufRead for Wrapper<R>
where
    R: BufRead,
{
    /// Provides access to the internal buffer of the wrapped reader without
    /// consuming it.
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    /// Consumes data from the buffer, feeding it through both digests.
    fn consume(&mut self, amt: usize) {
        let buffer = self
            .inner
            .fill_buf()
            .expect("fill_buf must succeed for already-buffered data");
        let chunk = buffer[..amt].to_vec();
        self.record(&chunk);
        self.inner.consume(amt);
    }
}

impl<R> Read for Wrapper<R>
where
    R: BufRead,
{
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let o = self.inner.read(buf)?;
        let chunk = buf[..o].to_vec();
        self.hash.update(&chunk);
        self.crc.update(&chunk);
        self.bytes_read += chunk.len();
        Ok(o)
    }
}
