//! Buffered inflate reader that decodes Git's zlib-compressed pack payloads
//! while simultaneously tracking the SHA-1 digest for id computation.

use std::{io, io::BufRead};

use flate2::{Decompress, FlushDecompress, Status};

use crate::{hash::IdHasher, internal::object::types::ObjectType};

/// ReadBoxed inflates one DEFLATE stream out of a larger buffered stream
/// without consuming bytes past the end of the compressed data, which is what
/// allows pack entries to be read back-to-back.
pub struct ReadBoxed<R> {
    /// The reader from which bytes should be decompressed.
    pub inner: R,
    /// The decompressor doing all the work.
    pub decompressor: Box<Decompress>,
    /// Whether `read` feeds decompressed bytes into `hash`.
    count_hash: bool,
    /// Running id hash over the decompressed payload, pre-seeded with the
    /// object header so finalizing yields the object id.
    pub hash: IdHasher,
}

impl<R> ReadBoxed<R>
where
    R: BufRead,
{
    /// New a ReadBoxed for a base object entry: the hash is seeded with the
    /// canonical `"<type> <size>\0"` header so the digest of the inflated
    /// payload is the object id.
    pub fn new(inner: R, obj_type: ObjectType, size: u64) -> Self {
        ReadBoxed {
            inner,
            hash: IdHasher::for_object(obj_type, size),
            count_hash: true,
            decompressor: Box::new(Decompress::new(true)),
        }
    }

    /// New a ReadBoxed for a delta payload, which has no object id of its own.
    pub fn new_for_delta(inner: R) -> Self {
        ReadBoxed {
            inner,
            hash: IdHasher::new(),
            count_hash: false,
            decompressor: Box::new(Decompress::new(true)),
        }
    }
}

impl<R> io::Read for ReadBoxed<R>
where
    R: BufRead,
{
    fn read(&mut self, into: &mut [u8]) -> io::Result<usize> {
        let o = read(&mut self.inner, &mut self.decompressor, into)?;
        if self.count_hash {
            self.hash.update(&into[..o]);
        }
        Ok(o)
    }
}

/// Read bytes from `rd` and decompress them using `state` into a pre-allocated
/// fitting buffer `dst`, returning the amount of bytes written.
fn read(rd: &mut impl BufRead, state: &mut Decompress, mut dst: &mut [u8]) -> io::Result<usize> {
    let mut total_written = 0;
    loop {
        let (written, consumed, ret, eof);
        {
            let input = rd.fill_buf()?;
            eof = input.is_empty();
            let before_out = state.total_out();
            let before_in = state.total_in();
            let flush = if eof {
                FlushDecompress::Finish
            } else {
                FlushDecompress::None
            };
            ret = state.decompress(input, dst, flush);
            written = (state.total_out() - before_out) as usize;
            total_written += written;
            dst = &mut dst[written..];
            consumed = (state.total_in() - before_in) as usize;
        }
        rd.consume(consumed);

        match ret {
            // The stream has officially ended, nothing more to do here.
            Ok(Status::StreamEnd) => return Ok(total_written),
            // Either input or output is depleted even though the stream is not depleted yet.
            Ok(Status::Ok | Status::BufError) if eof || dst.is_empty() => return Ok(total_written),
            // Some progress was made in both the input and the output, it must continue to reach the end.
            Ok(Status::Ok | Status::BufError) if consumed != 0 || written != 0 => continue,
            // A strange state, where zlib makes no progress but isn't done either. Call it out.
            Ok(Status::Ok | Status::BufError) => unreachable!("Definitely a bug somewhere"),
            Err(..) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "corrupt deflate stream",
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use flate2::{Compression, write::ZlibEncoder};

    use super::*;
    use crate::hash::ObjectId;

    /// Helper to build zlib-compressed bytes from input data.
    fn zlib_compress(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    /// ReadBoxed::new should inflate data and accumulate the object id over
    /// header + body.
    #[test]
    fn inflate_object_counts_hash() {
        let body = b"hello\n";
        let compressed = zlib_compress(body);
        let cursor = io::Cursor::new(compressed);

        let mut reader = ReadBoxed::new(cursor, ObjectType::Blob, body.len() as u64);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, body);

        assert_eq!(
            reader.hash.finalize(),
            ObjectId::from_type_and_data(ObjectType::Blob, body)
        );
    }

    /// ReadBoxed::new_for_delta should inflate data without touching the hash
    /// accumulator.
    #[test]
    fn inflate_delta_skips_hash() {
        let body = b"delta bytes";
        let compressed = zlib_compress(body);
        let cursor = io::Cursor::new(compressed);

        let mut reader = ReadBoxed::new_for_delta(cursor);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, body);

        // Hash should remain the initial zero-state (SHA-1 of empty input).
        assert_eq!(
            reader.hash.finalize(),
            ObjectId::hash_of(b"")
        );
    }

    /// Only the one compressed stream is consumed from the underlying reader.
    #[test]
    fn does_not_consume_past_stream_end() {
        let body = b"payload";
        let mut data = zlib_compress(body);
        let compressed_len = data.len();
        data.extend_from_slice(b"TRAILING");
        let mut cursor = io::Cursor::new(data);

        let mut reader = ReadBoxed::new_for_delta(&mut cursor);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, body);
        drop(reader);

        assert_eq!(cursor.position(), compressed_len as u64);
        let mut rest = Vec::new();
        cursor.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"TRAILING");
    }

    /// Corrupt deflate stream should surface as InvalidInput.
    #[test]
    fn corrupt_stream_returns_error() {
        let data = b"not a valid zlib stream";
        let mut reader =
            ReadBoxed::new(io::Cursor::new(data), ObjectType::Blob, data.len() as u64);
        let mut out = [0u8; 16];
        let err = reader.read(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
