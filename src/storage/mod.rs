//! Storage layering: opaque raw stores at the bottom, the content-addressed
//! object store on top, with the pack directory bridging packed objects into
//! the same namespace.
//!
//! All payloads move as [`ByteStream`]s so callers can process data without
//! materializing it; the [`volatile`] buffer is the bridge whenever a size
//! must be known before the first byte is consumed.

pub mod objects;
pub mod packdir;
pub mod raw;
pub mod volatile;

use std::pin::Pin;

use bytes::Bytes;
use futures::stream::Stream;
use futures::StreamExt;

use crate::errors::GitError;

/// Stream of byte chunks, the unit of exchange across the storage traits.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, GitError>> + Send + 'static>>;

/// Wrap a single buffer as a one-chunk stream.
pub fn stream_from_bytes(data: Bytes) -> ByteStream {
    Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// Wrap an iterator of chunks as a stream.
pub fn stream_from_chunks(chunks: Vec<Bytes>) -> ByteStream {
    Box::pin(futures::stream::iter(chunks.into_iter().map(Ok)))
}

/// Drain a stream into one contiguous buffer.
pub async fn collect_stream(mut stream: ByteStream) -> Result<Bytes, GitError> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(Bytes::from(out))
}
