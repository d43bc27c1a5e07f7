//! Buffering for streams of unknown size.
//!
//! The object store must know an object's size before it can hash the header,
//! but wire and user streams rarely announce one. [`VolatileBuffer`]
//! materializes such a stream, spilling to an anonymous temp file past a
//! threshold, and enforces a hard cap so an adversarial stream cannot exhaust
//! temp storage.

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::{config::StoreConfig, errors::GitError};

use super::{ByteStream, stream_from_bytes};

/// Policy knobs for buffering.
#[derive(Debug, Clone)]
pub struct VolatileBuffer {
    spill_threshold: usize,
    max_size: u64,
}

/// A fully buffered stream with its size known.
pub enum Buffered {
    Memory(Bytes),
    File { file: tokio::fs::File, size: u64 },
}

impl std::fmt::Debug for Buffered {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Buffered::Memory(bytes) => f.debug_tuple("Memory").field(&bytes.len()).finish(),
            Buffered::File { size, .. } => f.debug_struct("File").field("size", size).finish(),
        }
    }
}

impl VolatileBuffer {
    pub fn new(config: &StoreConfig) -> Self {
        VolatileBuffer {
            spill_threshold: config.spill_threshold,
            max_size: config.max_object_size,
        }
    }

    /// Drain `stream` into memory or a temp file, returning a handle that
    /// knows its size and can be read back.
    pub async fn fill(&self, mut stream: ByteStream) -> Result<Buffered, GitError> {
        let mut memory: Vec<u8> = Vec::new();
        let mut spilled: Option<tokio::fs::File> = None;
        let mut total: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            total += chunk.len() as u64;
            if total > self.max_size {
                return Err(GitError::Invalid(format!(
                    "stream exceeds the {} byte buffering cap",
                    self.max_size
                )));
            }

            match &mut spilled {
                Some(file) => file.write_all(&chunk).await?,
                None => {
                    memory.extend_from_slice(&chunk);
                    if memory.len() > self.spill_threshold {
                        let std_file = tempfile::tempfile()?;
                        let mut file = tokio::fs::File::from_std(std_file);
                        file.write_all(&memory).await?;
                        memory.clear();
                        spilled = Some(file);
                    }
                }
            }
        }

        match spilled {
            Some(mut file) => {
                file.flush().await?;
                file.seek(std::io::SeekFrom::Start(0)).await?;
                Ok(Buffered::File { file, size: total })
            }
            None => Ok(Buffered::Memory(Bytes::from(memory))),
        }
    }
}

impl Buffered {
    pub fn size(&self) -> u64 {
        match self {
            Buffered::Memory(data) => data.len() as u64,
            Buffered::File { size, .. } => *size,
        }
    }

    /// Read the buffered content back as one buffer.
    pub async fn bytes(self) -> Result<Bytes, GitError> {
        match self {
            Buffered::Memory(data) => Ok(data),
            Buffered::File { mut file, size } => {
                let mut out = Vec::with_capacity(size as usize);
                file.read_to_end(&mut out).await?;
                Ok(Bytes::from(out))
            }
        }
    }

    /// Read the buffered content back as a stream.
    pub async fn read(self) -> Result<ByteStream, GitError> {
        let bytes = self.bytes().await?;
        Ok(stream_from_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::stream_from_chunks;

    fn config(spill: usize, cap: u64) -> StoreConfig {
        StoreConfig {
            spill_threshold: spill,
            max_object_size: cap,
        }
    }

    /// Small streams stay in memory.
    #[tokio::test]
    async fn small_stream_stays_in_memory() {
        let buffer = VolatileBuffer::new(&config(1024, 1 << 20));
        let stream = stream_from_chunks(vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")]);
        let buffered = buffer.fill(stream).await.unwrap();
        assert!(matches!(buffered, Buffered::Memory(_)));
        assert_eq!(buffered.size(), 4);
        assert_eq!(buffered.bytes().await.unwrap().as_ref(), b"abcd");
    }

    /// Streams past the threshold spill to a temp file and read back intact.
    #[tokio::test]
    async fn large_stream_spills() {
        let buffer = VolatileBuffer::new(&config(16, 1 << 20));
        let chunks: Vec<Bytes> = (0..8).map(|i| Bytes::from(vec![i as u8; 10])).collect();
        let expected: Vec<u8> = chunks.iter().flat_map(|c| c.to_vec()).collect();

        let buffered = buffer.fill(stream_from_chunks(chunks)).await.unwrap();
        assert!(matches!(buffered, Buffered::File { .. }));
        assert_eq!(buffered.size(), 80);
        assert_eq!(buffered.bytes().await.unwrap().as_ref(), &expected[..]);
    }

    /// The hard cap rejects oversized streams.
    #[tokio::test]
    async fn cap_rejects_oversize() {
        let buffer = VolatileBuffer::new(&config(16, 32));
        let chunks: Vec<Bytes> = (0..8).map(|_| Bytes::from(vec![0u8; 10])).collect();
        let err = buffer.fill(stream_from_chunks(chunks)).await.unwrap_err();
        assert!(matches!(err, GitError::Invalid(_)));
    }
}
