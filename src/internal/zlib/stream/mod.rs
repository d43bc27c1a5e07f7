//! Streaming zlib readers used by the pack decoder.

pub mod inflate;
