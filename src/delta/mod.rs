//! Git delta streams: the copy/insert instruction format used by OFS_DELTA
//! and REF_DELTA pack entries.
//!
//! A delta stream is `[varint base-size][varint result-size][ops...]` where
//! each op either copies a range from the base object or inserts literal
//! bytes. The encoder plans ops with a Myers diff; the decoder replays them
//! against a base buffer.

pub mod decode;
pub mod encode;

pub use decode::delta_decode;
pub use encode::DeltaDiff;
