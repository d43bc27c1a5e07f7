//! Error types for the git-peer crate.
//!
//! This module defines a unified error enumeration used across object parsing,
//! pack encoding/decoding, reference updates, merging, and streaming. It
//! integrates with `thiserror` to provide rich `Display` implementations and
//! error source chaining where applicable.
//!
//! Every fallible operation in the crate fails with exactly one of these
//! kinds; the wire layer keeps its own [`ProtocolError`](crate::protocol::types::ProtocolError)
//! which converts into [`GitError::Protocol`] at the session boundary.

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the git-peer library.
///
/// - Used across object codecs, pack encode/decode, refs, staging and merges.
/// - Implements `std::error::Error` via `thiserror`.
pub enum GitError {
    /// Object, reference, or path not present.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Loose object header, object payload, or typed codec invalid.
    #[error("Corrupt object: {0}")]
    CorruptObject(String),

    /// Pack header, checksum, index, or delta chain invalid.
    #[error("Corrupt pack: {0}")]
    CorruptPack(String),

    /// Declared size does not match the number of bytes actually streamed.
    #[error("Size mismatch: declared {declared} bytes, streamed {actual}")]
    SizeMismatch { declared: u64, actual: u64 },

    /// Compare-and-swap failed, a non-fast-forward update was rejected, or an
    /// operation that forbids unresolved staging conflicts found some.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A three-way merge produced conflicts; carries the conflicted paths.
    #[error("Merge conflict in {} path(s)", .0.len())]
    MergeConflict(Vec<String>),

    /// Wire protocol failure surfaced to a caller outside the session layer.
    #[error(transparent)]
    Protocol(#[from] crate::protocol::types::ProtocolError),

    /// Cooperative cancellation was observed.
    #[error("Operation cancelled")]
    Cancelled,

    /// Feature intentionally not implemented (e.g. submodule writes).
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Malformed input: empty name, path containing NUL, bad mode, bad hex.
    #[error("Invalid: {0}")]
    Invalid(String),

    /// I/O error from an underlying reader or writer.
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
}

impl GitError {
    /// Shorthand for [`GitError::NotFound`] on an object id.
    pub fn object_not_found(id: impl std::fmt::Display) -> Self {
        GitError::NotFound(format!("object {id}"))
    }

    /// Shorthand for [`GitError::NotFound`] on a reference name.
    pub fn ref_not_found(name: &str) -> Self {
        GitError::NotFound(format!("reference {name}"))
    }
}
