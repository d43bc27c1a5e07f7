//! Git smart-protocol implementation: pktline framing, capability types, the
//! duplex abstraction, and the upload-pack/receive-pack server, so embedders
//! can speak Git over any byte transport with minimal plumbing.

pub mod link;
pub mod smart;
pub mod types;
pub mod utils;

pub use link::PktLink;
pub use smart::SmartServer;
pub use types::*;
