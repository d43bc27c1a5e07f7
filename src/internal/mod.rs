//! Internal building blocks (staging index, object model, pack codec, zlib)
//! that power the public APIs.

pub mod index;
pub mod object;
pub mod pack;
pub mod zlib;
