//! Byte-level access to method body buffers.
//!
//! - [`io`] - little-endian primitive reads
//! - [`parser`] - a positioned, bounds-checked reader

pub mod io;
pub mod parser;
