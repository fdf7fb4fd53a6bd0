//! Positioned reader over IL code, used by the instruction decoder.
//!
//! # Examples
//!
//! ```rust
//! use ilsplice::Parser;
//!
//! // ldc.i4 0x12; ret
//! let code = [0x20, 0x12, 0x00, 0x00, 0x00, 0x2A];
//! let mut parser = Parser::new(&code);
//!
//! assert_eq!(parser.read_le::<u8>()?, 0x20);
//! assert_eq!(parser.read_le::<i32>()?, 0x12);
//! assert_eq!(parser.pos(), 5);
//! assert_eq!(parser.remaining(), 1);
//! # Ok::<(), ilsplice::Error>(())
//! ```

use crate::{
    file::io::{read_le_at, CilIO},
    Result,
};

/// A bounds-checked reader over method body bytes.
///
/// Offsets reported by [`Parser::pos`] are relative to the start of the slice, which
/// for IL code is the first instruction.
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Start reading at offset 0 of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Returns `true` while unread bytes are left
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Offset of the next unread byte
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Number of unread bytes
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Read a little-endian value and advance past it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the value runs past the end of the
    /// code; the position is left unchanged.
    pub fn read_le<T: CilIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }
}
