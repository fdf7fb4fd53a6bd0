//! Raw exception handling clauses of a method body.
//!
//! Clauses are stored with byte offsets exactly as they appear in the method's
//! extra data sections (ECMA-335 II.25.4.6). The instruction view converts the
//! offsets to labels so that clauses survive edits.

use bitflags::bitflags;

bitflags! {
    /// Exception handler flags defining the type of exception handling clause.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExceptionHandlerFlags: u16 {
        /// A typed exception clause; `filter_offset` holds the class token.
        const EXCEPTION = 0x0000;
        /// An exception filter and handler clause.
        const FILTER = 0x0001;
        /// A finally clause.
        const FINALLY = 0x0002;
        /// A fault clause (finally that executes only on exception).
        const FAULT = 0x0004;
    }
}

impl ExceptionHandlerFlags {
    /// Returns true if the handler is entered with the exception object on the stack.
    ///
    /// Catch and filter handlers start at depth 1; finally and fault at depth 0.
    #[must_use]
    pub fn receives_exception(self) -> bool {
        !self.intersects(ExceptionHandlerFlags::FINALLY | ExceptionHandlerFlags::FAULT)
    }
}

/// Exception handler defining a protected region and its handler, in byte offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Kind of clause
    pub flags: ExceptionHandlerFlags,
    /// Offset in bytes of try block from start of method body.
    pub try_offset: u32,
    /// Length in bytes of the try block.
    pub try_length: u32,
    /// Location of the handler for this try block.
    pub handler_offset: u32,
    /// Size of the handler code in bytes.
    pub handler_length: u32,
    /// Filter offset for [`ExceptionHandlerFlags::FILTER`], class token for typed catches, zero otherwise.
    pub filter_offset: u32,
}

impl ExceptionHandler {
    /// Returns true if the clause can be written in the 12-byte small format.
    #[must_use]
    pub fn fits_small(&self) -> bool {
        self.try_offset <= 0xFFFF
            && self.try_length <= 0xFF
            && self.handler_offset <= 0xFFFF
            && self.handler_length <= 0xFF
    }
}
