//! Metadata tokens referencing fields, methods and signatures.
//!
//! A token is a 32-bit value whose high byte names a metadata table and whose low
//! 24 bits are a 1-based row index. Instructions such as `ldfld` and `call` carry
//! tokens as operands; the host resolves them to [`crate::metadata::member::Member`]s.

use std::fmt;

/// A metadata token (`table << 24 | row`).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub u32);

impl Token {
    /// `TypeRef` table
    pub const TYPE_REF: u8 = 0x01;
    /// `TypeDef` table
    pub const TYPE_DEF: u8 = 0x02;
    /// `Field` table
    pub const FIELD: u8 = 0x04;
    /// `MethodDef` table
    pub const METHOD_DEF: u8 = 0x06;
    /// `MemberRef` table
    pub const MEMBER_REF: u8 = 0x0A;
    /// `StandAloneSig` table, used for local variable signatures
    pub const STANDALONE_SIG: u8 = 0x11;

    /// Create a token from its raw value
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Create a token from a table id and a row index
    #[must_use]
    pub fn from_parts(table: u8, row: u32) -> Self {
        Token((u32::from(table) << 24) | (row & 0x00FF_FFFF))
    }

    /// The raw value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// The table id (high byte)
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// The row index (low 24 bits)
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns true for the zero token
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}
