//! Representation, parsing and writing of CIL method body headers.
//!
//! A method body is a header (tiny or fat), the IL code, and for fat bodies an optional
//! list of 4-byte aligned extra data sections carrying exception handling clauses.
//!
//! ```rust
//! use ilsplice::metadata::body::MethodBody;
//!
//! // Tiny header: code size 2 (0x02 << 2 | 0x2), `nop; ret`
//! let data = [0x0A, 0x00, 0x2A];
//! let body = MethodBody::from(&data)?;
//! assert!(!body.is_fat);
//! assert_eq!(body.code(&data)?, &[0x00, 0x2A]);
//! # Ok::<(), ilsplice::Error>(())
//! ```
//!
//! # References
//! - ECMA-335 6th Edition, Partition II, Section 25.4 - Method Header Format

use bitflags::bitflags;

use crate::{
    file::io::{read_le, read_le_at},
    metadata::exceptions::{ExceptionHandler, ExceptionHandlerFlags},
    Result,
};

bitflags! {
    #[derive(PartialEq)]
    /// Flags that a method body header can have
    pub struct MethodBodyFlags: u16 {
        /// Tiny method header format
        const TINY_FORMAT = 0x2;
        /// Fat method header format
        const FAT_FORMAT = 0x3;
        /// Flag of the fat method header, showing that there are more data sections appended to the header
        const MORE_SECTS = 0x8;
        /// Flag to indicate that this method should call the default constructor on all local variables
        const INIT_LOCALS = 0x10;
    }
}

bitflags! {
    #[derive(PartialEq)]
    /// Flags that a method body section can have
    pub struct SectionFlags: u8 {
        /// Indicates that this section contains exception handling data
        const EHTABLE = 0x1;
        /// Reserved, shall be 0
        const OPT_ILTABLE = 0x2;
        /// Indicates that the data section format is fat
        const FAT_FORMAT = 0x40;
        /// Indicates that the data section is followed by another one
        const MORE_SECTS = 0x80;
    }
}

/// Size in bytes of a fat header
pub const FAT_HEADER_SIZE: usize = 12;
/// Largest code size a tiny header can describe
pub const TINY_MAX_CODE: usize = 63;
/// Implicit `max_stack` of a tiny header
pub const TINY_MAX_STACK: u16 = 8;

/// A parsed method body header with its exception clauses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodBody {
    /// Size of the IL code in bytes
    pub size_code: usize,
    /// Size of the header in bytes (1 or 12)
    pub size_header: usize,
    /// Token of the local variable signature, 0 if the method has no locals
    pub local_var_sig_token: u32,
    /// Maximum operand stack depth (8 for tiny headers)
    pub max_stack: u16,
    /// True if the body uses the fat header
    pub is_fat: bool,
    /// True if locals are zero-initialised
    pub is_init_local: bool,
    /// Exception handling clauses
    pub exception_handlers: Vec<ExceptionHandler>,
}

impl MethodBody {
    /// Parse a method body header and its extra sections.
    ///
    /// # Errors
    /// Returns [`crate::Error::Decode`] for unknown header formats, truncated data and
    /// malformed exception sections.
    pub fn from(data: &[u8]) -> Result<MethodBody> {
        if data.is_empty() {
            return Err(decode_error!("Provided data for body parsing is empty"));
        }

        let first_byte = read_le::<u8>(data)?;
        match MethodBodyFlags::from_bits_truncate(u16::from(first_byte & 0b_00000011_u8)) {
            MethodBodyFlags::TINY_FORMAT => {
                let size_code = (first_byte >> 2) as usize;
                if size_code + 1 > data.len() {
                    return Err(decode_error!(
                        "Tiny body declares {} code bytes, only {} available",
                        size_code,
                        data.len() - 1
                    ));
                }

                Ok(MethodBody {
                    size_code,
                    size_header: 1,
                    local_var_sig_token: 0,
                    max_stack: TINY_MAX_STACK,
                    is_fat: false,
                    is_init_local: false,
                    exception_handlers: Vec::new(),
                })
            }
            MethodBodyFlags::FAT_FORMAT => {
                if data.len() < FAT_HEADER_SIZE {
                    return Err(decode_error!("Fat header truncated"));
                }

                let first_duo = read_le::<u16>(data)?;
                let size_header = usize::from(first_duo >> 12) * 4;
                if size_header != FAT_HEADER_SIZE {
                    return Err(decode_error!("Unsupported fat header size {}", size_header));
                }

                let size_code = read_le::<u32>(&data[4..])? as usize;
                if data.len() < size_code + size_header {
                    return Err(decode_error!(
                        "Fat body declares {} code bytes, only {} available",
                        size_code,
                        data.len() - size_header
                    ));
                }

                let local_var_sig_token = read_le::<u32>(&data[8..])?;
                let flags_header =
                    MethodBodyFlags::from_bits_truncate(first_duo & 0b_0000111111111111_u16);
                let max_stack = read_le::<u16>(&data[2..])?;

                let mut exception_handlers = Vec::new();
                if flags_header.contains(MethodBodyFlags::MORE_SECTS) {
                    let cursor = (size_header + size_code + 3) & !3;
                    parse_sections(data, cursor, &mut exception_handlers)?;
                }

                Ok(MethodBody {
                    size_code,
                    size_header,
                    local_var_sig_token,
                    max_stack,
                    is_fat: true,
                    is_init_local: flags_header.contains(MethodBodyFlags::INIT_LOCALS),
                    exception_handlers,
                })
            }
            _ => Err(decode_error!(
                "MethodHeader is neither FAT nor TINY - {:#04x}",
                first_byte
            )),
        }
    }

    /// Header plus code size in bytes, excluding extra sections
    #[must_use]
    pub fn size(&self) -> usize {
        self.size_code + self.size_header
    }

    /// The IL code of `data`, which must be the buffer this header was parsed from.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `data` is too short.
    pub fn code<'a>(&self, data: &'a [u8]) -> Result<&'a [u8]> {
        data.get(self.size_header..self.size())
            .ok_or(crate::Error::OutOfBounds)
    }

    /// Returns true if a body with this header information can use the tiny format.
    #[must_use]
    pub fn fits_tiny(&self, code_len: usize) -> bool {
        code_len <= TINY_MAX_CODE
            && self.max_stack <= TINY_MAX_STACK
            && self.local_var_sig_token == 0
            && self.exception_handlers.is_empty()
    }

    /// Write a complete body (header, `code`, exception sections).
    ///
    /// A tiny header is written when `is_fat` is false and the body fits it;
    /// otherwise a fat header is written. Exception clauses use the small section
    /// format when every clause fits it.
    ///
    /// # Errors
    /// Returns [`crate::Error::Encode`] if the code is too large to describe.
    pub fn write(&self, code: &[u8]) -> Result<Vec<u8>> {
        if !self.is_fat && self.fits_tiny(code.len()) {
            let mut out = Vec::with_capacity(code.len() + 1);
            // code.len() <= 63, so the shift cannot overflow a byte
            #[allow(clippy::cast_possible_truncation)]
            out.push(((code.len() as u8) << 2) | MethodBodyFlags::TINY_FORMAT.bits() as u8);
            out.extend_from_slice(code);
            return Ok(out);
        }

        let size_code = u32::try_from(code.len())
            .map_err(|_| encode_error!("Code size {} exceeds the fat header", code.len()))?;

        let mut flags = MethodBodyFlags::FAT_FORMAT;
        if self.is_init_local {
            flags |= MethodBodyFlags::INIT_LOCALS;
        }
        if !self.exception_handlers.is_empty() {
            flags |= MethodBodyFlags::MORE_SECTS;
        }

        let mut out = Vec::with_capacity(FAT_HEADER_SIZE + code.len() + 4);
        out.extend_from_slice(&(flags.bits() | (3 << 12)).to_le_bytes());
        out.extend_from_slice(&self.max_stack.to_le_bytes());
        out.extend_from_slice(&size_code.to_le_bytes());
        out.extend_from_slice(&self.local_var_sig_token.to_le_bytes());
        out.extend_from_slice(code);

        if !self.exception_handlers.is_empty() {
            while out.len() % 4 != 0 {
                out.push(0);
            }
            write_section(&self.exception_handlers, &mut out)?;
        }

        Ok(out)
    }
}

fn parse_sections(
    data: &[u8],
    mut cursor: usize,
    exception_handlers: &mut Vec<ExceptionHandler>,
) -> Result<()> {
    loop {
        if data.len() < cursor + 4 {
            return Err(decode_error!("Extra data section header truncated"));
        }

        let section_flags = SectionFlags::from_bits_truncate(read_le::<u8>(&data[cursor..])?);
        if !section_flags.contains(SectionFlags::EHTABLE) {
            return Err(decode_error!(
                "Unsupported extra data section {:#04x}",
                section_flags.bits()
            ));
        }

        if section_flags.contains(SectionFlags::FAT_FORMAT) {
            let section_size = (read_le::<u32>(&data[cursor..])? >> 8) as usize;
            if section_size < 4 || data.len() < cursor + section_size {
                return Err(decode_error!("Fat exception section truncated"));
            }

            let mut offset = cursor + 4;
            for _ in 0..(section_size - 4) / 24 {
                // The fat clause stores flags as u32; only the low bits are defined
                #[allow(clippy::cast_possible_truncation)]
                let flags = read_le_at::<u32>(data, &mut offset)? as u16;
                exception_handlers.push(ExceptionHandler {
                    flags: ExceptionHandlerFlags::from_bits_truncate(flags),
                    try_offset: read_le_at::<u32>(data, &mut offset)?,
                    try_length: read_le_at::<u32>(data, &mut offset)?,
                    handler_offset: read_le_at::<u32>(data, &mut offset)?,
                    handler_length: read_le_at::<u32>(data, &mut offset)?,
                    filter_offset: read_le_at::<u32>(data, &mut offset)?,
                });
            }
            cursor += section_size;
        } else {
            let section_size = usize::from(read_le::<u8>(&data[cursor + 1..])?);
            if section_size < 4 || data.len() < cursor + section_size {
                return Err(decode_error!("Small exception section truncated"));
            }

            let mut offset = cursor + 4;
            for _ in 0..(section_size - 4) / 12 {
                exception_handlers.push(ExceptionHandler {
                    flags: ExceptionHandlerFlags::from_bits_truncate(read_le_at::<u16>(
                        data,
                        &mut offset,
                    )?),
                    try_offset: u32::from(read_le_at::<u16>(data, &mut offset)?),
                    try_length: u32::from(read_le_at::<u8>(data, &mut offset)?),
                    handler_offset: u32::from(read_le_at::<u16>(data, &mut offset)?),
                    handler_length: u32::from(read_le_at::<u8>(data, &mut offset)?),
                    filter_offset: read_le_at::<u32>(data, &mut offset)?,
                });
            }
            cursor += section_size;
        }

        if !section_flags.contains(SectionFlags::MORE_SECTS) {
            return Ok(());
        }
        cursor = (cursor + 3) & !3;
    }
}

fn write_section(handlers: &[ExceptionHandler], out: &mut Vec<u8>) -> Result<()> {
    let small_size = 4 + handlers.len() * 12;
    if small_size <= 0xFF && handlers.iter().all(ExceptionHandler::fits_small) {
        out.push(SectionFlags::EHTABLE.bits());
        #[allow(clippy::cast_possible_truncation)]
        out.push(small_size as u8);
        out.extend_from_slice(&[0, 0]);

        // fits_small guarantees every narrowing below is lossless
        #[allow(clippy::cast_possible_truncation)]
        for handler in handlers {
            out.extend_from_slice(&handler.flags.bits().to_le_bytes());
            out.extend_from_slice(&(handler.try_offset as u16).to_le_bytes());
            out.push(handler.try_length as u8);
            out.extend_from_slice(&(handler.handler_offset as u16).to_le_bytes());
            out.push(handler.handler_length as u8);
            out.extend_from_slice(&handler.filter_offset.to_le_bytes());
        }
        return Ok(());
    }

    let fat_size = 4 + handlers.len() * 24;
    if fat_size > 0x00FF_FFFF {
        return Err(encode_error!("{} exception clauses do not fit a section", handlers.len()));
    }

    let kind = (SectionFlags::EHTABLE | SectionFlags::FAT_FORMAT).bits();
    #[allow(clippy::cast_possible_truncation)]
    let header = u32::from(kind) | ((fat_size as u32) << 8);
    out.extend_from_slice(&header.to_le_bytes());
    for handler in handlers {
        out.extend_from_slice(&u32::from(handler.flags.bits()).to_le_bytes());
        out.extend_from_slice(&handler.try_offset.to_le_bytes());
        out.extend_from_slice(&handler.try_length.to_le_bytes());
        out.extend_from_slice(&handler.handler_offset.to_le_bytes());
        out.extend_from_slice(&handler.handler_length.to_le_bytes());
        out.extend_from_slice(&handler.filter_offset.to_le_bytes());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fat body: max_stack 2, 1 local, `nop; leave.s ret` protected by a finally.
    fn fat_with_finally() -> Vec<u8> {
        let mut data = vec![
            0x1B, 0x30, // FAT | MORE_SECTS | INIT_LOCALS, header size 3
            0x02, 0x00, // max_stack
            0x05, 0x00, 0x00, 0x00, // code size
            0x01, 0x00, 0x00, 0x11, // local sig token
            0x00, 0xDE, 0x01, 0xDC, 0x2A, // nop; leave.s +1; endfinally; ret
        ];
        data.extend_from_slice(&[0, 0, 0]); // align to 20
        data.extend_from_slice(&[0x01, 0x10, 0x00, 0x00]); // small EH, 16 bytes
        data.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x03, 0x03, 0x00, 0x01]);
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        data
    }

    #[test]
    fn test_tiny() {
        let data = [0x0A, 0x00, 0x2A];
        let body = MethodBody::from(&data).unwrap();

        assert!(!body.is_fat);
        assert!(!body.is_init_local);
        assert_eq!(body.max_stack, 8);
        assert_eq!(body.size_code, 2);
        assert_eq!(body.size_header, 1);
        assert_eq!(body.size(), 3);
        assert_eq!(body.local_var_sig_token, 0);
    }

    #[test]
    fn test_tiny_truncated() {
        let data = [0x0E, 0x00, 0x2A];
        assert!(matches!(MethodBody::from(&data), Err(crate::Error::Decode(_))));
    }

    #[test]
    fn test_fat_exceptions_small_section() {
        let data = fat_with_finally();
        let body = MethodBody::from(&data).unwrap();

        assert!(body.is_fat);
        assert!(body.is_init_local);
        assert_eq!(body.max_stack, 2);
        assert_eq!(body.size_code, 5);
        assert_eq!(body.local_var_sig_token, 0x1100_0001);
        assert_eq!(body.code(&data).unwrap(), &[0x00, 0xDE, 0x01, 0xDC, 0x2A]);
        assert_eq!(body.exception_handlers.len(), 1);

        let handler = &body.exception_handlers[0];
        assert!(handler.flags.contains(ExceptionHandlerFlags::FINALLY));
        assert_eq!(handler.try_offset, 0);
        assert_eq!(handler.try_length, 3);
        assert_eq!(handler.handler_offset, 3);
        assert_eq!(handler.handler_length, 1);
    }

    #[test]
    fn test_fat_rewrites_identically() {
        let data = fat_with_finally();
        let body = MethodBody::from(&data).unwrap();
        let code = body.code(&data).unwrap().to_vec();
        assert_eq!(body.write(&code).unwrap(), data);
    }

    #[test]
    fn test_fat_section_when_clause_is_large() {
        let body = MethodBody {
            size_code: 0,
            size_header: FAT_HEADER_SIZE,
            local_var_sig_token: 0,
            max_stack: 1,
            is_fat: true,
            is_init_local: false,
            exception_handlers: vec![ExceptionHandler {
                flags: ExceptionHandlerFlags::EXCEPTION,
                try_offset: 0,
                try_length: 0x100,
                handler_offset: 0x100,
                handler_length: 2,
                filter_offset: 0x0100_0001,
            }],
        };

        let code = vec![0x00; 0x102];
        let written = body.write(&code).unwrap();
        let parsed = MethodBody::from(&written).unwrap();
        assert_eq!(parsed.exception_handlers, body.exception_handlers);
        // 12 + 0x102 aligned to 4 is 0x110; the section kind is EHTABLE | FAT_FORMAT
        assert_eq!(written[0x110], 0x41);
    }

    #[test]
    fn test_tiny_falls_back_to_fat() {
        let body = MethodBody {
            size_code: 0,
            size_header: 1,
            local_var_sig_token: 0,
            max_stack: 9,
            is_fat: false,
            is_init_local: false,
            exception_handlers: Vec::new(),
        };
        let written = body.write(&[0x2A]).unwrap();
        assert_eq!(written.len(), FAT_HEADER_SIZE + 1);
        assert_eq!(written[0] & 0x3, 0x3);
        assert_eq!(MethodBody::from(&written).unwrap().max_stack, 9);
    }

    #[test]
    fn test_neither_fat_nor_tiny() {
        assert!(matches!(
            MethodBody::from(&[0x01, 0x2A]),
            Err(crate::Error::Decode(_))
        ));
    }
}
