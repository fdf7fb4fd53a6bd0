//! CIL bytecode decoding into an [`InstructionSequence`].
//!
//! Decoding runs in two passes. The first walks the code linearly and decodes every
//! instruction with its byte offset, keeping branch destinations as absolute offsets.
//! The second assigns each instruction a [`Label`] and rewrites every branch, switch
//! entry and exception boundary from an offset to the label of the instruction at that
//! offset. A destination that does not start an instruction cannot be represented and
//! is reported as [`crate::Error::Decode`].
//!
//! ```rust
//! use ilsplice::assembly::{decode_code, OpCode};
//! use ilsplice::metadata::member::MethodSignature;
//!
//! // ldarg.0; brfalse.s +1; nop; ret
//! let code = [0x02, 0x2C, 0x01, 0x00, 0x2A];
//! let seq = decode_code(&code, &[], MethodSignature::of_static(1, false, 0))?;
//! assert_eq!(seq.opcodes(), vec![OpCode::Ldarg0, OpCode::BrfalseS, OpCode::Nop, OpCode::Ret]);
//! assert_eq!(seq.get(1).unwrap().targets(), vec![seq.get(3).unwrap().label]);
//! # Ok::<(), ilsplice::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    assembly::{
        instruction::{Instruction, Label, Operand},
        opcodes::{OpCode, OperandType, FE_PREFIX},
        sequence::{ExceptionRegion, InstructionSequence},
    },
    file::parser::Parser,
    metadata::{
        body::MethodBody,
        exceptions::{ExceptionHandler, ExceptionHandlerFlags},
        member::MethodSignature,
        token::Token,
    },
    Error, Result,
};

/// An instruction decoded at a byte position, branch destinations still as offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct RawInstruction {
    /// Offset of the first opcode byte
    pub offset: u32,
    /// Encoded size including operand
    pub size: u32,
    /// The opcode
    pub opcode: OpCode,
    /// The operand
    pub operand: RawOperand,
}

/// Operand of a [`RawInstruction`].
#[derive(Debug, Clone, PartialEq)]
pub enum RawOperand {
    /// Any non-branch operand
    Plain(Operand),
    /// Absolute destination offset of a branch
    Target(i64),
    /// Absolute destination offsets of a switch
    Switch(Vec<i64>),
}

/// Decode one instruction at the parser's position.
///
/// # Errors
/// Returns [`crate::Error::Decode`] for reserved opcodes and
/// [`crate::Error::OutOfBounds`] if the operand is truncated.
pub fn decode_instruction(parser: &mut Parser) -> Result<RawInstruction> {
    let start = parser.pos();
    let first_byte = parser.read_le::<u8>()?;

    let opcode = if first_byte == FE_PREFIX {
        let second_byte = parser.read_le::<u8>()?;
        OpCode::from_bytes(FE_PREFIX, second_byte)
            .ok_or_else(|| decode_error!("Reserved opcode: FE {:02X} at IL_{:04x}", second_byte, start))?
    } else {
        OpCode::from_bytes(0, first_byte)
            .ok_or_else(|| decode_error!("Reserved opcode: {:02X} at IL_{:04x}", first_byte, start))?
    };

    let operand = match opcode.operand_type() {
        OperandType::None => RawOperand::Plain(Operand::None),
        OperandType::Int8 => RawOperand::Plain(Operand::Int8(parser.read_le::<i8>()?)),
        OperandType::UInt8 => RawOperand::Plain(Operand::UInt8(parser.read_le::<u8>()?)),
        OperandType::Int32 => RawOperand::Plain(Operand::Int32(parser.read_le::<i32>()?)),
        OperandType::Int64 => RawOperand::Plain(Operand::Int64(parser.read_le::<i64>()?)),
        OperandType::Float32 => RawOperand::Plain(Operand::Float32(parser.read_le::<f32>()?)),
        OperandType::Float64 => RawOperand::Plain(Operand::Float64(parser.read_le::<f64>()?)),
        OperandType::Token => RawOperand::Plain(Operand::Token(Token::new(parser.read_le::<u32>()?))),
        OperandType::ShortArgument => {
            RawOperand::Plain(Operand::Argument(u16::from(parser.read_le::<u8>()?)))
        }
        OperandType::Argument => RawOperand::Plain(Operand::Argument(parser.read_le::<u16>()?)),
        OperandType::ShortLocal => {
            RawOperand::Plain(Operand::Local(u16::from(parser.read_le::<u8>()?)))
        }
        OperandType::Local => RawOperand::Plain(Operand::Local(parser.read_le::<u16>()?)),
        OperandType::ShortBranch => {
            let displacement = i64::from(parser.read_le::<i8>()?);
            RawOperand::Target(parser.pos() as i64 + displacement)
        }
        OperandType::Branch => {
            let displacement = i64::from(parser.read_le::<i32>()?);
            RawOperand::Target(parser.pos() as i64 + displacement)
        }
        OperandType::Switch => {
            let case_count = parser.read_le::<u32>()? as usize;
            if case_count.saturating_mul(4) > parser.remaining() {
                return Err(decode_error!(
                    "Switch at IL_{:04x} declares {} cases past the end of the body",
                    start,
                    case_count
                ));
            }

            let mut displacements = Vec::with_capacity(case_count);
            for _ in 0..case_count {
                displacements.push(i64::from(parser.read_le::<i32>()?));
            }

            // Switch displacements are relative to the end of the whole table
            let end = parser.pos() as i64;
            RawOperand::Switch(displacements.into_iter().map(|d| end + d).collect())
        }
    };

    let offset = u32::try_from(start).map_err(|_| decode_error!("Code offset overflow"))?;
    let size = u32::try_from(parser.pos() - start).map_err(|_| decode_error!("Size overflow"))?;

    Ok(RawInstruction {
        offset,
        size,
        opcode,
        operand,
    })
}

/// Decode every instruction of `code` in order.
///
/// # Errors
/// Returns [`crate::Error::Decode`] for reserved opcodes and truncated instructions.
pub fn decode_stream(code: &[u8]) -> Result<Vec<RawInstruction>> {
    let mut parser = Parser::new(code);
    let mut raw = Vec::new();

    while parser.has_more_data() {
        let at = parser.pos();
        match decode_instruction(&mut parser) {
            Ok(instruction) => raw.push(instruction),
            Err(Error::OutOfBounds) => {
                return Err(decode_error!("Instruction at IL_{:04x} is truncated", at));
            }
            Err(other) => return Err(other),
        }
    }

    Ok(raw)
}

/// Decode the IL code of a method together with its exception clauses.
///
/// # Errors
/// Returns [`crate::Error::Decode`] if any instruction cannot be decoded or any branch
/// target or exception boundary is not an instruction boundary.
pub fn decode_code(
    code: &[u8],
    handlers: &[ExceptionHandler],
    signature: MethodSignature,
) -> Result<InstructionSequence> {
    let raw = decode_stream(code)?;

    let mut boundaries: HashMap<i64, Label> = HashMap::with_capacity(raw.len());
    for (index, instruction) in raw.iter().enumerate() {
        let label = Label(u32::try_from(index).map_err(|_| decode_error!("Too many instructions"))?);
        boundaries.insert(i64::from(instruction.offset), label);
    }

    let resolve = |source: u32, target: i64| -> Result<Label> {
        boundaries.get(&target).copied().ok_or_else(|| {
            decode_error!(
                "Branch at IL_{:04x} targets IL_{:04x}, which is not an instruction boundary",
                source,
                target
            )
        })
    };

    let mut instructions = Vec::with_capacity(raw.len());
    for (index, instruction) in raw.iter().enumerate() {
        let operand = match &instruction.operand {
            RawOperand::Plain(operand) => operand.clone(),
            RawOperand::Target(target) => Operand::Target(resolve(instruction.offset, *target)?),
            RawOperand::Switch(targets) => Operand::Switch(
                targets
                    .iter()
                    .map(|target| resolve(instruction.offset, *target))
                    .collect::<Result<Vec<_>>>()?,
            ),
        };

        instructions.push(Instruction {
            label: Label(index as u32),
            opcode: instruction.opcode,
            operand,
            offset: Some(instruction.offset),
        });
    }

    let code_len = code.len() as i64;
    let start_of = |what: &str, offset: u32| -> Result<Label> {
        boundaries.get(&i64::from(offset)).copied().ok_or_else(|| {
            decode_error!("Exception {} at IL_{:04x} is not an instruction boundary", what, offset)
        })
    };
    let end_of = |what: &str, offset: u32, length: u32| -> Result<Option<Label>> {
        let end = i64::from(offset) + i64::from(length);
        if end == code_len {
            return Ok(None);
        }
        boundaries.get(&end).copied().map(Some).ok_or_else(|| {
            decode_error!("Exception {} end IL_{:04x} is not an instruction boundary", what, end)
        })
    };

    let mut sequence = InstructionSequence::from_parts(instructions, Vec::new(), signature);
    for handler in handlers {
        let is_filter = handler.flags.contains(ExceptionHandlerFlags::FILTER);
        sequence.add_region(ExceptionRegion {
            flags: handler.flags,
            try_start: start_of("try", handler.try_offset)?,
            try_end: end_of("try", handler.try_offset, handler.try_length)?,
            handler_start: start_of("handler", handler.handler_offset)?,
            handler_end: end_of("handler", handler.handler_offset, handler.handler_length)?,
            filter_start: if is_filter {
                Some(start_of("filter", handler.filter_offset)?)
            } else {
                None
            },
            class_token: if is_filter { 0 } else { handler.filter_offset },
        });
    }

    Ok(sequence)
}

/// Parse a complete method body (header, code, exception sections).
///
/// # Errors
/// Returns [`crate::Error::Decode`] if the header or any instruction is unsupported.
pub fn decode_body(data: &[u8], signature: MethodSignature) -> Result<(MethodBody, InstructionSequence)> {
    let header = MethodBody::from(data)?;
    let code = header
        .code(data)
        .map_err(|_| decode_error!("Method body is shorter than its header declares"))?;
    let sequence = decode_code(code, &header.exception_handlers, signature)?;
    Ok((header, sequence))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signature() -> MethodSignature {
        MethodSignature::instance(0, false, 16)
    }

    #[test]
    fn test_decode_instruction_basic() {
        // ldloc.s 10
        let mut parser = Parser::new(&[0x11, 0x0A]);
        let result = decode_instruction(&mut parser).unwrap();

        assert_eq!(result.offset, 0);
        assert_eq!(result.size, 2);
        assert_eq!(result.opcode, OpCode::LdlocS);
        assert_eq!(result.operand, RawOperand::Plain(Operand::Local(10)));
    }

    #[test]
    fn test_decode_instruction_prefixed() {
        // ldloc 0x0102
        let mut parser = Parser::new(&[0xFE, 0x0C, 0x02, 0x01]);
        let result = decode_instruction(&mut parser).unwrap();

        assert_eq!(result.opcode, OpCode::Ldloc);
        assert_eq!(result.size, 4);
        assert_eq!(result.operand, RawOperand::Plain(Operand::Local(0x0102)));
    }

    #[test]
    fn test_decode_instruction_tokens_and_floats() {
        let mut parser = Parser::new(&[0x7D, 0x05, 0x00, 0x00, 0x04, 0x22, 0x00, 0x00, 0x80, 0x3F]);

        let stfld = decode_instruction(&mut parser).unwrap();
        assert_eq!(stfld.operand, RawOperand::Plain(Operand::Token(Token(0x0400_0005))));

        let ldc = decode_instruction(&mut parser).unwrap();
        assert_eq!(ldc.opcode, OpCode::LdcR4);
        assert_eq!(ldc.operand, RawOperand::Plain(Operand::Float32(1.0)));
    }

    #[test]
    fn test_decode_branch_targets_are_absolute() {
        // IL_0000 br.s -2 (back onto itself)
        let mut parser = Parser::new(&[0x2B, 0xFE]);
        let result = decode_instruction(&mut parser).unwrap();
        assert_eq!(result.operand, RawOperand::Target(0));

        // IL_0000 bne.un +5
        let mut parser = Parser::new(&[0x40, 0x05, 0x00, 0x00, 0x00]);
        let result = decode_instruction(&mut parser).unwrap();
        assert_eq!(result.operand, RawOperand::Target(10));
    }

    #[test]
    fn test_decode_switch() {
        // switch (2 cases: +0, +1); nop; ret
        let code = [
            0x45, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
            0x2A,
        ];
        let seq = decode_code(&code, &[], signature()).unwrap();

        let nop = seq.get(1).unwrap().label;
        let ret = seq.get(2).unwrap().label;
        assert_eq!(seq.get(0).unwrap().operand, Operand::Switch(vec![nop, ret]));
    }

    #[test]
    fn test_reserved_opcode_is_decode_error() {
        assert!(matches!(decode_stream(&[0x00, 0x24]), Err(Error::Decode(_))));
        assert!(matches!(decode_stream(&[0xFE, 0x08]), Err(Error::Decode(_))));
    }

    #[test]
    fn test_truncated_operand_is_decode_error() {
        assert!(matches!(decode_stream(&[0x20, 0x01, 0x00]), Err(Error::Decode(_))));
    }

    #[test]
    fn test_branch_into_instruction_is_decode_error() {
        // ldc.i4 0; br.s -4 (lands inside the ldc.i4 operand)
        let code = [0x20, 0x00, 0x00, 0x00, 0x00, 0x2B, 0xFC, 0x2A];
        let err = decode_code(&code, &[], signature()).unwrap_err();
        assert!(matches!(err, Error::Decode(message) if message.contains("IL_0003")));
    }

    #[test]
    fn test_exception_regions_become_labels() {
        // nop; leave.s +1; endfinally; ret
        let code = [0x00, 0xDE, 0x01, 0xDC, 0x2A];
        let handlers = [ExceptionHandler {
            flags: ExceptionHandlerFlags::FINALLY,
            try_offset: 0,
            try_length: 3,
            handler_offset: 3,
            handler_length: 1,
            filter_offset: 0,
        }];
        let seq = decode_code(&code, &handlers, signature()).unwrap();

        let region = &seq.regions()[0];
        assert_eq!(seq.position(region.try_start), Some(0));
        assert_eq!(region.try_end, Some(seq.get(2).unwrap().label));
        assert_eq!(region.handler_start, seq.get(2).unwrap().label);
        assert_eq!(region.handler_end, Some(seq.get(3).unwrap().label));
        assert_eq!(region.filter_start, None);
    }

    #[test]
    fn test_region_may_end_at_end_of_body() {
        // nop; leave.s -3 would be invalid IL but region ends are what matters here
        let code = [0x00, 0x2A];
        let handlers = [ExceptionHandler {
            flags: ExceptionHandlerFlags::FAULT,
            try_offset: 0,
            try_length: 1,
            handler_offset: 1,
            handler_length: 1,
            filter_offset: 0,
        }];
        let seq = decode_code(&code, &handlers, signature()).unwrap();
        assert_eq!(seq.regions()[0].handler_end, None);
    }

    #[test]
    fn test_decode_body_tiny() {
        let data = [0x0A, 0x02, 0x2A];
        let (header, seq) = decode_body(&data, signature()).unwrap();
        assert!(!header.is_fat);
        assert_eq!(seq.opcodes(), vec![OpCode::Ldarg0, OpCode::Ret]);
        assert_eq!(seq.get(1).unwrap().offset, Some(1));
    }
}
