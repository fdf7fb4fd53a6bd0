//! Encoding an [`InstructionSequence`] back into a method body.
//!
//! Encoding is the mirror of [`crate::assembly::decoder`]: operands are checked
//! against the operand kind of their opcode, labels are laid out to byte offsets and
//! branch displacements are computed from the laid-out positions. A short branch
//! whose displacement no longer fits in a signed byte after edits is widened to its
//! long form and the layout is repeated until it is stable. Widening only ever grows
//! instructions, so the loop terminates.
//!
//! Nothing is written unless the whole sequence validates, including the operand
//! stack check in [`crate::assembly::stack`].

use std::collections::HashMap;

use crate::{
    assembly::{
        instruction::{Instruction, Label, Operand},
        opcodes::{OpCode, OperandType},
        sequence::InstructionSequence,
        stack,
    },
    config::SessionConfig,
    host::MemberResolver,
    metadata::{
        body::{MethodBody, TINY_MAX_STACK},
        exceptions::ExceptionHandler,
    },
    Result,
};

/// IL code produced from a sequence, before a header is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCode {
    /// The IL bytes
    pub code: Vec<u8>,
    /// Maximum operand stack depth the code reaches
    pub max_stack: u16,
    /// Exception clauses in byte offsets
    pub exception_handlers: Vec<ExceptionHandler>,
    /// Byte offset of every instruction, by position
    pub offsets: Vec<u32>,
}

/// Check that every operand matches its opcode and every slot and label exists.
///
/// # Errors
/// Returns [`crate::Error::Encode`] describing the first invalid instruction.
pub fn validate(seq: &InstructionSequence) -> Result<()> {
    let signature = seq.signature();
    let labels: HashMap<Label, usize> = seq
        .iter()
        .enumerate()
        .map(|(index, ins)| (ins.label, index))
        .collect();

    for ins in seq {
        let kind_matches = match (ins.opcode.operand_type(), &ins.operand) {
            (OperandType::None, Operand::None)
            | (OperandType::Int8, Operand::Int8(_))
            | (OperandType::UInt8, Operand::UInt8(_))
            | (OperandType::Int32, Operand::Int32(_))
            | (OperandType::Int64, Operand::Int64(_))
            | (OperandType::Float32, Operand::Float32(_))
            | (OperandType::Float64, Operand::Float64(_))
            | (OperandType::Token, Operand::Token(_))
            | (OperandType::Argument, Operand::Argument(_))
            | (OperandType::Local, Operand::Local(_))
            | (OperandType::ShortBranch | OperandType::Branch, Operand::Target(_))
            | (OperandType::Switch, Operand::Switch(_)) => true,
            (OperandType::ShortArgument, Operand::Argument(index))
            | (OperandType::ShortLocal, Operand::Local(index)) => *index <= 0xFF,
            _ => false,
        };
        if !kind_matches {
            return Err(encode_error!(
                "{}: operand '{}' does not fit operand kind {:?}",
                ins,
                ins.operand,
                ins.opcode.operand_type()
            ));
        }

        if let Some(local) = ins.local_index() {
            if local >= signature.locals {
                return Err(encode_error!(
                    "{}: local slot {} is out of range, the method has {} local(s)",
                    ins,
                    local,
                    signature.locals
                ));
            }
        }

        if let Some(argument) = ins.argument_index() {
            if argument >= signature.arguments() {
                return Err(encode_error!(
                    "{}: argument slot {} is out of range, the method has {} argument(s)",
                    ins,
                    argument,
                    signature.arguments()
                ));
            }
        }

        for target in ins.targets() {
            if !labels.contains_key(&target) {
                return Err(encode_error!("{}: branch target {} does not exist", ins, target));
            }
        }
    }

    for region in seq.regions() {
        for label in region.labels() {
            if !labels.contains_key(&label) {
                return Err(encode_error!("Exception region refers to missing label {}", label));
            }
        }
    }

    Ok(())
}

fn encoded_size(opcode: OpCode, operand: &Operand) -> usize {
    let operand_size = match (opcode.operand_type(), operand) {
        (OperandType::Switch, Operand::Switch(targets)) => 4 + 4 * targets.len(),
        (kind, _) => kind.size().unwrap_or(0),
    };
    opcode.encoded_len() + operand_size
}

/// Assign offsets, widening short branches until every displacement fits.
fn layout(seq: &InstructionSequence, promote: bool) -> Result<(Vec<OpCode>, Vec<u32>, u32)> {
    let instructions = seq.instructions();
    let mut forms: Vec<OpCode> = instructions.iter().map(|ins| ins.opcode).collect();
    let positions: HashMap<Label, usize> = instructions
        .iter()
        .enumerate()
        .map(|(index, ins)| (ins.label, index))
        .collect();

    loop {
        let mut offsets = Vec::with_capacity(instructions.len());
        let mut cursor = 0usize;
        for (ins, form) in instructions.iter().zip(&forms) {
            offsets.push(
                u32::try_from(cursor).map_err(|_| encode_error!("Method body exceeds 4 GiB"))?,
            );
            cursor += encoded_size(*form, &ins.operand);
        }
        let code_len = u32::try_from(cursor).map_err(|_| encode_error!("Method body exceeds 4 GiB"))?;

        let mut widened = false;
        for (index, ins) in instructions.iter().enumerate() {
            let Operand::Target(target) = ins.operand else {
                continue;
            };
            if forms[index].operand_type() != OperandType::ShortBranch {
                continue;
            }

            let target_index = positions
                .get(&target)
                .copied()
                .ok_or_else(|| encode_error!("{}: branch target {} does not exist", ins, target))?;
            let next = i64::from(offsets[index]) + encoded_size(forms[index], &ins.operand) as i64;
            let displacement = i64::from(offsets[target_index]) - next;
            if i8::try_from(displacement).is_ok() {
                continue;
            }

            if !promote {
                return Err(encode_error!(
                    "{}: displacement {} does not fit a short branch",
                    ins,
                    displacement
                ));
            }
            log::trace!("widening {} to {}", ins, forms[index].long_form());
            forms[index] = forms[index].long_form();
            widened = true;
        }

        if !widened {
            return Ok((forms, offsets, code_len));
        }
    }
}

fn write_instruction(
    out: &mut Vec<u8>,
    ins: &Instruction,
    form: OpCode,
    next: i64,
    offset_of: &dyn Fn(Label) -> Result<u32>,
) -> Result<()> {
    let info = form.info();
    if info.prefix != 0 {
        out.push(info.prefix);
    }
    out.push(info.code);

    match (&ins.operand, form.operand_type()) {
        (Operand::None, _) => {}
        (Operand::Int8(value), _) => out.extend_from_slice(&value.to_le_bytes()),
        (Operand::UInt8(value), _) => out.push(*value),
        (Operand::Int32(value), _) => out.extend_from_slice(&value.to_le_bytes()),
        (Operand::Int64(value), _) => out.extend_from_slice(&value.to_le_bytes()),
        (Operand::Float32(value), _) => out.extend_from_slice(&value.to_le_bytes()),
        (Operand::Float64(value), _) => out.extend_from_slice(&value.to_le_bytes()),
        (Operand::Token(token), _) => out.extend_from_slice(&token.value().to_le_bytes()),
        // validate() guarantees short slots are <= 0xFF
        #[allow(clippy::cast_possible_truncation)]
        (Operand::Local(index) | Operand::Argument(index), OperandType::ShortLocal | OperandType::ShortArgument) => {
            out.push(*index as u8);
        }
        (Operand::Local(index) | Operand::Argument(index), _) => {
            out.extend_from_slice(&index.to_le_bytes());
        }
        (Operand::Target(target), kind) => {
            let displacement = i64::from(offset_of(*target)?) - next;
            if kind == OperandType::ShortBranch {
                let short = i8::try_from(displacement)
                    .map_err(|_| encode_error!("{}: displacement {} overflows", ins, displacement))?;
                out.extend_from_slice(&short.to_le_bytes());
            } else {
                let long = i32::try_from(displacement)
                    .map_err(|_| encode_error!("{}: displacement {} overflows", ins, displacement))?;
                out.extend_from_slice(&long.to_le_bytes());
            }
        }
        (Operand::Switch(targets), _) => {
            let count = u32::try_from(targets.len())
                .map_err(|_| encode_error!("{}: too many switch targets", ins))?;
            out.extend_from_slice(&count.to_le_bytes());
            for target in targets {
                let displacement = i64::from(offset_of(*target)?) - next;
                let long = i32::try_from(displacement)
                    .map_err(|_| encode_error!("{}: displacement {} overflows", ins, displacement))?;
                out.extend_from_slice(&long.to_le_bytes());
            }
        }
    }

    Ok(())
}

fn label_offsets(seq: &InstructionSequence, offsets: &[u32]) -> HashMap<Label, u32> {
    seq.iter()
        .zip(offsets)
        .map(|(ins, offset)| (ins.label, *offset))
        .collect()
}

fn write_code(seq: &InstructionSequence, promote: bool) -> Result<(Vec<u8>, Vec<u32>)> {
    let (forms, offsets, code_len) = layout(seq, promote)?;
    let by_label = label_offsets(seq, &offsets);
    let offset_of = |label: Label| -> Result<u32> {
        by_label
            .get(&label)
            .copied()
            .ok_or_else(|| encode_error!("Label {} does not exist", label))
    };

    let mut code = Vec::with_capacity(code_len as usize);
    for ((ins, form), offset) in seq.iter().zip(&forms).zip(&offsets) {
        let next = i64::from(*offset) + encoded_size(*form, &ins.operand) as i64;
        write_instruction(&mut code, ins, *form, next, &offset_of)?;
    }
    Ok((code, offsets))
}

/// Lay out and write the instructions of `seq` without checking stack depth.
///
/// Meant for fragments that are not complete methods. Exception regions are
/// ignored; use [`encode_code`] for anything that gets installed.
///
/// # Errors
/// Returns [`crate::Error::Encode`] if `seq` fails [`validate`] or a short branch
/// overflows while `promote_short_branches` is off.
pub fn assemble(seq: &InstructionSequence, promote_short_branches: bool) -> Result<Vec<u8>> {
    validate(seq)?;
    Ok(write_code(seq, promote_short_branches)?.0)
}

/// Encode the instructions and exception regions of `seq` to IL code.
///
/// # Errors
/// Returns [`crate::Error::Encode`] if validation or the stack check fails, or if a
/// short branch overflows while promotion is disabled.
pub fn encode_code<R: MemberResolver + ?Sized>(
    seq: &InstructionSequence,
    resolver: &R,
    config: &SessionConfig,
) -> Result<EncodedCode> {
    validate(seq)?;
    let max_stack = stack::verify(seq, resolver)?;

    let (code, offsets) = write_code(seq, config.promote_short_branches)?;
    let code_len = code.len() as u32;
    let by_label = label_offsets(seq, &offsets);
    let offset_of = |label: Label| -> Result<u32> {
        by_label
            .get(&label)
            .copied()
            .ok_or_else(|| encode_error!("Label {} does not exist", label))
    };

    let end_of = |label: Option<Label>| -> Result<u32> {
        match label {
            Some(label) => offset_of(label),
            None => Ok(code_len),
        }
    };
    let mut exception_handlers = Vec::with_capacity(seq.regions().len());
    for region in seq.regions() {
        let try_offset = offset_of(region.try_start)?;
        let try_end = end_of(region.try_end)?;
        let handler_offset = offset_of(region.handler_start)?;
        let handler_end = end_of(region.handler_end)?;
        if try_end < try_offset || handler_end < handler_offset {
            return Err(encode_error!(
                "Exception region {}..{:?} has its end before its start",
                region.try_start,
                region.try_end
            ));
        }

        exception_handlers.push(ExceptionHandler {
            flags: region.flags,
            try_offset,
            try_length: try_end - try_offset,
            handler_offset,
            handler_length: handler_end - handler_offset,
            filter_offset: match region.filter_start {
                Some(filter) => offset_of(filter)?,
                None => region.class_token,
            },
        });
    }

    Ok(EncodedCode {
        code,
        max_stack,
        exception_handlers,
        offsets,
    })
}

/// Encode `seq` into a complete method body, reusing `original` for the header
/// fields an edit cannot change (local signature, `INIT_LOCALS`, header format).
///
/// # Errors
/// See [`encode_code`].
pub fn encode_body<R: MemberResolver + ?Sized>(
    seq: &InstructionSequence,
    original: &MethodBody,
    resolver: &R,
    config: &SessionConfig,
) -> Result<(MethodBody, Vec<u8>)> {
    let encoded = encode_code(seq, resolver, config)?;

    let max_stack = if config.preserve_max_stack {
        encoded.max_stack.max(original.max_stack)
    } else {
        encoded.max_stack
    };

    let mut header = MethodBody {
        size_code: encoded.code.len(),
        max_stack,
        exception_handlers: encoded.exception_handlers,
        ..original.clone()
    };
    let bytes = header.write(&encoded.code)?;
    header.is_fat = bytes.first().is_some_and(|first| first & 0x3 == 0x3);
    header.size_header = if header.is_fat { 12 } else { 1 };
    if !header.is_fat {
        header.max_stack = TINY_MAX_STACK;
    }

    Ok((header, bytes))
}
