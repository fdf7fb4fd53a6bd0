//! Operand stack depth verification.
//!
//! A worklist walk over every reachable instruction, tracking the evaluation stack
//! depth the same way the runtime verifier does: each instruction must see the same
//! depth on every incoming edge, may never pop more than is present, and `ret` must
//! leave exactly the declared return value behind. Handler blocks are entered with the
//! exception object on the stack (catch and filter) or with an empty stack (finally and
//! fault).
//!
//! Call sites are sized through a [`MemberResolver`], since the arity of a method is
//! not encoded in the instruction stream.

use std::collections::HashMap;

use crate::{
    assembly::{
        instruction::{Instruction, Label},
        opcodes::{FlowType, OpCode, StackEffect},
        sequence::InstructionSequence,
    },
    host::MemberResolver,
    metadata::member::Member,
    Result,
};

/// Net stack effect of `instruction` as `(pops, pushes)`.
///
/// # Errors
/// Returns [`crate::Error::Encode`] if a call target cannot be resolved to a method or
/// the opcode has no statically known effect.
pub fn stack_effect<R: MemberResolver + ?Sized>(
    instruction: &Instruction,
    resolver: &R,
    returns: bool,
) -> Result<(u32, u32)> {
    match instruction.opcode.stack_effect() {
        StackEffect::Fixed(pops, pushes) => Ok((u32::from(pops), u32::from(pushes))),
        StackEffect::Call => {
            let method = resolve_method(instruction, resolver)?;
            Ok((u32::from(method.0), u32::from(method.1)))
        }
        StackEffect::NewObj => {
            let token = instruction
                .token()
                .ok_or_else(|| encode_error!("{} has no token operand", instruction))?;
            match resolver.resolve(token) {
                Some(Member::Method(method)) => Ok((u32::from(method.params), 1)),
                _ => Err(encode_error!("{}: constructor {} is unknown", instruction, token)),
            }
        }
        StackEffect::Return => Ok((u32::from(returns), 0)),
        // Clearing is modelled by the walker, nothing is popped explicitly
        StackEffect::Clear => Ok((0, 0)),
        StackEffect::Unknown => Err(encode_error!(
            "{}: stack effect cannot be determined statically",
            instruction
        )),
    }
}

fn resolve_method<R: MemberResolver + ?Sized>(instruction: &Instruction, resolver: &R) -> Result<(u16, u16)> {
    let token = instruction
        .token()
        .ok_or_else(|| encode_error!("{} has no token operand", instruction))?;
    match resolver.resolve(token) {
        Some(Member::Method(method)) => Ok((method.call_pops(), method.call_pushes())),
        Some(other) => Err(encode_error!("{}: {} is not a method", instruction, other)),
        None => Err(encode_error!("{}: method {} is unknown", instruction, token)),
    }
}

/// Verify the stack discipline of `seq` and return the maximum depth reached.
///
/// # Errors
/// Returns [`crate::Error::Encode`] on stack underflow, inconsistent depths at a join,
/// a `ret` with the wrong depth, control falling off the end of the body, a dangling
/// branch target, or an unresolvable call.
pub fn verify<R: MemberResolver + ?Sized>(seq: &InstructionSequence, resolver: &R) -> Result<u16> {
    let instructions = seq.instructions();
    if instructions.is_empty() {
        return Err(encode_error!("Method body has no instructions"));
    }

    let positions: HashMap<Label, usize> = instructions
        .iter()
        .enumerate()
        .map(|(index, ins)| (ins.label, index))
        .collect();
    let index_of = |label: Label, source: &Instruction| -> Result<usize> {
        positions
            .get(&label)
            .copied()
            .ok_or_else(|| encode_error!("{} targets missing label {}", source, label))
    };
    let region_start = |label: Label| -> Result<usize> {
        positions
            .get(&label)
            .copied()
            .ok_or_else(|| encode_error!("Exception region refers to missing label {}", label))
    };

    let returns = seq.signature().returns;
    let mut depths: Vec<Option<u32>> = vec![None; instructions.len()];
    let mut worklist: Vec<(usize, u32)> = vec![(0, 0)];

    for region in seq.regions() {
        let handler_depth = u32::from(region.flags.receives_exception());
        worklist.push((region_start(region.try_start)?, 0));
        worklist.push((region_start(region.handler_start)?, handler_depth));
        if let Some(filter) = region.filter_start {
            worklist.push((region_start(filter)?, 1));
        }
    }

    let mut max_depth = 0u32;
    while let Some((index, depth)) = worklist.pop() {
        let Some(ins) = instructions.get(index) else {
            return Err(encode_error!(
                "Control falls off the end of the body after {}",
                instructions[instructions.len() - 1]
            ));
        };

        match depths[index] {
            Some(seen) if seen == depth => continue,
            Some(seen) => {
                return Err(encode_error!(
                    "Stack depth mismatch at {}: {} on one path, {} on another",
                    ins,
                    seen,
                    depth
                ));
            }
            None => depths[index] = Some(depth),
        }

        let (pops, pushes) = stack_effect(ins, resolver, returns)?;
        if depth < pops {
            return Err(encode_error!(
                "Stack underflow at {}: needs {} value(s), {} available",
                ins,
                pops,
                depth
            ));
        }

        if ins.opcode == OpCode::Ret && depth != pops {
            return Err(encode_error!(
                "{} leaves {} value(s) on the stack, expected {}",
                ins,
                depth,
                pops
            ));
        }

        let after = depth - pops + pushes;
        max_depth = max_depth.max(depth).max(after);

        match ins.flow() {
            FlowType::Sequential | FlowType::Call => worklist.push((index + 1, after)),
            FlowType::ConditionalBranch | FlowType::Switch => {
                worklist.push((index + 1, after));
                for target in ins.targets() {
                    worklist.push((index_of(target, ins)?, after));
                }
            }
            FlowType::UnconditionalBranch => {
                for target in ins.targets() {
                    worklist.push((index_of(target, ins)?, after));
                }
            }
            // leave empties the stack before transferring control
            FlowType::Leave => {
                for target in ins.targets() {
                    worklist.push((index_of(target, ins)?, 0));
                }
            }
            FlowType::Return | FlowType::Throw | FlowType::EndFinally => {}
        }
    }

    u16::try_from(max_depth).map_err(|_| encode_error!("Stack depth {} exceeds u16", max_depth))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::instruction::Operand,
        metadata::{
            exceptions::ExceptionHandlerFlags,
            member::{MethodDesc, MethodSignature},
            token::Token,
        },
        Error,
    };

    struct Methods;

    impl MemberResolver for Methods {
        fn resolve(&self, token: Token) -> Option<Member> {
            match token.0 {
                0x0A00_0001 => Some(Member::Method(MethodDesc::of_static("Engine", "get_DeltaTime", 0, true))),
                0x0A00_0002 => Some(Member::Method(MethodDesc::instance("Player", "Check", 0, false))),
                0x0A00_0003 => Some(Member::Method(MethodDesc::instance("Vector2", ".ctor", 2, false))),
                _ => None,
            }
        }
    }

    fn sequence(returns: bool, ops: &[(OpCode, Operand)]) -> InstructionSequence {
        let mut seq = InstructionSequence::new(MethodSignature::instance(0, returns, 2));
        for (opcode, operand) in ops {
            seq.push(*opcode, operand.clone());
        }
        seq
    }

    #[test]
    fn test_straight_line_depth() {
        let seq = sequence(
            false,
            &[
                (OpCode::Ldarg0, Operand::None),
                (OpCode::Call, Operand::Token(Token(0x0A00_0001))),
                (OpCode::Call, Operand::Token(Token(0x0A00_0001))),
                (OpCode::Sub, Operand::None),
                (OpCode::Pop, Operand::None),
                (OpCode::Call, Operand::Token(Token(0x0A00_0002))),
                (OpCode::Ret, Operand::None),
            ],
        );
        assert_eq!(verify(&seq, &Methods).unwrap(), 3);
    }

    #[test]
    fn test_newobj_pushes_instance() {
        let seq = sequence(
            true,
            &[
                (OpCode::LdcR4, Operand::Float32(1.0)),
                (OpCode::LdcR4, Operand::Float32(2.0)),
                (OpCode::Newobj, Operand::Token(Token(0x0A00_0003))),
                (OpCode::Ret, Operand::None),
            ],
        );
        assert_eq!(verify(&seq, &Methods).unwrap(), 2);
    }

    #[test]
    fn test_underflow_is_rejected() {
        let seq = sequence(false, &[(OpCode::Pop, Operand::None), (OpCode::Ret, Operand::None)]);
        assert!(matches!(verify(&seq, &Methods), Err(Error::Encode(m)) if m.contains("underflow")));
    }

    #[test]
    fn test_ret_depth_must_match_signature() {
        let seq = sequence(false, &[(OpCode::Ldarg0, Operand::None), (OpCode::Ret, Operand::None)]);
        assert!(matches!(verify(&seq, &Methods), Err(Error::Encode(_))));

        let seq = sequence(true, &[(OpCode::Ldarg0, Operand::None), (OpCode::Ret, Operand::None)]);
        assert_eq!(verify(&seq, &Methods).unwrap(), 1);
    }

    #[test]
    fn test_join_mismatch_is_rejected() {
        let mut seq = InstructionSequence::new(MethodSignature::instance(0, false, 0));
        let ldarg = seq.push(OpCode::Ldarg0, Operand::None);
        seq.push(OpCode::Ldarg0, Operand::None);
        seq.push(OpCode::BrtrueS, Operand::Target(ldarg));
        seq.push(OpCode::Ret, Operand::None);
        assert!(matches!(verify(&seq, &Methods), Err(Error::Encode(m)) if m.contains("mismatch")));
    }

    #[test]
    fn test_falling_off_the_end_is_rejected() {
        let seq = sequence(false, &[(OpCode::Nop, Operand::None)]);
        assert!(matches!(verify(&seq, &Methods), Err(Error::Encode(m)) if m.contains("falls off")));
    }

    #[test]
    fn test_dangling_target_is_rejected() {
        let mut seq = sequence(false, &[(OpCode::Ret, Operand::None)]);
        seq.insert(0, OpCode::BrS, Operand::Target(Label(99))).unwrap();
        assert!(matches!(verify(&seq, &Methods), Err(Error::Encode(m)) if m.contains("L_0099")));
    }

    #[test]
    fn test_unresolved_call_is_rejected() {
        let seq = sequence(
            false,
            &[(OpCode::Call, Operand::Token(Token(0x0A00_00FF))), (OpCode::Ret, Operand::None)],
        );
        assert!(matches!(verify(&seq, &Methods), Err(Error::Encode(_))));
    }

    #[test]
    fn test_handlers_start_with_exception_object() {
        use crate::assembly::sequence::ExceptionRegion;

        // try { nop; leave ret } catch { pop; leave ret } ret
        let mut seq = InstructionSequence::new(MethodSignature::instance(0, false, 0));
        let try_start = seq.push(OpCode::Nop, Operand::None);
        seq.push(OpCode::LeaveS, Operand::Target(Label(0)));
        let handler = seq.push(OpCode::Pop, Operand::None);
        seq.push(OpCode::LeaveS, Operand::Target(Label(0)));
        let ret = seq.push(OpCode::Ret, Operand::None);
        assert_eq!(seq.retarget(Label(0), ret), 2);

        seq.add_region(ExceptionRegion {
            flags: ExceptionHandlerFlags::EXCEPTION,
            try_start,
            try_end: Some(handler),
            handler_start: handler,
            handler_end: Some(ret),
            filter_start: None,
            class_token: 0x0100_0001,
        });

        assert_eq!(verify(&seq, &Methods).unwrap(), 1);
    }
}
