//! Decoded instructions and their operands.
//!
//! An [`Instruction`] is an opcode plus a typed [`Operand`]. Branch operands do not
//! hold byte offsets: they hold the [`Label`] of the target instruction. Labels are
//! assigned once per instruction (on decode or on insertion) and never change, so
//! inserting code anywhere in a sequence leaves every branch pointing where it did.

use std::fmt;

use crate::{
    assembly::opcodes::{FlowType, OpCode},
    metadata::token::Token,
};

/// Stable identity of an instruction within its sequence, used as a branch target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(pub(crate) u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L_{:04}", self.0)
    }
}

/// The inline operand of an instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand (including the macro forms such as `ldarg.0` or `ldc.i4.3`)
    None,
    /// `ldc.i4.s` immediate
    Int8(i8),
    /// `unaligned.` / `no.` immediate
    UInt8(u8),
    /// `ldc.i4` immediate
    Int32(i32),
    /// `ldc.i8` immediate
    Int64(i64),
    /// `ldc.r4` immediate
    Float32(f32),
    /// `ldc.r8` immediate
    Float64(f64),
    /// Field, method, type, string or signature token
    Token(Token),
    /// Local variable slot
    Local(u16),
    /// Argument slot (0 is the receiver of instance methods)
    Argument(u16),
    /// Branch target
    Target(Label),
    /// Switch targets in table order
    Switch(Vec<Label>),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::None => Ok(()),
            Operand::Int8(value) => write!(f, "{value}"),
            Operand::UInt8(value) => write!(f, "{value}"),
            Operand::Int32(value) => write!(f, "{value}"),
            Operand::Int64(value) => write!(f, "{value}"),
            Operand::Float32(value) => write!(f, "{value}"),
            Operand::Float64(value) => write!(f, "{value}"),
            Operand::Token(token) => write!(f, "{token}"),
            Operand::Local(index) => write!(f, "V_{index}"),
            Operand::Argument(index) => write!(f, "A_{index}"),
            Operand::Target(label) => write!(f, "{label}"),
            Operand::Switch(targets) => {
                let names: Vec<String> = targets.iter().map(Label::to_string).collect();
                write!(f, "({})", names.join(", "))
            }
        }
    }
}

/// One instruction of a method body.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Identity of this instruction, the target other instructions branch to
    pub label: Label,
    /// The opcode
    pub opcode: OpCode,
    /// The inline operand
    pub operand: Operand,
    /// Byte offset in the body this was decoded from, `None` for inserted instructions
    pub offset: Option<u32>,
}

impl Instruction {
    /// Control flow kind of the opcode
    #[must_use]
    pub fn flow(&self) -> FlowType {
        self.opcode.flow()
    }

    /// Returns true for branch, leave and switch instructions
    #[must_use]
    pub fn is_branch(&self) -> bool {
        self.opcode.is_branch()
    }

    /// Returns true if execution never falls through to the next instruction
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.flow(),
            FlowType::UnconditionalBranch
                | FlowType::Return
                | FlowType::Throw
                | FlowType::EndFinally
                | FlowType::Leave
        )
    }

    /// Labels this instruction may transfer control to (excluding fall-through)
    #[must_use]
    pub fn targets(&self) -> Vec<Label> {
        match &self.operand {
            Operand::Target(label) => vec![*label],
            Operand::Switch(labels) => labels.clone(),
            _ => Vec::new(),
        }
    }

    /// Metadata token operand, if any
    #[must_use]
    pub fn token(&self) -> Option<Token> {
        match self.operand {
            Operand::Token(token) => Some(token),
            _ => None,
        }
    }

    /// The constant pushed by any `ldc.i4` form
    #[must_use]
    pub fn ldc_i4_value(&self) -> Option<i32> {
        match (self.opcode, &self.operand) {
            (OpCode::LdcI4M1, _) => Some(-1),
            (OpCode::LdcI40, _) => Some(0),
            (OpCode::LdcI41, _) => Some(1),
            (OpCode::LdcI42, _) => Some(2),
            (OpCode::LdcI43, _) => Some(3),
            (OpCode::LdcI44, _) => Some(4),
            (OpCode::LdcI45, _) => Some(5),
            (OpCode::LdcI46, _) => Some(6),
            (OpCode::LdcI47, _) => Some(7),
            (OpCode::LdcI48, _) => Some(8),
            (OpCode::LdcI4S, Operand::Int8(value)) => Some(i32::from(*value)),
            (OpCode::LdcI4, Operand::Int32(value)) => Some(*value),
            _ => None,
        }
    }

    /// The local slot referenced by any `ldloc`/`ldloca`/`stloc` form
    #[must_use]
    pub fn local_index(&self) -> Option<u16> {
        match (self.opcode, &self.operand) {
            (OpCode::Ldloc0 | OpCode::Stloc0, _) => Some(0),
            (OpCode::Ldloc1 | OpCode::Stloc1, _) => Some(1),
            (OpCode::Ldloc2 | OpCode::Stloc2, _) => Some(2),
            (OpCode::Ldloc3 | OpCode::Stloc3, _) => Some(3),
            (_, Operand::Local(index)) => Some(*index),
            _ => None,
        }
    }

    /// The argument slot referenced by any `ldarg`/`ldarga`/`starg` form
    #[must_use]
    pub fn argument_index(&self) -> Option<u16> {
        match (self.opcode, &self.operand) {
            (OpCode::Ldarg0, _) => Some(0),
            (OpCode::Ldarg1, _) => Some(1),
            (OpCode::Ldarg2, _) => Some(2),
            (OpCode::Ldarg3, _) => Some(3),
            (_, Operand::Argument(index)) => Some(*index),
            _ => None,
        }
    }

    /// Returns true for instructions that load (not store) a local
    #[must_use]
    pub fn is_local_load(&self) -> bool {
        matches!(
            self.opcode,
            OpCode::Ldloc0
                | OpCode::Ldloc1
                | OpCode::Ldloc2
                | OpCode::Ldloc3
                | OpCode::LdlocS
                | OpCode::Ldloc
        )
    }

    /// Returns true for instructions that store a local
    #[must_use]
    pub fn is_local_store(&self) -> bool {
        matches!(
            self.opcode,
            OpCode::Stloc0
                | OpCode::Stloc1
                | OpCode::Stloc2
                | OpCode::Stloc3
                | OpCode::StlocS
                | OpCode::Stloc
        )
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(offset) => write!(f, "IL_{offset:04x}: ")?,
            None => write!(f, "IL_????: ")?,
        }
        write!(f, "{}", self.opcode)?;
        if self.operand != Operand::None {
            write!(f, " {}", self.operand)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instruction(opcode: OpCode, operand: Operand) -> Instruction {
        Instruction {
            label: Label(0),
            opcode,
            operand,
            offset: Some(0x10),
        }
    }

    #[test]
    fn test_ldc_forms() {
        assert_eq!(instruction(OpCode::LdcI4M1, Operand::None).ldc_i4_value(), Some(-1));
        assert_eq!(instruction(OpCode::LdcI48, Operand::None).ldc_i4_value(), Some(8));
        assert_eq!(
            instruction(OpCode::LdcI4S, Operand::Int8(18)).ldc_i4_value(),
            Some(18)
        );
        assert_eq!(
            instruction(OpCode::LdcI4, Operand::Int32(1_000)).ldc_i4_value(),
            Some(1_000)
        );
        assert_eq!(instruction(OpCode::LdcI8, Operand::Int64(1)).ldc_i4_value(), None);
    }

    #[test]
    fn test_slot_forms() {
        assert_eq!(instruction(OpCode::Ldloc2, Operand::None).local_index(), Some(2));
        assert_eq!(
            instruction(OpCode::LdlocS, Operand::Local(12)).local_index(),
            Some(12)
        );
        assert!(instruction(OpCode::Stloc, Operand::Local(300)).is_local_store());
        assert_eq!(instruction(OpCode::Ldarg0, Operand::None).argument_index(), Some(0));
        assert_eq!(
            instruction(OpCode::StargS, Operand::Argument(5)).argument_index(),
            Some(5)
        );
        assert_eq!(instruction(OpCode::Nop, Operand::None).argument_index(), None);
    }

    #[test]
    fn test_control_flow() {
        let branch = instruction(OpCode::BneUnS, Operand::Target(Label(7)));
        assert!(branch.is_branch());
        assert!(!branch.is_terminal());
        assert_eq!(branch.targets(), vec![Label(7)]);

        let ret = instruction(OpCode::Ret, Operand::None);
        assert!(ret.is_terminal());
        assert!(ret.targets().is_empty());
    }

    #[test]
    fn test_display() {
        let ins = instruction(OpCode::Stfld, Operand::Token(Token(0x0400_0002)));
        assert_eq!(ins.to_string(), "IL_0010: stfld 0x04000002");

        let switch = Instruction {
            offset: None,
            ..instruction(OpCode::Switch, Operand::Switch(vec![Label(1), Label(2)]))
        };
        assert_eq!(switch.to_string(), "IL_????: switch (L_0001, L_0002)");
    }
}
