//! Per-instruction predicates used to build patterns.
//!
//! A [`Pattern`](crate::patch::Pattern) is an ordered list of matchers, one per
//! instruction of the run it looks for. Each matcher inspects a single instruction
//! together with the member its token resolves to.
//!
//! # Available Matchers
//!
//! | Matcher | Description |
//! |---------|-------------|
//! | [`OpCodeMatcher`] | Opcode is one of a set |
//! | [`LdcI4Matcher`] | Any `ldc.i4` form pushing a given constant |
//! | [`FieldMatcher`] | Field load, address or store by type and name |
//! | [`CallMatcher`] | `call`/`callvirt` by type and method name |
//! | [`LocalMatcher`] | Local load or store, optionally of one slot |
//! | [`ArgumentMatcher`] | Argument load of one slot |
//! | [`PredicateMatcher`] | Arbitrary closure |
//!
//! Matchers compare members by name rather than by token, so a pattern written once
//! keeps working when the target is recompiled and its tokens renumbered.

use std::{fmt, sync::Arc};

use crate::{
    assembly::{Instruction, OpCode},
    metadata::member::Member,
};

/// What a matcher sees of one candidate instruction.
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    /// The candidate instruction
    pub instruction: &'a Instruction,
    /// The member its token operand resolves to, if any
    pub member: Option<&'a Member>,
    /// Position of the instruction in its sequence
    pub index: usize,
}

/// Type alias for closure predicates.
pub type InstructionPredicate = dyn Fn(&MatchContext<'_>) -> bool + Send + Sync;

/// Trait for per-instruction predicates.
///
/// # Implementing Custom Matchers
///
/// ```rust
/// use ilsplice::patch::{InstructionMatcher, MatchContext};
///
/// struct AnyReturn;
///
/// impl InstructionMatcher for AnyReturn {
///     fn matches(&self, context: &MatchContext<'_>) -> bool {
///         context.instruction.opcode.mnemonic() == "ret"
///     }
///
///     fn description(&self) -> String {
///         "ret".to_string()
///     }
/// }
/// ```
///
/// # Thread Safety
///
/// Matchers must be `Send + Sync` so patterns can be built once and shared.
pub trait InstructionMatcher: Send + Sync {
    /// Checks if the candidate instruction satisfies this matcher.
    fn matches(&self, context: &MatchContext<'_>) -> bool;

    /// Returns a short description for diagnostics, e.g. `stfld Player::x`.
    fn description(&self) -> String;
}

/// Matches instructions whose opcode is one of a set.
#[derive(Clone, Debug)]
pub struct OpCodeMatcher {
    opcodes: Vec<OpCode>,
}

impl OpCodeMatcher {
    /// Matches exactly `opcode`
    #[must_use]
    pub fn new(opcode: OpCode) -> Self {
        Self {
            opcodes: vec![opcode],
        }
    }

    /// Matches any of `opcodes`
    #[must_use]
    pub fn any_of(opcodes: &[OpCode]) -> Self {
        Self {
            opcodes: opcodes.to_vec(),
        }
    }
}

impl InstructionMatcher for OpCodeMatcher {
    fn matches(&self, context: &MatchContext<'_>) -> bool {
        self.opcodes.contains(&context.instruction.opcode)
    }

    fn description(&self) -> String {
        let names: Vec<&str> = self.opcodes.iter().map(|op| op.mnemonic()).collect();
        names.join("|")
    }
}

/// Matches any `ldc.i4` form (`ldc.i4.3`, `ldc.i4.s 18`, `ldc.i4 1000`) pushing `value`.
#[derive(Clone, Copy, Debug)]
pub struct LdcI4Matcher {
    value: i32,
}

impl LdcI4Matcher {
    /// Matches pushes of `value`
    #[must_use]
    pub fn new(value: i32) -> Self {
        Self { value }
    }
}

impl InstructionMatcher for LdcI4Matcher {
    fn matches(&self, context: &MatchContext<'_>) -> bool {
        context.instruction.ldc_i4_value() == Some(self.value)
    }

    fn description(&self) -> String {
        format!("ldc.i4 {}", self.value)
    }
}

/// How a field is accessed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldAccess {
    /// `ldfld` / `ldsfld`
    Load,
    /// `ldflda` / `ldsflda`
    Address,
    /// `stfld` / `stsfld`
    Store,
}

impl FieldAccess {
    fn opcodes(self) -> [OpCode; 2] {
        match self {
            FieldAccess::Load => [OpCode::Ldfld, OpCode::Ldsfld],
            FieldAccess::Address => [OpCode::Ldflda, OpCode::Ldsflda],
            FieldAccess::Store => [OpCode::Stfld, OpCode::Stsfld],
        }
    }
}

impl fmt::Display for FieldAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldAccess::Load => write!(f, "ldfld"),
            FieldAccess::Address => write!(f, "ldflda"),
            FieldAccess::Store => write!(f, "stfld"),
        }
    }
}

/// Matches field accesses by declaring type and field name.
#[derive(Clone, Debug)]
pub struct FieldMatcher {
    access: FieldAccess,
    declaring_type: String,
    name: String,
}

impl FieldMatcher {
    /// Matches `access` of `declaring_type::name` (instance or static)
    pub fn new(access: FieldAccess, declaring_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            access,
            declaring_type: declaring_type.into(),
            name: name.into(),
        }
    }
}

impl InstructionMatcher for FieldMatcher {
    fn matches(&self, context: &MatchContext<'_>) -> bool {
        if !self.access.opcodes().contains(&context.instruction.opcode) {
            return false;
        }
        context
            .member
            .and_then(Member::as_field)
            .is_some_and(|field| field.declaring_type == self.declaring_type && field.name == self.name)
    }

    fn description(&self) -> String {
        format!("{} {}::{}", self.access, self.declaring_type, self.name)
    }
}

/// Which call instructions a [`CallMatcher`] accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallKind {
    /// Only `call`
    Call,
    /// Only `callvirt`
    CallVirt,
    /// Either
    Any,
}

/// Matches calls by declaring type and method name.
#[derive(Clone, Debug)]
pub struct CallMatcher {
    kind: CallKind,
    declaring_type: String,
    name: String,
}

impl CallMatcher {
    /// Matches a `kind` call of `declaring_type::name`
    pub fn new(kind: CallKind, declaring_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            declaring_type: declaring_type.into(),
            name: name.into(),
        }
    }
}

impl InstructionMatcher for CallMatcher {
    fn matches(&self, context: &MatchContext<'_>) -> bool {
        let opcode_matches = match self.kind {
            CallKind::Call => context.instruction.opcode == OpCode::Call,
            CallKind::CallVirt => context.instruction.opcode == OpCode::Callvirt,
            CallKind::Any => matches!(context.instruction.opcode, OpCode::Call | OpCode::Callvirt),
        };

        opcode_matches
            && context
                .member
                .and_then(Member::as_method)
                .is_some_and(|method| {
                    method.declaring_type == self.declaring_type && method.name == self.name
                })
    }

    fn description(&self) -> String {
        let mnemonic = match self.kind {
            CallKind::Call => "call",
            CallKind::CallVirt => "callvirt",
            CallKind::Any => "call|callvirt",
        };
        format!("{mnemonic} {}::{}", self.declaring_type, self.name)
    }
}

/// Matches local variable loads or stores.
#[derive(Clone, Copy, Debug)]
pub struct LocalMatcher {
    store: bool,
    index: Option<u16>,
}

impl LocalMatcher {
    /// Any form of `ldloc`, optionally restricted to one slot
    #[must_use]
    pub fn load(index: Option<u16>) -> Self {
        Self { store: false, index }
    }

    /// Any form of `stloc`, optionally restricted to one slot
    #[must_use]
    pub fn store(index: Option<u16>) -> Self {
        Self { store: true, index }
    }
}

impl InstructionMatcher for LocalMatcher {
    fn matches(&self, context: &MatchContext<'_>) -> bool {
        let instruction = context.instruction;
        let kind_matches = if self.store {
            instruction.is_local_store()
        } else {
            instruction.is_local_load()
        };
        kind_matches && self.index.is_none_or(|index| instruction.local_index() == Some(index))
    }

    fn description(&self) -> String {
        let mnemonic = if self.store { "stloc" } else { "ldloc" };
        match self.index {
            Some(index) => format!("{mnemonic} {index}"),
            None => mnemonic.to_string(),
        }
    }
}

/// Matches any form of `ldarg` for one slot.
#[derive(Clone, Copy, Debug)]
pub struct ArgumentMatcher {
    index: u16,
}

impl ArgumentMatcher {
    /// Matches loads of argument `index` (0 is the receiver of instance methods)
    #[must_use]
    pub fn load(index: u16) -> Self {
        Self { index }
    }
}

impl InstructionMatcher for ArgumentMatcher {
    fn matches(&self, context: &MatchContext<'_>) -> bool {
        matches!(
            context.instruction.opcode,
            OpCode::Ldarg0
                | OpCode::Ldarg1
                | OpCode::Ldarg2
                | OpCode::Ldarg3
                | OpCode::LdargS
                | OpCode::Ldarg
        ) && context.instruction.argument_index() == Some(self.index)
    }

    fn description(&self) -> String {
        format!("ldarg {}", self.index)
    }
}

/// Matches with an arbitrary closure.
///
/// ```rust
/// use ilsplice::patch::PredicateMatcher;
///
/// let matcher = PredicateMatcher::new("any branch", |ctx| ctx.instruction.is_branch());
/// ```
#[derive(Clone)]
pub struct PredicateMatcher {
    predicate: Arc<InstructionPredicate>,
    description: String,
}

impl PredicateMatcher {
    /// Creates a matcher from a closure and a description of what it accepts
    pub fn new<F>(description: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&MatchContext<'_>) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            description: description.into(),
        }
    }
}

impl InstructionMatcher for PredicateMatcher {
    fn matches(&self, context: &MatchContext<'_>) -> bool {
        (self.predicate)(context)
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

impl fmt::Debug for PredicateMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredicateMatcher")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{Label, Operand},
        metadata::{
            member::{FieldDesc, MethodDesc},
            token::Token,
        },
    };

    fn instruction(opcode: OpCode, operand: Operand) -> Instruction {
        Instruction {
            label: Label(0),
            opcode,
            operand,
            offset: None,
        }
    }

    fn check(matcher: &dyn InstructionMatcher, ins: &Instruction, member: Option<&Member>) -> bool {
        matcher.matches(&MatchContext {
            instruction: ins,
            member,
            index: 0,
        })
    }

    #[test]
    fn test_field_matcher() {
        let member = Member::Field(FieldDesc::instance("Player", "jumpGraceTimer"));
        let other = Member::Field(FieldDesc::instance("Player", "varJumpTimer"));
        let stfld = instruction(OpCode::Stfld, Operand::Token(Token(0x0400_0001)));
        let ldfld = instruction(OpCode::Ldfld, Operand::Token(Token(0x0400_0001)));

        let matcher = FieldMatcher::new(FieldAccess::Store, "Player", "jumpGraceTimer");
        assert!(check(&matcher, &stfld, Some(&member)));
        assert!(!check(&matcher, &stfld, Some(&other)));
        assert!(!check(&matcher, &ldfld, Some(&member)));
        assert!(!check(&matcher, &stfld, None));
        assert_eq!(matcher.description(), "stfld Player::jumpGraceTimer");
    }

    #[test]
    fn test_call_matcher() {
        let member = Member::Method(MethodDesc::instance("StateMachine", "get_State", 0, true));
        let callvirt = instruction(OpCode::Callvirt, Operand::Token(Token(0x0A00_0001)));
        let call = instruction(OpCode::Call, Operand::Token(Token(0x0A00_0001)));

        let virt = CallMatcher::new(CallKind::CallVirt, "StateMachine", "get_State");
        assert!(check(&virt, &callvirt, Some(&member)));
        assert!(!check(&virt, &call, Some(&member)));

        let any = CallMatcher::new(CallKind::Any, "StateMachine", "get_State");
        assert!(check(&any, &call, Some(&member)));
        assert!(!check(&any, &call, Some(&Member::Type("StateMachine".into()))));
    }

    #[test]
    fn test_constant_and_slot_matchers() {
        let short = instruction(OpCode::LdcI4S, Operand::Int8(18));
        let macro_form = instruction(OpCode::LdcI43, Operand::None);
        assert!(check(&LdcI4Matcher::new(18), &short, None));
        assert!(check(&LdcI4Matcher::new(3), &macro_form, None));
        assert!(!check(&LdcI4Matcher::new(18), &macro_form, None));

        let ldloc = instruction(OpCode::LdlocS, Operand::Local(12));
        assert!(check(&LocalMatcher::load(Some(12)), &ldloc, None));
        assert!(check(&LocalMatcher::load(None), &ldloc, None));
        assert!(!check(&LocalMatcher::store(None), &ldloc, None));

        let ldarg = instruction(OpCode::Ldarg0, Operand::None);
        assert!(check(&ArgumentMatcher::load(0), &ldarg, None));
        assert!(!check(&ArgumentMatcher::load(1), &ldarg, None));
    }

    #[test]
    fn test_opcode_and_predicate_matchers() {
        let bne = instruction(OpCode::BneUn, Operand::Target(Label(4)));
        let any_bne = OpCodeMatcher::any_of(&[OpCode::BneUn, OpCode::BneUnS]);
        assert!(check(&any_bne, &bne, None));
        assert_eq!(any_bne.description(), "bne.un|bne.un.s");

        let predicate = PredicateMatcher::new("targets L_0004", |ctx| {
            ctx.instruction.targets() == vec![Label(4)]
        });
        assert!(check(&predicate, &bne, None));
        assert_eq!(predicate.description(), "targets L_0004");
    }
}
