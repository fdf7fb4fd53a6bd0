//! Fluent assembly of method bodies with named labels.
//!
//! # Examples
//!
//! ```rust
//! use ilsplice::assembly::{BodyBuilder, OpCode};
//! use ilsplice::host::Image;
//! use ilsplice::metadata::member::MethodSignature;
//!
//! let body = BodyBuilder::new(MethodSignature::of_static(1, true, 0))
//!     .op(OpCode::Ldarg0)
//!     .branch(OpCode::BrtrueS, "one")
//!     .ldc_i4(0)
//!     .op(OpCode::Ret)
//!     .label("one")
//!     .ldc_i4(1)
//!     .op(OpCode::Ret)
//!     .build(&Image::new())?;
//!
//! assert_eq!(body, vec![0x1E, 0x02, 0x2D, 0x02, 0x16, 0x2A, 0x17, 0x2A]);
//! # Ok::<(), ilsplice::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    assembly::{
        encoder::encode_body,
        instruction::{Label, Operand},
        opcodes::OpCode,
        sequence::{ExceptionRegion, InstructionSequence},
    },
    config::SessionConfig,
    host::MemberResolver,
    metadata::{body::MethodBody, exceptions::ExceptionHandlerFlags, member::MethodSignature, token::Token},
    Error, Result,
};

struct PendingRegion {
    flags: ExceptionHandlerFlags,
    try_start: String,
    handler_start: String,
    handler_end: Option<String>,
    class_token: u32,
}

/// Builds an [`InstructionSequence`] or a complete method body.
///
/// Labels name the next instruction emitted after them. Branches may refer to a
/// label before or after it is defined; references are resolved when the builder
/// finishes.
pub struct BodyBuilder {
    sequence: InstructionSequence,
    labels: HashMap<String, Label>,
    pending_labels: Vec<String>,
    branches: Vec<(usize, Vec<String>)>,
    regions: Vec<PendingRegion>,
    local_var_sig_token: u32,
    init_locals: bool,
    fat: bool,
    error: Option<Error>,
}

impl BodyBuilder {
    /// Start a body for a method with `signature`
    #[must_use]
    pub fn new(signature: MethodSignature) -> Self {
        BodyBuilder {
            sequence: InstructionSequence::new(signature),
            labels: HashMap::new(),
            pending_labels: Vec::new(),
            branches: Vec::new(),
            regions: Vec::new(),
            local_var_sig_token: 0,
            init_locals: false,
            fat: false,
            error: None,
        }
    }

    fn push(&mut self, opcode: OpCode, operand: Operand) {
        let label = self.sequence.push(opcode, operand);
        for name in self.pending_labels.drain(..) {
            self.labels.insert(name, label);
        }
    }

    /// Emit an instruction with an explicit operand
    #[must_use]
    pub fn emit(mut self, opcode: OpCode, operand: Operand) -> Self {
        self.push(opcode, operand);
        self
    }

    /// Emit an instruction without operand
    #[must_use]
    pub fn op(self, opcode: OpCode) -> Self {
        self.emit(opcode, Operand::None)
    }

    /// Emit an instruction with a metadata token operand
    #[must_use]
    pub fn token(self, opcode: OpCode, token: Token) -> Self {
        self.emit(opcode, Operand::Token(token))
    }

    /// Emit the shortest `ldc.i4` form for `value`
    #[must_use]
    pub fn ldc_i4(self, value: i32) -> Self {
        let (opcode, operand) = ldc_i4_form(value);
        self.emit(opcode, operand)
    }

    /// Emit a branch to the label `name`
    #[must_use]
    pub fn branch(mut self, opcode: OpCode, name: &str) -> Self {
        if !opcode.is_branch() || opcode == OpCode::Switch {
            self.error.get_or_insert(encode_error!("{} is not a branch", opcode));
            return self;
        }
        self.branches.push((self.sequence.len(), vec![name.to_string()]));
        self.push(opcode, Operand::Target(Label(u32::MAX)));
        self
    }

    /// Emit a `switch` over the labels `names`
    #[must_use]
    pub fn switch(mut self, names: &[&str]) -> Self {
        self.branches.push((
            self.sequence.len(),
            names.iter().map(|name| (*name).to_string()).collect(),
        ));
        self.push(OpCode::Switch, Operand::Switch(Vec::new()));
        self
    }

    /// Name the next emitted instruction
    #[must_use]
    pub fn label(mut self, name: &str) -> Self {
        if self.labels.contains_key(name) || self.pending_labels.iter().any(|p| p == name) {
            self.error.get_or_insert(encode_error!("Label '{}' is defined twice", name));
        } else {
            self.pending_labels.push(name.to_string());
        }
        self
    }

    /// Add an exception clause protecting `try_start..handler_start`, with the
    /// handler running from `handler_start` to `handler_end` (end of body if `None`)
    #[must_use]
    pub fn region(
        mut self,
        flags: ExceptionHandlerFlags,
        try_start: &str,
        handler_start: &str,
        handler_end: Option<&str>,
        class_token: u32,
    ) -> Self {
        self.regions.push(PendingRegion {
            flags,
            try_start: try_start.to_string(),
            handler_start: handler_start.to_string(),
            handler_end: handler_end.map(str::to_string),
            class_token,
        });
        self
    }

    /// Use a fat header with the given local variable signature token
    #[must_use]
    pub fn locals(mut self, local_var_sig_token: Token, init_locals: bool) -> Self {
        self.local_var_sig_token = local_var_sig_token.value();
        self.init_locals = init_locals;
        self.fat = true;
        self
    }

    /// Force a fat header even if the body would fit a tiny one
    #[must_use]
    pub fn fat(mut self) -> Self {
        self.fat = true;
        self
    }

    /// Resolve labels and return the instruction sequence.
    ///
    /// # Errors
    /// Returns [`Error::UnresolvedLabel`] for a reference to a label that was never
    /// defined, and [`Error::Encode`] for misuse such as duplicate labels or a label
    /// that does not precede any instruction.
    pub fn sequence(mut self) -> Result<InstructionSequence> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        if let Some(name) = self.pending_labels.first() {
            return Err(encode_error!("Label '{}' does not name an instruction", name));
        }

        let lookup = |name: &String| -> Result<Label> {
            self.labels
                .get(name)
                .copied()
                .ok_or_else(|| Error::UnresolvedLabel(name.clone()))
        };

        let mut resolved = Vec::with_capacity(self.branches.len());
        for (index, names) in &self.branches {
            let targets = names.iter().map(lookup).collect::<Result<Vec<_>>>()?;
            resolved.push((*index, targets));
        }

        let mut regions = Vec::with_capacity(self.regions.len());
        for region in &self.regions {
            let handler_start = lookup(&region.handler_start)?;
            let is_filter = region.flags.contains(ExceptionHandlerFlags::FILTER);
            regions.push(ExceptionRegion {
                flags: region.flags,
                try_start: lookup(&region.try_start)?,
                try_end: Some(handler_start),
                handler_start,
                handler_end: region.handler_end.as_ref().map(lookup).transpose()?,
                filter_start: None,
                class_token: if is_filter { 0 } else { region.class_token },
            });
        }

        let mut instructions = self.sequence.instructions().to_vec();
        for (index, targets) in resolved {
            let ins = &mut instructions[index];
            ins.operand = match ins.opcode {
                OpCode::Switch => Operand::Switch(targets),
                _ => Operand::Target(targets[0]),
            };
        }

        Ok(InstructionSequence::from_parts(
            instructions,
            regions,
            *self.sequence.signature(),
        ))
    }

    /// Resolve labels and encode a complete method body.
    ///
    /// # Errors
    /// See [`BodyBuilder::sequence`] and [`crate::assembly::encode_body`].
    pub fn build<R: MemberResolver + ?Sized>(self, resolver: &R) -> Result<Vec<u8>> {
        let header = MethodBody {
            size_code: 0,
            size_header: if self.fat { 12 } else { 1 },
            local_var_sig_token: self.local_var_sig_token,
            max_stack: 0,
            is_fat: self.fat,
            is_init_local: self.init_locals,
            exception_handlers: Vec::new(),
        };
        let sequence = self.sequence()?;
        let config = SessionConfig::default().with_preserve_max_stack(false);
        let (_, bytes) = encode_body(&sequence, &header, resolver, &config)?;
        Ok(bytes)
    }
}

/// The shortest `ldc.i4` encoding of `value`.
pub(crate) fn ldc_i4_form(value: i32) -> (OpCode, Operand) {
    match value {
        -1 => (OpCode::LdcI4M1, Operand::None),
        0 => (OpCode::LdcI40, Operand::None),
        1 => (OpCode::LdcI41, Operand::None),
        2 => (OpCode::LdcI42, Operand::None),
        3 => (OpCode::LdcI43, Operand::None),
        4 => (OpCode::LdcI44, Operand::None),
        5 => (OpCode::LdcI45, Operand::None),
        6 => (OpCode::LdcI46, Operand::None),
        7 => (OpCode::LdcI47, Operand::None),
        8 => (OpCode::LdcI48, Operand::None),
        _ => match i8::try_from(value) {
            Ok(short) => (OpCode::LdcI4S, Operand::Int8(short)),
            Err(_) => (OpCode::LdcI4, Operand::Int32(value)),
        },
    }
}
