//! A stateful position in an instruction sequence, and the splice operations on it.
//!
//! The cursor sits *between* instructions: index `i` means "before instruction `i`",
//! and `len` means "after the last instruction". Emitting inserts at the cursor and
//! moves the cursor past the inserted instruction, so a run of emits comes out in
//! order and later searches only see what follows.
//!
//! Positions are plain indices and go stale as soon as anything is inserted before
//! them. Anything that must survive edits is held as a [`Label`], which is what
//! [`Cursor::goto_label`] jumps to.

use std::collections::HashMap;

use crate::{
    assembly::{builder::ldc_i4_form, Instruction, InstructionSequence, Label, OpCode, Operand},
    host::{ExternalRoutine, MethodHost},
    patch::pattern::{find, Direction, MatchResult, Pattern},
    Error, Result,
};

/// Where the cursor lands relative to a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveType {
    /// On the first matched instruction (emits go in front of the match)
    Before,
    /// Just past the last matched instruction
    After,
}

/// A value loaded as an argument of an inserted call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpliceArg {
    /// The receiver of the patched instance method (`ldarg.0`)
    This,
    /// A method argument by slot
    Argument(u16),
    /// A local variable by slot
    Local(u16),
    /// An `int32` constant
    Int32(i32),
    /// A `float32` constant
    Float32(f32),
}

/// A position in an [`InstructionSequence`] being patched.
pub struct Cursor<'a> {
    seq: &'a mut InstructionSequence,
    host: &'a dyn MethodHost,
    index: usize,
    search_from_next: bool,
    labels: HashMap<String, Label>,
    retarget_from: Option<Label>,
}

impl<'a> Cursor<'a> {
    /// A cursor at the start of `seq`.
    ///
    /// `host` resolves the members patterns compare against and imports the
    /// routines inserted calls target.
    pub fn new(seq: &'a mut InstructionSequence, host: &'a dyn MethodHost) -> Self {
        Cursor {
            seq,
            host,
            index: 0,
            search_from_next: false,
            labels: HashMap::new(),
            retarget_from: None,
        }
    }

    /// Current position
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The sequence being edited
    #[must_use]
    pub fn sequence(&self) -> &InstructionSequence {
        &*self.seq
    }

    /// The instruction after the cursor
    #[must_use]
    pub fn next(&self) -> Option<&Instruction> {
        self.seq.get(self.index)
    }

    /// The instruction before the cursor
    #[must_use]
    pub fn prev(&self) -> Option<&Instruction> {
        self.index.checked_sub(1).and_then(|index| self.seq.get(index))
    }

    /// The label captured under `name`, if any
    #[must_use]
    pub fn label(&self, name: &str) -> Option<Label> {
        self.labels.get(name).copied()
    }

    /// Store `label` under `name` for a later [`Cursor::goto_label`]
    pub fn mark(&mut self, name: impl Into<String>, label: Label) {
        self.labels.insert(name.into(), label);
    }

    fn set_index(&mut self, index: usize) {
        self.index = index;
        self.search_from_next = false;
        self.retarget_from = None;
    }

    fn record(&mut self, result: &MatchResult) {
        for (name, label) in &result.captures {
            log::trace!("captured {} = {}", name, label);
            self.labels.insert(name.clone(), *label);
        }
    }

    /// Move to an absolute position.
    ///
    /// # Errors
    /// Returns [`Error::CursorOutOfRange`] if `index` is past the end.
    pub fn goto(&mut self, index: usize) -> Result<()> {
        if index > self.seq.len() {
            return Err(Error::CursorOutOfRange {
                index: isize::try_from(index).unwrap_or(isize::MAX),
                len: self.seq.len(),
            });
        }
        self.set_index(index);
        Ok(())
    }

    /// Find `pattern` at or after the cursor and move to it.
    ///
    /// After a [`MoveType::Before`] landing the following forward search starts one
    /// instruction later, so the same anchor is not found again.
    ///
    /// # Errors
    /// Returns [`Error::PatternNotFound`] and leaves the cursor in place if the
    /// pattern does not occur.
    pub fn goto_next(&mut self, pattern: &Pattern, move_type: MoveType) -> Result<MatchResult> {
        let from = self.index + usize::from(self.search_from_next);
        let from = from.min(self.seq.len());
        let result = find(&*self.seq, from, Direction::Forward, pattern, self.host)?;
        self.record(&result);
        self.land(&result, move_type);
        log::trace!("{} matched at {}..{}", pattern.name(), result.start, result.end);
        Ok(result)
    }

    /// Find `pattern` starting strictly before the cursor and move to it.
    ///
    /// # Errors
    /// Returns [`Error::PatternNotFound`] and leaves the cursor in place if the
    /// pattern does not occur.
    pub fn goto_prev(&mut self, pattern: &Pattern, move_type: MoveType) -> Result<MatchResult> {
        self.search_back(pattern, move_type, Direction::Backward)
    }

    fn search_back(
        &mut self,
        pattern: &Pattern,
        move_type: MoveType,
        direction: Direction,
    ) -> Result<MatchResult> {
        let result = find(&*self.seq, self.index, direction, pattern, self.host)?;
        self.record(&result);
        self.land(&result, move_type);
        log::trace!("{} matched backwards at {}..{}", pattern.name(), result.start, result.end);
        Ok(result)
    }

    fn land(&mut self, result: &MatchResult, move_type: MoveType) {
        match move_type {
            MoveType::Before => {
                self.set_index(result.start);
                self.search_from_next = true;
            }
            MoveType::After => self.set_index(result.end),
        }
    }

    /// Move past the next match (forward) or onto the previous one (backward).
    ///
    /// [`Direction::BackwardInclusive`] also accepts a match starting at the cursor.
    ///
    /// # Errors
    /// Returns [`Error::PatternNotFound`] if the pattern does not occur.
    pub fn move_to(&mut self, pattern: &Pattern, direction: Direction) -> Result<MatchResult> {
        match direction {
            Direction::Forward => self.goto_next(pattern, MoveType::After),
            Direction::Backward | Direction::BackwardInclusive => {
                self.search_back(pattern, MoveType::Before, direction)
            }
        }
    }

    /// Move in front of the instruction a captured label refers to.
    ///
    /// Branches to that instruction are pulled onto whatever is emitted next, as with
    /// [`Cursor::move_after_labels`], so a spliced block runs when the capturing
    /// branch is taken.
    ///
    /// # Errors
    /// Returns [`Error::UnresolvedLabel`] if nothing was captured under `name`.
    pub fn goto_label(&mut self, name: &str) -> Result<()> {
        let label = self
            .labels
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnresolvedLabel(name.to_string()))?;
        let index = self
            .seq
            .position(label)
            .ok_or_else(|| Error::UnresolvedLabel(name.to_string()))?;
        log::trace!("jumped to {} ({}) at {}", name, label, index);
        self.set_index(index);
        self.retarget_from = Some(label);
        Ok(())
    }

    /// Move by `delta` instructions.
    ///
    /// # Errors
    /// Returns [`Error::CursorOutOfRange`] if the result is outside `0..=len`.
    pub fn advance(&mut self, delta: isize) -> Result<()> {
        let len = self.seq.len();
        let target = isize::try_from(self.index)
            .ok()
            .and_then(|index| index.checked_add(delta))
            .unwrap_or(isize::MAX);
        match usize::try_from(target) {
            Ok(index) if index <= len => {
                self.set_index(index);
                Ok(())
            }
            _ => Err(Error::CursorOutOfRange { index: target, len }),
        }
    }

    /// Make the next emitted instruction the target of every branch that currently
    /// targets the instruction after the cursor.
    pub fn move_after_labels(&mut self) {
        self.retarget_from = self.next().map(|ins| ins.label);
    }

    /// Insert an instruction at the cursor and move past it.
    ///
    /// # Errors
    /// Returns [`Error::CursorOutOfRange`] if the cursor is past the end.
    pub fn emit(&mut self, opcode: OpCode, operand: Operand) -> Result<Label> {
        let label = self.seq.insert(self.index, opcode, operand)?;
        if let Some(from) = self.retarget_from.take() {
            let moved = self.seq.retarget(from, label);
            log::trace!("moved {} branch target(s) from {} to {}", moved, from, label);
        }
        self.index += 1;
        self.search_from_next = false;
        Ok(label)
    }

    /// Emit the shortest form loading argument `index`.
    ///
    /// # Errors
    /// See [`Cursor::emit`].
    pub fn emit_ldarg(&mut self, index: u16) -> Result<Label> {
        match index {
            0 => self.emit(OpCode::Ldarg0, Operand::None),
            1 => self.emit(OpCode::Ldarg1, Operand::None),
            2 => self.emit(OpCode::Ldarg2, Operand::None),
            3 => self.emit(OpCode::Ldarg3, Operand::None),
            0..=0xFF => self.emit(OpCode::LdargS, Operand::Argument(index)),
            _ => self.emit(OpCode::Ldarg, Operand::Argument(index)),
        }
    }

    /// Emit the shortest form loading local `index`.
    ///
    /// # Errors
    /// See [`Cursor::emit`].
    pub fn emit_ldloc(&mut self, index: u16) -> Result<Label> {
        match index {
            0 => self.emit(OpCode::Ldloc0, Operand::None),
            1 => self.emit(OpCode::Ldloc1, Operand::None),
            2 => self.emit(OpCode::Ldloc2, Operand::None),
            3 => self.emit(OpCode::Ldloc3, Operand::None),
            0..=0xFF => self.emit(OpCode::LdlocS, Operand::Local(index)),
            _ => self.emit(OpCode::Ldloc, Operand::Local(index)),
        }
    }

    /// Emit the shortest form loading the constant `value`.
    ///
    /// # Errors
    /// See [`Cursor::emit`].
    pub fn emit_ldc_i4(&mut self, value: i32) -> Result<Label> {
        let (opcode, operand) = ldc_i4_form(value);
        self.emit(opcode, operand)
    }

    /// Emit a `call` to `routine`, importing it into the host first.
    ///
    /// The import stays in the host even if the edited body is never committed.
    ///
    /// # Errors
    /// Propagates import failures from the host.
    pub fn emit_call(&mut self, routine: &ExternalRoutine) -> Result<Label> {
        let token = self.host.import_routine(routine)?;
        self.emit(OpCode::Call, Operand::Token(token))
    }

    /// Insert argument loads followed by a call to `routine` at the cursor.
    ///
    /// The block must leave the operand stack as it found it: the routine consumes
    /// the loaded arguments plus any values already on the stack, and its return
    /// value (if any) replaces what it consumed from the stack. Nothing is inserted
    /// if the block is rejected.
    ///
    /// # Errors
    /// Returns [`Error::Encode`] if the block's net stack effect is not zero or an
    /// argument refers to a slot the method does not have.
    pub fn insert_call(&mut self, routine: &ExternalRoutine, args: &[SpliceArg]) -> Result<()> {
        let pushed = i64::try_from(args.len()).unwrap_or(i64::MAX) + i64::from(routine.returns);
        let popped = i64::from(routine.params);
        if pushed != popped {
            return Err(encode_error!(
                "Call to {} with {} argument(s) changes the stack depth by {}",
                routine,
                args.len(),
                pushed - popped
            ));
        }

        let signature = *self.seq.signature();
        for arg in args {
            match *arg {
                SpliceArg::This if !signature.has_this => {
                    return Err(encode_error!("{} is passed 'this' from a static method", routine));
                }
                SpliceArg::Argument(index) if index >= signature.arguments() => {
                    return Err(encode_error!("{} is passed missing argument {}", routine, index));
                }
                SpliceArg::Local(index) if index >= signature.locals => {
                    return Err(encode_error!("{} is passed missing local {}", routine, index));
                }
                _ => {}
            }
        }

        let token = self.host.import_routine(routine)?;
        let at = self.index;
        for arg in args {
            match *arg {
                SpliceArg::This => self.emit_ldarg(0)?,
                SpliceArg::Argument(index) => self.emit_ldarg(index)?,
                SpliceArg::Local(index) => self.emit_ldloc(index)?,
                SpliceArg::Int32(value) => self.emit_ldc_i4(value)?,
                SpliceArg::Float32(value) => self.emit(OpCode::LdcR4, Operand::Float32(value))?,
            };
        }
        self.emit(OpCode::Call, Operand::Token(token))?;
        log::trace!("inserted call to {} at {}", routine, at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::{BodyBuilder, InstructionSequence},
        host::Image,
        metadata::member::{FieldDesc, MethodSignature},
    };

    struct Fixture {
        image: Image,
        seq: InstructionSequence,
    }

    /// `ldarg.0; ldfld x; ldc.i4.s 18; bne.un.s skip; ldarg.0; ldfld x; pop; skip: ret`
    fn fixture() -> Fixture {
        let image = Image::new();
        let x = image.add_field(FieldDesc::instance("Player", "x"));

        let seq = BodyBuilder::new(MethodSignature::instance(1, false, 2))
            .op(OpCode::Ldarg0)
            .token(OpCode::Ldfld, x)
            .ldc_i4(18)
            .branch(OpCode::BneUnS, "skip")
            .op(OpCode::Ldarg0)
            .token(OpCode::Ldfld, x)
            .op(OpCode::Pop)
            .label("skip")
            .op(OpCode::Ret)
            .sequence()
            .unwrap();
        Fixture { image, seq }
    }

    #[test]
    fn test_before_landing_skips_same_anchor() {
        let mut f = fixture();
        let mut cursor = Cursor::new(&mut f.seq, &f.image);
        let pattern = Pattern::new("load x").load_field("Player", "x");

        cursor.goto_next(&pattern, MoveType::Before).unwrap();
        assert_eq!(cursor.index(), 1);
        cursor.goto_next(&pattern, MoveType::Before).unwrap();
        assert_eq!(cursor.index(), 5);
        assert!(matches!(
            cursor.goto_next(&pattern, MoveType::Before),
            Err(Error::PatternNotFound { .. })
        ));
        assert_eq!(cursor.index(), 5);
    }

    #[test]
    fn test_after_landing_and_backward_search() {
        let mut f = fixture();
        let mut cursor = Cursor::new(&mut f.seq, &f.image);
        let pattern = Pattern::new("load x").load_field("Player", "x");

        cursor.goto_next(&pattern, MoveType::After).unwrap();
        assert_eq!(cursor.index(), 2);
        cursor.goto(8).unwrap();
        cursor.move_to(&pattern, Direction::Backward).unwrap();
        assert_eq!(cursor.index(), 5);
        cursor.move_to(&pattern, Direction::Backward).unwrap();
        assert_eq!(cursor.index(), 1);
    }

    #[test]
    fn test_captured_label_jump() {
        let mut f = fixture();
        let mut cursor = Cursor::new(&mut f.seq, &f.image);

        assert!(matches!(cursor.goto_label("skip"), Err(Error::UnresolvedLabel(_))));

        let compare = Pattern::new("compare")
            .ldc_i4(18)
            .branch_capture(&[OpCode::BneUn, OpCode::BneUnS], "skip");
        cursor.goto_next(&compare, MoveType::Before).unwrap();
        cursor.goto_label("skip").unwrap();
        assert_eq!(cursor.next().unwrap().opcode, OpCode::Ret);
        assert_eq!(cursor.prev().unwrap().opcode, OpCode::Pop);
    }

    #[test]
    fn test_advance_bounds() {
        let mut f = fixture();
        let mut cursor = Cursor::new(&mut f.seq, &f.image);
        cursor.advance(8).unwrap();
        assert!(cursor.next().is_none());
        assert!(matches!(
            cursor.advance(1),
            Err(Error::CursorOutOfRange { index: 9, len: 8 })
        ));
        assert!(matches!(
            cursor.advance(-9),
            Err(Error::CursorOutOfRange { index: -1, len: 8 })
        ));
        cursor.advance(-8).unwrap();
        assert_eq!(cursor.index(), 0);
    }

    #[test]
    fn test_insert_call_loads_arguments_and_advances() {
        let mut f = fixture();
        let routine = ExternalRoutine::action("Mod", "Observe", 3);
        {
            let mut cursor = Cursor::new(&mut f.seq, &f.image);
            cursor.goto(7).unwrap();
            cursor
                .insert_call(&routine, &[SpliceArg::This, SpliceArg::Local(1), SpliceArg::Argument(1)])
                .unwrap();
            assert_eq!(cursor.index(), 11);
            assert_eq!(cursor.next().unwrap().opcode, OpCode::Ret);
        }

        assert_eq!(
            &f.seq.opcodes()[7..],
            &[OpCode::Ldarg0, OpCode::Ldloc1, OpCode::Ldarg1, OpCode::Call, OpCode::Ret]
        );
        // The branch still skips the inserted block
        let ret = f.seq.get(11).unwrap().label;
        assert_eq!(f.seq.get(3).unwrap().targets(), vec![ret]);
    }

    #[test]
    fn test_insert_call_rejects_unbalanced_blocks() {
        let mut f = fixture();
        let mut cursor = Cursor::new(&mut f.seq, &f.image);

        let pushes = ExternalRoutine::function("Mod", "Value", 0);
        assert!(matches!(cursor.insert_call(&pushes, &[]), Err(Error::Encode(_))));

        let missing = ExternalRoutine::action("Mod", "Observe", 1);
        assert!(matches!(
            cursor.insert_call(&missing, &[SpliceArg::Local(7)]),
            Err(Error::Encode(_))
        ));
        assert_eq!(cursor.sequence().len(), 8);

        // Consumes the value on the stack and returns its replacement
        let transform = ExternalRoutine::function("Mod", "Transform", 2);
        cursor.goto(3).unwrap();
        cursor.insert_call(&transform, &[SpliceArg::Int32(4)]).unwrap();
        assert_eq!(cursor.sequence().len(), 10);
        assert_eq!(cursor.sequence().get(3).unwrap().opcode, OpCode::LdcI44);
    }

    #[test]
    fn test_constant_arguments_use_shortest_form() {
        let mut f = fixture();
        let transform = ExternalRoutine::function("Mod", "Transform", 2);
        {
            let mut cursor = Cursor::new(&mut f.seq, &f.image);
            cursor.goto(3).unwrap();
            for value in [-1, 8, 100, -128, 1000] {
                cursor.insert_call(&transform, &[SpliceArg::Int32(value)]).unwrap();
            }
        }

        let loads: Vec<_> = (3..13).step_by(2).map(|i| f.seq.get(i).unwrap().clone()).collect();
        assert_eq!(loads[0].opcode, OpCode::LdcI4M1);
        assert_eq!(loads[1].opcode, OpCode::LdcI48);
        assert_eq!(loads[2].opcode, OpCode::LdcI4S);
        assert_eq!(loads[2].operand, Operand::Int8(100));
        assert_eq!(loads[3].operand, Operand::Int8(-128));
        assert_eq!(loads[4].opcode, OpCode::LdcI4);
        assert_eq!(loads[4].operand, Operand::Int32(1000));
    }

    #[test]
    fn test_inclusive_move_to_accepts_match_at_cursor() {
        let mut f = fixture();
        let mut cursor = Cursor::new(&mut f.seq, &f.image);
        let pattern = Pattern::new("load x").load_field("Player", "x");

        cursor.goto(5).unwrap();
        cursor.move_to(&pattern, Direction::BackwardInclusive).unwrap();
        assert_eq!(cursor.index(), 5);
        cursor.move_to(&pattern, Direction::Backward).unwrap();
        assert_eq!(cursor.index(), 1);
    }

    #[test]
    fn test_splice_at_captured_label_runs_when_branch_taken() {
        let mut f = fixture();
        let routine = ExternalRoutine::action("Mod", "AtLabel", 1);
        {
            let mut cursor = Cursor::new(&mut f.seq, &f.image);
            let compare = Pattern::new("compare")
                .ldc_i4(18)
                .branch_capture(&[OpCode::BneUn, OpCode::BneUnS], "skip");
            cursor.goto_next(&compare, MoveType::Before).unwrap();
            cursor.goto_label("skip").unwrap();
            cursor.insert_call(&routine, &[SpliceArg::This]).unwrap();
        }

        assert_eq!(
            &f.seq.opcodes()[7..],
            &[OpCode::Ldarg0, OpCode::Call, OpCode::Ret]
        );
        let block = f.seq.get(7).unwrap().label;
        assert_eq!(f.seq.get(3).unwrap().targets(), vec![block]);
    }

    #[test]
    fn test_move_after_labels_pulls_branches_forward() {
        let mut f = fixture();
        let routine = ExternalRoutine::action("Mod", "Tick", 0);
        {
            let mut cursor = Cursor::new(&mut f.seq, &f.image);
            cursor.goto(7).unwrap();
            cursor.move_after_labels();
            cursor.insert_call(&routine, &[]).unwrap();
        }
        let call = f.seq.get(7).unwrap().label;
        assert_eq!(f.seq.get(3).unwrap().targets(), vec![call]);
    }
}
