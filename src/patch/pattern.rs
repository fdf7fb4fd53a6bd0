//! Anchor patterns and the search over an instruction sequence.
//!
//! A match is a contiguous run where the `i`-th matcher accepts the instruction at
//! `start + i`. Evaluation short-circuits on the first rejection. Matches are purely
//! positional: a pattern never skips instructions or follows branches, so
//! instructions between two anchors must be stepped over by moving the cursor.

use std::{fmt, sync::Arc};

use crate::{
    assembly::{InstructionSequence, Label, OpCode},
    host::MemberResolver,
    patch::matcher::{
        ArgumentMatcher, CallKind, CallMatcher, FieldAccess, FieldMatcher, InstructionMatcher,
        LdcI4Matcher, LocalMatcher, MatchContext, OpCodeMatcher, PredicateMatcher,
    },
    Error, Result,
};

/// Search direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Towards the end of the sequence, starting at the given index
    Forward,
    /// Towards the start, considering only start positions before the given index
    Backward,
    /// Towards the start, beginning with the given index itself
    BackwardInclusive,
}

#[derive(Clone)]
struct PatternStep {
    matcher: Arc<dyn InstructionMatcher>,
    capture: Option<String>,
}

/// An ordered list of per-instruction matchers.
///
/// # Examples
///
/// ```rust
/// use ilsplice::patch::Pattern;
/// use ilsplice::assembly::OpCode;
///
/// let pattern = Pattern::new("jump grace timer")
///     .call("Monocle.Engine", "get_DeltaTime")
///     .opcode(OpCode::Sub)
///     .store_field("Celeste.Player", "jumpGraceTimer");
///
/// assert_eq!(pattern.len(), 3);
/// assert_eq!(
///     pattern.to_string(),
///     "jump grace timer [call Monocle.Engine::get_DeltaTime, sub, stfld Celeste.Player::jumpGraceTimer]"
/// );
/// ```
#[derive(Clone)]
pub struct Pattern {
    name: String,
    steps: Vec<PatternStep>,
}

impl Pattern {
    /// An empty pattern; add matchers with the builder methods
    pub fn new(name: impl Into<String>) -> Self {
        Pattern {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Name used in diagnostics
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of instructions a match spans
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the pattern has no matchers
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Names of the labels this pattern captures, in order
    #[must_use]
    pub fn captures(&self) -> Vec<&str> {
        self.steps.iter().filter_map(|step| step.capture.as_deref()).collect()
    }

    /// Append any matcher
    #[must_use]
    pub fn with(mut self, matcher: impl InstructionMatcher + 'static) -> Self {
        self.steps.push(PatternStep {
            matcher: Arc::new(matcher),
            capture: None,
        });
        self
    }

    /// Append a matcher that also captures the branch target of the matched
    /// instruction under `name`. The step only matches branches.
    #[must_use]
    pub fn with_capture(mut self, matcher: impl InstructionMatcher + 'static, name: impl Into<String>) -> Self {
        self.steps.push(PatternStep {
            matcher: Arc::new(matcher),
            capture: Some(name.into()),
        });
        self
    }

    /// Match exactly `opcode`
    #[must_use]
    pub fn opcode(self, opcode: OpCode) -> Self {
        self.with(OpCodeMatcher::new(opcode))
    }

    /// Match any of `opcodes`
    #[must_use]
    pub fn any_opcode(self, opcodes: &[OpCode]) -> Self {
        self.with(OpCodeMatcher::any_of(opcodes))
    }

    /// Match any `ldc.i4` form pushing `value`
    #[must_use]
    pub fn ldc_i4(self, value: i32) -> Self {
        self.with(LdcI4Matcher::new(value))
    }

    /// Match a load of `declaring_type::name`
    #[must_use]
    pub fn load_field(self, declaring_type: &str, name: &str) -> Self {
        self.with(FieldMatcher::new(FieldAccess::Load, declaring_type, name))
    }

    /// Match an address load of `declaring_type::name`
    #[must_use]
    pub fn field_address(self, declaring_type: &str, name: &str) -> Self {
        self.with(FieldMatcher::new(FieldAccess::Address, declaring_type, name))
    }

    /// Match a store to `declaring_type::name`
    #[must_use]
    pub fn store_field(self, declaring_type: &str, name: &str) -> Self {
        self.with(FieldMatcher::new(FieldAccess::Store, declaring_type, name))
    }

    /// Match a `call` of `declaring_type::name`
    #[must_use]
    pub fn call(self, declaring_type: &str, name: &str) -> Self {
        self.with(CallMatcher::new(CallKind::Call, declaring_type, name))
    }

    /// Match a `callvirt` of `declaring_type::name`
    #[must_use]
    pub fn callvirt(self, declaring_type: &str, name: &str) -> Self {
        self.with(CallMatcher::new(CallKind::CallVirt, declaring_type, name))
    }

    /// Match a `call` or `callvirt` of `declaring_type::name`
    #[must_use]
    pub fn any_call(self, declaring_type: &str, name: &str) -> Self {
        self.with(CallMatcher::new(CallKind::Any, declaring_type, name))
    }

    /// Match a load of local `index`, or of any local if `None`
    #[must_use]
    pub fn load_local(self, index: Option<u16>) -> Self {
        self.with(LocalMatcher::load(index))
    }

    /// Match a store to local `index`, or to any local if `None`
    #[must_use]
    pub fn store_local(self, index: Option<u16>) -> Self {
        self.with(LocalMatcher::store(index))
    }

    /// Match a load of argument `index`
    #[must_use]
    pub fn load_arg(self, index: u16) -> Self {
        self.with(ArgumentMatcher::load(index))
    }

    /// Match a branch with one of `opcodes` and capture its target as `name`
    #[must_use]
    pub fn branch_capture(self, opcodes: &[OpCode], name: &str) -> Self {
        self.with_capture(OpCodeMatcher::any_of(opcodes), name)
    }

    /// Match with a closure
    #[must_use]
    pub fn matching<F>(self, description: &str, predicate: F) -> Self
    where
        F: Fn(&MatchContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.with(PredicateMatcher::new(description, predicate))
    }

    /// Descriptions of the individual matchers joined for diagnostics
    #[must_use]
    pub fn description(&self) -> String {
        let parts: Vec<String> = self
            .steps
            .iter()
            .map(|step| match &step.capture {
                Some(name) => format!("{} => {}", step.matcher.description(), name),
                None => step.matcher.description(),
            })
            .collect();
        format!("[{}]", parts.join(", "))
    }

    /// Try to match at exactly `start`, returning the captures on success
    fn match_at<R: MemberResolver + ?Sized>(
        &self,
        seq: &InstructionSequence,
        start: usize,
        resolver: &R,
    ) -> Option<Vec<(String, Label)>> {
        let mut captures = Vec::new();
        for (offset, step) in self.steps.iter().enumerate() {
            let index = start + offset;
            let instruction = seq.get(index)?;
            let member = instruction.token().and_then(|token| resolver.resolve(token));
            let context = MatchContext {
                instruction,
                member: member.as_ref(),
                index,
            };
            if !step.matcher.matches(&context) {
                return None;
            }

            if let Some(name) = &step.capture {
                let target = instruction.targets().first().copied()?;
                captures.push((name.clone(), target));
            }
        }
        Some(captures)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.description())
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pattern")
            .field("name", &self.name)
            .field("steps", &self.description())
            .finish()
    }
}

/// A successful match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    /// Index of the first matched instruction
    pub start: usize,
    /// Index one past the last matched instruction
    pub end: usize,
    /// Branch targets captured by the pattern, by name
    pub captures: Vec<(String, Label)>,
}

impl MatchResult {
    /// The label captured under `name`, if any
    #[must_use]
    pub fn capture(&self, name: &str) -> Option<Label> {
        self.captures
            .iter()
            .find(|(captured, _)| captured == name)
            .map(|(_, label)| *label)
    }
}

/// Find the first run of `seq` matching `pattern`, scanning from `from`.
///
/// Forward searches try start positions `from, from + 1, ...`. Backward searches try
/// `from - 1, from - 2, ..., 0`; the position `from` itself is only tried by
/// [`Direction::BackwardInclusive`].
///
/// # Errors
/// - [`Error::InvalidPattern`] if the pattern is empty
/// - [`Error::CursorOutOfRange`] if `from` is past the end of the sequence
/// - [`Error::PatternNotFound`] if no run matches
pub fn find<R: MemberResolver + ?Sized>(
    seq: &InstructionSequence,
    from: usize,
    direction: Direction,
    pattern: &Pattern,
    resolver: &R,
) -> Result<MatchResult> {
    if pattern.is_empty() {
        return Err(Error::InvalidPattern(format!("pattern '{}' has no matchers", pattern.name)));
    }
    if from > seq.len() {
        return Err(Error::CursorOutOfRange {
            index: isize::try_from(from).unwrap_or(isize::MAX),
            len: seq.len(),
        });
    }

    let last_start = seq.len().checked_sub(pattern.len());
    let found = match (direction, last_start) {
        (_, None) => None,
        (Direction::Forward, Some(last)) => (from..=last)
            .find_map(|start| pattern.match_at(seq, start, resolver).map(|c| (start, c))),
        (Direction::Backward | Direction::BackwardInclusive, Some(last)) => {
            let end = if direction == Direction::BackwardInclusive { from + 1 } else { from };
            (0..end.min(last + 1))
                .rev()
                .find_map(|start| pattern.match_at(seq, start, resolver).map(|c| (start, c)))
        }
    };

    match found {
        Some((start, captures)) => Ok(MatchResult {
            start,
            end: start + pattern.len(),
            captures,
        }),
        None => Err(Error::PatternNotFound {
            step: pattern.name.clone(),
            pattern: pattern.description(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assembly::Operand,
        host::Image,
        metadata::member::{FieldDesc, MethodSignature},
    };

    /// `ldarg.0; ldfld x; sub; stfld x; ldarg.0; ldfld x; bne.un ret; nop; ret`
    fn sample() -> (Image, InstructionSequence) {
        let image = Image::new();
        let x = image.add_field(FieldDesc::instance("Player", "x"));

        let mut seq = InstructionSequence::new(MethodSignature::instance(0, false, 0));
        seq.push(OpCode::Ldarg0, Operand::None);
        seq.push(OpCode::Ldfld, Operand::Token(x));
        seq.push(OpCode::Sub, Operand::None);
        seq.push(OpCode::Stfld, Operand::Token(x));
        seq.push(OpCode::Ldarg0, Operand::None);
        seq.push(OpCode::Ldfld, Operand::Token(x));
        let branch = seq.push(OpCode::BneUn, Operand::Target(Label(0)));
        seq.push(OpCode::Nop, Operand::None);
        let ret = seq.push(OpCode::Ret, Operand::None);
        let index = seq.position(branch).unwrap();
        seq.retarget(Label(0), ret);
        assert_eq!(seq.get(index).unwrap().targets(), vec![ret]);
        (image, seq)
    }

    #[test]
    fn test_forward_match_reports_end() {
        let (image, seq) = sample();
        let pattern = Pattern::new("decrement").opcode(OpCode::Sub).store_field("Player", "x");

        let result = find(&seq, 0, Direction::Forward, &pattern, &image).unwrap();
        assert_eq!(result.start, 2);
        assert_eq!(result.end, 4);
        assert!(result.captures.is_empty());
    }

    #[test]
    fn test_forward_search_starts_at_from() {
        let (image, seq) = sample();
        let pattern = Pattern::new("load x").load_arg(0).load_field("Player", "x");

        assert_eq!(find(&seq, 0, Direction::Forward, &pattern, &image).unwrap().start, 0);
        assert_eq!(find(&seq, 1, Direction::Forward, &pattern, &image).unwrap().start, 4);
        assert!(matches!(
            find(&seq, 5, Direction::Forward, &pattern, &image),
            Err(Error::PatternNotFound { .. })
        ));
    }

    #[test]
    fn test_backward_search_excludes_from() {
        let (image, seq) = sample();
        let pattern = Pattern::new("load x").load_arg(0).load_field("Player", "x");

        assert_eq!(find(&seq, 9, Direction::Backward, &pattern, &image).unwrap().start, 4);
        assert_eq!(find(&seq, 4, Direction::Backward, &pattern, &image).unwrap().start, 0);
        assert!(find(&seq, 0, Direction::Backward, &pattern, &image).is_err());
    }

    #[test]
    fn test_inclusive_backward_search_tries_from() {
        let (image, seq) = sample();
        let pattern = Pattern::new("load x").load_arg(0).load_field("Player", "x");

        assert_eq!(find(&seq, 4, Direction::BackwardInclusive, &pattern, &image).unwrap().start, 4);
        assert_eq!(find(&seq, 3, Direction::BackwardInclusive, &pattern, &image).unwrap().start, 0);
        assert_eq!(find(&seq, 0, Direction::BackwardInclusive, &pattern, &image).unwrap().start, 0);
        // A start too close to the end for the whole pattern is clamped
        assert_eq!(find(&seq, 9, Direction::BackwardInclusive, &pattern, &image).unwrap().start, 4);
    }

    #[test]
    fn test_captures_branch_target() {
        let (image, seq) = sample();
        let pattern = Pattern::new("compare")
            .load_field("Player", "x")
            .branch_capture(&[OpCode::BneUn, OpCode::BneUnS], "skip");

        let result = find(&seq, 0, Direction::Forward, &pattern, &image).unwrap();
        assert_eq!(result.start, 5);
        assert_eq!(result.capture("skip"), Some(seq.get(8).unwrap().label));
        assert_eq!(pattern.captures(), vec!["skip"]);
    }

    #[test]
    fn test_reordered_anchors_do_not_match() {
        let (image, seq) = sample();
        let pattern = Pattern::new("reordered").store_field("Player", "x").opcode(OpCode::Sub);

        let err = find(&seq, 0, Direction::Forward, &pattern, &image).unwrap_err();
        assert!(matches!(
            err,
            Error::PatternNotFound { step, pattern } if step == "reordered" && pattern == "[stfld Player::x, sub]"
        ));
    }

    #[test]
    fn test_invalid_inputs() {
        let (image, seq) = sample();
        assert!(matches!(
            find(&seq, 0, Direction::Forward, &Pattern::new("empty"), &image),
            Err(Error::InvalidPattern(_))
        ));

        let pattern = Pattern::new("nop").opcode(OpCode::Nop);
        assert!(matches!(
            find(&seq, 10, Direction::Forward, &pattern, &image),
            Err(Error::CursorOutOfRange { index: 10, len: 9 })
        ));
    }

    #[test]
    fn test_pattern_longer_than_sequence() {
        let image = Image::new();
        let mut seq = InstructionSequence::new(MethodSignature::default());
        seq.push(OpCode::Ret, Operand::None);
        let pattern = Pattern::new("two").opcode(OpCode::Nop).opcode(OpCode::Ret);
        assert!(matches!(
            find(&seq, 0, Direction::Forward, &pattern, &image),
            Err(Error::PatternNotFound { .. })
        ));
    }
}
