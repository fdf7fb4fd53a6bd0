//! The mutable, ordered instruction list of one method body.

use std::fmt;

use crate::{
    assembly::{
        instruction::{Instruction, Label, Operand},
        opcodes::OpCode,
    },
    metadata::{exceptions::ExceptionHandlerFlags, member::MethodSignature},
    Error, Result,
};

/// An exception handling clause expressed in labels.
///
/// `*_end` labels name the first instruction after the block, or `None` when the
/// block runs to the end of the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRegion {
    /// Kind of clause
    pub flags: ExceptionHandlerFlags,
    /// First instruction of the protected block
    pub try_start: Label,
    /// First instruction after the protected block
    pub try_end: Option<Label>,
    /// First instruction of the handler
    pub handler_start: Label,
    /// First instruction after the handler
    pub handler_end: Option<Label>,
    /// First instruction of the filter block, for filter clauses
    pub filter_start: Option<Label>,
    /// Class token of a typed catch clause, 0 otherwise
    pub class_token: u32,
}

impl ExceptionRegion {
    /// Every label this region refers to
    #[must_use]
    pub fn labels(&self) -> Vec<Label> {
        let mut labels = vec![self.try_start, self.handler_start];
        labels.extend(self.try_end);
        labels.extend(self.handler_end);
        labels.extend(self.filter_start);
        labels
    }
}

/// Ordered instructions of one method body, plus its exception regions.
///
/// The sequence owns its instructions exclusively. Positions are plain indices and
/// shift on insertion; [`Label`]s do not.
#[derive(Debug, Clone, PartialEq)]
pub struct InstructionSequence {
    instructions: Vec<Instruction>,
    regions: Vec<ExceptionRegion>,
    signature: MethodSignature,
    next_label: u32,
}

impl InstructionSequence {
    /// An empty sequence for a method with the given signature
    #[must_use]
    pub fn new(signature: MethodSignature) -> Self {
        InstructionSequence {
            instructions: Vec::new(),
            regions: Vec::new(),
            signature,
            next_label: 0,
        }
    }

    pub(crate) fn from_parts(
        instructions: Vec<Instruction>,
        regions: Vec<ExceptionRegion>,
        signature: MethodSignature,
    ) -> Self {
        let next_label = instructions
            .iter()
            .map(|ins| ins.label.0 + 1)
            .max()
            .unwrap_or(0);

        InstructionSequence {
            instructions,
            regions,
            signature,
            next_label,
        }
    }

    /// Number of instructions
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Returns true if the sequence has no instructions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// The instruction at `index`
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    /// All instructions in order
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Iterate over the instructions in order
    pub fn iter(&self) -> std::slice::Iter<'_, Instruction> {
        self.instructions.iter()
    }

    /// The opcodes in order, mostly useful for assertions
    #[must_use]
    pub fn opcodes(&self) -> Vec<OpCode> {
        self.instructions.iter().map(|ins| ins.opcode).collect()
    }

    /// Exception regions of the body
    #[must_use]
    pub fn regions(&self) -> &[ExceptionRegion] {
        &self.regions
    }

    /// Signature of the owning method
    #[must_use]
    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    /// Current index of the instruction carrying `label`
    #[must_use]
    pub fn position(&self, label: Label) -> Option<usize> {
        self.instructions.iter().position(|ins| ins.label == label)
    }

    /// Append an instruction and return its label
    pub fn push(&mut self, opcode: OpCode, operand: Operand) -> Label {
        let label = self.allocate_label();
        self.instructions.push(Instruction {
            label,
            opcode,
            operand,
            offset: None,
        });
        label
    }

    /// Insert an instruction before `index` (or at the end when `index == len`).
    ///
    /// # Errors
    /// Returns [`Error::CursorOutOfRange`] if `index > len`.
    pub fn insert(&mut self, index: usize, opcode: OpCode, operand: Operand) -> Result<Label> {
        if index > self.instructions.len() {
            return Err(Error::CursorOutOfRange {
                index: isize::try_from(index).unwrap_or(isize::MAX),
                len: self.instructions.len(),
            });
        }

        let label = self.allocate_label();
        self.instructions.insert(
            index,
            Instruction {
                label,
                opcode,
                operand,
                offset: None,
            },
        );
        Ok(label)
    }

    /// Point every branch and switch entry targeting `from` at `to` instead.
    ///
    /// Exception regions are left alone. Returns the number of rewritten targets.
    pub fn retarget(&mut self, from: Label, to: Label) -> usize {
        let mut count = 0;
        for ins in &mut self.instructions {
            match &mut ins.operand {
                Operand::Target(label) if *label == from => {
                    *label = to;
                    count += 1;
                }
                Operand::Switch(labels) => {
                    for label in labels.iter_mut().filter(|label| **label == from) {
                        *label = to;
                        count += 1;
                    }
                }
                _ => {}
            }
        }
        count
    }

    pub(crate) fn add_region(&mut self, region: ExceptionRegion) {
        self.regions.push(region);
    }

    fn allocate_label(&mut self) -> Label {
        let label = Label(self.next_label);
        self.next_label += 1;
        label
    }
}

impl<'a> IntoIterator for &'a InstructionSequence {
    type Item = &'a Instruction;
    type IntoIter = std::slice::Iter<'a, Instruction>;

    fn into_iter(self) -> Self::IntoIter {
        self.instructions.iter()
    }
}

impl fmt::Display for InstructionSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, ins) in self.instructions.iter().enumerate() {
            writeln!(f, "{index:>4} {} {ins}", ins.label)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> InstructionSequence {
        let mut seq = InstructionSequence::new(MethodSignature::instance(0, false, 0));
        seq.push(OpCode::Ldarg0, Operand::None);
        seq.push(OpCode::Pop, Operand::None);
        seq.push(OpCode::Ret, Operand::None);
        seq
    }

    #[test]
    fn test_labels_survive_insertion() {
        let mut seq = sample();
        let ret = seq.get(2).unwrap().label;

        let inserted = seq.insert(0, OpCode::Nop, Operand::None).unwrap();
        assert_eq!(seq.position(ret), Some(3));
        assert_eq!(seq.position(inserted), Some(0));
        assert_ne!(inserted, ret);
        assert_eq!(
            seq.opcodes(),
            vec![OpCode::Nop, OpCode::Ldarg0, OpCode::Pop, OpCode::Ret]
        );
    }

    #[test]
    fn test_insert_past_end_fails() {
        let mut seq = sample();
        assert!(seq.insert(3, OpCode::Nop, Operand::None).is_ok());
        assert!(matches!(
            seq.insert(9, OpCode::Nop, Operand::None),
            Err(Error::CursorOutOfRange { index: 9, len: 4 })
        ));
    }

    #[test]
    fn test_retarget_branches_and_switches() {
        let mut seq = sample();
        let pop = seq.get(1).unwrap().label;
        let ret = seq.get(2).unwrap().label;
        seq.insert(0, OpCode::BrS, Operand::Target(pop)).unwrap();
        seq.insert(0, OpCode::Switch, Operand::Switch(vec![pop, ret, pop]))
            .unwrap();

        assert_eq!(seq.retarget(pop, ret), 3);
        assert_eq!(seq.get(1).unwrap().operand, Operand::Target(ret));
        assert_eq!(
            seq.get(0).unwrap().operand,
            Operand::Switch(vec![ret, ret, ret])
        );
    }

    #[test]
    fn test_from_parts_continues_label_numbering() {
        let seq = sample();
        let mut copy = InstructionSequence::from_parts(
            seq.instructions().to_vec(),
            Vec::new(),
            *seq.signature(),
        );
        let label = copy.push(OpCode::Nop, Operand::None);
        assert_eq!(label, Label(3));
    }
}
