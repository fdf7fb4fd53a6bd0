//! The instruction stream view: decoding, editing and re-encoding CIL method bodies.
//!
//! A method body is decoded once into an [`InstructionSequence`] whose branch operands
//! are [`Label`]s rather than byte offsets. The sequence can then be edited freely;
//! [`encode_body`] lays it out again, widens short branches where needed, verifies
//! the operand stack and rebuilds the header and exception sections.
//!
//! # Key Types
//! - [`OpCode`] - The ECMA-335 opcode set with operand kinds and stack effects
//! - [`Instruction`] / [`Operand`] - A decoded instruction
//! - [`InstructionSequence`] - The editable instruction list of one body
//! - [`MethodView`] - A sequence bound to a live method of a host
//! - [`BodyBuilder`] - Assembles bodies from opcodes and named labels
//!
//! # Main Functions
//! - [`decode_body`] / [`decode_code`] - Bytes to sequence
//! - [`encode_body`] / [`encode_code`] - Sequence to bytes
//! - [`assemble`] - Sequence to code bytes without the stack check, for fragments
//! - [`verify`] - Operand stack check
//!
//! # Example
//! ```rust
//! use ilsplice::assembly::{decode_code, encode_code, OpCode, Operand};
//! use ilsplice::config::SessionConfig;
//! use ilsplice::host::Image;
//! use ilsplice::metadata::member::MethodSignature;
//!
//! let mut seq = decode_code(&[0x02, 0x26, 0x2A], &[], MethodSignature::instance(0, false, 0))?;
//! seq.insert(2, OpCode::Nop, Operand::None)?;
//!
//! let encoded = encode_code(&seq, &Image::new(), &SessionConfig::default())?;
//! assert_eq!(encoded.code, vec![0x02, 0x26, 0x00, 0x2A]);
//! # Ok::<(), ilsplice::Error>(())
//! ```

pub(crate) mod builder;
pub(crate) mod decoder;
pub(crate) mod encoder;
pub(crate) mod instruction;
pub(crate) mod opcodes;
pub(crate) mod sequence;
pub(crate) mod stack;
pub(crate) mod view;

pub use builder::BodyBuilder;
pub use decoder::{decode_body, decode_code, decode_instruction, decode_stream, RawInstruction, RawOperand};
pub use encoder::{assemble, encode_body, encode_code, validate, EncodedCode};
pub use instruction::{Instruction, Label, Operand};
pub use opcodes::{FlowType, OpCode, OpCodeInfo, OperandType, StackEffect, FE_PREFIX};
pub use sequence::{ExceptionRegion, InstructionSequence};
pub use stack::{stack_effect, verify};
pub use view::{restore, MethodView};
