//! # ilsplice Prelude
//!
//! The types needed to describe and apply a patch, build test bodies and install
//! hooks, for glob import.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all ilsplice operations
pub use crate::Error;

/// The result type used throughout ilsplice
pub use crate::Result;

/// Session configuration
pub use crate::config::SessionConfig;

// ================================================================================================
// Host Interface
// ================================================================================================

/// Host traits, method addressing and the in-memory host
pub use crate::host::{ExternalRoutine, Image, MemberResolver, MethodHost, MethodRef};

/// Metadata token type for referencing table entries
pub use crate::metadata::token::Token;

/// Member descriptors and method signatures
pub use crate::metadata::member::{FieldDesc, Member, MethodDesc, MethodSignature};

// ================================================================================================
// Instruction Stream
// ================================================================================================

/// Instructions, sequences and the body builder
pub use crate::assembly::{
    BodyBuilder, Instruction, InstructionSequence, Label, MethodView, OpCode, Operand,
};

// ================================================================================================
// Patching
// ================================================================================================

/// Patterns, cursor and sessions
pub use crate::patch::{
    Action, Cursor, Direction, Locate, MatchResult, MoveType, PatchHandle, PatchSession, Pattern,
    SpliceArg,
};

/// Module lifecycle
pub use crate::module::PatchModule;

// ================================================================================================
// Hooks and Context
// ================================================================================================

/// Entry point wrapping
pub use crate::hook::{EntryPoint, HookKind, HookRegistry, Registration};

/// State handed to injected logic
pub use crate::context::{FlagValue, SessionFlags, StateAccessors};
