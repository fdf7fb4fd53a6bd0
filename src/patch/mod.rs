//! Locating anchor instructions and splicing calls into a method body.
//!
//! # Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`matcher`] | Per-instruction predicates ([`InstructionMatcher`]) |
//! | [`pattern`] | Ordered predicate lists and [`find`] |
//! | [`cursor`] | The [`Cursor`] and its splice operations |
//! | [`session`] | All-or-nothing [`PatchSession`]s and their [`PatchHandle`]s |
//!
//! # Flow
//!
//! ```text
//! PatchSession::apply
//!         │
//!         ▼
//! ┌───────────────────┐
//! │ MethodView::open  │  read + decode once
//! └───────────────────┘
//!         │
//!         ▼
//! ┌───────────────────┐      ┌────────────────┐
//! │ for each step     │─────►│ Cursor::goto_* │──► PatternNotFound ──► abort
//! │                   │      │ Cursor::insert │
//! └───────────────────┘      └────────────────┘
//!         │
//!         ▼
//! ┌───────────────────┐
//! │ MethodView::commit│  verify + encode + write once
//! └───────────────────┘
//!         │
//!         ▼
//!    PatchHandle ──► dispose() ──► original bytes back
//! ```
//!
//! Matches are purely sequential over decoded order. A pattern never follows a
//! branch; reaching code elsewhere in the method is done with a captured label or
//! an explicit cursor move.

pub mod cursor;
pub mod matcher;
pub mod pattern;
pub mod session;

pub use cursor::{Cursor, MoveType, SpliceArg};
pub use matcher::{
    ArgumentMatcher, CallKind, CallMatcher, FieldAccess, FieldMatcher, InstructionMatcher,
    InstructionPredicate, LdcI4Matcher, LocalMatcher, MatchContext, OpCodeMatcher, PredicateMatcher,
};
pub use pattern::{find, Direction, MatchResult, Pattern};
pub use session::{Action, Locate, PatchHandle, PatchSession, PatchStep};
