//! Wrapping whole routines with before, after and replacement logic.
//!
//! Splices edit the inside of a method body. Hooks work at the boundary instead:
//! they intercept a call to a named entry point and run extra code around it.
//!
//! # Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | Hook kinds and closure type aliases |
//! | [`entry`] | [`EntryPoint`] and its ordered hook chain, [`Registration`] handles |
//! | [`registry`] | [`HookRegistry`] for lookup by name |
//!
//! # Composition
//!
//! With `A` installed before `B` on the same entry point, a call runs
//! `A.before`, `B.before`, `B.replace(A.replace(original))`, `A.after`, `B.after`.
//! Disposing a [`Registration`] removes that hook and nothing else.

pub mod entry;
pub mod registry;
pub mod types;

pub use entry::{EntryPoint, Registration};
pub use registry::HookRegistry;
pub use types::{AfterFn, BeforeFn, HookKind, OriginalFn, ReplaceFn};
