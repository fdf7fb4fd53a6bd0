// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! # ilsplice
//!
//! Load-time patching of compiled CIL methods owned by another component.
//!
//! `ilsplice` decodes a live method body into an editable instruction sequence,
//! finds anchor points in it with structural patterns (opcode plus referenced
//! member), splices calls to external routines at those points and installs the
//! result. Every patch is all-or-nothing and can be reverted to the exact original
//! bytes. Alongside the splicer sits a hook registry that wraps whole entry points
//! with before, after and replacement logic.
//!
//! ## Features
//!
//! - **Complete opcode table** - the ECMA-335 Partition III instruction set, tiny and fat headers, exception sections
//! - **Label-based editing** - branch operands point at instructions, not offsets, so insertions never break them
//! - **Verified commits** - operand stack depth and slot references are checked before anything is written
//! - **Exact restore** - the original body is kept byte for byte and reinstalled on dispose
//! - **Ordered hooks** - before/after/replace hooks compose in install order and dispose independently
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use ilsplice::prelude::*;
//!
//! # fn main() -> ilsplice::Result<()> {
//! let image = Arc::new(Image::new());
//! let timer = image.add_field(FieldDesc::instance("Player", "jumpGraceTimer"));
//! let delta = image.add_method_ref(MethodDesc::of_static("Engine", "get_DeltaTime", 0, true));
//!
//! // this.jumpGraceTimer -= Engine.DeltaTime; return;
//! let update = MethodRef::new("Player", "Update");
//! let signature = MethodSignature::instance(0, false, 0);
//! let body = BodyBuilder::new(signature)
//!     .op(OpCode::Ldarg0)
//!     .op(OpCode::Ldarg0)
//!     .token(OpCode::Ldfld, timer)
//!     .token(OpCode::Call, delta)
//!     .op(OpCode::Sub)
//!     .token(OpCode::Stfld, timer)
//!     .op(OpCode::Ret)
//!     .build(&*image)?;
//! image.define_method(update.clone(), signature, body.clone());
//!
//! let anchor = Pattern::new("coyote timer")
//!     .call("Engine", "get_DeltaTime")
//!     .opcode(OpCode::Sub)
//!     .store_field("Player", "jumpGraceTimer");
//!
//! let handle = PatchSession::open(image.clone(), update.clone())
//!     .step(
//!         "disable coyote jump",
//!         Locate::Next(anchor, MoveType::After),
//!         Action::Call(ExternalRoutine::action("Mod", "CheckForDisableCoyoteJump", 1), vec![SpliceArg::This]),
//!     )
//!     .apply()?;
//!
//! handle.dispose()?;
//! assert_eq!(image.read_body(&update)?, body);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`assembly`] - decoding, editing, verifying and encoding method bodies
//! - [`patch`] - patterns, the splicing cursor and patch sessions
//! - [`hook`] - entry point wrapping
//! - [`module`] - all-or-nothing load and unload of hooks plus patches
//! - [`host`] - what the engine needs from the owner of the method bodies
//! - [`context`] - flags and typed accessors handed to injected logic
//! - [`metadata`] - tokens, member descriptors and body headers
//! - [`Error`] and [`Result`] - error handling
//!
//! ## Logging
//!
//! The crate logs through the `log` facade: `trace` per matched step and splice,
//! `debug` for view open/commit/restore, `info` for module load/unload and `error`
//! for a failed load. Install any logger (e.g. `env_logger`) to see it.

#[macro_use]
pub(crate) mod error;
pub(crate) mod file;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use ilsplice::prelude::*;
///
/// let pattern = Pattern::new("anchor").opcode(OpCode::Ret);
/// assert_eq!(pattern.len(), 1);
/// ```
pub mod prelude;

/// Decoding, editing and re-encoding of CIL method bodies
pub mod assembly;

/// Session configuration
pub mod config;

/// Flags and state accessors passed to injected logic
pub mod context;

/// Before, after and replacement hooks on named entry points
pub mod hook;

/// The interface to the owner of the method bodies, and an in-memory implementation
pub mod host;

/// Metadata tokens, member descriptors, method body headers
pub mod metadata;

/// Module-level load and unload
pub mod module;

/// Pattern matching, splicing and patch sessions
pub mod patch;

/// `ilsplice` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `ilsplice` Error type
///
/// # Examples
///
/// ```rust
/// use ilsplice::Error;
///
/// let err = Error::UnresolvedLabel("camera".into());
/// assert!(err.is_patch_failure());
/// ```
pub use error::Error;

/// Bounds-checked reader over method body bytes.
///
/// # Example
///
/// ```rust
/// use ilsplice::{assembly::decode_instruction, Parser};
///
/// let code = [0x2A]; // ret
/// let mut parser = Parser::new(&code);
/// let raw = decode_instruction(&mut parser)?;
/// assert_eq!(raw.opcode.mnemonic(), "ret");
/// # Ok::<(), ilsplice::Error>(())
/// ```
pub use file::parser::Parser;
