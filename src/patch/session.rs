//! One complete, all-or-nothing patch of a single method.
//!
//! A [`PatchSession`] is a list of named steps. Each step first moves the cursor
//! ([`Locate`]) and then edits at the new position ([`Action`]). [`PatchSession::apply`]
//! decodes the live body once, runs every step against that one sequence, and only
//! when all of them succeed encodes and installs the result. Any failure discards
//! the edited sequence and leaves the live body as it was.
//!
//! The returned [`PatchHandle`] owns the original bytes and puts them back on
//! [`PatchHandle::dispose`].
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use ilsplice::prelude::*;
//!
//! # fn main() -> ilsplice::Result<()> {
//! let image = Arc::new(Image::new());
//! let x = image.add_field(FieldDesc::instance("Player", "x"));
//! let update = MethodRef::new("Player", "Update");
//! let body = BodyBuilder::new(MethodSignature::instance(0, false, 0))
//!     .op(OpCode::Ldarg0)
//!     .op(OpCode::Ldarg0)
//!     .token(OpCode::Ldfld, x)
//!     .ldc_i4(1)
//!     .op(OpCode::Sub)
//!     .token(OpCode::Stfld, x)
//!     .op(OpCode::Ret)
//!     .build(&*image)?;
//! image.define_method(update.clone(), MethodSignature::instance(0, false, 0), body.clone());
//!
//! let handle = PatchSession::open(image.clone(), update.clone())
//!     .step(
//!         "after x update",
//!         Locate::Next(Pattern::new("x -= n").opcode(OpCode::Sub).store_field("Player", "x"), MoveType::After),
//!         Action::Call(ExternalRoutine::action("Mod", "OnMoved", 1), vec![SpliceArg::This]),
//!     )
//!     .apply()?;
//! assert_ne!(image.read_body(&update)?, body);
//!
//! handle.dispose()?;
//! assert_eq!(image.read_body(&update)?, body);
//! # Ok(())
//! # }
//! ```

use std::{fmt, sync::Arc};

use sha1::{Digest, Sha1};

use crate::{
    assembly::{restore, MethodView, OpCode, Operand},
    config::SessionConfig,
    host::{ExternalRoutine, MethodHost, MethodRef},
    patch::{
        cursor::{Cursor, MoveType, SpliceArg},
        pattern::Pattern,
    },
    Error, Result,
};

/// How a step positions the cursor before it edits.
#[derive(Debug, Clone)]
pub enum Locate {
    /// Search forward for a pattern
    Next(Pattern, MoveType),
    /// Search backward for a pattern
    Prev(Pattern, MoveType),
    /// Jump to a label captured by an earlier step
    Label(String),
    /// Move by a raw instruction count
    Advance(isize),
    /// Stay where the previous step left the cursor
    Here,
}

/// What a step inserts at the cursor.
#[derive(Debug, Clone)]
pub enum Action {
    /// Nothing, the step only moves the cursor
    None,
    /// Load the arguments and call an external routine
    Call(ExternalRoutine, Vec<SpliceArg>),
    /// Insert raw instructions in order
    Emit(Vec<(OpCode, Operand)>),
}

/// One named edit of a [`PatchSession`].
#[derive(Debug, Clone)]
pub struct PatchStep {
    /// Name used in diagnostics
    pub name: String,
    /// Cursor movement
    pub locate: Locate,
    /// Edit at the new position
    pub action: Action,
}

impl PatchStep {
    fn run(&self, cursor: &mut Cursor<'_>) -> Result<()> {
        match &self.locate {
            Locate::Next(pattern, move_type) => {
                cursor.goto_next(pattern, *move_type)?;
            }
            Locate::Prev(pattern, move_type) => {
                cursor.goto_prev(pattern, *move_type)?;
            }
            Locate::Label(name) => cursor.goto_label(name)?,
            Locate::Advance(delta) => cursor.advance(*delta)?,
            Locate::Here => {}
        }

        match &self.action {
            Action::None => {}
            Action::Call(routine, args) => cursor.insert_call(routine, args)?,
            Action::Emit(instructions) => {
                for (opcode, operand) in instructions {
                    cursor.emit(*opcode, operand.clone())?;
                }
            }
        }

        log::trace!("step '{}' done, cursor at {}", self.name, cursor.index());
        Ok(())
    }

    /// Attach the step name to failures that carry one.
    fn name_failure(&self, err: Error) -> Error {
        match err {
            Error::PatternNotFound { pattern, .. } => Error::PatternNotFound {
                step: self.name.clone(),
                pattern,
            },
            other => other,
        }
    }
}

/// A scheduled patch of one method.
pub struct PatchSession {
    host: Arc<dyn MethodHost>,
    method: MethodRef,
    config: SessionConfig,
    steps: Vec<PatchStep>,
}

impl PatchSession {
    /// Start scheduling edits of `method` in `host`.
    ///
    /// Nothing is read until [`PatchSession::apply`].
    pub fn open(host: Arc<dyn MethodHost>, method: MethodRef) -> Self {
        PatchSession {
            host,
            method,
            config: SessionConfig::default(),
            steps: Vec::new(),
        }
    }

    /// Replace the default configuration
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Append a step.
    #[must_use]
    pub fn step(mut self, name: impl Into<String>, locate: Locate, action: Action) -> Self {
        self.steps.push(PatchStep {
            name: name.into(),
            locate,
            action,
        });
        self
    }

    /// The method this session edits
    #[must_use]
    pub fn method(&self) -> &MethodRef {
        &self.method
    }

    /// The scheduled steps in order
    #[must_use]
    pub fn steps(&self) -> &[PatchStep] {
        &self.steps
    }

    /// Run every step and install the result.
    ///
    /// # Errors
    /// Returns the first failure: [`Error::Decode`] while opening, the failing step's
    /// [`Error::PatternNotFound`] (carrying the step name), [`Error::UnresolvedLabel`],
    /// [`Error::CursorOutOfRange`], or [`Error::Encode`] while committing. The live
    /// body is not written in any of these cases. Routines imported by steps that ran
    /// before the failure remain in the host's import table.
    pub fn apply(self) -> Result<PatchHandle> {
        let mut view = MethodView::open(&*self.host, &self.method)?;

        {
            let mut cursor = Cursor::new(view.sequence_mut(), &*self.host);
            for step in &self.steps {
                if let Err(err) = step.run(&mut cursor) {
                    log::debug!("{}: step '{}' failed, discarding edits", self.method, step.name);
                    return Err(step.name_failure(err));
                }
            }
        }

        let original = view.original().to_vec();
        let committed = view.commit(&*self.host, &self.config)?;
        log::debug!("{}: applied {} step(s)", self.method, self.steps.len());

        Ok(PatchHandle {
            host: self.host,
            method: self.method,
            original,
            fingerprint: fingerprint(&committed),
            config: self.config,
        })
    }
}

impl fmt::Debug for PatchSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchSession")
            .field("method", &self.method)
            .field("config", &self.config)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

fn fingerprint(bytes: &[u8]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hasher.finalize().to_vec()
}

/// The undo side of an applied [`PatchSession`].
///
/// Dropping a handle leaves the patch installed; call [`PatchHandle::dispose`] to
/// revert it.
pub struct PatchHandle {
    host: Arc<dyn MethodHost>,
    method: MethodRef,
    original: Vec<u8>,
    fingerprint: Vec<u8>,
    config: SessionConfig,
}

impl PatchHandle {
    /// The patched method
    #[must_use]
    pub fn method(&self) -> &MethodRef {
        &self.method
    }

    /// The body as it was before the patch
    #[must_use]
    pub fn original(&self) -> &[u8] {
        &self.original
    }

    /// Returns true if the live body is still the one this patch installed.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.host
            .read_body(&self.method)
            .is_ok_and(|live| fingerprint(&live) == self.fingerprint)
    }

    /// Reinstall the original body.
    ///
    /// If something else replaced the patched body in the meantime, its change is
    /// overwritten as well.
    ///
    /// # Errors
    /// Returns [`Error::Restore`] if the original could not be written, or with
    /// `verify_restore` set, could not be read back unchanged.
    pub fn dispose(self) -> Result<()> {
        if !self.is_current() {
            log::warn!("{} was modified after it was patched, restoring anyway", self.method);
        }
        restore(&*self.host, &self.method, &self.original, self.config.verify_restore)
    }
}

impl fmt::Debug for PatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchHandle")
            .field("method", &self.method)
            .field("original_len", &self.original.len())
            .finish_non_exhaustive()
    }
}
