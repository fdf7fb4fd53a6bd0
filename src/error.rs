use thiserror::Error;

use crate::host::MethodRef;

macro_rules! decode_error {
    ($msg:expr) => {
        crate::Error::Decode($msg.to_string())
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Decode(format!($fmt, $($arg)*))
    };
}

macro_rules! encode_error {
    ($msg:expr) => {
        crate::Error::Encode($msg.to_string())
    };

    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Encode(format!($fmt, $($arg)*))
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// # Error Categories
///
/// ## Patch failures
/// These four abort a patch session before anything is committed:
/// - [`Error::Decode`] - the method body is not in a supported shape
/// - [`Error::PatternNotFound`] - an anchor pattern is absent or reordered
/// - [`Error::UnresolvedLabel`] - a label jump was scheduled before any match captured it
/// - [`Error::Encode`] - the edited sequence fails validation
///
/// ## Host and lifecycle errors
/// - [`Error::MethodNotFound`] - the host does not know the method
/// - [`Error::UnknownName`], [`Error::TypeMismatch`] - flag or accessor lookups failed
/// - [`Error::Restore`] - the original body could not be reinstated
/// - [`Error::Hook`] - entry point lookup or registration failed
/// - [`Error::ModuleLoaded`], [`Error::LoadFailed`] - module lifecycle violations
///
/// # Examples
///
/// ```rust
/// use ilsplice::Error;
///
/// fn report(err: &Error) -> String {
///     match err {
///         Error::PatternNotFound { step, pattern } => format!("{step}: missing {pattern}"),
///         Error::Encode(message) => format!("rejected: {message}"),
///         other => other.to_string(),
///     }
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// An out of bound access was attempted while reading a byte buffer.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// The method body uses an encoding that cannot be decoded.
    ///
    /// Raised for unknown opcodes, truncated bodies, unsupported header formats and
    /// branch targets or exception boundaries that fall between instructions.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The edited instruction sequence failed validation and was not committed.
    ///
    /// Covers dangling branch targets, out-of-range local or argument slots,
    /// operand/opcode mismatches and operand stack violations.
    #[error("Encode error: {0}")]
    Encode(String),

    /// An anchor pattern did not match anywhere in the searched range.
    #[error("Pattern not found in step '{step}': {pattern}")]
    PatternNotFound {
        /// Name of the patch step (or cursor operation) that searched
        step: String,
        /// Description of the pattern that failed to match
        pattern: String,
    },

    /// A jump to a captured label was requested before any match captured it.
    #[error("Unresolved label '{0}'")]
    UnresolvedLabel(String),

    /// A pattern is structurally unusable, e.g. it has no predicates.
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    /// The cursor was moved outside the instruction sequence.
    #[error("Cursor index {index} is outside of the sequence (length {len})")]
    CursorOutOfRange {
        /// Requested index
        index: isize,
        /// Length of the sequence
        len: usize,
    },

    /// The host does not know the requested method.
    #[error("Method not found: {0}")]
    MethodNotFound(MethodRef),

    /// A named value is not registered with a flag store or accessor table.
    #[error("Unknown name: {0}")]
    UnknownName(String),

    /// A named value exists but holds a different type than requested.
    #[error("'{name}' is not a {expected}")]
    TypeMismatch {
        /// Name of the value
        name: String,
        /// The type the caller asked for
        expected: &'static str,
    },

    /// The original body of a method could not be reinstated.
    ///
    /// This leaves the host in an inconsistent state and must be treated as fatal.
    #[error("Failed to restore {method}: {message}")]
    Restore {
        /// The method being restored
        method: MethodRef,
        /// What went wrong
        message: String,
    },

    /// Entry point registration or lookup failed.
    #[error("Hook error: {0}")]
    Hook(String),

    /// `load` was called on a module that is already loaded.
    #[error("Module '{0}' is already loaded")]
    ModuleLoaded(String),

    /// A module failed to load and every partial installation was rolled back.
    #[error("Module '{module}' failed to load: {source}")]
    LoadFailed {
        /// Name of the module
        module: String,
        /// The first failure encountered while loading
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Returns `true` for the failures that abort a patch session before commit.
    #[must_use]
    pub fn is_patch_failure(&self) -> bool {
        matches!(
            self,
            Error::Decode(_)
                | Error::Encode(_)
                | Error::PatternNotFound { .. }
                | Error::UnresolvedLabel(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macros_build_expected_variants() {
        assert!(matches!(decode_error!("x"), Error::Decode(m) if m == "x"));
        assert!(matches!(encode_error!("y {}", 1), Error::Encode(m) if m == "y 1"));
    }

    #[test]
    fn test_patch_failure_classification() {
        assert!(Error::UnresolvedLabel("camera".into()).is_patch_failure());
        assert!(Error::PatternNotFound {
            step: "s".into(),
            pattern: "p".into()
        }
        .is_patch_failure());
        assert!(!Error::Hook("x".into()).is_patch_failure());
        assert!(!Error::OutOfBounds.is_patch_failure());
    }

    #[test]
    fn test_load_failed_display_names_step() {
        let err = Error::LoadFailed {
            module: "player".into(),
            source: Box::new(Error::PatternNotFound {
                step: "collide-v".into(),
                pattern: "[ldfld Player::onCollideV, ldnull]".into(),
            }),
        };
        let text = err.to_string();
        assert!(text.contains("player"));
        assert!(text.contains("collide-v"));
    }
}
