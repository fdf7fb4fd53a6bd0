//! The boundary between the splicing engine and the process that owns the methods.
//!
//! Everything host specific sits behind two traits. [`MemberResolver`] turns the
//! metadata tokens found in instruction operands into field and method descriptors,
//! which is what pattern predicates and the stack verifier need. [`MethodHost`] reads
//! and installs raw method bodies and makes external routines callable by handing out
//! a token for them.
//!
//! [`image::Image`] implements both entirely in memory.

use std::fmt;

use crate::{
    metadata::{member::Member, member::MethodSignature, token::Token},
    Result,
};

pub mod image;

pub use image::Image;

/// Names a method by declaring type and method name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodRef {
    /// Full name of the declaring type
    pub type_name: String,
    /// Method name
    pub method_name: String,
}

impl MethodRef {
    /// Create a new method reference
    pub fn new(type_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        MethodRef {
            type_name: type_name.into(),
            method_name: method_name.into(),
        }
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.type_name, self.method_name)
    }
}

/// A static routine outside the patched method that injected code calls into.
///
/// The host decides how the call is bound; the engine only needs a token for the
/// `call` operand and the arity for stack accounting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExternalRoutine {
    /// Type that declares the routine
    pub declaring_type: String,
    /// Routine name
    pub name: String,
    /// Number of parameters
    pub params: u16,
    /// True if the routine returns a value
    pub returns: bool,
}

impl ExternalRoutine {
    /// A routine that takes `params` values and returns nothing
    pub fn action(declaring_type: impl Into<String>, name: impl Into<String>, params: u16) -> Self {
        ExternalRoutine {
            declaring_type: declaring_type.into(),
            name: name.into(),
            params,
            returns: false,
        }
    }

    /// A routine that takes `params` values and returns one
    pub fn function(declaring_type: impl Into<String>, name: impl Into<String>, params: u16) -> Self {
        ExternalRoutine {
            returns: true,
            ..ExternalRoutine::action(declaring_type, name, params)
        }
    }

    /// Values popped minus values pushed by a call to this routine
    #[must_use]
    pub fn net_pops(&self) -> i32 {
        i32::from(self.params) - i32::from(self.returns)
    }
}

impl fmt::Display for ExternalRoutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.declaring_type, self.name)
    }
}

/// Resolves metadata tokens to the members they name.
pub trait MemberResolver {
    /// The member `token` refers to, if known
    fn resolve(&self, token: Token) -> Option<Member>;
}

/// Owner of method bodies that can be read, replaced and extended with imports.
///
/// Implementations must be safe to share across threads; a patch session and a
/// module unload may run on different threads than the one that loaded the module.
pub trait MethodHost: MemberResolver + Send + Sync {
    /// The complete current body (header, code, sections) of `method`.
    ///
    /// # Errors
    /// Returns [`crate::Error::MethodNotFound`] if the host does not know `method`.
    fn read_body(&self, method: &MethodRef) -> Result<Vec<u8>>;

    /// Install `body` as the live body of `method`.
    ///
    /// # Errors
    /// Returns [`crate::Error::MethodNotFound`] if the host does not know `method`.
    fn write_body(&self, method: &MethodRef, body: &[u8]) -> Result<()>;

    /// Argument, return and local counts of `method`.
    ///
    /// # Errors
    /// Returns [`crate::Error::MethodNotFound`] if the host does not know `method`.
    fn signature(&self, method: &MethodRef) -> Result<MethodSignature>;

    /// A token that a `call` instruction can use to invoke `routine`.
    ///
    /// Importing the same routine twice yields the same token. Imports happen while
    /// a session runs its steps and are not undone if the session later fails, so a
    /// retried session reuses the entries the failed attempt added.
    ///
    /// # Errors
    /// Implementation defined; the in-memory host never fails.
    fn import_routine(&self, routine: &ExternalRoutine) -> Result<Token>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(MethodRef::new("Celeste.Player", "orig_Update").to_string(), "Celeste.Player::orig_Update");
        let routine = ExternalRoutine::function("Mod", "Clamp", 3);
        assert_eq!(routine.to_string(), "Mod::Clamp");
        assert_eq!(routine.net_pops(), 2);
        assert_eq!(ExternalRoutine::action("Mod", "Tick", 0).net_pops(), 0);
    }
}
