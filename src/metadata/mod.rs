//! Metadata needed to interpret and rewrite a method body.
//!
//! Tokens, the members they resolve to, method body headers and exception clauses.
//! Everything else about the owning assembly stays with the host.

/// Method body headers and extra data sections
pub mod body;
/// Exception handling clauses
pub mod exceptions;
/// Field and method descriptors resolved from tokens
pub mod member;
/// Commonly used metadata token type
pub mod token;
