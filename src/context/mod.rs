//! State that injected logic reads at call time.
//!
//! Both types are built by the host and passed explicitly to the routines spliced
//! calls invoke, so the routines can be exercised in tests without a live host.
//!
//! - [`SessionFlags`]: named boolean and float settings for the current session
//! - [`StateAccessors`]: typed getters and setters for members of a host entity

pub mod accessor;
pub mod flags;

pub use accessor::StateAccessors;
pub use flags::{FlagValue, SessionFlags};
