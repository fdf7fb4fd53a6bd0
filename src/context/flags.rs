//! Named session flags read by injected logic.
//!
//! Spliced calls do not look anything up globally. The host builds one
//! [`SessionFlags`] per game session, hands an `Arc` of it to the routines it
//! registers, and resets it when a new session starts. The set of names is fixed at
//! construction; reads and writes of undeclared names fail.

use std::fmt;

use dashmap::DashMap;

use crate::{Error, Result};

/// A flag value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlagValue {
    /// An on/off switch
    Bool(bool),
    /// A tunable number, e.g. a buffer time in seconds
    Float(f32),
}

impl FlagValue {
    fn kind(self) -> &'static str {
        match self {
            FlagValue::Bool(_) => "bool",
            FlagValue::Float(_) => "float",
        }
    }
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagValue::Bool(value) => write!(f, "{value}"),
            FlagValue::Float(value) => write!(f, "{value}"),
        }
    }
}

/// A fixed set of named flags with defaults.
///
/// # Examples
///
/// ```rust
/// use ilsplice::context::SessionFlags;
///
/// # fn main() -> ilsplice::Result<()> {
/// let flags = SessionFlags::new()
///     .with_bool("TrueNoGrabEnabled", false)
///     .with_float("BufferTime", 0.08);
///
/// flags.set_bool("TrueNoGrabEnabled", true)?;
/// assert!(flags.bool("TrueNoGrabEnabled")?);
///
/// flags.reset();
/// assert!(!flags.bool("TrueNoGrabEnabled")?);
/// assert!(flags.float("Missing").is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct SessionFlags {
    defaults: DashMap<String, FlagValue>,
    values: DashMap<String, FlagValue>,
}

impl SessionFlags {
    /// A store with no flags
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a flag with its default value.
    #[must_use]
    pub fn with(self, name: impl Into<String>, default: FlagValue) -> Self {
        let name = name.into();
        self.defaults.insert(name.clone(), default);
        self.values.insert(name, default);
        self
    }

    /// Declare a boolean flag
    #[must_use]
    pub fn with_bool(self, name: impl Into<String>, default: bool) -> Self {
        self.with(name, FlagValue::Bool(default))
    }

    /// Declare a float flag
    #[must_use]
    pub fn with_float(self, name: impl Into<String>, default: f32) -> Self {
        self.with(name, FlagValue::Float(default))
    }

    /// Returns true if `name` is declared
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.defaults.contains_key(name)
    }

    /// The current value of `name`.
    ///
    /// # Errors
    /// Returns [`Error::UnknownName`] if `name` is not declared.
    pub fn get(&self, name: &str) -> Result<FlagValue> {
        self.values
            .get(name)
            .map(|value| *value)
            .ok_or_else(|| Error::UnknownName(name.to_string()))
    }

    /// The current value of a boolean flag.
    ///
    /// # Errors
    /// Returns [`Error::UnknownName`] for undeclared names and
    /// [`Error::TypeMismatch`] if `name` is a float flag.
    pub fn bool(&self, name: &str) -> Result<bool> {
        match self.get(name)? {
            FlagValue::Bool(value) => Ok(value),
            FlagValue::Float(_) => Err(Error::TypeMismatch {
                name: name.to_string(),
                expected: "bool",
            }),
        }
    }

    /// The current value of a float flag.
    ///
    /// # Errors
    /// Returns [`Error::UnknownName`] for undeclared names and
    /// [`Error::TypeMismatch`] if `name` is a boolean flag.
    pub fn float(&self, name: &str) -> Result<f32> {
        match self.get(name)? {
            FlagValue::Float(value) => Ok(value),
            FlagValue::Bool(_) => Err(Error::TypeMismatch {
                name: name.to_string(),
                expected: "float",
            }),
        }
    }

    /// Overwrite the value of a declared flag.
    ///
    /// # Errors
    /// Returns [`Error::UnknownName`] for undeclared names and
    /// [`Error::TypeMismatch`] if `value` has a different type than the default.
    pub fn set(&self, name: &str, value: FlagValue) -> Result<()> {
        let mut current = self
            .values
            .get_mut(name)
            .ok_or_else(|| Error::UnknownName(name.to_string()))?;
        if current.kind() != value.kind() {
            return Err(Error::TypeMismatch {
                name: name.to_string(),
                expected: current.kind(),
            });
        }
        log::trace!("flag {} = {}", name, value);
        *current = value;
        Ok(())
    }

    /// Set a boolean flag.
    ///
    /// # Errors
    /// See [`SessionFlags::set`].
    pub fn set_bool(&self, name: &str, value: bool) -> Result<()> {
        self.set(name, FlagValue::Bool(value))
    }

    /// Set a float flag.
    ///
    /// # Errors
    /// See [`SessionFlags::set`].
    pub fn set_float(&self, name: &str, value: f32) -> Result<()> {
        self.set(name, FlagValue::Float(value))
    }

    /// Put every flag back to its default.
    pub fn reset(&self) {
        for default in self.defaults.iter() {
            self.values.insert(default.key().clone(), *default.value());
        }
        log::debug!("reset {} session flag(s)", self.defaults.len());
    }
}
