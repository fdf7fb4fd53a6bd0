//! Typed access to host entity state by member name.
//!
//! Injected routines sometimes need to read or reset a private member of the entity
//! they were passed, such as a player's jump grace timer. Instead of reflective
//! lookup, the host registers a getter and setter for each member it is willing to
//! expose, and routines go through a [`StateAccessors`] table.

use std::{collections::HashMap, fmt};

use crate::{Error, Result};

type Getter<E, T> = Box<dyn Fn(&E) -> T + Send + Sync>;
type Setter<E, T> = Box<dyn Fn(&mut E, T) + Send + Sync>;

struct Accessor<E, T> {
    get: Getter<E, T>,
    set: Setter<E, T>,
}

/// Getters and setters for the members of an entity type `E`.
///
/// # Examples
///
/// ```rust
/// use ilsplice::context::StateAccessors;
///
/// struct Player {
///     jump_grace_timer: f32,
///     dead: bool,
/// }
///
/// # fn main() -> ilsplice::Result<()> {
/// let accessors = StateAccessors::new()
///     .float("jumpGraceTimer", |p: &Player| p.jump_grace_timer, |p, v| p.jump_grace_timer = v)
///     .boolean("Dead", |p: &Player| p.dead, |p, v| p.dead = v);
///
/// let mut player = Player { jump_grace_timer: 0.1, dead: false };
/// accessors.set_float(&mut player, "jumpGraceTimer", 0.0)?;
/// assert_eq!(player.jump_grace_timer, 0.0);
/// assert!(accessors.get_float(&player, "speed").is_err());
/// # Ok(())
/// # }
/// ```
pub struct StateAccessors<E> {
    floats: HashMap<String, Accessor<E, f32>>,
    bools: HashMap<String, Accessor<E, bool>>,
}

impl<E> Default for StateAccessors<E> {
    fn default() -> Self {
        StateAccessors {
            floats: HashMap::new(),
            bools: HashMap::new(),
        }
    }
}

impl<E> StateAccessors<E> {
    /// An empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a float member.
    #[must_use]
    pub fn float(
        mut self,
        name: impl Into<String>,
        get: impl Fn(&E) -> f32 + Send + Sync + 'static,
        set: impl Fn(&mut E, f32) + Send + Sync + 'static,
    ) -> Self {
        self.floats.insert(
            name.into(),
            Accessor {
                get: Box::new(get),
                set: Box::new(set),
            },
        );
        self
    }

    /// Register a boolean member.
    #[must_use]
    pub fn boolean(
        mut self,
        name: impl Into<String>,
        get: impl Fn(&E) -> bool + Send + Sync + 'static,
        set: impl Fn(&mut E, bool) + Send + Sync + 'static,
    ) -> Self {
        self.bools.insert(
            name.into(),
            Accessor {
                get: Box::new(get),
                set: Box::new(set),
            },
        );
        self
    }

    fn float_accessor(&self, name: &str) -> Result<&Accessor<E, f32>> {
        self.floats.get(name).ok_or_else(|| self.missing(name, "float"))
    }

    fn bool_accessor(&self, name: &str) -> Result<&Accessor<E, bool>> {
        self.bools.get(name).ok_or_else(|| self.missing(name, "bool"))
    }

    fn missing(&self, name: &str, expected: &'static str) -> Error {
        if self.floats.contains_key(name) || self.bools.contains_key(name) {
            Error::TypeMismatch {
                name: name.to_string(),
                expected,
            }
        } else {
            Error::UnknownName(name.to_string())
        }
    }

    /// Read a float member.
    ///
    /// # Errors
    /// Returns [`Error::UnknownName`] if no float member `name` is registered, or
    /// [`Error::TypeMismatch`] if `name` is a boolean member.
    pub fn get_float(&self, entity: &E, name: &str) -> Result<f32> {
        Ok((self.float_accessor(name)?.get)(entity))
    }

    /// Write a float member.
    ///
    /// # Errors
    /// See [`StateAccessors::get_float`].
    pub fn set_float(&self, entity: &mut E, name: &str, value: f32) -> Result<()> {
        (self.float_accessor(name)?.set)(entity, value);
        Ok(())
    }

    /// Read a boolean member.
    ///
    /// # Errors
    /// Returns [`Error::UnknownName`] if no boolean member `name` is registered, or
    /// [`Error::TypeMismatch`] if `name` is a float member.
    pub fn get_bool(&self, entity: &E, name: &str) -> Result<bool> {
        Ok((self.bool_accessor(name)?.get)(entity))
    }

    /// Write a boolean member.
    ///
    /// # Errors
    /// See [`StateAccessors::get_bool`].
    pub fn set_bool(&self, entity: &mut E, name: &str, value: bool) -> Result<()> {
        (self.bool_accessor(name)?.set)(entity, value);
        Ok(())
    }

    /// Registered member names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .floats
            .keys()
            .chain(self.bools.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names
    }
}

impl<E> fmt::Debug for StateAccessors<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateAccessors").field("names", &self.names()).finish()
    }
}
