//! Named lookup of entry points.
//!
//! The host defines each hookable routine once, with its argument and result types.
//! Modules then install hooks by name without holding a reference to the entry point
//! itself. Lookups are typed: asking for an entry point with the wrong `A`/`R` is an
//! error rather than a silent mismatch.

use std::{any::Any, sync::Arc};

use dashmap::{mapref::entry::Entry, DashMap};

use crate::{
    hook::entry::{EntryPoint, Registration},
    Error, Result,
};

/// Registry of entry points by name.
///
/// # Thread Safety
///
/// Backed by a `DashMap`; entry points can be defined and hooked from any thread.
///
/// # Examples
///
/// ```rust
/// use ilsplice::hook::HookRegistry;
///
/// # fn main() -> ilsplice::Result<()> {
/// let registry = HookRegistry::new();
/// let update = registry.define("Player.Update", |dt: &f32| *dt)?;
///
/// let hook = registry.replace::<f32, f32>("Player.Update", |orig, dt| orig(dt) * 0.5)?;
/// assert_eq!(update.invoke(&2.0), 1.0);
///
/// hook.dispose();
/// assert_eq!(update.invoke(&2.0), 2.0);
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct HookRegistry {
    entries: DashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl HookRegistry {
    /// An empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a new entry point around `original`.
    ///
    /// # Errors
    /// Returns [`Error::Hook`] if `name` is already defined.
    pub fn define<A, R>(
        &self,
        name: &str,
        original: impl Fn(&A) -> R + Send + Sync + 'static,
    ) -> Result<Arc<EntryPoint<A, R>>>
    where
        A: 'static,
        R: 'static,
    {
        match self.entries.entry(name.to_string()) {
            Entry::Occupied(_) => Err(Error::Hook(format!("entry point '{name}' is already defined"))),
            Entry::Vacant(slot) => {
                let entry = Arc::new(EntryPoint::new(name, original));
                slot.insert(entry.clone());
                log::debug!("defined entry point {}", name);
                Ok(entry)
            }
        }
    }

    /// Look up an entry point by name and type.
    ///
    /// # Errors
    /// Returns [`Error::Hook`] if `name` is not defined or was defined with different
    /// argument or result types.
    pub fn get<A, R>(&self, name: &str) -> Result<Arc<EntryPoint<A, R>>>
    where
        A: 'static,
        R: 'static,
    {
        let entry = self
            .entries
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::Hook(format!("no entry point named '{name}'")))?;

        entry.downcast::<EntryPoint<A, R>>().map_err(|_| {
            Error::Hook(format!(
                "entry point '{name}' does not take {} and return {}",
                std::any::type_name::<A>(),
                std::any::type_name::<R>()
            ))
        })
    }

    /// Returns true if `name` is defined
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of defined entry points
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is defined
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Install a before hook on the entry point `name`.
    ///
    /// # Errors
    /// See [`HookRegistry::get`].
    pub fn before<A, R>(
        &self,
        name: &str,
        hook: impl Fn(&A) + Send + Sync + 'static,
    ) -> Result<Registration>
    where
        A: 'static,
        R: 'static,
    {
        Ok(self.get::<A, R>(name)?.before(hook))
    }

    /// Install an after hook on the entry point `name`.
    ///
    /// # Errors
    /// See [`HookRegistry::get`].
    pub fn after<A, R>(
        &self,
        name: &str,
        hook: impl Fn(&A, &R) + Send + Sync + 'static,
    ) -> Result<Registration>
    where
        A: 'static,
        R: 'static,
    {
        Ok(self.get::<A, R>(name)?.after(hook))
    }

    /// Install a replacement on the entry point `name`.
    ///
    /// # Errors
    /// See [`HookRegistry::get`].
    pub fn replace<A, R>(
        &self,
        name: &str,
        hook: impl Fn(&dyn Fn(&A) -> R, &A) -> R + Send + Sync + 'static,
    ) -> Result<Registration>
    where
        A: 'static,
        R: 'static,
    {
        Ok(self.get::<A, R>(name)?.replace(hook))
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.entries.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        f.debug_struct("HookRegistry").field("entries", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_twice_fails() {
        let registry = HookRegistry::new();
        registry.define("Player.Update", |_: &()| ()).unwrap();
        assert!(matches!(
            registry.define("Player.Update", |_: &()| ()),
            Err(Error::Hook(_))
        ));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("Player.Update"));
    }

    #[test]
    fn test_typed_lookup() {
        let registry = HookRegistry::new();
        registry.define("Player.Die", |force: &(f32, f32)| force.0 + force.1).unwrap();

        assert!(registry.get::<(f32, f32), f32>("Player.Die").is_ok());
        assert!(matches!(registry.get::<f32, f32>("Player.Die"), Err(Error::Hook(_))));
        assert!(matches!(registry.get::<(), ()>("Player.Jump"), Err(Error::Hook(_))));
    }

    #[test]
    fn test_hooks_by_name_share_the_entry_point() {
        let registry = HookRegistry::new();
        let entry = registry.define("Counter", |value: &i32| *value).unwrap();

        let doubled = registry.replace::<i32, i32>("Counter", |orig, value| orig(value) * 2).unwrap();
        let fetched = registry.get::<i32, i32>("Counter").unwrap();
        assert_eq!(fetched.invoke(&4), 8);
        assert_eq!(entry.len(), 1);

        assert!(doubled.dispose());
        assert_eq!(entry.invoke(&4), 4);
    }
}
