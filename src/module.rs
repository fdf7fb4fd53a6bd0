//! Load and unload of a complete feature set.
//!
//! A [`PatchModule`] bundles the hooks and method patches that together make up one
//! feature. [`PatchModule::load`] installs all of them or none: the first failure
//! rolls back everything installed so far, in reverse order, and is reported once.
//! [`PatchModule::unload`] takes everything out again and leaves the module ready
//! to be loaded a second time.

use std::{fmt, sync::Arc};

use crate::{
    config::SessionConfig,
    hook::{HookRegistry, Registration},
    host::{MethodHost, MethodRef},
    patch::{PatchHandle, PatchSession},
    Error, Result,
};

type HookInstaller = Box<dyn Fn(&HookRegistry) -> Result<Registration> + Send + Sync>;
type SessionPlan = Box<dyn Fn(PatchSession) -> PatchSession + Send + Sync>;

struct PatchPlan {
    method: MethodRef,
    build: SessionPlan,
}

#[derive(Default)]
struct Installed {
    registrations: Vec<Registration>,
    handles: Vec<PatchHandle>,
}

impl Installed {
    /// Take everything out in reverse install order, returning the first failure.
    fn dispose(mut self) -> Result<()> {
        let mut first_error = None;
        while let Some(handle) = self.handles.pop() {
            let method = handle.method().clone();
            if let Err(err) = handle.dispose() {
                log::error!("could not restore {}: {}", method, err);
                first_error.get_or_insert(err);
            }
        }
        while let Some(registration) = self.registrations.pop() {
            registration.dispose();
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// A set of hooks and method patches loaded and unloaded as a unit.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use ilsplice::prelude::*;
///
/// # fn main() -> ilsplice::Result<()> {
/// let image = Arc::new(Image::new());
/// let registry = HookRegistry::new();
/// registry.define("Player.Jump", |_: &()| ())?;
///
/// let mut module = PatchModule::new("jumps")
///     .hook(|registry| registry.after::<(), ()>("Player.Jump", |_, _| {}));
///
/// module.load(image.clone(), &registry)?;
/// assert!(module.is_loaded());
/// assert_eq!(registry.get::<(), ()>("Player.Jump")?.len(), 1);
///
/// module.unload()?;
/// assert_eq!(registry.get::<(), ()>("Player.Jump")?.len(), 0);
/// # Ok(())
/// # }
/// ```
pub struct PatchModule {
    name: String,
    config: SessionConfig,
    hooks: Vec<HookInstaller>,
    patches: Vec<PatchPlan>,
    installed: Option<Installed>,
}

impl PatchModule {
    /// An empty module
    pub fn new(name: impl Into<String>) -> Self {
        PatchModule {
            name: name.into(),
            config: SessionConfig::default(),
            hooks: Vec::new(),
            patches: Vec::new(),
            installed: None,
        }
    }

    /// Configuration passed to every patch session of this module
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a hook. `install` runs on every load and returns the registration that
    /// unload disposes.
    #[must_use]
    pub fn hook(
        mut self,
        install: impl Fn(&HookRegistry) -> Result<Registration> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.push(Box::new(install));
        self
    }

    /// Add a patch of `method`. `build` schedules the steps on a fresh session on
    /// every load.
    #[must_use]
    pub fn patch(
        mut self,
        method: MethodRef,
        build: impl Fn(PatchSession) -> PatchSession + Send + Sync + 'static,
    ) -> Self {
        self.patches.push(PatchPlan {
            method,
            build: Box::new(build),
        });
        self
    }

    /// Module name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true between a successful load and the next unload
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.installed.is_some()
    }

    /// Install every hook, then apply every patch.
    ///
    /// # Errors
    /// Returns [`Error::ModuleLoaded`] if the module is already loaded, and
    /// [`Error::LoadFailed`] wrapping the first failure otherwise. After a failed
    /// load nothing of this module is installed.
    pub fn load(&mut self, host: Arc<dyn MethodHost>, registry: &HookRegistry) -> Result<()> {
        if self.is_loaded() {
            return Err(Error::ModuleLoaded(self.name.clone()));
        }

        let mut installed = Installed::default();
        if let Err(err) = self.install(&host, registry, &mut installed) {
            log::error!("{}: load failed, nothing installed: {}", self.name, err);
            if let Err(rollback) = installed.dispose() {
                log::error!("{}: rollback incomplete: {}", self.name, rollback);
            }
            return Err(Error::LoadFailed {
                module: self.name.clone(),
                source: Box::new(err),
            });
        }

        log::info!(
            "loaded {} ({} hook(s), {} patched method(s))",
            self.name,
            installed.registrations.len(),
            installed.handles.len()
        );
        self.installed = Some(installed);
        Ok(())
    }

    fn install(
        &self,
        host: &Arc<dyn MethodHost>,
        registry: &HookRegistry,
        installed: &mut Installed,
    ) -> Result<()> {
        for install in &self.hooks {
            installed.registrations.push(install(registry)?);
        }
        for plan in &self.patches {
            let session = PatchSession::open(host.clone(), plan.method.clone())
                .with_config(self.config.clone());
            installed.handles.push((plan.build)(session).apply()?);
        }
        Ok(())
    }

    /// Restore every patched method and remove every hook.
    ///
    /// Unloading a module that is not loaded does nothing.
    ///
    /// # Errors
    /// Returns the first [`Error::Restore`] encountered. Every other handle and
    /// registration is still disposed.
    pub fn unload(&mut self) -> Result<()> {
        let Some(installed) = self.installed.take() else {
            return Ok(());
        };
        installed.dispose()?;
        log::info!("unloaded {}", self.name);
        Ok(())
    }
}

impl fmt::Debug for PatchModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchModule")
            .field("name", &self.name)
            .field("hooks", &self.hooks.len())
            .field("patches", &self.patches.len())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
