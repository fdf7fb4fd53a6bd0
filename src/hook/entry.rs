//! A single hookable entry point.
//!
//! [`EntryPoint`] owns the original implementation and an ordered chain of hooks.
//! The chain is a lock-free skip list keyed by a monotonically increasing install
//! sequence, so iteration order is install order and removing one registration never
//! disturbs the relative order of the others.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use crossbeam_skiplist::SkipMap;

use crate::hook::types::{AfterFn, BeforeFn, HookKind, OriginalFn, ReplaceFn};

enum HookFn<A, R> {
    Before(BeforeFn<A>),
    After(AfterFn<A, R>),
    Replace(ReplaceFn<A, R>),
}

impl<A, R> Clone for HookFn<A, R> {
    fn clone(&self) -> Self {
        match self {
            HookFn::Before(f) => HookFn::Before(f.clone()),
            HookFn::After(f) => HookFn::After(f.clone()),
            HookFn::Replace(f) => HookFn::Replace(f.clone()),
        }
    }
}

struct Chain<A, R> {
    hooks: SkipMap<u64, HookFn<A, R>>,
}

trait Detach: Send + Sync {
    fn detach(&self, id: u64) -> bool;
}

impl<A: 'static, R: 'static> Detach for Chain<A, R> {
    fn detach(&self, id: u64) -> bool {
        self.hooks.remove(&id).is_some()
    }
}

/// Ownership of one installed hook.
///
/// Dropping a registration leaves the hook installed; [`Registration::dispose`]
/// removes it.
pub struct Registration {
    entry: String,
    kind: HookKind,
    id: u64,
    chain: Weak<dyn Detach>,
}

impl Registration {
    /// Name of the entry point the hook is installed on
    #[must_use]
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// The kind of hook
    #[must_use]
    pub fn kind(&self) -> HookKind {
        self.kind
    }

    /// Remove the hook. Returns `false` if it was already gone, e.g. because the
    /// entry point itself was dropped.
    pub fn dispose(self) -> bool {
        let removed = self.chain.upgrade().is_some_and(|chain| chain.detach(self.id));
        if removed {
            log::debug!("removed {} hook #{} from {}", self.kind, self.id, self.entry);
        } else {
            log::trace!("{} hook #{} on {} was already gone", self.kind, self.id, self.entry);
        }
        removed
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("entry", &self.entry)
            .field("kind", &self.kind)
            .field("id", &self.id)
            .finish()
    }
}

/// A named routine that hooks can run before, after or instead of.
///
/// # Invocation Order
///
/// ```text
/// before hooks (install order)
///         │
///         ▼
/// replace[n] ─► replace[n-1] ─► ... ─► replace[0] ─► original
///         │
///         ▼
/// after hooks (install order, with the result)
/// ```
///
/// The chain is snapshotted when [`EntryPoint::invoke`] starts; hooks installed or
/// removed while a call is running take effect from the next call.
///
/// # Examples
///
/// ```rust
/// use std::sync::{Arc, Mutex};
/// use ilsplice::hook::EntryPoint;
///
/// let log = Arc::new(Mutex::new(Vec::new()));
/// let entry = EntryPoint::new("Player.Update", |dt: &f32| *dt * 2.0);
///
/// let seen = log.clone();
/// let before = entry.before(move |dt| seen.lock().unwrap().push(*dt));
/// assert_eq!(entry.invoke(&0.5), 1.0);
/// assert_eq!(*log.lock().unwrap(), vec![0.5]);
///
/// before.dispose();
/// entry.invoke(&0.25);
/// assert_eq!(log.lock().unwrap().len(), 1);
/// ```
pub struct EntryPoint<A, R> {
    name: String,
    original: OriginalFn<A, R>,
    chain: Arc<Chain<A, R>>,
    next_id: AtomicU64,
}

impl<A: 'static, R: 'static> EntryPoint<A, R> {
    /// An entry point with no hooks around `original`
    pub fn new(name: impl Into<String>, original: impl Fn(&A) -> R + Send + Sync + 'static) -> Self {
        EntryPoint {
            name: name.into(),
            original: Arc::new(original),
            chain: Arc::new(Chain { hooks: SkipMap::new() }),
            next_id: AtomicU64::new(0),
        }
    }

    /// Name of the entry point
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of installed hooks
    #[must_use]
    pub fn len(&self) -> usize {
        self.chain.hooks.len()
    }

    /// Returns true if no hooks are installed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chain.hooks.is_empty()
    }

    fn install(&self, kind: HookKind, hook: HookFn<A, R>) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.chain.hooks.insert(id, hook);
        log::debug!("installed {} hook #{} on {}", kind, id, self.name);

        let chain: Arc<dyn Detach> = self.chain.clone();
        Registration {
            entry: self.name.clone(),
            kind,
            id,
            chain: Arc::downgrade(&chain),
        }
    }

    /// Run `hook` before the original.
    pub fn before(&self, hook: impl Fn(&A) + Send + Sync + 'static) -> Registration {
        self.install(HookKind::Before, HookFn::Before(Arc::new(hook)))
    }

    /// Run `hook` after the original, with its result.
    pub fn after(&self, hook: impl Fn(&A, &R) + Send + Sync + 'static) -> Registration {
        self.install(HookKind::After, HookFn::After(Arc::new(hook)))
    }

    /// Wrap the current implementation with `hook`.
    pub fn replace(
        &self,
        hook: impl Fn(&dyn Fn(&A) -> R, &A) -> R + Send + Sync + 'static,
    ) -> Registration {
        self.install(HookKind::Replace, HookFn::Replace(Arc::new(hook)))
    }

    /// Call the entry point through every installed hook.
    pub fn invoke(&self, args: &A) -> R {
        let mut befores = Vec::new();
        let mut afters = Vec::new();
        let mut replaces = Vec::new();
        for entry in self.chain.hooks.iter() {
            match entry.value().clone() {
                HookFn::Before(f) => befores.push(f),
                HookFn::After(f) => afters.push(f),
                HookFn::Replace(f) => replaces.push(f),
            }
        }

        for before in &befores {
            before(args);
        }
        let result = call_through(&self.original, &replaces, args);
        for after in &afters {
            after(args, &result);
        }
        result
    }
}

/// Call the last replacement with a continuation into the rest of the chain.
fn call_through<A, R>(original: &OriginalFn<A, R>, replaces: &[ReplaceFn<A, R>], args: &A) -> R {
    match replaces.split_last() {
        None => original(args),
        Some((outer, inner)) => outer(&|next: &A| call_through(original, inner, next), args),
    }
}

impl<A, R> fmt::Debug for EntryPoint<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryPoint")
            .field("name", &self.name)
            .field("hooks", &self.chain.hooks.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    fn recorder(log: &Log, text: &'static str) -> impl Fn(&i32) + Send + Sync + 'static {
        let log = log.clone();
        move |_| log.lock().unwrap().push(text.to_string())
    }

    fn traced_entry(log: &Log) -> EntryPoint<i32, i32> {
        let log = log.clone();
        EntryPoint::new("Player.Update", move |value: &i32| {
            log.lock().unwrap().push(format!("original({value})"));
            *value + 1
        })
    }

    #[test]
    fn test_before_and_after_run_in_install_order() {
        let log: Log = Arc::default();
        let entry = traced_entry(&log);

        entry.before(recorder(&log, "A before"));
        entry.before(recorder(&log, "B before"));
        let after_log = log.clone();
        entry.after(move |_, result| after_log.lock().unwrap().push(format!("A after {result}")));
        let after_log = log.clone();
        entry.after(move |_, result| after_log.lock().unwrap().push(format!("B after {result}")));

        assert_eq!(entry.invoke(&1), 2);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["A before", "B before", "original(1)", "A after 2", "B after 2"]
        );
    }

    #[test]
    fn test_replacements_nest_latest_outermost() {
        let log: Log = Arc::default();
        let entry = traced_entry(&log);

        let inner_log = log.clone();
        entry.replace(move |orig, value| {
            inner_log.lock().unwrap().push("inner".into());
            orig(&(*value * 10))
        });
        let outer_log = log.clone();
        entry.replace(move |orig, value| {
            outer_log.lock().unwrap().push("outer".into());
            orig(value) * 2
        });

        assert_eq!(entry.invoke(&3), 62);
        assert_eq!(*log.lock().unwrap(), vec!["outer", "inner", "original(30)"]);
    }

    #[test]
    fn test_replacement_can_suppress_original() {
        let log: Log = Arc::default();
        let entry = traced_entry(&log);
        entry.replace(|_, _| -1);
        assert_eq!(entry.invoke(&5), -1);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_dispose_removes_only_its_hook() {
        let log: Log = Arc::default();
        let entry = traced_entry(&log);

        let a = entry.before(recorder(&log, "A"));
        let b = entry.before(recorder(&log, "B"));
        let c = entry.before(recorder(&log, "C"));
        assert_eq!(entry.len(), 3);
        assert_eq!(b.kind(), HookKind::Before);
        assert_eq!(b.entry(), "Player.Update");

        assert!(b.dispose());
        entry.invoke(&0);
        assert_eq!(*log.lock().unwrap(), vec!["A", "C", "original(0)"]);

        assert!(c.dispose());
        assert!(a.dispose());
        assert!(entry.is_empty());
    }

    #[test]
    fn test_dispose_after_entry_dropped() {
        let entry = EntryPoint::new("Gone", |_: &()| ());
        let registration = entry.before(|_| {});
        drop(entry);
        assert!(!registration.dispose());
    }

    #[test]
    fn test_stale_registration_leaves_redefined_entry_alone() {
        let log: Log = Arc::default();
        let stale = {
            let old = traced_entry(&log);
            old.before(recorder(&log, "old"))
        };

        let entry = traced_entry(&log);
        let current = entry.before(recorder(&log, "new"));
        assert!(!stale.dispose());
        assert_eq!(entry.len(), 1);

        entry.invoke(&1);
        assert_eq!(*log.lock().unwrap(), vec!["new", "original(1)"]);
        assert!(current.dispose());
    }
}
