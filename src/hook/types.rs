//! Core types for the hook registry.
//!
//! - [`HookKind`]: which of the three wrapping modes a registration uses
//! - [`OriginalFn`]: the wrapped implementation of an entry point
//! - [`BeforeFn`], [`AfterFn`], [`ReplaceFn`]: type aliases for hook closures
//!
//! An entry point is generic over its argument type `A` and result type `R`. Hooks
//! with several arguments take a tuple or a small struct as `A`.

use std::sync::Arc;

use strum::{Display, EnumIter};

/// How a hook relates to the original implementation.
///
/// | Kind | Sees | May change control flow |
/// |------|------|-------------------------|
/// | [`Before`](Self::Before) | arguments | no |
/// | [`After`](Self::After) | arguments and result | no |
/// | [`Replace`](Self::Replace) | arguments and the original | yes |
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum HookKind {
    /// Runs before the original, in install order.
    Before,
    /// Runs after the original, in install order.
    After,
    /// Wraps the original. The most recently installed replacement is outermost.
    Replace,
}

/// The implementation an entry point wraps.
pub type OriginalFn<A, R> = Arc<dyn Fn(&A) -> R + Send + Sync>;

/// A hook that runs before the original.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use ilsplice::hook::BeforeFn;
///
/// let trace: BeforeFn<f32> = Arc::new(|dt| println!("update({dt})"));
/// ```
pub type BeforeFn<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// A hook that runs after the original and sees its result.
pub type AfterFn<A, R> = Arc<dyn Fn(&A, &R) + Send + Sync>;

/// A hook that replaces the original.
///
/// The first argument calls the next implementation in the chain (the original, or
/// an earlier replacement). The hook decides whether to call it, when, and with
/// which arguments.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use ilsplice::hook::ReplaceFn;
///
/// // Halve the argument, skip the original for negative input
/// let clamp: ReplaceFn<i32, i32> = Arc::new(|orig, value| {
///     if *value < 0 { 0 } else { orig(&(*value / 2)) }
/// });
/// ```
pub type ReplaceFn<A, R> = Arc<dyn Fn(&dyn Fn(&A) -> R, &A) -> R + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_kinds_display_lowercase() {
        let names: Vec<String> = HookKind::iter().map(|kind| kind.to_string()).collect();
        assert_eq!(names, vec!["before", "after", "replace"]);
    }
}
