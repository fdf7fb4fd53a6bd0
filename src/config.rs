//! Configuration for patch sessions.
//!
//! Controls how an edited instruction sequence is encoded back into a method body
//! and how strictly a restore is checked.

/// Configuration for a [`crate::patch::PatchSession`].
///
/// The defaults are what a mod loader wants: short branches that no longer reach are
/// silently widened, the declared `max_stack` is never lowered, and every restore is
/// read back and compared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Promote `br.s`-style branches whose displacement no longer fits in a byte to
    /// their long form (default: true). When false such a branch is an encode error.
    pub promote_short_branches: bool,

    /// Keep the original `max_stack` if the recomputed depth is lower (default: true).
    pub preserve_max_stack: bool,

    /// Re-read the body after a restore and compare it with the original bytes
    /// (default: true).
    pub verify_restore: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            promote_short_branches: true,
            preserve_max_stack: true,
            verify_restore: true,
        }
    }
}

impl SessionConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A configuration that never rewrites instructions on its own and always emits
    /// the exact computed `max_stack`.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            promote_short_branches: false,
            preserve_max_stack: false,
            ..Self::default()
        }
    }

    /// Sets whether overflowing short branches are promoted.
    ///
    /// # Arguments
    ///
    /// * `enabled` - `true` to widen, `false` to fail encoding instead.
    ///
    /// # Returns
    ///
    /// The modified configuration (builder pattern).
    #[must_use]
    pub fn with_promote_short_branches(mut self, enabled: bool) -> Self {
        self.promote_short_branches = enabled;
        self
    }

    /// Sets whether the original `max_stack` acts as a lower bound.
    #[must_use]
    pub fn with_preserve_max_stack(mut self, enabled: bool) -> Self {
        self.preserve_max_stack = enabled;
        self
    }

    /// Sets whether restores are read back and verified.
    #[must_use]
    pub fn with_verify_restore(mut self, enabled: bool) -> Self {
        self.verify_restore = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert!(config.promote_short_branches);
        assert!(config.preserve_max_stack);
        assert!(config.verify_restore);
        assert_eq!(config, SessionConfig::new());
    }

    #[test]
    fn test_builders() {
        let config = SessionConfig::new()
            .with_promote_short_branches(false)
            .with_verify_restore(false);
        assert!(!config.promote_short_branches);
        assert!(config.preserve_max_stack);
        assert!(!config.verify_restore);

        let strict = SessionConfig::strict();
        assert!(!strict.promote_short_branches);
        assert!(!strict.preserve_max_stack);
        assert!(strict.verify_restore);
    }
}
