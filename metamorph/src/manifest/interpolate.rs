//! `${NAME}` placeholder expansion for raw manifest text.

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
});

/// Expands `${NAME}` placeholders.
///
/// Lookup order is the override table, then the process environment.
/// Names found in neither expand to the empty string.
#[derive(Debug, Clone, Default)]
pub struct Interpolator {
    overrides: HashMap<String, String>,
}

impl Interpolator {
    /// Creates an interpolator with no overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an override that wins over the environment.
    #[must_use]
    pub fn with_override(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(name.into(), value.into());
        self
    }

    /// Resolves a single name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> String {
        self.overrides
            .get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok())
            .unwrap_or_default()
    }

    /// Expands every placeholder in `text`.
    #[must_use]
    pub fn expand(&self, text: &str) -> String {
        PLACEHOLDER
            .replace_all(text, |caps: &Captures<'_>| self.lookup(&caps[1]))
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_beats_environment() {
        std::env::set_var("METAMORPH_TEST_INTERP_ORG", "from-env");
        let interp = Interpolator::new().with_override("METAMORPH_TEST_INTERP_ORG", "from-flag");

        assert_eq!(
            interp.expand("group: ${METAMORPH_TEST_INTERP_ORG}"),
            "group: from-flag"
        );
    }

    #[test]
    fn test_environment_fallback() {
        std::env::set_var("METAMORPH_TEST_INTERP_IMAGE", "golang:1.22");
        let interp = Interpolator::new();
        assert_eq!(interp.expand("image: ${METAMORPH_TEST_INTERP_IMAGE}"), "image: golang:1.22");
    }

    #[test]
    fn test_unresolved_is_empty() {
        let interp = Interpolator::new();
        assert_eq!(interp.expand("a${METAMORPH_TEST_INTERP_NOPE_9}b"), "ab");
    }

    #[test]
    fn test_non_placeholders_untouched() {
        let interp = Interpolator::new().with_override("X", "1");
        assert_eq!(interp.expand("$X ${ X} ${X}${X} $${X}"), "$X ${ X} 11 $1");
    }
}
