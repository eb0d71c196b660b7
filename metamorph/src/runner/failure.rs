//! What a failing step does to the rest of the run.

use serde::{Deserialize, Serialize};

/// How to handle step failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop every repository at its next step boundary (default).
    #[default]
    FailFast,
    /// Record the failure, skip the failing repository's remaining steps,
    /// keep running other repositories.
    ContinueOnFailure,
}

impl FailurePolicy {
    /// Returns true for [`FailurePolicy::FailFast`].
    #[must_use]
    pub const fn is_fail_fast(self) -> bool {
        matches!(self, Self::FailFast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_fail_fast() {
        assert!(FailurePolicy::default().is_fail_fast());
        assert!(!FailurePolicy::ContinueOnFailure.is_fail_fast());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&FailurePolicy::ContinueOnFailure).unwrap();
        assert_eq!(json, "\"continue_on_failure\"");
    }
}
