//! Manifest loading: interpolate, decode, tokenize, validate.

use super::interpolate::Interpolator;
use super::model::Pipeline;
use crate::errors::{MetamorphError, Result};
use std::path::Path;
use tracing::debug;

/// Name of the placeholder the organization override answers.
pub const ORG_VARIABLE: &str = "GITLAB_ORG";

/// Values that take precedence over the environment during interpolation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestOverrides {
    /// Organization name, bound to `${GITLAB_ORG}`.
    pub org: Option<String>,
}

impl ManifestOverrides {
    /// Creates an empty override set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the organization override.
    #[must_use]
    pub fn with_org(mut self, org: impl Into<String>) -> Self {
        self.org = Some(org.into());
        self
    }

    fn interpolator(&self) -> Interpolator {
        match self.org.as_deref().filter(|o| !o.is_empty()) {
            Some(org) => Interpolator::new().with_override(ORG_VARIABLE, org),
            None => Interpolator::new(),
        }
    }
}

/// Loads a pipeline from manifest text.
///
/// # Errors
///
/// Returns [`MetamorphError::ManifestParse`] if the text is not a valid
/// manifest document and [`MetamorphError::Validation`] for the first
/// violated invariant.
pub fn load_str(source: &str, overrides: &ManifestOverrides) -> Result<Pipeline> {
    let expanded = overrides.interpolator().expand(source);

    let mut pipeline: Pipeline =
        serde_yaml::from_str(&expanded).map_err(|e| MetamorphError::ManifestParse(e.to_string()))?;

    for step in &mut pipeline.steps {
        step.tokenize();
    }
    pipeline.validate()?;

    debug!(
        pipeline = %pipeline.name,
        repos = pipeline.repos.len(),
        steps = pipeline.steps.len(),
        "Loaded manifest"
    );
    Ok(pipeline)
}

/// Loads a pipeline from a manifest file.
///
/// # Errors
///
/// Returns an IO error if the file cannot be read, otherwise as [`load_str`].
pub fn load_file(path: impl AsRef<Path>, overrides: &ManifestOverrides) -> Result<Pipeline> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path)?;
    load_str(&source, overrides).map_err(|e| match e {
        MetamorphError::ManifestParse(msg) => {
            MetamorphError::ManifestParse(format!("{}: {msg}", path.display()))
        }
        other => other,
    })
}
