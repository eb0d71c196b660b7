//! Typed pipeline manifest.

use crate::errors::ManifestValidationError;
use crate::utils::{parse_duration, parse_optional_duration, split_fields, DurationParseError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// A pipeline: the repositories to operate on and the steps to run in each.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Default working directory for steps that do not set one.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub work_dir: String,
    /// Merge request assignees, passed through untouched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assignees: Vec<String>,
    /// Merge request reviewers, passed through untouched.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reviewers: Vec<String>,
    /// Publishing-platform settings, passed through untouched.
    #[serde(default)]
    pub gitlab: PublishingConfig,
    /// Target repositories, in execution order.
    #[serde(default)]
    pub repos: Vec<Repo>,
    /// Steps, in execution order.
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Publishing metadata for the platform that receives the changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishingConfig {
    /// Organization or group.
    #[serde(default)]
    pub org: String,
    /// Branch the changes are committed to.
    #[serde(default)]
    pub branch_name: String,
    /// Merge request title template.
    #[serde(default)]
    pub merge_request_title: String,
    /// Merge request description template.
    #[serde(default)]
    pub merge_request_description: String,
    /// Labels applied to the merge request.
    #[serde(default)]
    pub labels: Vec<String>,
}

/// A repository checkout the engine mounts into each step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    /// Logical name used in logs and results.
    pub name: String,
    /// Path to the checkout on the host.
    pub path: String,
}

impl Repo {
    /// Creates a repository entry.
    #[must_use]
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// Creates a repository entry named after the last component of `path`.
    #[must_use]
    pub fn from_path(path: impl Into<String>) -> Self {
        let path = path.into();
        let name = Path::new(&path)
            .file_name()
            .map_or_else(|| path.clone(), |n| n.to_string_lossy().into_owned());
        Self { name, path }
    }
}

/// How the wait between retry attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Wait `interval` every time.
    #[default]
    Constant,
    /// Double the wait after each attempt.
    Exponential,
}

/// Re-execution policy for a failing step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first; values below 1 mean 1.
    #[serde(default)]
    pub max_attempts: u32,
    /// Wait between attempts, e.g. `5s`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub interval: String,
    /// Growth of the wait between attempts.
    #[serde(default)]
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Creates a policy with a constant interval.
    #[must_use]
    pub fn new(max_attempts: u32, interval: impl Into<String>) -> Self {
        Self {
            max_attempts,
            interval: interval.into(),
            backoff: Backoff::Constant,
        }
    }

    /// Sets the backoff.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Returns the effective number of attempts.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Returns the parsed interval; empty means no wait.
    ///
    /// # Errors
    ///
    /// Returns an error if the interval string is malformed.
    pub fn interval(&self) -> Result<Duration, DurationParseError> {
        Ok(parse_optional_duration(Some(&self.interval))?.unwrap_or(Duration::ZERO))
    }
}

/// A bind mount declared in `source:target` form, optionally suffixed
/// with `:ro` or `:rw`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    /// Host path, possibly relative.
    pub source: String,
    /// Path inside the container.
    pub target: String,
    /// Mount read-only.
    pub read_only: bool,
}

impl Volume {
    /// Parses a volume specification.
    ///
    /// # Errors
    ///
    /// Returns an error unless the spec has a non-empty source and target.
    pub fn parse(spec: &str) -> Result<Self, ManifestValidationError> {
        let parts: Vec<&str> = spec.split(':').collect();
        let (source, target, read_only) = match parts.as_slice() {
            [source, target] => (*source, *target, false),
            [source, target, "ro"] => (*source, *target, true),
            [source, target, "rw"] => (*source, *target, false),
            _ => {
                return Err(ManifestValidationError::new(format!(
                    "volume '{spec}' must be in source:target form"
                )))
            }
        };
        if source.is_empty() || target.is_empty() {
            return Err(ManifestValidationError::new(format!(
                "volume '{spec}' must name both a source and a target"
            )));
        }
        Ok(Self {
            source: source.to_string(),
            target: target.to_string(),
            read_only,
        })
    }
}

/// One containerized command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Step name.
    #[serde(default)]
    pub name: String,
    /// Container image reference.
    #[serde(default)]
    pub image: String,
    /// Command line, split on whitespace at load.
    #[serde(default)]
    pub command: String,
    /// Environment variables for the workload.
    #[serde(default, rename = "environment", skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Working directory override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
    /// Bind mounts in `source:target` form.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    /// Per-attempt deadline, e.g. `10m`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    /// Retry policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    #[serde(skip)]
    commands: Vec<String>,
}

impl Step {
    /// Creates a step and tokenizes its command.
    #[must_use]
    pub fn new(name: impl Into<String>, image: impl Into<String>, command: impl Into<String>) -> Self {
        let mut step = Self {
            name: name.into(),
            image: image.into(),
            command: command.into(),
            ..Self::default()
        };
        step.tokenize();
        step
    }

    /// Adds an environment variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_work_dir(mut self, dir: impl Into<String>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    /// Adds a volume spec.
    #[must_use]
    pub fn with_volume(mut self, spec: impl Into<String>) -> Self {
        self.volumes.push(spec.into());
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Returns the tokenized command.
    #[must_use]
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Returns the parsed timeout, if one is declared.
    ///
    /// # Errors
    ///
    /// Returns an error if the timeout string is malformed.
    pub fn timeout(&self) -> Result<Option<Duration>, DurationParseError> {
        parse_optional_duration(self.timeout.as_deref())
    }

    /// Returns the parsed volume specs.
    ///
    /// # Errors
    ///
    /// Returns the first malformed spec.
    pub fn parsed_volumes(&self) -> Result<Vec<Volume>, ManifestValidationError> {
        self.volumes.iter().map(|v| Volume::parse(v)).collect()
    }

    pub(crate) fn tokenize(&mut self) {
        self.commands = split_fields(&self.command);
    }

    fn validate(&self, index: usize) -> Result<(), ManifestValidationError> {
        if self.name.trim().is_empty() {
            return Err(ManifestValidationError::new(format!("step {index} must have a name"))
                .with_step(index.to_string()));
        }
        let scoped = |msg: String| ManifestValidationError::new(msg).with_step(self.name.clone());

        if self.image.trim().is_empty() {
            return Err(scoped(format!("step {} must specify a container image", self.name)));
        }
        if self.commands.is_empty() {
            return Err(scoped(format!(
                "step {} must specify at least one command",
                self.name
            )));
        }
        for spec in &self.volumes {
            Volume::parse(spec).map_err(|e| scoped(format!("step {}: {}", self.name, e.message)))?;
        }
        if let Some(timeout) = &self.timeout {
            parse_duration(timeout).map_err(|e| scoped(format!("step {}: timeout: {e}", self.name)))?;
        }
        if let Some(retry) = &self.retry {
            retry
                .interval()
                .map_err(|e| scoped(format!("step {}: retry interval: {e}", self.name)))?;
        }
        Ok(())
    }
}

impl Pipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Appends a step.
    pub fn add_step(&mut self, mut step: Step) {
        step.tokenize();
        self.steps.push(step);
    }

    /// Appends a repository.
    pub fn add_repo(&mut self, repo: Repo) {
        self.repos.push(repo);
    }

    /// Replaces the repositories with the given paths, unless `paths` is empty.
    #[must_use]
    pub fn with_repo_overrides<S: AsRef<str>>(mut self, paths: &[S]) -> Self {
        if !paths.is_empty() {
            self.repos = paths.iter().map(|p| Repo::from_path(p.as_ref())).collect();
        }
        self
    }

    /// Checks every invariant and returns the first violation found.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no steps, or a step lacks a name, image
    /// or command, or declares a malformed volume, timeout or retry interval.
    pub fn validate(&self) -> Result<(), ManifestValidationError> {
        if self.steps.is_empty() {
            return Err(ManifestValidationError::new(
                "pipeline must contain at least one step",
            ));
        }
        self.steps
            .iter()
            .enumerate()
            .try_for_each(|(i, step)| step.validate(i))
    }

    /// Returns the working directory a step runs in, falling back to the
    /// pipeline default. `None` when neither is set.
    #[must_use]
    pub fn step_work_dir<'a>(&'a self, step: &'a Step) -> Option<&'a str> {
        step.work_dir
            .as_deref()
            .filter(|d| !d.is_empty())
            .or_else(|| Some(self.work_dir.as_str()).filter(|d| !d.is_empty()))
    }
}
