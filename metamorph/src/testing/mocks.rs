//! Mock backends for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::cancellation::CancellationToken;
use crate::errors::{MetamorphError, Result, RuntimeUnavailableError};
use crate::runtime::{ContainerConfig, ContainerRuntime, DockerImage, ExecutionOutput, HostConfig, RuntimeType};

/// One call observed by [`MockRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    /// `pull_image` with the canonical reference.
    Pull(String),
    /// `build_image` with the canonical reference.
    Build(String),
    /// `run`.
    Run {
        /// Canonical image reference.
        image: String,
        /// Command joined with spaces.
        command: String,
        /// Working directory.
        working_dir: String,
        /// Host source of the last mount (the repository root).
        repo_root: String,
    },
}

#[derive(Debug)]
struct FailureRule {
    command: String,
    repo_root: Option<String>,
    code: i32,
    remaining: Option<u32>,
}

#[derive(Debug)]
struct DelayRule {
    command: String,
    repo_root: Option<String>,
    delay: Duration,
}

/// A runtime that records calls and plays back scripted outcomes.
///
/// Runs succeed with output `ran <command>\n` unless a failure rule
/// matches. Images become "present" after their first pull, so a second
/// pull returns the already-exists signal.
#[derive(Debug, Default)]
pub struct MockRuntime {
    calls: Mutex<Vec<RuntimeCall>>,
    present: Mutex<HashSet<String>>,
    failures: Mutex<Vec<FailureRule>>,
    delays: Mutex<Vec<DelayRule>>,
    cancel_on_run: Mutex<Option<(usize, CancellationToken)>>,
    unavailable: Mutex<Option<RuntimeUnavailableError>>,
}

impl MockRuntime {
    /// Creates a mock where everything succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every run of `command` with exit `code`.
    #[must_use]
    pub fn fail_command(self, command: impl Into<String>, code: i32) -> Self {
        self.failures.lock().push(FailureRule {
            command: command.into(),
            repo_root: None,
            code,
            remaining: None,
        });
        self
    }

    /// Fails the first `times` runs of `command`, then lets it succeed.
    #[must_use]
    pub fn fail_command_times(self, command: impl Into<String>, code: i32, times: u32) -> Self {
        self.failures.lock().push(FailureRule {
            command: command.into(),
            repo_root: None,
            code,
            remaining: Some(times),
        });
        self
    }

    /// Fails runs of `command` only for the repository mounted from `repo_root`.
    #[must_use]
    pub fn fail_in_repo(self, repo_root: impl Into<String>, command: impl Into<String>, code: i32) -> Self {
        self.failures.lock().push(FailureRule {
            command: command.into(),
            repo_root: Some(repo_root.into()),
            code,
            remaining: None,
        });
        self
    }

    /// Delays every run of `command`.
    #[must_use]
    pub fn delay_command(self, command: impl Into<String>, delay: Duration) -> Self {
        self.delays.lock().push(DelayRule {
            command: command.into(),
            repo_root: None,
            delay,
        });
        self
    }

    /// Delays runs for the repository mounted from `repo_root`.
    #[must_use]
    pub fn delay_repo(self, repo_root: impl Into<String>, delay: Duration) -> Self {
        self.delays.lock().push(DelayRule {
            command: String::new(),
            repo_root: Some(repo_root.into()),
            delay,
        });
        self
    }

    /// Cancels `token` when the `nth` run (1-based) starts. The run itself
    /// still completes.
    #[must_use]
    pub fn cancel_on_run(self, nth: usize, token: CancellationToken) -> Self {
        *self.cancel_on_run.lock() = Some((nth, token));
        self
    }

    /// Marks an image as already present.
    #[must_use]
    pub fn with_present_image(self, image: &str) -> Self {
        self.present.lock().insert(DockerImage::parse(image).canonical());
        self
    }

    /// Makes `is_available` fail.
    #[must_use]
    pub fn unavailable(self, error: RuntimeUnavailableError) -> Self {
        *self.unavailable.lock() = Some(error);
        self
    }

    /// Returns every recorded call.
    #[must_use]
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().clone()
    }

    /// Returns recorded runs as `repo_root: command` strings.
    #[must_use]
    pub fn runs(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                RuntimeCall::Run { command, repo_root, .. } => Some(format!("{repo_root}: {command}")),
                _ => None,
            })
            .collect()
    }

    /// Returns the number of runs.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs().len()
    }

    fn scripted_failure(&self, command: &str, repo_root: &str) -> Option<i32> {
        let mut failures = self.failures.lock();
        let rule = failures.iter_mut().find(|r| {
            r.command == command
                && r.repo_root.as_deref().map_or(true, |root| root == repo_root)
                && r.remaining != Some(0)
        })?;
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(rule.code)
    }

    fn scripted_delay(&self, command: &str, repo_root: &str) -> Option<Duration> {
        self.delays
            .lock()
            .iter()
            .find(|r| {
                (r.command.is_empty() || r.command == command)
                    && r.repo_root.as_deref().map_or(true, |root| root == repo_root)
            })
            .map(|r| r.delay)
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    fn runtime_type(&self) -> RuntimeType {
        RuntimeType::Local
    }

    async fn is_available(&self) -> std::result::Result<(), RuntimeUnavailableError> {
        self.unavailable.lock().clone().map_or(Ok(()), Err)
    }

    async fn build_image(&self, image: &DockerImage, _context_dir: &Path) -> Result<String> {
        self.calls.lock().push(RuntimeCall::Build(image.canonical()));
        self.present.lock().insert(image.canonical());
        Ok(format!("built {image}\n"))
    }

    async fn pull_image(&self, image: &DockerImage) -> Result<()> {
        self.calls.lock().push(RuntimeCall::Pull(image.canonical()));
        if self.present.lock().insert(image.canonical()) {
            Ok(())
        } else {
            Err(MetamorphError::ImageAlreadyExists {
                image: image.canonical(),
            })
        }
    }

    async fn run(
        &self,
        _container_id: Option<&str>,
        config: &ContainerConfig,
        host_config: &HostConfig,
    ) -> Result<ExecutionOutput> {
        let command = config.cmd.join(" ");
        let repo_root = host_config
            .mounts
            .last()
            .map(|m| m.source.clone())
            .unwrap_or_default();

        let nth = {
            let mut calls = self.calls.lock();
            calls.push(RuntimeCall::Run {
                image: config.image.canonical(),
                command: command.clone(),
                working_dir: config.working_dir.clone(),
                repo_root: repo_root.clone(),
            });
            calls.iter().filter(|c| matches!(c, RuntimeCall::Run { .. })).count()
        };

        if let Some((target, token)) = self.cancel_on_run.lock().as_ref() {
            if *target == nth {
                token.cancel("cancelled by mock runtime");
            }
        }

        if let Some(delay) = self.scripted_delay(&command, &repo_root) {
            match config.timeout {
                Some(limit) if limit < delay => {
                    tokio::time::sleep(limit).await;
                    return Err(MetamorphError::StepTimeout {
                        step: command,
                        timeout: limit,
                    });
                }
                _ => tokio::time::sleep(delay).await,
            }
        }

        match self.scripted_failure(&command, &repo_root) {
            Some(code) => Err(MetamorphError::NonZeroExit {
                code,
                output: format!("failed {command}\n"),
            }),
            None => Ok(ExecutionOutput {
                exit_code: 0,
                output: format!("ran {command}\n"),
            }),
        }
    }
}
