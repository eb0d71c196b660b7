//! Execution backends.
//!
//! The orchestrator only talks to [`ContainerRuntime`]. Two backends exist:
//! [`DockerRuntime`] drives the docker CLI, and [`LocalRuntime`] runs the
//! argument vector directly on the host.

mod docker;
mod image;
mod local;
mod params;

pub use docker::DockerRuntime;
pub use image::{DockerImage, DEFAULT_TAG};
pub use local::LocalRuntime;
pub use params::{ContainerConfig, ExecutionOutput, HostConfig, Mount};

use crate::config::Config;
use crate::errors::{MetamorphError, Result, RuntimeUnavailableError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Which backend executes steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// The docker engine.
    #[default]
    Docker,
    /// Plain host processes.
    Local,
}

impl RuntimeType {
    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for RuntimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeType {
    type Err = MetamorphError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "local" => Ok(Self::Local),
            other => Err(MetamorphError::UnknownRuntime(other.to_string())),
        }
    }
}

/// A backend that runs one workload to completion.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Returns the backend type.
    fn runtime_type(&self) -> RuntimeType;

    /// Checks that the backend can be used.
    async fn is_available(&self) -> std::result::Result<(), RuntimeUnavailableError>;

    /// Builds `image` from `context_dir` and returns the build log.
    async fn build_image(&self, image: &DockerImage, context_dir: &Path) -> Result<String>;

    /// Makes `image` available locally.
    ///
    /// Returns [`MetamorphError::ImageAlreadyExists`] when the exact
    /// canonical reference is already present; callers treat that as success.
    async fn pull_image(&self, image: &DockerImage) -> Result<()>;

    /// Runs a workload to completion.
    ///
    /// A non-zero exit is returned as [`MetamorphError::NonZeroExit`]. When
    /// `config.timeout` expires the workload is stopped before
    /// [`MetamorphError::StepTimeout`] is returned.
    async fn run(
        &self,
        container_id: Option<&str>,
        config: &ContainerConfig,
        host_config: &HostConfig,
    ) -> Result<ExecutionOutput>;
}

/// Creates the backend for `runtime_type`.
///
/// # Errors
///
/// Returns an error if the backend cannot be constructed.
pub fn new_runtime(runtime_type: RuntimeType, config: &Config) -> Result<Arc<dyn ContainerRuntime>> {
    let runtime: Arc<dyn ContainerRuntime> = match runtime_type {
        RuntimeType::Docker => Arc::new(DockerRuntime::new(config)),
        RuntimeType::Local => Arc::new(LocalRuntime::new(config)),
    };
    Ok(runtime)
}
