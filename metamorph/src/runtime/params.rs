//! Runtime-agnostic description of one container invocation.

use super::DockerImage;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerConfig {
    /// Image to run.
    pub image: DockerImage,
    /// Entrypoint override; empty keeps the image's entrypoint.
    pub entrypoint: Vec<String>,
    /// Argument vector.
    pub cmd: Vec<String>,
    /// Allocate a TTY.
    pub tty: bool,
    /// Working directory inside the container; empty keeps the image default.
    pub working_dir: String,
    /// Capture standard output.
    pub attach_stdout: bool,
    /// Capture standard error.
    pub attach_stderr: bool,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Deadline for the workload. The runtime stops it on expiry.
    pub timeout: Option<Duration>,
}

impl ContainerConfig {
    /// Creates a config with both streams attached and no TTY.
    #[must_use]
    pub fn new(image: DockerImage, cmd: Vec<String>) -> Self {
        Self {
            image,
            entrypoint: Vec::new(),
            cmd,
            tty: false,
            working_dir: String::new(),
            attach_stdout: true,
            attach_stderr: true,
            env: BTreeMap::new(),
            timeout: None,
        }
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Sets the environment.
    #[must_use]
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Sets the entrypoint.
    #[must_use]
    pub fn with_entrypoint(mut self, entrypoint: Vec<String>) -> Self {
        self.entrypoint = entrypoint;
        self
    }

    /// Sets the deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the environment as `KEY=VALUE` pairs.
    #[must_use]
    pub fn env_pairs(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

/// Host-dependent settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostConfig {
    /// Bind mounts, applied in order.
    pub mounts: Vec<Mount>,
}

impl HostConfig {
    /// Creates a host config with the given mounts.
    #[must_use]
    pub fn new(mounts: Vec<Mount>) -> Self {
        Self { mounts }
    }
}

/// A bind mount from the host into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mount {
    /// Absolute host path.
    pub source: String,
    /// Path inside the container.
    pub target: String,
    /// Mount read-only.
    pub read_only: bool,
}

impl Mount {
    /// Creates a read-write bind mount.
    #[must_use]
    pub fn bind(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    /// Marks the mount read-only.
    #[must_use]
    pub const fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Renders the `--mount` argument for the docker CLI.
    #[must_use]
    pub fn to_mount_arg(&self) -> String {
        let mut arg = format!("type=bind,source={},target={}", self.source, self.target);
        if self.read_only {
            arg.push_str(",readonly");
        }
        arg
    }
}

/// A successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutput {
    /// Exit code; zero on success.
    pub exit_code: i32,
    /// Combined output of the run.
    pub output: String,
}
