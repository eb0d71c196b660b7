//! Engine configuration.
//!
//! Values come from defaults, then the environment ([`Config::from_env`]),
//! then explicit `with_*` calls (usually CLI flags).

use crate::errors::{ManifestValidationError, MetamorphError, Result};
use crate::runner::FailurePolicy;
use crate::runtime::RuntimeType;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Registry username variable.
pub const ENV_REGISTRY_USERNAME: &str = "GITLAB_CI_USERNAME";
/// Registry password or token variable.
pub const ENV_REGISTRY_TOKEN: &str = "GITLAB_CI_TOKEN";
/// Registry host variable.
pub const ENV_REGISTRY_HOST: &str = "METAMORPH_REGISTRY_HOST";
/// Runtime type variable.
pub const ENV_RUNTIME: &str = "METAMORPH_RUNTIME";
/// Worker count variable.
pub const ENV_CONCURRENCY: &str = "METAMORPH_CONCURRENCY";
/// Log level variable.
pub const ENV_LOG_LEVEL: &str = "METAMORPH_LOG_LEVEL";
/// In-container repository path variable.
pub const ENV_CONTAINER_REPO_PATH: &str = "METAMORPH_CONTAINER_REPO_PATH";

/// Where every step finds its repository inside the container.
pub const DEFAULT_CONTAINER_REPO_PATH: &str = "/usr/src/repo";

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base directory for resolving relative host paths.
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    /// Fixed in-container path the repository is mounted at.
    #[serde(default = "default_container_repo_path")]
    pub container_repo_path: String,
    /// Execution backend.
    #[serde(default)]
    pub runtime: RuntimeType,
    /// Registry credentials for image pulls.
    #[serde(default)]
    pub registry: RegistryAuth,
    /// Organization override for `${GITLAB_ORG}`.
    #[serde(default)]
    pub org: Option<String>,
    /// Repository paths that replace the manifest's repositories.
    #[serde(default)]
    pub repos: Vec<String>,
    /// Echo workload output live.
    #[serde(default = "default_true")]
    pub stream_output: bool,
    /// Repositories processed at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// What a step failure does to the rest of the run.
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Remove containers after every run.
    #[serde(default = "default_true")]
    pub remove_containers: bool,
    /// Deadline for a single image pull.
    #[serde(default = "default_pull_timeout")]
    pub pull_timeout_seconds: u64,
    /// Check backend availability before running.
    #[serde(default = "default_true")]
    pub check_runtime: bool,
    /// Logging settings.
    #[serde(default)]
    pub log: LogSettings,
}

fn default_working_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn default_container_repo_path() -> String {
    DEFAULT_CONTAINER_REPO_PATH.to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_concurrency() -> usize {
    1
}

const fn default_pull_timeout() -> u64 {
    600
}

impl Default for Config {
    fn default() -> Self {
        Self {
            working_dir: default_working_dir(),
            container_repo_path: default_container_repo_path(),
            runtime: RuntimeType::default(),
            registry: RegistryAuth::default(),
            org: None,
            repos: Vec::new(),
            stream_output: true,
            concurrency: default_concurrency(),
            failure_policy: FailurePolicy::default(),
            remove_containers: true,
            pull_timeout_seconds: default_pull_timeout(),
            check_runtime: true,
            log: LogSettings::default(),
        }
    }
}

impl Config {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration from defaults and the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an unparseable value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`Config::from_env`] with a custom variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an unparseable value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(username) = get(ENV_REGISTRY_USERNAME) {
            config.registry.username = username;
        }
        if let Some(token) = get(ENV_REGISTRY_TOKEN) {
            config.registry.password = token;
        }
        if let Some(host) = get(ENV_REGISTRY_HOST) {
            config.registry.host = host;
        }
        if let Some(runtime) = get(ENV_RUNTIME) {
            config.runtime = runtime.parse()?;
        }
        if let Some(concurrency) = get(ENV_CONCURRENCY) {
            config.concurrency = concurrency.trim().parse().map_err(|_| {
                invalid(format!("{ENV_CONCURRENCY} must be a positive integer, got '{concurrency}'"))
            })?;
        }
        if let Some(level) = get(ENV_LOG_LEVEL) {
            config.log.level = level;
        }
        if let Some(path) = get(ENV_CONTAINER_REPO_PATH) {
            config.container_repo_path = path;
        }

        Ok(config)
    }

    /// Checks that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if `concurrency` is zero or `container_repo_path`
    /// is not absolute.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(invalid("concurrency must be at least 1"));
        }
        if !self.container_repo_path.starts_with('/') {
            return Err(invalid(format!(
                "container repository path must be absolute, got '{}'",
                self.container_repo_path
            )));
        }
        Ok(())
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Sets the runtime.
    #[must_use]
    pub const fn with_runtime(mut self, runtime: RuntimeType) -> Self {
        self.runtime = runtime;
        self
    }

    /// Sets the organization override.
    #[must_use]
    pub fn with_org(mut self, org: impl Into<String>) -> Self {
        self.org = Some(org.into());
        self
    }

    /// Sets the repository overrides.
    #[must_use]
    pub fn with_repos(mut self, repos: Vec<String>) -> Self {
        self.repos = repos;
        self
    }

    /// Sets the worker count.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Sets the failure policy.
    #[must_use]
    pub const fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Enables or disables live output echo.
    #[must_use]
    pub const fn with_stream_output(mut self, stream: bool) -> Self {
        self.stream_output = stream;
        self
    }

    /// Enables or disables the availability check.
    #[must_use]
    pub const fn with_check_runtime(mut self, check: bool) -> Self {
        self.check_runtime = check;
        self
    }

    /// Sets the registry credentials.
    #[must_use]
    pub fn with_registry(mut self, registry: RegistryAuth) -> Self {
        self.registry = registry;
        self
    }

    /// Sets the in-container repository path.
    #[must_use]
    pub fn with_container_repo_path(mut self, path: impl Into<String>) -> Self {
        self.container_repo_path = path.into();
        self
    }

    /// Returns the pull deadline.
    #[must_use]
    pub const fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_seconds)
    }

    /// Resolves `path` against the working directory.
    #[must_use]
    pub fn absolute(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_dir.join(path)
        }
    }
}

fn invalid(message: impl Into<String>) -> MetamorphError {
    MetamorphError::Validation(ManifestValidationError::new(message))
}

/// Registry credentials.
#[derive(Clone, Serialize, Deserialize)]
pub struct RegistryAuth {
    /// Registry host.
    #[serde(default = "default_registry_host")]
    pub host: String,
    /// Username.
    #[serde(default)]
    pub username: String,
    /// Password or token.
    #[serde(default)]
    pub password: String,
}

fn default_registry_host() -> String {
    "registry.gitlab.com".to_string()
}

impl Default for RegistryAuth {
    fn default() -> Self {
        Self {
            host: default_registry_host(),
            username: String::new(),
            password: String::new(),
        }
    }
}

impl RegistryAuth {
    /// Creates credentials for the default host.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    /// Returns true when both a username and a password are set.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl std::fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .finish()
    }
}

/// Logging settings consumed by [`crate::logging::init`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// Default filter directive; `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines.
    #[serde(default)]
    pub json: bool,
    /// Use ANSI colours.
    #[serde(default = "default_true")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            color: true,
        }
    }
}

impl LogSettings {
    /// Sets the level.
    #[must_use]
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// Enables JSON output.
    #[must_use]
    pub const fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }
}
