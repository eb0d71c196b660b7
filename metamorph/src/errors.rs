//! Error types for the metamorph engine.
//!
//! Every failure the engine can report is a variant of [`MetamorphError`].
//! Manifest problems, runtime availability and run aborts have their own
//! structured types so callers can match on them without string parsing.

use crate::runner::StepResult;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = MetamorphError> = std::result::Result<T, E>;

/// The main error type for metamorph operations.
#[derive(Debug, Error)]
pub enum MetamorphError {
    /// The manifest violated a structural invariant.
    #[error("{0}")]
    Validation(#[from] ManifestValidationError),

    /// The manifest text could not be decoded.
    #[error("decode manifest: {0}")]
    ManifestParse(String),

    /// The container engine cannot be used.
    #[error("{0}")]
    RuntimeUnavailable(#[from] RuntimeUnavailableError),

    /// The configured runtime type is not known.
    #[error("unknown runtime type: {0}")]
    UnknownRuntime(String),

    /// The image is already present locally; not a failure for callers.
    #[error("container image already exists: {image}")]
    ImageAlreadyExists {
        /// Canonical image reference.
        image: String,
    },

    /// The pull deadline expired before the image was transferred.
    #[error("timeout pulling image {image} after {}s", .timeout.as_secs_f64())]
    ImagePullTimeout {
        /// Canonical image reference.
        image: String,
        /// The deadline that expired.
        timeout: Duration,
    },

    /// The pull failed for a reason other than a timeout.
    #[error("failed pulling image {image}: {message}")]
    ImagePull {
        /// Canonical image reference.
        image: String,
        /// Output of the failed pull.
        message: String,
    },

    /// Building an image failed.
    #[error("could not build image {image}: {message}")]
    Build {
        /// Canonical image reference.
        image: String,
        /// Output of the failed build.
        message: String,
    },

    /// The workload exited with a non-zero status.
    #[error("script exited with status code {code}")]
    NonZeroExit {
        /// The exit code reported by the runtime.
        code: i32,
        /// Combined output captured before exit.
        output: String,
    },

    /// A step exceeded its declared timeout.
    #[error("step '{step}' timed out after {}s", .timeout.as_secs_f64())]
    StepTimeout {
        /// Step name.
        step: String,
        /// The declared timeout.
        timeout: Duration,
    },

    /// A container engine command failed outside the workload itself.
    #[error("container engine {operation} failed: {message}")]
    Engine {
        /// The engine operation, e.g. `create`.
        operation: String,
        /// Output of the failed command.
        message: String,
    },

    /// The runtime does not implement the requested operation.
    #[error("{runtime} runtime does not support {operation}")]
    Unsupported {
        /// Runtime type name.
        runtime: String,
        /// The operation that was requested.
        operation: String,
    },

    /// Reading process output failed.
    #[error("{0}")]
    Capture(#[from] crate::capture::CaptureError),

    /// The run was cancelled at a step boundary.
    #[error("pipeline cancelled: {0}")]
    Cancelled(String),

    /// A step failed; wraps the underlying cause.
    #[error("step execution failed (repo '{repo}', step '{step}'): {source}")]
    StepFailed {
        /// Repository name.
        repo: String,
        /// Step name.
        step: String,
        /// The underlying cause.
        #[source]
        source: Box<MetamorphError>,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MetamorphError {
    /// Wraps an error with the (repository, step) pair it occurred in.
    #[must_use]
    pub fn step_failed(repo: impl Into<String>, step: impl Into<String>, source: Self) -> Self {
        Self::StepFailed {
            repo: repo.into(),
            step: step.into(),
            source: Box::new(source),
        }
    }

    /// Returns true for the "image already exists" pull signal.
    #[must_use]
    pub const fn is_image_exists(&self) -> bool {
        matches!(self, Self::ImageAlreadyExists { .. })
    }

    /// Returns true if this error is a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns the exit code carried by this error, looking through step wrappers.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::NonZeroExit { code, .. } => Some(*code),
            Self::StepFailed { source, .. } => source.exit_code(),
            _ => None,
        }
    }

    /// Returns the captured output carried by this error, if any.
    #[must_use]
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            Self::NonZeroExit { output, .. } => Some(output),
            Self::StepFailed { source, .. } => source.captured_output(),
            _ => None,
        }
    }
}

/// Error raised when a manifest fails validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ManifestValidationError {
    /// The error message.
    pub message: String,
    /// The step involved, when the violation is step-scoped.
    pub step: Option<String>,
}

impl ManifestValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            step: None,
        }
    }

    /// Sets the step involved.
    #[must_use]
    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }
}

/// Why a container engine cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeUnavailableError {
    /// The engine binary is not on the PATH.
    #[error(
        "{runtime} is not installed or available in the PATH. We recommend using {runtime} to \
         isolate patch commands from your OS. Please install {runtime} or run metamorph using the \
         --skip-runtime-check flag"
    )]
    NotInstalled {
        /// Runtime name.
        runtime: String,
    },

    /// The engine binary exists but the daemon is not running.
    #[error(
        "{runtime} is not running. We recommend using {runtime} to isolate patch commands from \
         your OS. Please start the {runtime} service or run metamorph using the \
         --skip-runtime-check flag"
    )]
    NotStarted {
        /// Runtime name.
        runtime: String,
    },
}

/// A run that stopped before completing every (repository, step) pair.
///
/// Carries the results gathered up to the failure so callers keep partial
/// progress visibility.
#[derive(Debug, Error)]
#[error("pipeline run aborted after {} completed step(s): {error}", .results.len())]
pub struct RunAborted {
    /// Results recorded before the abort, in execution order.
    pub results: Vec<StepResult>,
    /// The cause of the abort.
    #[source]
    pub error: MetamorphError,
}

impl RunAborted {
    /// Creates a new abort record.
    #[must_use]
    pub const fn new(results: Vec<StepResult>, error: MetamorphError) -> Self {
        Self { results, error }
    }

    /// Returns true if the run was stopped by cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        self.error.is_cancelled()
    }
}
