//! # Metamorph
//!
//! Batch-apply containerized commands across many repositories.
//!
//! A pipeline manifest names a set of repositories and an ordered list of
//! steps. Each step is a container image plus a command; metamorph runs
//! every step against every repository and returns one result per
//! (repository, step) pair:
//!
//! - **Manifest model**: YAML manifests with `${NAME}` interpolation and
//!   load-time validation
//! - **Container runtimes**: a docker CLI backend and a plain-process local
//!   backend behind one trait
//! - **Orchestration**: fail-fast or continue-on-failure, per-step retry and
//!   timeout, bounded repository concurrency
//! - **Output capture**: concurrent stdout/stderr readers with a merged,
//!   line-atomic log
//! - **Cancellation**: cooperative cancellation checked at step boundaries
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use metamorph::prelude::*;
//! use std::sync::Arc;
//!
//! let config = Config::from_env()?;
//! let pipeline = load_file("pipeline.yaml", &ManifestOverrides::new())?;
//!
//! let cancel = CancellationToken::new();
//! let results = Runner::new(Arc::new(config), Arc::new(pipeline))
//!     .run(&cancel)
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod capture;
pub mod config;
pub mod errors;
pub mod logging;
pub mod manifest;
pub mod repo;
pub mod runner;
pub mod runtime;
pub mod shell;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::capture::{Output, StreamKind};
    pub use crate::config::{Config, LogSettings, RegistryAuth};
    pub use crate::errors::{
        ManifestValidationError, MetamorphError, Result, RunAborted,
        RuntimeUnavailableError,
    };
    pub use crate::manifest::{
        load_file, load_str, ManifestOverrides, Pipeline, Repo, RetryPolicy, Step,
    };
    pub use crate::repo::{GitRootResolver, RepoResolver};
    pub use crate::runner::{summarize, FailurePolicy, RepoSummary, Runner, StepResult};
    pub use crate::runtime::{
        new_runtime, ContainerConfig, ContainerRuntime, DockerImage, DockerRuntime,
        ExecutionOutput, HostConfig, LocalRuntime, Mount, RuntimeType,
    };
}
