//! Pipeline orchestration.
//!
//! The runner executes every step against every repository through one
//! [`ContainerRuntime`]. Repositories are processed by a bounded pool of
//! `Config::concurrency` workers; steps within a repository always run in
//! declared order. Results come back in repository order, then step order,
//! whatever order the workers finished in.

mod failure;
mod result;
mod retry;


pub use failure::FailurePolicy;
pub use result::{summarize, RepoSummary, StepResult};
pub use retry::{with_retry, RetrySchedule};

use crate::cancellation::CancellationToken;
use crate::config::Config;
use crate::errors::{ManifestValidationError, MetamorphError, Result, RunAborted};
use crate::manifest::{Pipeline, Repo, Step};
use crate::repo::{GitRootResolver, RepoResolver};
use crate::runtime::{
    new_runtime, ContainerConfig, ContainerRuntime, DockerImage, ExecutionOutput, HostConfig, Mount,
};
use crate::utils::DurationParseError;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// What one repository worker produced.
#[derive(Debug)]
struct RepoRun {
    index: usize,
    results: Vec<StepResult>,
    error: Option<MetamorphError>,
}

/// Executes a pipeline.
pub struct Runner {
    config: Arc<Config>,
    pipeline: Arc<Pipeline>,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    resolver: Arc<dyn RepoResolver>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("pipeline", &self.pipeline.name)
            .field("repos", &self.pipeline.repos.len())
            .field("steps", &self.pipeline.steps.len())
            .field("runtime", &self.config.runtime)
            .finish_non_exhaustive()
    }
}

impl Runner {
    /// Creates a runner. Repository paths in `config.repos`, when present,
    /// replace the pipeline's repositories.
    #[must_use]
    pub fn new(config: Arc<Config>, pipeline: Arc<Pipeline>) -> Self {
        let pipeline = if config.repos.is_empty() {
            pipeline
        } else {
            Arc::new((*pipeline).clone().with_repo_overrides(&config.repos))
        };

        Self {
            config,
            pipeline,
            runtime: None,
            resolver: Arc::new(GitRootResolver::new()),
        }
    }

    /// Uses the given backend instead of constructing one from the config.
    #[must_use]
    pub fn with_runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Uses the given repository resolver.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn RepoResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Returns the pipeline being run.
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Runs every step against every repository.
    ///
    /// # Errors
    ///
    /// Returns [`RunAborted`] carrying the results recorded so far when the
    /// configuration or pipeline is invalid, the backend is unavailable,
    /// the token is cancelled at a step boundary, or (under
    /// [`FailurePolicy::FailFast`]) a step fails.
    pub async fn run(&self, cancel: &CancellationToken) -> std::result::Result<Vec<StepResult>, RunAborted> {
        let abort = |error: MetamorphError| RunAborted::new(Vec::new(), error);

        self.config.validate().map_err(abort)?;
        self.pipeline
            .validate()
            .map_err(|e| abort(MetamorphError::Validation(e)))?;

        let runtime = match &self.runtime {
            Some(runtime) => Arc::clone(runtime),
            None => new_runtime(self.config.runtime, &self.config).map_err(abort)?,
        };
        if self.config.check_runtime {
            runtime
                .is_available()
                .await
                .map_err(|e| abort(MetamorphError::RuntimeUnavailable(e)))?;
        }

        info!(
            pipeline = %self.pipeline.name,
            repos = self.pipeline.repos.len(),
            steps = self.pipeline.steps.len(),
            runtime = %runtime.runtime_type(),
            concurrency = self.config.concurrency,
            "Starting pipeline execution"
        );
        if self.pipeline.repos.is_empty() {
            warn!("Pipeline has no repositories; nothing to do");
        }

        let stop = CancellationToken::new();
        let runtime = runtime.as_ref();

        let mut runs: Vec<RepoRun> = stream::iter(self.pipeline.repos.iter().enumerate())
            .map(|(index, repo)| self.run_repo(index, repo, runtime, cancel, &stop))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;
        runs.sort_by_key(|run| run.index);

        let mut results = Vec::new();
        let mut first_error = None;
        for run in runs {
            results.extend(run.results);
            if first_error.is_none() {
                first_error = run.error;
            }
        }

        match first_error {
            Some(error) => {
                error!(completed = results.len(), error = %error, "Pipeline execution aborted");
                Err(RunAborted::new(results, error))
            }
            None => {
                info!(completed = results.len(), "Pipeline execution finished");
                Ok(results)
            }
        }
    }

    async fn run_repo(
        &self,
        index: usize,
        repo: &Repo,
        runtime: &dyn ContainerRuntime,
        cancel: &CancellationToken,
        stop: &CancellationToken,
    ) -> RepoRun {
        let span = info_span!("repo", repo = %repo.name);
        let mut run = RepoRun {
            index,
            results: Vec::new(),
            error: None,
        };

        async {
            if let Err(cancelled) = cancel.check() {
                debug!("Skipping repository; run cancelled");
                run.error = Some(cancelled);
                return;
            }
            if stop.is_cancelled() {
                debug!("Skipping repository; run already stopped");
                return;
            }
            info!(path = %repo.path, "Starting pipeline execution for repository");
            let root = self.resolver.resolve(&self.config.absolute(&repo.path)).await;

            for (i, step) in self.pipeline.steps.iter().enumerate() {
                if let Err(cancelled) = cancel.check() {
                    warn!(step = %step.name, "Cancelled before step");
                    run.error = Some(cancelled);
                    return;
                }
                if stop.is_cancelled() {
                    debug!(step = %step.name, "Skipping remaining steps; run already stopped");
                    return;
                }

                let step_span = info_span!("step", step = %step.name, step_number = i + 1);
                let started_at = Utc::now();
                let start = Instant::now();
                let (outcome, attempts) = self
                    .execute_step(&root, step, runtime, cancel)
                    .instrument(step_span.clone())
                    .await;
                let duration = start.elapsed();
                let _entered = step_span.enter();

                match outcome {
                    Ok(out) => {
                        info!(
                            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                            exit_code = out.exit_code,
                            attempts,
                            "Step completed successfully"
                        );
                        run.results.push(StepResult {
                            repo: repo.name.clone(),
                            step_name: step.name.clone(),
                            exit_code: out.exit_code,
                            output: out.output,
                            error: None,
                            duration,
                            attempts,
                            started_at,
                        });
                    }
                    Err(e) if e.is_cancelled() => {
                        run.error = Some(e);
                        return;
                    }
                    Err(e) => {
                        let failed = MetamorphError::step_failed(&repo.name, &step.name, e);
                        error!(error = %failed, attempts, "Step failed");

                        if self.config.failure_policy.is_fail_fast() {
                            stop.cancel(failed.to_string());
                            run.error = Some(failed);
                        } else {
                            warn!("Skipping remaining steps for this repository");
                            run.results.push(StepResult {
                                repo: repo.name.clone(),
                                step_name: step.name.clone(),
                                exit_code: failed.exit_code().unwrap_or(-1),
                                output: failed.captured_output().unwrap_or_default().to_string(),
                                error: Some(failed.to_string()),
                                duration,
                                attempts,
                                started_at,
                            });
                        }
                        return;
                    }
                }
            }
        }
        .instrument(span)
        .await;

        run
    }

    /// Pulls the image, then runs the step under its retry and timeout policy.
    async fn execute_step(
        &self,
        root: &Path,
        step: &Step,
        runtime: &dyn ContainerRuntime,
        cancel: &CancellationToken,
    ) -> (Result<ExecutionOutput>, u32) {
        info!(commands = ?step.commands(), image = %step.image, "Executing");
        let image = DockerImage::parse(&step.image);

        match runtime.pull_image(&image).await {
            Err(e) if e.is_image_exists() => debug!(image = %image, "Image already exists"),
            Err(e) => return (Err(e), 1),
            Ok(()) => {}
        }

        let (container, host) = match self.container_params(root, step, image) {
            Ok(params) => params,
            Err(e) => return (Err(e), 1),
        };
        let timeout = match step.timeout() {
            Ok(timeout) => timeout,
            Err(e) => return (Err(invalid_step(step, &e)), 1),
        };
        let schedule = match RetrySchedule::from_policy(step.retry.as_ref()) {
            Ok(schedule) => schedule,
            Err(e) => return (Err(invalid_step(step, &e)), 1),
        };

        let container = &container.with_timeout(timeout);
        let host = &host;
        with_retry(&schedule, cancel, &step.name, |attempt| async move {
            debug!(attempt, "Running container");
            runtime.run(None, container, host).await.map_err(|e| match e {
                MetamorphError::StepTimeout { timeout, .. } => MetamorphError::StepTimeout {
                    step: step.name.clone(),
                    timeout,
                },
                other => other,
            })
        })
        .await
    }

    /// Assembles the invocation for one step against one repository root.
    fn container_params(
        &self,
        root: &Path,
        step: &Step,
        image: DockerImage,
    ) -> Result<(ContainerConfig, HostConfig)> {
        let repo_path = &self.config.container_repo_path;
        let working_dir = match self.pipeline.step_work_dir(step) {
            Some(dir) if dir.starts_with('/') => dir.to_string(),
            Some(dir) => Path::new(repo_path).join(dir).to_string_lossy().into_owned(),
            None => repo_path.clone(),
        };

        let mut mounts = Vec::with_capacity(step.volumes.len() + 1);
        for volume in step.parsed_volumes()? {
            let source = self.config.absolute(&volume.source);
            let mount = Mount::bind(path_string(&source), volume.target);
            mounts.push(if volume.read_only { mount.read_only() } else { mount });
        }
        mounts.push(Mount::bind(path_string(root), repo_path.clone()));

        let config = ContainerConfig::new(image, step.commands().to_vec())
            .with_working_dir(working_dir)
            .with_env(step.env.clone());
        Ok((config, HostConfig::new(mounts)))
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn invalid_step(step: &Step, error: &DurationParseError) -> MetamorphError {
    ManifestValidationError::new(format!("step {}: {error}", step.name))
        .with_step(step.name.clone())
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::StaticResolver;

    fn runner(pipeline: Pipeline) -> Runner {
        let config = Config::default().with_working_dir("/work");
        Runner::new(Arc::new(config), Arc::new(pipeline)).with_resolver(Arc::new(StaticResolver))
    }

    #[test]
    fn test_container_params_mounts_repo_root_last() {
        let mut pipeline = Pipeline::new("p");
        pipeline.add_step(
            Step::new("build", "golang:1.22", "go build ./...")
                .with_volume("cache:/root/.cache:ro")
                .with_env("CGO_ENABLED", "0"),
        );
        let runner = runner(pipeline);
        let step = &runner.pipeline().steps[0];

        let (config, host) = runner
            .container_params(Path::new("/src/api"), step, DockerImage::parse(&step.image))
            .unwrap();

        assert_eq!(config.cmd, vec!["go", "build", "./..."]);
        assert_eq!(config.working_dir, "/usr/src/repo");
        assert_eq!(config.env.get("CGO_ENABLED").map(String::as_str), Some("0"));
        assert_eq!(
            host.mounts,
            vec![
                Mount::bind("/work/cache", "/root/.cache").read_only(),
                Mount::bind("/src/api", "/usr/src/repo"),
            ]
        );
    }

    #[test]
    fn test_container_params_working_dir_resolution() {
        let mut pipeline = Pipeline::new("p");
        pipeline.work_dir = "services/api".into();
        pipeline.add_step(Step::new("a", "alpine", "ls"));
        pipeline.add_step(Step::new("b", "alpine", "ls").with_work_dir("/tmp"));
        let runner = runner(pipeline);

        let dirs: Vec<String> = runner
            .pipeline()
            .steps
            .iter()
            .map(|s| {
                runner
                    .container_params(Path::new("/src"), s, DockerImage::parse(&s.image))
                    .unwrap()
                    .0
                    .working_dir
            })
            .collect();
        assert_eq!(dirs, vec!["/usr/src/repo/services/api", "/tmp"]);
    }

    #[test]
    fn test_repo_overrides_from_config() {
        let mut pipeline = Pipeline::new("p");
        pipeline.add_repo(Repo::new("old", "/src/old"));
        pipeline.add_step(Step::new("a", "alpine", "ls"));

        let config = Config::default().with_repos(vec!["/src/new".to_string()]);
        let runner = Runner::new(Arc::new(config), Arc::new(pipeline));
        assert_eq!(runner.pipeline().repos, vec![Repo::new("new", "/src/new")]);
    }
}
