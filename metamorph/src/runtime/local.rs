//! Host-process backend.

use super::{ContainerConfig, ContainerRuntime, DockerImage, ExecutionOutput, HostConfig, Mount, RuntimeType};
use crate::config::Config;
use crate::errors::{MetamorphError, Result, RuntimeUnavailableError};
use crate::shell::{run_command, CommandOptions};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Runs the argument vector directly on the host.
///
/// Images are ignored. Container paths in the working directory are mapped
/// back to host paths through the bind mounts, so a step that expects its
/// repository at the in-container path still runs inside the checkout.
#[derive(Debug, Clone)]
pub struct LocalRuntime {
    stream_output: bool,
}

impl LocalRuntime {
    /// Creates a backend from the engine configuration.
    #[must_use]
    pub const fn new(config: &Config) -> Self {
        Self {
            stream_output: config.stream_output,
        }
    }
}

/// Maps a container path to a host path through the mount with the longest
/// matching target.
fn translate_path(path: &str, mounts: &[Mount]) -> Option<PathBuf> {
    let path = Path::new(path);
    mounts
        .iter()
        .filter_map(|m| {
            path.strip_prefix(&m.target)
                .ok()
                .map(|rest| (m.target.len(), Path::new(&m.source).join(rest)))
        })
        .max_by_key(|(len, _)| *len)
        .map(|(_, host)| host)
}

#[async_trait]
impl ContainerRuntime for LocalRuntime {
    fn runtime_type(&self) -> RuntimeType {
        RuntimeType::Local
    }

    async fn is_available(&self) -> std::result::Result<(), RuntimeUnavailableError> {
        Ok(())
    }

    async fn build_image(&self, _image: &DockerImage, _context_dir: &Path) -> Result<String> {
        Err(MetamorphError::Unsupported {
            runtime: RuntimeType::Local.to_string(),
            operation: "build_image".to_string(),
        })
    }

    async fn pull_image(&self, image: &DockerImage) -> Result<()> {
        debug!(image = %image, "Local runtime ignores images");
        Ok(())
    }

    async fn run(
        &self,
        _container_id: Option<&str>,
        config: &ContainerConfig,
        host_config: &HostConfig,
    ) -> Result<ExecutionOutput> {
        let argv: Vec<String> = config.entrypoint.iter().chain(&config.cmd).cloned().collect();
        let Some((program, args)) = argv.split_first() else {
            return Err(MetamorphError::Engine {
                operation: "run".to_string(),
                message: "no command to run".to_string(),
            });
        };

        let mut options = CommandOptions::new()
            .with_env(config.env.clone())
            .with_stream_output(self.stream_output)
            .with_label(program.clone());
        if !config.working_dir.is_empty() {
            let dir = translate_path(&config.working_dir, &host_config.mounts)
                .unwrap_or_else(|| PathBuf::from(&config.working_dir));
            options = options.with_working_dir(dir);
        }

        let run = run_command(&options, program, args);
        let outcome = match config.timeout {
            // Dropping the command future kills the child.
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .map_err(|_| MetamorphError::StepTimeout {
                    step: program.clone(),
                    timeout: limit,
                })??,
            None => run.await?,
        };
        let output = match (config.attach_stdout, config.attach_stderr) {
            (true, true) => outcome.output.combined(),
            (true, false) => outcome.output.stdout(),
            (false, true) => outcome.output.stderr(),
            (false, false) => String::new(),
        };

        if outcome.success() {
            Ok(ExecutionOutput {
                exit_code: 0,
                output,
            })
        } else {
            Err(MetamorphError::NonZeroExit {
                code: outcome.code(),
                output,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> LocalRuntime {
        LocalRuntime::new(&Config::default().with_stream_output(false))
    }

    #[test]
    fn test_translate_path_prefers_longest_target() {
        let mounts = vec![
            Mount::bind("/host/repo", "/usr/src/repo"),
            Mount::bind("/host/cache", "/usr/src/repo/.cache"),
        ];

        assert_eq!(
            translate_path("/usr/src/repo/app", &mounts),
            Some(PathBuf::from("/host/repo/app"))
        );
        assert_eq!(
            translate_path("/usr/src/repo/.cache/go", &mounts),
            Some(PathBuf::from("/host/cache/go"))
        );
        assert_eq!(translate_path("/usr/src/repository", &mounts), None);
    }

    #[tokio::test]
    async fn test_pull_is_noop_and_build_unsupported() {
        let rt = runtime();
        assert!(rt.is_available().await.is_ok());
        assert!(rt.pull_image(&DockerImage::parse("alpine")).await.is_ok());

        let err = rt
            .build_image(&DockerImage::parse("alpine"), Path::new("."))
            .await
            .unwrap_err();
        assert!(matches!(err, MetamorphError::Unsupported { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_in_translated_repo_dir() {
        let repo = tempfile::tempdir().unwrap();
        std::fs::write(repo.path().join("marker.txt"), "here").unwrap();

        let config = ContainerConfig::new(DockerImage::parse("alpine"), vec!["cat".into(), "marker.txt".into()])
            .with_working_dir("/usr/src/repo");
        let host = HostConfig::new(vec![Mount::bind(repo.path().to_string_lossy(), "/usr/src/repo")]);

        let out = runtime().run(None, &config, &host).await.unwrap();
        assert_eq!(out.output, "here");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_carries_code_and_output() {
        let config = ContainerConfig::new(
            DockerImage::parse("alpine"),
            vec!["sh".into(), "-c".into(), "echo $STAGE; exit 4".into()],
        )
        .with_env([("STAGE".to_string(), "lint".to_string())].into());

        let err = runtime().run(None, &config, &HostConfig::default()).await.unwrap_err();
        assert_eq!(err.exit_code(), Some(4));
        assert_eq!(err.captured_output(), Some("lint\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let script = format!("sleep 2; touch {}", marker.display());
        let config = ContainerConfig::new(DockerImage::parse("alpine"), vec!["sh".into(), "-c".into(), script])
            .with_timeout(Some(std::time::Duration::from_millis(200)));

        let err = runtime().run(None, &config, &HostConfig::default()).await.unwrap_err();
        assert!(matches!(err, MetamorphError::StepTimeout { .. }));

        tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let config = ContainerConfig::new(DockerImage::parse("alpine"), Vec::new());
        let err = runtime().run(None, &config, &HostConfig::default()).await.unwrap_err();
        assert!(matches!(err, MetamorphError::Engine { .. }));
    }
}
