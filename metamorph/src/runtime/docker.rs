//! Docker backend driven through the `docker` CLI.

use super::{ContainerConfig, ContainerRuntime, DockerImage, ExecutionOutput, HostConfig, RuntimeType};
use crate::cancellation::{run_with_cleanup, DropGuard};
use crate::config::{Config, RegistryAuth};
use crate::errors::{MetamorphError, Result, RuntimeUnavailableError};
use crate::shell::{command_installed, run_command, CommandOptions, CommandOutcome};
use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const DEFAULT_DOCKERFILE: &str = "Dockerfile";
const REMOVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs workloads as docker containers.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    binary: String,
    registry: RegistryAuth,
    pull_timeout: Duration,
    remove_containers: bool,
    stream_output: bool,
}

impl DockerRuntime {
    /// Creates a backend from the engine configuration.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            binary: "docker".to_string(),
            registry: config.registry.clone(),
            pull_timeout: config.pull_timeout(),
            remove_containers: config.remove_containers,
            stream_output: config.stream_output,
        }
    }

    /// Uses a different CLI binary, e.g. a docker-compatible replacement.
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    async fn docker(&self, options: &CommandOptions, args: Vec<String>) -> Result<CommandOutcome> {
        run_command(options, &self.binary, &args).await
    }

    /// Runs a docker command that must succeed and returns its trimmed stdout.
    async fn docker_checked(&self, operation: &str, args: Vec<String>) -> Result<String> {
        let outcome = self.docker(&CommandOptions::new(), args).await?;
        if outcome.success() {
            Ok(outcome.output.stdout().trim().to_string())
        } else {
            Err(MetamorphError::Engine {
                operation: operation.to_string(),
                message: outcome.output.combined().trim().to_string(),
            })
        }
    }

    async fn image_exists(&self, image: &DockerImage) -> Result<bool> {
        let outcome = self
            .docker(&CommandOptions::new(), args(["image", "inspect", &image.canonical()]))
            .await?;
        Ok(outcome.success())
    }

    async fn login(&self) -> Result<()> {
        let options = CommandOptions::new()
            .with_stdin(self.registry.password.clone())
            .sensitive();
        let outcome = self
            .docker(
                &options,
                args([
                    "login",
                    "--username",
                    &self.registry.username,
                    "--password-stdin",
                    &self.registry.host,
                ]),
            )
            .await?;
        if outcome.success() {
            Ok(())
        } else {
            error!(host = %self.registry.host, "Registry login failed");
            Err(MetamorphError::Engine {
                operation: "login".to_string(),
                message: outcome.output.combined().trim().to_string(),
            })
        }
    }

    async fn remove(&self, id: &str) {
        if let Err(e) = self.docker_checked("rm", args(["rm", "-f", id])).await {
            warn!(container = id, error = %e, "Failed to remove container");
        } else {
            debug!(container = id, "Removed container");
        }
    }

    async fn kill(&self, id: &str) {
        if let Err(e) = self.docker_checked("kill", args(["kill", id])).await {
            warn!(container = id, error = %e, "Failed to stop container");
        } else {
            debug!(container = id, "Stopped container");
        }
    }

    /// Runs the container to exit, stopping it if the deadline passes first.
    async fn run_to_exit(&self, name: &str, id: &str, config: &ContainerConfig) -> Result<ExecutionOutput> {
        let Some(limit) = config.timeout else {
            return self.start_and_wait(id, config).await;
        };
        match tokio::time::timeout(limit, self.start_and_wait(id, config)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    container = id,
                    timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    "Container timed out, stopping it"
                );
                self.kill(id).await;
                Err(MetamorphError::StepTimeout {
                    step: name.to_string(),
                    timeout: limit,
                })
            }
        }
    }

    async fn start_and_wait(&self, id: &str, config: &ContainerConfig) -> Result<ExecutionOutput> {
        self.docker_checked("start", args(["start", id])).await?;

        let log_options = CommandOptions::new()
            .with_stream_output(self.stream_output)
            .with_label(config.image.canonical());
        let logs = self
            .docker(&log_options, args(["logs", "--follow", id]))
            .await?;
        if !logs.success() {
            self.kill(id).await;
            return Err(MetamorphError::Engine {
                operation: "logs".to_string(),
                message: logs.output.combined().trim().to_string(),
            });
        }

        let status = self.docker_checked("wait", args(["wait", id])).await?;
        let exit_code: i32 = status.lines().last().unwrap_or_default().trim().parse().map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidData, format!("unexpected wait status '{status}'"))
        })?;

        let output = match (config.attach_stdout, config.attach_stderr) {
            (true, true) => logs.output.combined(),
            (true, false) => logs.output.stdout(),
            (false, true) => logs.output.stderr(),
            (false, false) => String::new(),
        };

        if exit_code == 0 {
            Ok(ExecutionOutput { exit_code, output })
        } else {
            Err(MetamorphError::NonZeroExit {
                code: exit_code,
                output,
            })
        }
    }

    /// Returns a closure that stops the container from a synchronous drop,
    /// removing it too when removal is configured.
    fn spawn_teardown(&self, id: String) -> impl FnOnce() {
        let binary = self.binary.clone();
        let remove = self.remove_containers;
        move || {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let args = if remove {
                        vec!["rm", "-f", id.as_str()]
                    } else {
                        vec!["kill", id.as_str()]
                    };
                    let _ = tokio::process::Command::new(binary).args(args).output().await;
                });
            }
        }
    }
}

/// Builds the `docker create` argument list.
pub(crate) fn create_args(name: &str, config: &ContainerConfig, host_config: &HostConfig) -> Vec<String> {
    let mut out = args(["create", "--name", name]);

    if !config.working_dir.is_empty() {
        out.extend(args(["-w", &config.working_dir]));
    }
    for pair in config.env_pairs() {
        out.push("-e".to_string());
        out.push(pair);
    }
    for mount in &host_config.mounts {
        out.push("--mount".to_string());
        out.push(mount.to_mount_arg());
    }
    if config.tty {
        out.push("-t".to_string());
    }

    let mut cmd = config.cmd.clone();
    if let Some((entrypoint, rest)) = config.entrypoint.split_first() {
        out.extend(args(["--entrypoint", entrypoint]));
        cmd.splice(0..0, rest.iter().cloned());
    }

    out.push(config.image.canonical());
    out.extend(cmd);
    out
}

fn args<const N: usize>(items: [&str; N]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn runtime_type(&self) -> RuntimeType {
        RuntimeType::Docker
    }

    async fn is_available(&self) -> std::result::Result<(), RuntimeUnavailableError> {
        let runtime = RuntimeType::Docker.to_string();
        if !command_installed(&self.binary) {
            return Err(RuntimeUnavailableError::NotInstalled { runtime });
        }
        match self.docker(&CommandOptions::new(), args(["info"])).await {
            Ok(outcome) if outcome.success() => Ok(()),
            _ => Err(RuntimeUnavailableError::NotStarted { runtime }),
        }
    }

    async fn build_image(&self, image: &DockerImage, context_dir: &Path) -> Result<String> {
        let dockerfile = context_dir.join(DEFAULT_DOCKERFILE);
        info!(image = %image, context = %context_dir.display(), "Building image");

        let outcome = self
            .docker(
                &CommandOptions::new(),
                vec![
                    "build".to_string(),
                    "-t".to_string(),
                    image.canonical(),
                    "-f".to_string(),
                    dockerfile.to_string_lossy().into_owned(),
                    context_dir.to_string_lossy().into_owned(),
                ],
            )
            .await?;

        let log = outcome.output.combined();
        debug!(image = %image, "{log}");
        if outcome.success() {
            Ok(log)
        } else {
            Err(MetamorphError::Build {
                image: image.canonical(),
                message: log.trim().to_string(),
            })
        }
    }

    async fn pull_image(&self, image: &DockerImage) -> Result<()> {
        if self.image_exists(image).await? {
            return Err(MetamorphError::ImageAlreadyExists {
                image: image.canonical(),
            });
        }

        if self.registry.is_configured() {
            self.login().await?;
        }

        info!(image = %image, "Pulling image");
        let pull_options = CommandOptions::new();
        let pull = self.docker(&pull_options, args(["pull", &image.canonical()]));

        match tokio::time::timeout(self.pull_timeout, pull).await {
            Err(_) => {
                error!(image_ref = %image, "Timeout pulling image");
                Err(MetamorphError::ImagePullTimeout {
                    image: image.canonical(),
                    timeout: self.pull_timeout,
                })
            }
            Ok(Ok(outcome)) if outcome.success() => Ok(()),
            Ok(Ok(outcome)) => {
                let message = outcome.output.combined().trim().to_string();
                error!(image_ref = %image, error = %message, "Failed pulling image");
                Err(MetamorphError::ImagePull {
                    image: image.canonical(),
                    message,
                })
            }
            Ok(Err(e)) => Err(e),
        }
    }

    async fn run(
        &self,
        container_id: Option<&str>,
        config: &ContainerConfig,
        host_config: &HostConfig,
    ) -> Result<ExecutionOutput> {
        let name = container_id.map_or_else(
            || format!("metamorph-{}", uuid::Uuid::new_v4().simple()),
            ToString::to_string,
        );

        let id = self
            .docker_checked("create", create_args(&name, config, host_config))
            .await?;
        debug!(container = %id, image = %config.image, "Created container");

        let mut guard = DropGuard::new(self.spawn_teardown(id.clone()));
        let result = if self.remove_containers {
            run_with_cleanup(
                self.run_to_exit(&name, &id, config),
                || self.remove(&id),
                REMOVE_TIMEOUT,
            )
            .await
        } else {
            self.run_to_exit(&name, &id, config).await
        };
        guard.disarm();
        result
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::runtime::Mount;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Writes an executable stand-in for the docker CLI that appends every
    /// invocation to `calls.log` next to itself.
    fn fake_docker(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("docker");
        let script = format!(
            "#!/bin/sh\necho \"$@\" >> \"$(dirname \"$0\")/calls.log\"\n{body}\n"
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn calls(dir: &TempDir) -> Vec<String> {
        std::fs::read_to_string(dir.path().join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    fn runtime(binary: &Path, config: Config) -> DockerRuntime {
        DockerRuntime::new(&config.with_stream_output(false)).with_binary(binary.to_string_lossy())
    }

    #[test]
    fn test_create_args() {
        let config = ContainerConfig::new(DockerImage::parse("golang:1.22"), vec!["go".into(), "test".into()])
            .with_working_dir("/usr/src/repo")
            .with_env([("CGO_ENABLED".to_string(), "0".to_string())].into());
        let host = HostConfig::new(vec![Mount::bind("/src/api", "/usr/src/repo")]);

        assert_eq!(
            create_args("job", &config, &host),
            vec![
                "create",
                "--name",
                "job",
                "-w",
                "/usr/src/repo",
                "-e",
                "CGO_ENABLED=0",
                "--mount",
                "type=bind,source=/src/api,target=/usr/src/repo",
                "golang:1.22",
                "go",
                "test",
            ]
        );
    }

    #[test]
    fn test_create_args_entrypoint() {
        let config = ContainerConfig::new(DockerImage::parse("alpine"), vec!["echo hi".into()])
            .with_entrypoint(vec!["/bin/sh".into(), "-c".into()]);
        let out = create_args("job", &config, &HostConfig::default());
        let tail: Vec<&str> = out.iter().map(String::as_str).skip(3).collect();
        assert_eq!(tail, ["--entrypoint", "/bin/sh", "alpine:latest", "-c", "echo hi"]);
    }

    #[tokio::test]
    async fn test_is_available() {
        let dir = tempfile::tempdir().unwrap();
        let stopped = fake_docker(&dir, "exit 1");
        let err = runtime(&stopped, Config::default()).is_available().await.unwrap_err();
        assert!(matches!(err, RuntimeUnavailableError::NotStarted { .. }));

        let missing = runtime(&dir.path().join("nope"), Config::default());
        let err = missing.is_available().await.unwrap_err();
        assert!(matches!(err, RuntimeUnavailableError::NotInstalled { .. }));
    }

    #[tokio::test]
    async fn test_pull_present_image_signals_exists() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_docker(&dir, "exit 0");
        let rt = runtime(&bin, Config::default());
        let image = DockerImage::parse("alpine");

        for _ in 0..2 {
            let err = rt.pull_image(&image).await.unwrap_err();
            assert!(err.is_image_exists());
        }
        assert!(calls(&dir).iter().all(|c| c.starts_with("image inspect")));
    }

    #[tokio::test]
    async fn test_pull_logs_in_with_credentials() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_docker(
            &dir,
            "case \"$1\" in image) exit 1 ;; login) cat > \"$(dirname \"$0\")/password\" ;; esac",
        );
        let config = Config::default().with_registry(RegistryAuth::new("ci-bot", "s3cret"));
        runtime(&bin, config).pull_image(&DockerImage::parse("alpine:3.20")).await.unwrap();

        assert_eq!(
            calls(&dir),
            vec![
                "image inspect alpine:3.20",
                "login --username ci-bot --password-stdin registry.gitlab.com",
                "pull alpine:3.20",
            ]
        );
        assert_eq!(std::fs::read_to_string(dir.path().join("password")).unwrap(), "s3cret");
    }

    #[tokio::test]
    async fn test_pull_failure_and_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_docker(&dir, "case \"$1\" in pull) echo denied >&2; exit 1 ;; *) exit 1 ;; esac");
        let err = runtime(&bin, Config::default())
            .pull_image(&DockerImage::parse("private/tool"))
            .await
            .unwrap_err();
        assert!(matches!(err, MetamorphError::ImagePull { ref message, .. } if message == "denied"));

        let dir = tempfile::tempdir().unwrap();
        let bin = fake_docker(&dir, "case \"$1\" in pull) sleep 5 ;; *) exit 1 ;; esac");
        let mut config = Config::default();
        config.pull_timeout_seconds = 0;
        let err = runtime(&bin, config)
            .pull_image(&DockerImage::parse("huge/image"))
            .await
            .unwrap_err();
        assert!(matches!(err, MetamorphError::ImagePullTimeout { .. }));
    }

    #[tokio::test]
    async fn test_run_lifecycle_removes_container() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_docker(
            &dir,
            "case \"$1\" in create) echo cid-1 ;; logs) echo out; echo err >&2 ;; wait) echo 3 ;; esac",
        );
        let config = ContainerConfig::new(DockerImage::parse("alpine"), vec!["false".into()]);

        let err = runtime(&bin, Config::default())
            .run(Some("job-1"), &config, &HostConfig::default())
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), Some(3));
        let output = err.captured_output().unwrap();
        assert!(output.contains("out\n") && output.contains("err\n"));

        let calls = calls(&dir);
        assert!(calls[0].starts_with("create --name job-1"));
        assert_eq!(&calls[1..], ["start cid-1", "logs --follow cid-1", "wait cid-1", "rm -f cid-1"]);
    }

    #[tokio::test]
    async fn test_run_success_without_removal() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_docker(
            &dir,
            "case \"$1\" in create) echo cid-2 ;; logs) echo done ;; wait) echo 0 ;; esac",
        );
        let mut config = Config::default();
        config.remove_containers = false;
        let container = ContainerConfig::new(DockerImage::parse("alpine"), vec!["true".into()]);

        let out = runtime(&bin, config)
            .run(None, &container, &HostConfig::default())
            .await
            .unwrap();

        assert_eq!(out.exit_code, 0);
        assert_eq!(out.output, "done\n");
        assert!(!calls(&dir).iter().any(|c| c.starts_with("rm")));
    }

    #[tokio::test]
    async fn test_timeout_stops_container() {
        for (remove, teardown) in [(false, vec!["kill cid-3"]), (true, vec!["kill cid-3", "rm -f cid-3"])] {
            let dir = tempfile::tempdir().unwrap();
            let bin = fake_docker(
                &dir,
                "case \"$1\" in create) echo cid-3 ;; logs) sleep 3 ;; wait) echo 0 ;; esac",
            );
            let mut config = Config::default();
            config.remove_containers = remove;
            let container = ContainerConfig::new(DockerImage::parse("alpine"), vec!["sleep".into()])
                .with_timeout(Some(Duration::from_millis(300)));

            let err = runtime(&bin, config)
                .run(Some("job-3"), &container, &HostConfig::default())
                .await
                .unwrap_err();
            assert!(matches!(err, MetamorphError::StepTimeout { ref step, .. } if step == "job-3"));

            // the container is stopped before run returns
            let mut expected = vec!["start cid-3", "logs --follow cid-3"];
            expected.extend(teardown);
            let calls = calls(&dir);
            assert_eq!(calls[1..], expected[..]);
        }
    }

    #[tokio::test]
    async fn test_failed_log_stream_is_engine_error() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_docker(
            &dir,
            "case \"$1\" in create) echo cid-4 ;; logs) echo 'log driver unavailable' >&2; exit 1 ;; esac",
        );
        let container = ContainerConfig::new(DockerImage::parse("alpine"), vec!["true".into()]);

        let err = runtime(&bin, Config::default())
            .run(None, &container, &HostConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MetamorphError::Engine { ref operation, ref message } if operation == "logs" && message == "log driver unavailable"
        ));
        assert_eq!(calls(&dir)[1..], ["start cid-4", "logs --follow cid-4", "kill cid-4", "rm -f cid-4"]);
    }

    #[tokio::test]
    async fn test_create_failure_is_engine_error() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_docker(&dir, "echo 'no such image' >&2; exit 125");
        let container = ContainerConfig::new(DockerImage::parse("ghost"), vec!["true".into()]);

        let err = runtime(&bin, Config::default())
            .run(None, &container, &HostConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MetamorphError::Engine { ref operation, .. } if operation == "create"));
    }

    #[tokio::test]
    async fn test_build_image() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_docker(&dir, "echo built");
        let context = tempfile::tempdir().unwrap();

        let log = runtime(&bin, Config::default())
            .build_image(&DockerImage::parse("tool:dev"), context.path())
            .await
            .unwrap();
        assert_eq!(log, "built\n");
        assert!(calls(&dir)[0].starts_with("build -t tool:dev -f "));

        let failing = fake_docker(&dir, "echo 'syntax error' >&2; exit 1");
        let err = runtime(&failing, Config::default())
            .build_image(&DockerImage::parse("tool:dev"), context.path())
            .await
            .unwrap_err();
        assert!(matches!(err, MetamorphError::Build { .. }));
    }
}
