//! Running host commands with captured output.

use crate::capture::{capture, CaptureOptions, Output};
use crate::errors::MetamorphError;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::info;

/// Options for running a host command.
#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    /// Directory to run in; the current directory when unset.
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables layered over the inherited environment.
    pub env: HashMap<String, String>,
    /// Do not log the arguments.
    pub sensitive_args: bool,
    /// Echo output lines to the log as they arrive.
    pub stream_output: bool,
    /// Label for echoed lines.
    pub label: Option<String>,
    /// Text written to the child's stdin, which is then closed.
    pub stdin: Option<String>,
}

impl CommandOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Adds environment variables.
    #[must_use]
    pub fn with_env(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(env);
        self
    }

    /// Marks the arguments as sensitive.
    #[must_use]
    pub const fn sensitive(mut self) -> Self {
        self.sensitive_args = true;
        self
    }

    /// Enables live echo of output.
    #[must_use]
    pub const fn with_stream_output(mut self, stream: bool) -> Self {
        self.stream_output = stream;
        self
    }

    /// Sets the echo label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Feeds the given text to stdin.
    #[must_use]
    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }
}

/// The result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// Captured output.
    pub output: Output,
    /// Exit status.
    pub status: ExitStatus,
}

impl CommandOutcome {
    /// Returns true if the command exited with status zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Returns the exit code, or -1 if the process was killed by a signal.
    #[must_use]
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }
}

/// Runs a command to completion, capturing stdout and stderr.
///
/// A non-zero exit is not an error here; inspect [`CommandOutcome::status`].
///
/// # Errors
///
/// Returns an error if the process cannot be spawned or its output cannot
/// be read.
pub async fn run_command(
    options: &CommandOptions,
    program: &str,
    args: &[String],
) -> Result<CommandOutcome, MetamorphError> {
    if options.sensitive_args {
        info!("Running command: {program} (args redacted)");
    } else {
        info!("Running command: {program} {}", args.join(" "));
    }

    let mut cmd = Command::new(program);
    cmd.args(args)
        .envs(&options.env)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if options.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .kill_on_drop(true);
    if let Some(dir) = &options.working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn()?;

    if let Some(input) = &options.stdin {
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes()).await?;
            stdin.shutdown().await?;
        }
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("child stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("child stderr was not piped"))?;

    let mut capture_options = CaptureOptions::new().with_stream_output(options.stream_output);
    if let Some(label) = &options.label {
        capture_options = capture_options.with_label(label.clone());
    }

    let output = capture(stdout, stderr, &capture_options).await?;
    let status = child.wait().await?;

    Ok(CommandOutcome { output, status })
}

/// Runs a command and returns its stdout.
///
/// # Errors
///
/// Returns an error if the command cannot run or exits non-zero.
pub async fn run_command_and_get_stdout(
    options: &CommandOptions,
    program: &str,
    args: &[String],
) -> Result<String, MetamorphError> {
    let outcome = run_command(options, program, args).await?;
    if outcome.success() {
        Ok(outcome.output.stdout())
    } else {
        Err(MetamorphError::NonZeroExit {
            code: outcome.code(),
            output: outcome.output.combined(),
        })
    }
}

/// Returns true if `command` resolves to an executable file.
///
/// Names containing a path separator are checked directly; bare names are
/// searched for on `PATH`.
#[must_use]
pub fn command_installed(command: &str) -> bool {
    if command.contains(std::path::MAIN_SEPARATOR) {
        return is_executable(Path::new(command));
    }
    std::env::var_os("PATH").is_some_and(|paths| {
        std::env::split_paths(&paths).any(|dir| is_executable(&dir.join(command)))
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_captures_both_streams() {
        let outcome = run_command(&CommandOptions::new(), "sh", &sh("printf 'a\\n'; printf 'b\\n' >&2"))
            .await
            .unwrap();

        assert!(outcome.success());
        assert_eq!(outcome.output.stdout_lines(), ["a\n".to_string()]);
        assert_eq!(outcome.output.stderr_lines(), ["b\n".to_string()]);
        assert_eq!(outcome.output.merged_lines().len(), 2);
    }

    #[tokio::test]
    async fn test_reports_exit_code() {
        let outcome = run_command(&CommandOptions::new(), "sh", &sh("printf 'tail'; exit 3"))
            .await
            .unwrap();

        assert!(!outcome.success());
        assert_eq!(outcome.code(), 3);
        assert_eq!(outcome.output.stdout(), "tail");
    }

    #[tokio::test]
    async fn test_env_and_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let options = CommandOptions::new()
            .with_working_dir(dir.path())
            .with_env([("GREETING".to_string(), "hi".to_string())]);

        let stdout = run_command_and_get_stdout(&options, "sh", &sh("echo $GREETING; pwd"))
            .await
            .unwrap();

        let canonical = dir.path().canonicalize().unwrap();
        assert!(stdout.starts_with("hi\n"));
        assert!(stdout.contains(canonical.to_str().unwrap()));
    }

    #[tokio::test]
    async fn test_stdin_is_fed() {
        let options = CommandOptions::new().with_stdin("secret").sensitive();
        let stdout = run_command_and_get_stdout(&options, "cat", &[]).await.unwrap();
        assert_eq!(stdout, "secret");
    }

    #[tokio::test]
    async fn test_non_zero_is_error_for_stdout_helper() {
        let err = run_command_and_get_stdout(&CommandOptions::new(), "sh", &sh("exit 1"))
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), Some(1));
    }

    #[test]
    fn test_command_installed() {
        assert!(command_installed("sh"));
        assert!(!command_installed("definitely-not-a-real-binary-4242"));
    }
}
