//! Resolving a repository checkout to the directory that gets mounted.

use crate::shell::{run_command, CommandOptions};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Turns a configured repository path into the host directory mounted at
/// the fixed in-container path.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RepoResolver: Send + Sync {
    /// Resolves `path`. Never fails; falls back to the input.
    async fn resolve(&self, path: &Path) -> PathBuf;
}

/// Resolves to the root of the enclosing git work tree.
///
/// Outside a work tree, or when git is missing, the path itself is used.
/// Relative results are made absolute against the process directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitRootResolver;

impl GitRootResolver {
    /// Creates a resolver.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RepoResolver for GitRootResolver {
    async fn resolve(&self, path: &Path) -> PathBuf {
        let options = CommandOptions::new().with_working_dir(path);
        let args = ["rev-parse".to_string(), "--show-toplevel".to_string()];

        let root = match run_command(&options, "git", &args).await {
            Ok(outcome) if outcome.success() => PathBuf::from(outcome.output.stdout().trim()),
            Ok(outcome) => {
                debug!(
                    path = %path.display(),
                    exit_code = outcome.code(),
                    "git rev-parse failed, falling back to the given path"
                );
                path.to_path_buf()
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "git unavailable, falling back to the given path");
                path.to_path_buf()
            }
        };

        absolutize(root)
    }
}

fn absolutize(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    std::env::current_dir().map_or(path.clone(), |cwd| cwd.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_falls_back_outside_work_tree() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = GitRootResolver::new().resolve(dir.path()).await;
        assert_eq!(resolved, dir.path());
    }

    #[tokio::test]
    async fn test_missing_directory_falls_back() {
        let path = Path::new("/definitely/not/a/checkout");
        let resolved = GitRootResolver::new().resolve(path).await;
        assert_eq!(resolved, path);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolves_work_tree_root() {
        if !crate::shell::command_installed("git") {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let init = run_command(
            &CommandOptions::new().with_working_dir(dir.path()),
            "git",
            &["init".to_string(), "-q".to_string()],
        )
        .await
        .unwrap();
        assert!(init.success());

        let nested = dir.path().join("svc").join("api");
        std::fs::create_dir_all(&nested).unwrap();

        let resolved = GitRootResolver::new().resolve(&nested).await;
        assert_eq!(resolved.canonicalize().unwrap(), dir.path().canonicalize().unwrap());
    }

    #[test]
    fn test_absolutize() {
        assert_eq!(absolutize(PathBuf::from("/abs")), PathBuf::from("/abs"));
        assert!(absolutize(PathBuf::from("rel")).is_absolute());
    }
}
