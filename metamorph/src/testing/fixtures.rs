//! Test fixtures.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::manifest::{Pipeline, Repo, Step};
use crate::repo::RepoResolver;

/// A resolver that returns the path unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticResolver;

#[async_trait]
impl RepoResolver for StaticResolver {
    async fn resolve(&self, path: &Path) -> PathBuf {
        path.to_path_buf()
    }
}

/// A complete manifest exercising every field.
pub const SAMPLE_MANIFEST: &str = r"
name: go-upgrade
work_dir: /usr/src/repo
assignees: [platform-team]
gitlab:
  org: ${GITLAB_ORG}
  branch_name: metamorph/go-upgrade
  merge_request_title: Upgrade Go toolchain
  labels: [automated]
repos:
  - name: api
    path: /src/api
  - name: web
    path: /src/web
steps:
  - name: bump
    image: golang:1.22
    command: go mod edit -go=1.22
  - name: tidy
    image: golang:1.22
    command: go mod tidy
    environment:
      GOFLAGS: -mod=mod
    timeout: 5m
    retry:
      max_attempts: 2
      interval: 1s
";

/// Builds a pipeline with one repository per name (path `/src/<name>`)
/// and one `alpine` step per command (named after its first word).
#[must_use]
pub fn pipeline(repos: &[&str], commands: &[&str]) -> Pipeline {
    let mut pipeline = Pipeline::new("fixture");
    for name in repos {
        pipeline.add_repo(Repo::new(*name, format!("/src/{name}")));
    }
    for command in commands {
        let name = command.split_whitespace().next().unwrap_or("step");
        pipeline.add_step(Step::new(name, "alpine:3.20", *command));
    }
    pipeline
}
