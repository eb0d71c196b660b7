//! Container image references.

use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Tag used when a reference names neither a tag nor a digest.
pub const DEFAULT_TAG: &str = "latest";

/// An image reference split into repository and tag.
///
/// Digest references (`name@sha256:...`) keep the whole string as the
/// repository and carry an empty tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DockerImage {
    repo: String,
    tag: String,
}

impl DockerImage {
    /// Creates an image from explicit parts.
    #[must_use]
    pub fn new(repo: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            tag: tag.into(),
        }
    }

    /// Parses a reference. Never fails; anything unrecognised becomes the
    /// repository with the default tag.
    #[must_use]
    pub fn parse(reference: &str) -> Self {
        if reference.contains('@') {
            return Self::new(reference, "");
        }

        match reference.rsplit_once(':') {
            // A slash after the colon means the colon belongs to a registry port.
            Some((_, tag)) if tag.contains('/') => Self::new(reference, DEFAULT_TAG),
            Some((name, "")) => Self::new(name, DEFAULT_TAG),
            Some((name, tag)) => Self::new(name, tag),
            None => Self::new(reference, DEFAULT_TAG),
        }
    }

    /// Returns the repository component.
    #[must_use]
    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Returns the tag, empty for digest references.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Returns `repo:tag`, or the bare repository when the tag is empty.
    #[must_use]
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DockerImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tag.is_empty() {
            f.write_str(&self.repo)
        } else {
            write!(f, "{}:{}", self.repo, self.tag)
        }
    }
}

impl FromStr for DockerImage {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for DockerImage {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}
