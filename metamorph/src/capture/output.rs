//! Captured process output.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which standard stream a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl StreamKind {
    /// Returns the stream name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The text captured from one execution.
///
/// Lines keep their trailing newline, except a final line that had none.
/// `merged` records both streams in the order their readers took the
/// shared lock, which is close to but not exactly chronological.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub(crate) stdout: Vec<String>,
    pub(crate) stderr: Vec<String>,
    pub(crate) merged: Vec<String>,
}

impl Output {
    /// Creates an output from already separated line lists.
    #[must_use]
    pub fn from_lines(stdout: Vec<String>, stderr: Vec<String>, merged: Vec<String>) -> Self {
        Self {
            stdout,
            stderr,
            merged,
        }
    }

    /// Returns stdout as one string.
    #[must_use]
    pub fn stdout(&self) -> String {
        self.stdout.concat()
    }

    /// Returns stderr as one string.
    #[must_use]
    pub fn stderr(&self) -> String {
        self.stderr.concat()
    }

    /// Returns both streams interleaved as one string.
    #[must_use]
    pub fn combined(&self) -> String {
        self.merged.concat()
    }

    /// Returns the stdout lines.
    #[must_use]
    pub fn stdout_lines(&self) -> &[String] {
        &self.stdout
    }

    /// Returns the stderr lines.
    #[must_use]
    pub fn stderr_lines(&self) -> &[String] {
        &self.stderr
    }

    /// Returns the merged lines.
    #[must_use]
    pub fn merged_lines(&self) -> &[String] {
        &self.merged
    }

    /// Returns true if nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_joins_lines() {
        let out = Output::from_lines(
            vec!["a\n".into(), "b".into()],
            vec!["err\n".into()],
            vec!["a\n".into(), "err\n".into(), "b".into()],
        );

        assert_eq!(out.stdout(), "a\nb");
        assert_eq!(out.stderr(), "err\n");
        assert_eq!(out.combined(), "a\nerr\nb");
        assert!(!out.is_empty());
    }

    #[test]
    fn test_default_is_empty() {
        let out = Output::default();
        assert!(out.is_empty());
        assert_eq!(out.combined(), "");
    }

    #[test]
    fn test_stream_kind_display() {
        assert_eq!(StreamKind::Stdout.to_string(), "stdout");
        assert_eq!(StreamKind::Stderr.as_str(), "stderr");
    }
}
