//! Per-step execution records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// The outcome of one (repository, step) execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepResult {
    /// Repository name.
    pub repo: String,
    /// Step name.
    pub step_name: String,
    /// Exit code of the final attempt; -1 when the workload never ran.
    pub exit_code: i32,
    /// Combined output of the final attempt.
    pub output: String,
    /// Failure description; `None` on success.
    pub error: Option<String>,
    /// Wall-clock time across all attempts.
    pub duration: Duration,
    /// Attempts made.
    pub attempts: u32,
    /// When the step started.
    pub started_at: DateTime<Utc>,
}

impl StepResult {
    /// Returns true if the step succeeded.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.error.is_none()
    }

    /// Returns the duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Per-repository rollup of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoSummary {
    /// Repository name.
    pub repo: String,
    /// Steps with a recorded result.
    pub steps_run: usize,
    /// The step that failed, if any.
    pub failed_step: Option<String>,
    /// True when no recorded step failed.
    pub success: bool,
}

/// Groups results by repository, in order of first appearance.
#[must_use]
pub fn summarize(results: &[StepResult]) -> Vec<RepoSummary> {
    let mut summaries: Vec<RepoSummary> = Vec::new();

    for result in results {
        let idx = match summaries.iter().position(|s| s.repo == result.repo) {
            Some(idx) => idx,
            None => {
                summaries.push(RepoSummary {
                    repo: result.repo.clone(),
                    steps_run: 0,
                    failed_step: None,
                    success: true,
                });
                summaries.len() - 1
            }
        };

        let summary = &mut summaries[idx];
        summary.steps_run += 1;
        if !result.success() && summary.failed_step.is_none() {
            summary.failed_step = Some(result.step_name.clone());
            summary.success = false;
        }
    }

    summaries
}
