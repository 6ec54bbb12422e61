//! Final run report: every stage's status, durations, and failure detail
//! sufficient to diagnose without re-running.

use crate::executor::{StageResult, StageStatus};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;
use uuid::Uuid;

/// The overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// All stages succeeded and artifacts were collected.
    Completed,
    /// A stage failed (or the run was cancelled) and the walk halted.
    Failed,
}

/// Detail about the failure that halted a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureDetail {
    /// The failing stage id.
    pub stage: String,
    /// Machine-readable error kind.
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Log excerpt from the failing stage.
    pub log_tail: Vec<String>,
}

/// The final report for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// The profile that was built.
    pub profile: String,
    /// Overall status.
    pub status: RunStatus,
    /// Per-stage results, in execution order.
    pub stages: Vec<StageResult>,
    /// Total wall-clock duration in milliseconds.
    pub total_duration_ms: f64,
    /// Failure detail, when the run failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetail>,
    /// Warnings recorded during the run (best-effort failures, artifact
    /// collisions, stale locks).
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Paths written into the output directory.
    #[serde(default)]
    pub artifacts_written: Vec<PathBuf>,
}

impl RunReport {
    /// Returns true if the run completed fully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Renders a human-readable summary.
    #[must_use]
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "run {} ({})", self.run_id, self.profile);
        for stage in &self.stages {
            let duration = match stage.status {
                StageStatus::Skipped => String::from("-"),
                _ => format!("{:.1}s", stage.duration_ms / 1000.0),
            };
            let _ = writeln!(out, "  {:<20} {:<10} {}", stage.stage_id, stage.status, duration);
        }
        let _ = writeln!(
            out,
            "total: {:.1}s, artifacts: {}",
            self.total_duration_ms / 1000.0,
            self.artifacts_written.len()
        );
        for warning in &self.warnings {
            let _ = writeln!(out, "warning: {warning}");
        }
        if let Some(failure) = &self.failure {
            let _ = writeln!(
                out,
                "failed at stage '{}' ({}): {}",
                failure.stage, failure.kind, failure.message
            );
            for line in &failure.log_tail {
                let _ = writeln!(out, "    | {line}");
            }
        }
        out
    }
}
