//! Stage execution against a resolved build configuration.
//!
//! One [`StageExecutor`] serves a whole run: it interpolates the stage's
//! templates, dispatches on the operation kind, and wraps the outcome in a
//! [`StageResult`]. External tools are opaque; their exit status is the sole
//! success signal.

mod collect;
mod compile;
mod extract;
pub mod fetch;
mod link;

pub use fetch::{FetchFailure, Fetcher, HttpFetcher};

use crate::cancellation::CancellationToken;
use crate::config::BuildConfiguration;
use crate::errors::ForgeflowError;
use crate::events::EventSink;
use crate::graph::{Operation, StageSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Status of one executed stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// The stage ran and succeeded.
    Succeeded,
    /// The stage ran and failed.
    Failed,
    /// The stage was skipped (resume) and never ran.
    Skipped,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Outcome of executing one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// The stage id.
    pub stage_id: String,
    /// The final status.
    pub status: StageStatus,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// When execution ended.
    pub ended_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: f64,
    /// Artifact source paths produced by the stage (collect stages only).
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,
    /// The last captured log lines.
    #[serde(default)]
    pub log_tail: Vec<String>,
    /// Full log file, when the stage streamed output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    /// Error message if the stage failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable error kind if the stage failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Reason the stage was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

impl StageResult {
    /// Creates a skipped result; skipped stages never execute.
    #[must_use]
    pub fn skipped(stage_id: impl Into<String>, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            stage_id: stage_id.into(),
            status: StageStatus::Skipped,
            started_at: now,
            ended_at: now,
            duration_ms: 0.0,
            artifacts: Vec::new(),
            log_tail: Vec::new(),
            log_file: None,
            error: None,
            error_kind: None,
            skip_reason: Some(reason.into()),
        }
    }

    /// Returns true if the stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == StageStatus::Succeeded
    }
}

/// What one operation produced: artifact paths plus its log lines.
#[derive(Debug, Default)]
pub(crate) struct OperationOutcome {
    pub artifacts: Vec<PathBuf>,
    pub log: Vec<String>,
}

impl OperationOutcome {
    pub(crate) fn logged(line: impl Into<String>) -> Self {
        Self {
            artifacts: Vec::new(),
            log: vec![line.into()],
        }
    }
}

/// Maximum log lines retained in a result's tail.
const LOG_TAIL_LINES: usize = 50;

/// Bounded buffer of the most recent log lines.
#[derive(Debug, Default)]
pub(crate) struct LogTail {
    lines: std::collections::VecDeque<String>,
}

impl LogTail {
    pub(crate) fn push(&mut self, line: String) {
        if self.lines.len() == LOG_TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub(crate) fn into_lines(self) -> Vec<String> {
        self.lines.into()
    }
}

/// Executes stages against one configuration.
pub struct StageExecutor {
    config: BuildConfiguration,
    sink: Arc<dyn EventSink>,
    token: Arc<CancellationToken>,
    fetcher: Arc<dyn Fetcher>,
}

impl std::fmt::Debug for StageExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageExecutor")
            .field("config", &self.config)
            .finish()
    }
}

impl StageExecutor {
    /// Creates an executor with the default HTTP fetcher.
    #[must_use]
    pub fn new(
        config: BuildConfiguration,
        sink: Arc<dyn EventSink>,
        token: Arc<CancellationToken>,
    ) -> Self {
        Self {
            config,
            sink,
            token,
            fetcher: Arc::new(HttpFetcher::new()),
        }
    }

    /// Replaces the fetcher; tests inject scripted failure sequences here.
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Returns the configuration this executor runs against.
    #[must_use]
    pub fn config(&self) -> &BuildConfiguration {
        &self.config
    }

    /// Executes one stage and returns its result.
    ///
    /// Failure is reported through the result, never panicked; the
    /// orchestrator decides whether it halts the walk.
    pub async fn execute(&self, spec: &StageSpec) -> StageResult {
        self.sink.try_emit(
            "stage.started",
            Some(serde_json::json!({
                "stage": spec.id,
                "kind": spec.operation.kind(),
            })),
        );

        let started_at = Utc::now();
        let start = Instant::now();

        let outcome = match spec.timeout_secs {
            Some(secs) => {
                let limit = std::time::Duration::from_secs(secs);
                match tokio::time::timeout(limit, self.run_operation(spec)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ForgeflowError::StageTimeout {
                        stage: spec.id.clone(),
                        timeout_secs: secs,
                    }),
                }
            }
            None => self.run_operation(spec).await,
        };

        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        let ended_at = Utc::now();

        match outcome {
            Ok(outcome) => {
                info!(stage = %spec.id, duration_ms, "stage succeeded");
                self.sink.try_emit(
                    "stage.completed",
                    Some(serde_json::json!({
                        "stage": spec.id,
                        "duration_ms": duration_ms,
                    })),
                );
                StageResult {
                    stage_id: spec.id.clone(),
                    status: StageStatus::Succeeded,
                    started_at,
                    ended_at,
                    duration_ms,
                    artifacts: outcome.artifacts,
                    log_tail: outcome.log,
                    log_file: self.log_file_for(spec),
                    error: None,
                    error_kind: None,
                    skip_reason: None,
                }
            }
            Err(err) => {
                if self.token.is_cancelled() {
                    self.discard_partial_outputs(spec);
                }
                warn!(stage = %spec.id, error = %err, "stage failed");
                self.sink.try_emit(
                    "stage.failed",
                    Some(serde_json::json!({
                        "stage": spec.id,
                        "error": err.to_string(),
                        "kind": err.kind(),
                        "duration_ms": duration_ms,
                    })),
                );
                let log_tail = match &err {
                    ForgeflowError::StageExecution(e) => e.log_tail.clone(),
                    _ => Vec::new(),
                };
                StageResult {
                    stage_id: spec.id.clone(),
                    status: StageStatus::Failed,
                    started_at,
                    ended_at,
                    duration_ms,
                    artifacts: Vec::new(),
                    log_tail,
                    log_file: self.log_file_for(spec),
                    error: Some(err.to_string()),
                    error_kind: Some(err.kind().to_string()),
                    skip_reason: None,
                }
            }
        }
    }

    async fn run_operation(&self, spec: &StageSpec) -> Result<OperationOutcome, ForgeflowError> {
        if self.token.is_cancelled() {
            return Err(ForgeflowError::Cancelled(
                self.token.reason().unwrap_or_else(|| "cancelled".to_string()),
            ));
        }

        match &spec.operation {
            Operation::Fetch {
                url,
                dest,
                checksum,
            } => {
                let url = self.config.interpolate(url)?;
                let dest = self.resolve_path(dest)?;
                fetch::run_fetch(
                    self.fetcher.as_ref(),
                    &url,
                    &dest,
                    checksum.as_deref(),
                    &self.config.fetch_retry_config(),
                    self.token.as_ref(),
                    self.sink.as_ref(),
                )
                .await
            }
            Operation::Extract { archive, dest } => {
                let archive = self.resolve_path(archive)?;
                let dest = self.resolve_path(dest)?;
                extract::run_extract(&archive, &dest)
            }
            Operation::Link { target, link } => {
                let target = self.resolve_path(target)?;
                let link = self.resolve_path(link)?;
                link::run_link(&target, &link)
            }
            Operation::Install { command } => {
                let command = self.config.interpolate(command)?;
                link::run_install(&spec.id, &command, self.config.working_dir()).await
            }
            Operation::Compile {
                command,
                workdir,
                env,
            } => {
                let command = self.config.interpolate(command)?;
                let workdir = self.resolve_path(workdir)?;
                let mut resolved_env = Vec::with_capacity(env.len() + 1);
                for (name, value) in env {
                    resolved_env.push((name.clone(), self.config.interpolate(value)?));
                }
                if self.config.toggle("debug_build") {
                    resolved_env.push(("DEBUG".to_string(), "1".to_string()));
                }
                compile::run_compile(compile::CompileRequest {
                    stage_id: &spec.id,
                    command: &command,
                    workdir: &workdir,
                    env: &resolved_env,
                    log_file: self.log_file_for(spec),
                    sink: self.sink.as_ref(),
                    token: self.token.as_ref(),
                })
                .await
            }
            Operation::Collect { root, pattern } => {
                let root = self.resolve_path(root)?;
                let pattern = self.config.interpolate(pattern)?;
                collect::run_collect(&spec.id, &root, &pattern, self.sink.as_ref())
            }
        }
    }

    /// Resolves a path template relative to the working directory.
    fn resolve_path(&self, template: &str) -> Result<PathBuf, ForgeflowError> {
        let resolved = self.config.interpolate(template)?;
        let path = Path::new(&resolved);
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(self.config.working_dir().join(path))
        }
    }

    fn log_file_for(&self, spec: &StageSpec) -> Option<PathBuf> {
        matches!(spec.operation, Operation::Compile { .. })
            .then(|| self.config.working_dir().join("logs").join(format!("{}.log", spec.id)))
    }

    /// Removes partially written outputs after a cancellation. Extract
    /// stages keep their partial directories for operator inspection unless
    /// they opted into cleanup.
    fn discard_partial_outputs(&self, spec: &StageSpec) {
        let implicit = !matches!(spec.operation, Operation::Extract { .. });
        if !implicit && !spec.cleanup_on_cancel {
            return;
        }
        for output in &spec.outputs {
            if let Ok(path) = self.resolve_path(output) {
                if path.is_dir() {
                    if let Err(e) = std::fs::remove_dir_all(&path) {
                        warn!(path = %path.display(), error = %e, "could not discard partial output");
                    }
                } else if path.is_file() {
                    if let Err(e) = std::fs::remove_file(&path) {
                        warn!(path = %path.display(), error = %e, "could not discard partial output");
                    }
                }
            }
        }
    }
}
