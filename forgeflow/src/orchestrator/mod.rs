//! The orchestrator: walks the stage graph end-to-end.
//!
//! State machine: `Initializing → Resolving → Executing(stage) →
//! Collecting → Completed`, or `Failed(stage)` when a non-best-effort
//! stage fails. Stages run sequentially in topological order because later
//! stages consume filesystem state earlier ones produce.

mod lockfile;
mod manifest;
mod report;

#[cfg(test)]
mod integration_tests;

pub use lockfile::WorkdirLock;
pub use manifest::{ManifestEntry, RunManifest};
pub use report::{FailureDetail, RunReport, RunStatus};

use crate::artifacts::ArtifactCollector;
use crate::cancellation::CancellationToken;
use crate::config::BuildConfiguration;
use crate::errors::{ConfigurationError, ForgeflowError, MissingPrerequisiteError};
use crate::events::EventSink;
use crate::executor::{Fetcher, StageExecutor, StageResult, StageStatus};
use crate::graph::{StageGraph, StageSpec};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// The orchestrator's position in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    /// Acquiring the working directory.
    Initializing,
    /// Validating the configuration against the graph.
    Resolving,
    /// Executing the named stage.
    Executing(String),
    /// Materializing artifacts into the output directory.
    Collecting,
    /// All stages succeeded and artifacts were collected.
    Completed,
    /// The named stage failed and the walk halted.
    Failed(String),
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Resolving => write!(f, "resolving"),
            Self::Executing(stage) => write!(f, "executing({stage})"),
            Self::Collecting => write!(f, "collecting"),
            Self::Completed => write!(f, "completed"),
            Self::Failed(stage) => write!(f, "failed({stage})"),
        }
    }
}

/// Options for one run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Resume from this stage id, skipping all earlier stages and trusting
    /// their recorded artifacts.
    pub resume_from: Option<String>,
}

/// Drives one pipeline run end-to-end.
pub struct Orchestrator {
    graph: StageGraph,
    config: BuildConfiguration,
    sink: Arc<dyn EventSink>,
    token: Arc<CancellationToken>,
    fetcher: Option<Arc<dyn Fetcher>>,
    options: RunOptions,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("graph", &self.graph.name())
            .field("options", &self.options)
            .finish()
    }
}

impl Orchestrator {
    /// Creates an orchestrator for a graph and configuration.
    #[must_use]
    pub fn new(
        graph: StageGraph,
        config: BuildConfiguration,
        sink: Arc<dyn EventSink>,
        token: Arc<CancellationToken>,
    ) -> Self {
        Self {
            graph,
            config,
            sink,
            token,
            fetcher: None,
            options: RunOptions::default(),
        }
    }

    /// Sets run options.
    #[must_use]
    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Replaces the fetcher used by fetch stages.
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Runs the pipeline to completion or first fatal failure.
    ///
    /// Returns `Ok` with a report once execution begins, whether or not
    /// stages succeed; the report carries the failing stage and error kind.
    ///
    /// # Errors
    ///
    /// Returns an error for problems before any stage executes: a locked
    /// working directory, an unresolvable template, or an unknown
    /// `resume_from` id.
    pub async fn run(self) -> Result<RunReport, ForgeflowError> {
        let run_id = Uuid::new_v4();
        let start = Instant::now();
        info!(%run_id, profile = %self.graph.name(), state = %PipelineState::Initializing, "run starting");

        let lock = WorkdirLock::acquire(self.config.working_dir())?;

        // Resolving: every template must interpolate before anything runs.
        info!(state = %PipelineState::Resolving, "validating configuration");
        self.graph.validate_against(&self.config)?;

        let order: Vec<String> = self.graph.execution_order().to_vec();
        let resume_index = match &self.options.resume_from {
            Some(id) => Some(order.iter().position(|s| s == id).ok_or_else(|| {
                ConfigurationError::invalid_value(
                    "resume-from",
                    id,
                    "not a stage id in this profile",
                )
            })?),
            None => None,
        };

        let mut manifest = match resume_index {
            Some(_) => RunManifest::load(self.config.working_dir())?
                .unwrap_or_else(|| RunManifest::new(self.graph.name())),
            None => RunManifest::new(self.graph.name()),
        };

        let executor = {
            let exec = StageExecutor::new(
                self.config.clone(),
                self.sink.clone(),
                self.token.clone(),
            );
            match &self.fetcher {
                Some(fetcher) => exec.with_fetcher(fetcher.clone()),
                None => exec,
            }
        };

        let mut collector = ArtifactCollector::new(self.sink.clone());
        let mut results: Vec<StageResult> = Vec::with_capacity(order.len());
        let mut warnings: Vec<String> = Vec::new();
        let mut skipped: HashSet<String> = HashSet::new();

        for (index, stage_id) in order.iter().enumerate() {
            let Some(spec) = self.graph.stage(stage_id) else {
                // The graph owns its order; a missing spec cannot happen.
                continue;
            };

            if resume_index.is_some_and(|resume| index < resume) {
                if !manifest.is_completed(stage_id) {
                    let warning = format!(
                        "stage '{stage_id}' skipped by --resume-from but not recorded \
                         as completed; trusting whatever is on disk"
                    );
                    warn!("{warning}");
                    warnings.push(warning);
                }
                self.sink.try_emit(
                    "stage.skipped",
                    Some(serde_json::json!({ "stage": stage_id, "reason": "resume" })),
                );
                skipped.insert(stage_id.clone());
                results.push(StageResult::skipped(stage_id, "skipped by --resume-from"));
                continue;
            }

            // Skipped predecessors must have left their outputs on disk.
            if let Err(missing) = self.check_prerequisites(spec, &skipped) {
                let error = ForgeflowError::from(missing);
                let mut result = StageResult::skipped(stage_id, "");
                result.status = StageStatus::Failed;
                result.skip_reason = None;
                result.error = Some(error.to_string());
                result.error_kind = Some(error.kind().to_string());
                if spec.best_effort {
                    // An optional chain degrades stage by stage: the failed
                    // link is a warning and its dependents get the same
                    // prerequisite check in turn.
                    let warning = format!("best-effort stage '{stage_id}' failed: {error}");
                    warn!("{warning}");
                    warnings.push(warning);
                    skipped.insert(stage_id.clone());
                    results.push(result);
                    continue;
                }
                results.push(result);
                return Ok(self.failed_report(
                    run_id,
                    stage_id,
                    results,
                    warnings,
                    start,
                    lock,
                ));
            }

            info!(state = %PipelineState::Executing(stage_id.clone()), "executing stage");
            let result = executor.execute(spec).await;

            if result.is_success() {
                collector.register_paths(stage_id, &result.artifacts);
                manifest.record(stage_id, result.artifacts.clone());
                manifest.save(self.config.working_dir())?;
                results.push(result);
            } else if spec.best_effort {
                let warning = format!(
                    "best-effort stage '{stage_id}' failed: {}",
                    result.error.as_deref().unwrap_or("unknown error")
                );
                warn!("{warning}");
                warnings.push(warning);
                // Dependents of a failed best-effort stage treat it as
                // skipped: they must find its outputs or fail themselves.
                skipped.insert(stage_id.clone());
                results.push(result);
            } else {
                results.push(result);
                return Ok(self.failed_report(run_id, stage_id, results, warnings, start, lock));
            }
        }

        info!(state = %PipelineState::Collecting, "collecting artifacts");
        let summary = collector.collect_into(self.config.output_dir())?;
        warnings.extend(summary.warnings);

        let total_duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        info!(state = %PipelineState::Completed, total_duration_ms, "run completed");
        self.sink.try_emit(
            "run.completed",
            Some(serde_json::json!({
                "run_id": run_id.to_string(),
                "duration_ms": total_duration_ms,
                "artifacts": summary.written.len(),
            })),
        );
        lock.release();

        Ok(RunReport {
            run_id,
            profile: self.graph.name().to_string(),
            status: RunStatus::Completed,
            stages: results,
            total_duration_ms,
            failure: None,
            warnings,
            artifacts_written: summary.written,
        })
    }

    /// Verifies that every skipped predecessor left its declared outputs
    /// on disk.
    fn check_prerequisites(
        &self,
        spec: &StageSpec,
        skipped: &HashSet<String>,
    ) -> Result<(), MissingPrerequisiteError> {
        for pred_id in &spec.predecessors {
            if !skipped.contains(pred_id) {
                continue;
            }
            let Some(pred) = self.graph.stage(pred_id) else {
                continue;
            };
            for output in &pred.outputs {
                let path = self.resolve_output(output);
                if !path.exists() {
                    return Err(MissingPrerequisiteError::new(
                        spec.id.clone(),
                        path,
                        pred_id.clone(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn resolve_output(&self, template: &str) -> PathBuf {
        let resolved = self
            .config
            .interpolate(template)
            .unwrap_or_else(|_| template.to_string());
        let path = PathBuf::from(resolved);
        if path.is_absolute() {
            path
        } else {
            self.config.working_dir().join(path)
        }
    }

    fn failed_report(
        &self,
        run_id: Uuid,
        stage_id: &str,
        results: Vec<StageResult>,
        warnings: Vec<String>,
        start: Instant,
        lock: WorkdirLock,
    ) -> RunReport {
        let total_duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        let failure = results
            .iter()
            .rfind(|r| r.stage_id == stage_id)
            .map(|r| FailureDetail {
                stage: stage_id.to_string(),
                kind: r
                    .error_kind
                    .clone()
                    .unwrap_or_else(|| "StageExecutionError".to_string()),
                message: r.error.clone().unwrap_or_else(|| "stage failed".to_string()),
                log_tail: r.log_tail.clone(),
            });

        warn!(state = %PipelineState::Failed(stage_id.to_string()), "run failed");
        self.sink.try_emit(
            "run.failed",
            Some(serde_json::json!({
                "run_id": run_id.to_string(),
                "stage": stage_id,
                "duration_ms": total_duration_ms,
            })),
        );
        lock.release();

        RunReport {
            run_id,
            profile: self.graph.name().to_string(),
            status: RunStatus::Failed,
            stages: results,
            total_duration_ms,
            failure,
            warnings,
            artifacts_written: Vec::new(),
        }
    }
}
