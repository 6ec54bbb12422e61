//! Error types for the forgeflow orchestrator.
//!
//! The taxonomy distinguishes user-fixable configuration problems from
//! internal defects (bad stage graphs) and from failures of the external
//! world (network, archives, build tools). The CLI maps each kind to a
//! documented exit code.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for forgeflow operations.
#[derive(Debug, Error)]
pub enum ForgeflowError {
    /// A configuration parameter was missing, unknown, or malformed.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// The stage graph contains a dependency cycle.
    #[error("{0}")]
    CyclicDependency(#[from] CyclicDependencyError),

    /// The stage graph definition is invalid (duplicate ids, unknown
    /// predecessors).
    #[error("{0}")]
    GraphValidation(#[from] GraphValidationError),

    /// A remote resource could not be retrieved.
    #[error("{0}")]
    Fetch(#[from] FetchError),

    /// An archive could not be unpacked.
    #[error("{0}")]
    Extraction(#[from] ExtractionError),

    /// An external build tool exited unsuccessfully.
    #[error("{0}")]
    StageExecution(#[from] StageExecutionError),

    /// A resumed run is missing outputs from a skipped stage.
    #[error("{0}")]
    MissingPrerequisite(#[from] MissingPrerequisiteError),

    /// The working directory is locked by another live pipeline.
    #[error("{0}")]
    WorkdirLocked(#[from] WorkdirLockedError),

    /// The run was cancelled.
    #[error("run cancelled: {0}")]
    Cancelled(String),

    /// A stage exceeded its configured timeout.
    #[error("stage '{stage}' timed out after {timeout_secs}s")]
    StageTimeout {
        /// The stage that timed out.
        stage: String,
        /// The configured timeout in seconds.
        timeout_secs: u64,
    },

    /// Serialization/deserialization error (manifest, report).
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ForgeflowError {
    /// Returns the process exit code for this error kind.
    ///
    /// `1` for configuration problems the operator can fix, `3` for an
    /// invalid stage graph (an internal defect), `2` for everything that
    /// went wrong while the pipeline was running.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::CyclicDependency(_) | Self::GraphValidation(_) => 3,
            _ => 2,
        }
    }

    /// Short machine-readable name of the error kind, used in reports.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::CyclicDependency(_) => "CyclicDependencyError",
            Self::GraphValidation(_) => "GraphValidationError",
            Self::Fetch(_) => "FetchError",
            Self::Extraction(_) => "ExtractionError",
            Self::StageExecution(_) => "StageExecutionError",
            Self::MissingPrerequisite(_) => "MissingPrerequisiteError",
            Self::WorkdirLocked(_) => "WorkdirLockedError",
            Self::Cancelled(_) => "Cancelled",
            Self::StageTimeout { .. } => "StageTimeout",
            Self::Serialization(_) => "SerializationError",
            Self::Io(_) => "IoError",
        }
    }
}

/// Error raised when configuration resolution fails.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ConfigurationError {
    /// The error message.
    pub message: String,
    /// The offending option name, if known.
    pub option: Option<String>,
}

impl ConfigurationError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            option: None,
        }
    }

    /// Sets the offending option name.
    #[must_use]
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.option = Some(option.into());
        self
    }

    /// Creates an error for an unrecognized option name.
    #[must_use]
    pub fn unknown_option(name: &str) -> Self {
        Self::new(format!("unknown option '{name}'")).with_option(name)
    }

    /// Creates an error for a value that failed shape validation.
    #[must_use]
    pub fn invalid_value(name: &str, value: &str, reason: &str) -> Self {
        Self::new(format!("invalid value '{value}' for '{name}': {reason}")).with_option(name)
    }
}

/// Error raised when the stage graph contains a dependency cycle.
///
/// This is an internal defect in graph construction, never user-fixable
/// through configuration.
#[derive(Debug, Clone, Error)]
#[error("cycle detected in stage graph: {}", cycle_path.join(" -> "))]
pub struct CyclicDependencyError {
    /// The path of stage ids forming the cycle.
    pub cycle_path: Vec<String>,
}

impl CyclicDependencyError {
    /// Creates a new cyclic dependency error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }
}

/// Error raised when the stage graph definition itself is malformed.
///
/// Like a cycle, this is a defect in graph construction rather than
/// something an operator can fix through configuration.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct GraphValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
}

impl GraphValidationError {
    /// Creates a new graph validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }
}

impl From<CyclicDependencyError> for GraphValidationError {
    fn from(err: CyclicDependencyError) -> Self {
        Self {
            message: err.to_string(),
            stages: err.cycle_path,
        }
    }
}

/// Error raised when a remote resource could not be retrieved.
#[derive(Debug, Clone, Error)]
#[error("fetch of '{url}' failed after {attempts} attempt(s): {reason}")]
pub struct FetchError {
    /// The URL that could not be fetched.
    pub url: String,
    /// How many attempts were made.
    pub attempts: usize,
    /// Why the final attempt failed.
    pub reason: String,
}

impl FetchError {
    /// Creates a new fetch error.
    #[must_use]
    pub fn new(url: impl Into<String>, attempts: usize, reason: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            attempts,
            reason: reason.into(),
        }
    }
}

/// Error raised when an archive could not be unpacked.
///
/// Never retried: a corrupt download has to be re-fetched, re-reading the
/// same bytes cannot succeed.
#[derive(Debug, Clone, Error)]
#[error("extraction of '{}' failed: {reason}", archive.display())]
pub struct ExtractionError {
    /// The archive that failed to unpack.
    pub archive: PathBuf,
    /// Why it failed.
    pub reason: String,
}

impl ExtractionError {
    /// Creates a new extraction error.
    #[must_use]
    pub fn new(archive: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            archive: archive.into(),
            reason: reason.into(),
        }
    }
}

/// Error raised when an external tool exits unsuccessfully.
#[derive(Debug, Clone, Error)]
#[error("stage '{stage}' failed{}", exit_code.map(|c| format!(" (exit code {c})")).unwrap_or_default())]
pub struct StageExecutionError {
    /// The stage whose command failed.
    pub stage: String,
    /// The process exit code, if the process exited at all.
    pub exit_code: Option<i32>,
    /// The last captured log lines.
    pub log_tail: Vec<String>,
}

impl StageExecutionError {
    /// Creates a new stage execution error.
    #[must_use]
    pub fn new(stage: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self {
            stage: stage.into(),
            exit_code,
            log_tail: Vec::new(),
        }
    }

    /// Attaches the captured log tail.
    #[must_use]
    pub fn with_log_tail(mut self, tail: Vec<String>) -> Self {
        self.log_tail = tail;
        self
    }
}

/// Error raised when a resumed run depends on outputs that no longer exist.
#[derive(Debug, Clone, Error)]
#[error(
    "stage '{stage}' requires '{}' produced by skipped stage '{produced_by}', \
     but it is absent; resume from '{produced_by}' or earlier, or run from scratch",
    missing.display()
)]
pub struct MissingPrerequisiteError {
    /// The stage that could not run.
    pub stage: String,
    /// The path that was expected on disk.
    pub missing: PathBuf,
    /// The skipped stage that should have produced it.
    pub produced_by: String,
}

impl MissingPrerequisiteError {
    /// Creates a new missing prerequisite error.
    #[must_use]
    pub fn new(
        stage: impl Into<String>,
        missing: impl Into<PathBuf>,
        produced_by: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            missing: missing.into(),
            produced_by: produced_by.into(),
        }
    }
}

/// Error raised when another live pipeline owns the working directory.
#[derive(Debug, Clone, Error)]
#[error(
    "working directory '{}' is locked by pid {owner_pid} since {since}",
    workdir.display()
)]
pub struct WorkdirLockedError {
    /// The contested working directory.
    pub workdir: PathBuf,
    /// The pid recorded in the lock file.
    pub owner_pid: u32,
    /// When the owner started, as recorded in the lock file.
    pub since: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_the_cli_contract() {
        let config = ForgeflowError::from(ConfigurationError::unknown_option("bogus"));
        assert_eq!(config.exit_code(), 1);

        let cycle = ForgeflowError::from(CyclicDependencyError::new(vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
        ]));
        assert_eq!(cycle.exit_code(), 3);

        let fetch = ForgeflowError::from(FetchError::new("http://x", 3, "timed out"));
        assert_eq!(fetch.exit_code(), 2);
    }

    #[test]
    fn cycle_error_renders_path() {
        let err = CyclicDependencyError::new(vec![
            "fetch".to_string(),
            "compile".to_string(),
            "fetch".to_string(),
        ]);
        assert!(err.to_string().contains("fetch -> compile -> fetch"));
    }

    #[test]
    fn configuration_error_tracks_option() {
        let err = ConfigurationError::invalid_value("framework_version", "a/b", "path separator");
        assert_eq!(err.option.as_deref(), Some("framework_version"));
        assert!(err.to_string().contains("framework_version"));
    }

    #[test]
    fn missing_prerequisite_names_the_producer() {
        let err = MissingPrerequisiteError::new("compile", "/work/src", "extract");
        let msg = err.to_string();
        assert!(msg.contains("compile"));
        assert!(msg.contains("extract"));
    }
}
