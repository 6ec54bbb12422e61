//! Run manifest: completed stages and their artifact paths.
//!
//! Rewritten after every successful stage so `--resume-from` can trust
//! recorded state instead of re-deriving it from the working directory.

use crate::errors::ForgeflowError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const MANIFEST_FILE_NAME: &str = ".forgeflow-manifest.json";

/// One completed stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// The completed stage id.
    pub stage_id: String,
    /// Artifact source paths the stage registered.
    pub artifacts: Vec<PathBuf>,
    /// When the stage completed.
    pub completed_at: DateTime<Utc>,
}

/// Persisted record of a run's completed stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    /// The profile the run was started with.
    pub profile: String,
    /// Completed stages, in completion order.
    pub completed: Vec<ManifestEntry>,
}

impl RunManifest {
    /// Creates an empty manifest for a fresh run.
    #[must_use]
    pub fn new(profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            completed: Vec::new(),
        }
    }

    /// Loads the manifest from a working directory, if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(workdir: &Path) -> Result<Option<Self>, ForgeflowError> {
        let path = workdir.join(MANIFEST_FILE_NAME);
        if !path.is_file() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Records a completed stage. Re-recording a stage id replaces the
    /// previous entry, which happens when an idempotent stage re-runs.
    pub fn record(
        &mut self,
        stage_id: impl Into<String>,
        artifacts: Vec<PathBuf>,
    ) {
        let stage_id = stage_id.into();
        self.completed.retain(|e| e.stage_id != stage_id);
        self.completed.push(ManifestEntry {
            stage_id,
            artifacts,
            completed_at: Utc::now(),
        });
    }

    /// Returns whether a stage is recorded as completed.
    #[must_use]
    pub fn is_completed(&self, stage_id: &str) -> bool {
        self.completed.iter().any(|e| e.stage_id == stage_id)
    }

    /// Writes the manifest into the working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, workdir: &Path) -> Result<(), ForgeflowError> {
        let path = workdir.join(MANIFEST_FILE_NAME);
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn round_trips_through_the_working_directory() {
        let dir = tempfile::tempdir().expect("tempdir");

        let mut manifest = RunManifest::new("framework");
        manifest.record("fetch", vec![PathBuf::from("downloads/f.tar.gz")]);
        manifest.record("extract", Vec::new());
        manifest.save(dir.path()).expect("saves");

        let loaded = RunManifest::load(dir.path())
            .expect("loads")
            .expect("present");
        assert_eq!(loaded.profile, "framework");
        assert_eq!(loaded.completed.len(), 2);
        assert!(loaded.is_completed("fetch"));
        assert!(!loaded.is_completed("compile"));
    }

    #[test]
    fn missing_manifest_loads_as_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(RunManifest::load(dir.path()).expect("loads").is_none());
    }

    #[test]
    fn re_recording_replaces_the_previous_entry() {
        let mut manifest = RunManifest::new("framework");
        manifest.record("fetch", vec![PathBuf::from("old")]);
        manifest.record("fetch", vec![PathBuf::from("new")]);

        assert_eq!(manifest.completed.len(), 1);
        assert_eq!(manifest.completed[0].artifacts, vec![PathBuf::from("new")]);
    }
}
