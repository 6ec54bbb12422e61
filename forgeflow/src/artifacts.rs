//! Artifact registration and end-of-run collection.
//!
//! Stages register artifacts as they complete; nothing touches the output
//! directory until the whole pipeline has succeeded, so a failed run never
//! leaves a partial artifact set behind.

use crate::events::EventSink;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// A build output destined for the output directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Logical name, used as the file name in the output directory.
    pub logical_name: String,
    /// Where the artifact currently lives, inside the working directory.
    pub source: PathBuf,
    /// The stage that produced it.
    pub stage_id: String,
}

impl Artifact {
    /// Creates an artifact from a source path, deriving the logical name
    /// from the file name.
    #[must_use]
    pub fn from_path(stage_id: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        let source = source.into();
        let logical_name = source
            .file_name()
            .map_or_else(|| "artifact".to_string(), |n| n.to_string_lossy().into_owned());
        Self {
            logical_name,
            source,
            stage_id: stage_id.into(),
        }
    }
}

/// Summary of one collection pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionSummary {
    /// Paths written into the output directory.
    pub written: Vec<PathBuf>,
    /// Warnings recorded during collection (name collisions).
    pub warnings: Vec<String>,
}

/// Accumulates artifacts during a run and materializes them at the end.
pub struct ArtifactCollector {
    registered: Vec<Artifact>,
    sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for ArtifactCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCollector")
            .field("registered", &self.registered)
            .finish()
    }
}

impl ArtifactCollector {
    /// Creates a new collector.
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            registered: Vec::new(),
            sink,
        }
    }

    /// Registers an artifact produced by a succeeded stage.
    pub fn register(&mut self, artifact: Artifact) {
        self.registered.push(artifact);
    }

    /// Registers every matched path from a collect stage.
    pub fn register_paths(&mut self, stage_id: &str, paths: &[PathBuf]) {
        for path in paths {
            self.register(Artifact::from_path(stage_id, path));
        }
    }

    /// Returns the artifacts registered so far.
    #[must_use]
    pub fn registered(&self) -> &[Artifact] {
        &self.registered
    }

    /// Copies every registered artifact into the output directory, creating
    /// it if absent. On a logical-name collision the later registration
    /// overwrites, and a warning is recorded, never silently dropped.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the output directory cannot be created or an
    /// artifact cannot be copied; the source copy is never moved or
    /// deleted, so a failed collection can be retried.
    pub fn collect_into(&self, output_dir: &Path) -> Result<CollectionSummary, std::io::Error> {
        std::fs::create_dir_all(output_dir)?;

        let mut summary = CollectionSummary::default();
        let mut owners: HashMap<String, String> = HashMap::new();

        for artifact in &self.registered {
            if let Some(previous) = owners.insert(
                artifact.logical_name.clone(),
                artifact.stage_id.clone(),
            ) {
                let warning = format!(
                    "artifact '{}' from stage '{}' overwrites the copy from stage '{}'",
                    artifact.logical_name, artifact.stage_id, previous
                );
                warn!("{warning}");
                self.sink.try_emit(
                    "artifact.collision",
                    Some(serde_json::json!({
                        "name": artifact.logical_name,
                        "stage": artifact.stage_id,
                        "overwrote": previous,
                    })),
                );
                summary.warnings.push(warning);
            }

            let dest = output_dir.join(&artifact.logical_name);
            std::fs::copy(&artifact.source, &dest)?;
            info!(
                name = %artifact.logical_name,
                stage = %artifact.stage_id,
                dest = %dest.display(),
                "artifact collected"
            );
            self.sink.try_emit(
                "artifact.collected",
                Some(serde_json::json!({
                    "name": artifact.logical_name,
                    "stage": artifact.stage_id,
                    "dest": dest.display().to_string(),
                })),
            );
            summary.written.push(dest);
        }

        Ok(summary)
    }
}
