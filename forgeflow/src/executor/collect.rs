//! Collect stages: enumerate produced files and register them as artifacts.

use super::OperationOutcome;
use crate::errors::ForgeflowError;
use crate::events::EventSink;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Walks `root` collecting files whose names match `pattern` (`*` wildcard).
/// Results are sorted so registration order is deterministic.
pub(crate) fn run_collect(
    stage_id: &str,
    root: &Path,
    pattern: &str,
    sink: &dyn EventSink,
) -> Result<OperationOutcome, ForgeflowError> {
    if !root.is_dir() {
        return Err(ForgeflowError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("collect root '{}' does not exist", root.display()),
        )));
    }

    let mut matches = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            ForgeflowError::Io(std::io::Error::other(format!(
                "cannot walk '{}': {e}",
                root.display()
            )))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if wildcard_match(pattern, &name) {
            matches.push(entry.into_path());
        }
    }
    matches.sort();

    if matches.is_empty() {
        warn!(stage = %stage_id, root = %root.display(), pattern, "collect matched no files");
    }

    let mut log = Vec::with_capacity(matches.len() + 1);
    log.push(format!(
        "collected {} file(s) matching '{pattern}' under {}",
        matches.len(),
        root.display()
    ));
    for path in &matches {
        debug!(stage = %stage_id, path = %path.display(), "artifact matched");
        sink.try_emit(
            "artifact.registered",
            Some(serde_json::json!({
                "stage": stage_id,
                "path": path.display().to_string(),
            })),
        );
        log.push(format!("matched {}", path.display()));
    }

    Ok(OperationOutcome {
        artifacts: matches,
        log,
    })
}

/// Matches a file name against a pattern where `*` spans any sequence.
fn wildcard_match(pattern: &str, name: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == name;
    }

    let mut rest = name;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(segment) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == segments.len() - 1 {
            return rest.ends_with(segment);
        } else {
            match rest.find(segment) {
                Some(pos) => rest = &rest[pos + segment.len()..],
                None => return false,
            }
        }
    }
    true
}
