//! Link/install stages: filesystem side effects later stages depend on.
//!
//! Compatibility symlinks and package installs must be safe to re-run; an
//! already-satisfied state is a success outcome, not an error.

use super::{LogTail, OperationOutcome};
use crate::errors::{ForgeflowError, StageExecutionError};
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

pub(crate) fn run_link(target: &Path, link: &Path) -> Result<OperationOutcome, ForgeflowError> {
    if let Some(parent) = link.parent() {
        std::fs::create_dir_all(parent)?;
    }

    match std::fs::read_link(link) {
        Ok(existing) if existing == target => {
            debug!(link = %link.display(), "symlink already satisfied");
            return Ok(OperationOutcome::logged(format!(
                "symlink {} already satisfied",
                link.display()
            )));
        }
        Ok(_) => {
            // Points somewhere else; replace it so re-runs converge.
            std::fs::remove_file(link)?;
        }
        Err(_) => {}
    }

    #[cfg(unix)]
    std::os::unix::fs::symlink(target, link)?;
    #[cfg(not(unix))]
    return Err(ForgeflowError::Io(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symlink stages require a unix platform",
    )));

    debug!(link = %link.display(), target = %target.display(), "symlink created");
    Ok(OperationOutcome::logged(format!(
        "symlinked {} -> {}",
        link.display(),
        target.display()
    )))
}

/// Runs an install command through `sh -c`, treating exit status as the
/// sole success signal. Installers that find the package already present
/// exit zero themselves; no output parsing happens here.
pub(crate) async fn run_install(
    stage_id: &str,
    command: &str,
    workdir: &Path,
) -> Result<OperationOutcome, ForgeflowError> {
    std::fs::create_dir_all(workdir)?;

    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(workdir)
        .output()
        .await?;

    let mut tail = LogTail::default();
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        tail.push(line.to_string());
    }
    for line in String::from_utf8_lossy(&output.stderr).lines() {
        tail.push(line.to_string());
    }

    if output.status.success() {
        let mut outcome = OperationOutcome::logged(format!("install command succeeded: {command}"));
        outcome.log.extend(tail.into_lines());
        Ok(outcome)
    } else {
        Err(StageExecutionError::new(stage_id, output.status.code())
            .with_log_tail(tail.into_lines())
            .into())
    }
}
