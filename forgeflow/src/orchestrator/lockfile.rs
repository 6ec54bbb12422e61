//! Working-directory lock.
//!
//! A working directory is exclusively owned by one pipeline for its
//! lifetime. The lock file records the owning pid and start timestamp; a
//! live owner refuses startup, a dead one is replaced with a warning.

use crate::errors::{ForgeflowError, WorkdirLockedError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

const LOCK_FILE_NAME: &str = ".forgeflow.lock";

#[derive(Debug, Serialize, Deserialize)]
struct LockContents {
    pid: u32,
    started_at: DateTime<Utc>,
}

/// Held for the duration of a run; released on drop.
#[derive(Debug)]
pub struct WorkdirLock {
    path: PathBuf,
}

impl WorkdirLock {
    /// Acquires the lock for a working directory, creating the directory
    /// if needed.
    ///
    /// # Errors
    ///
    /// Returns [`WorkdirLockedError`] if another live process holds the
    /// lock, or an IO error if the lock file cannot be written.
    pub fn acquire(workdir: &Path) -> Result<Self, ForgeflowError> {
        std::fs::create_dir_all(workdir)?;
        let path = workdir.join(LOCK_FILE_NAME);

        if path.is_file() {
            let raw = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<LockContents>(&raw) {
                Ok(existing) if process_alive(existing.pid) => {
                    return Err(WorkdirLockedError {
                        workdir: workdir.to_path_buf(),
                        owner_pid: existing.pid,
                        since: existing.started_at.to_rfc3339(),
                    }
                    .into());
                }
                Ok(existing) => {
                    warn!(
                        pid = existing.pid,
                        "replacing stale lock from dead process"
                    );
                }
                Err(_) => {
                    warn!(path = %path.display(), "replacing unreadable lock file");
                }
            }
        }

        let contents = LockContents {
            pid: std::process::id(),
            started_at: Utc::now(),
        };
        std::fs::write(&path, serde_json::to_string_pretty(&contents)?)?;

        Ok(Self { path })
    }

    /// Releases the lock explicitly.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for WorkdirLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "could not remove lock file");
        }
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

/// Without a reliable liveness probe, assume the owner is alive; refusing
/// to start is the safe direction for a shared working directory.
#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}
