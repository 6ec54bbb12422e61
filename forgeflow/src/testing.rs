//! Test doubles and fixtures: scripted fetchers and archive builders.

use crate::executor::{FetchFailure, Fetcher};
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A fetcher that fails a scripted number of times before succeeding,
/// recording how many attempts were made.
#[derive(Debug)]
pub struct ScriptedFetcher {
    remaining_failures: Mutex<usize>,
    payload: Vec<u8>,
    permanent: Option<String>,
    attempts: AtomicUsize,
}

impl ScriptedFetcher {
    /// Fails `failures` times with a transient error, then writes
    /// `payload` to the destination and succeeds.
    #[must_use]
    pub fn failing_then_ok(failures: usize, payload: &[u8]) -> Self {
        Self {
            remaining_failures: Mutex::new(failures),
            payload: payload.to_vec(),
            permanent: None,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Always fails with a permanent (non-retryable) error.
    #[must_use]
    pub fn always_permanent(reason: impl Into<String>) -> Self {
        Self {
            remaining_failures: Mutex::new(0),
            payload: Vec::new(),
            permanent: Some(reason.into()),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Returns how many fetch attempts were made.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, _url: &str, dest: &Path) -> Result<u64, FetchFailure> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        if let Some(reason) = &self.permanent {
            return Err(FetchFailure::permanent(reason.clone()));
        }

        {
            let mut remaining = self.remaining_failures.lock();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(FetchFailure::transient("simulated transient failure"));
            }
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| FetchFailure::permanent(e.to_string()))?;
        }
        std::fs::write(dest, &self.payload)
            .map_err(|e| FetchFailure::permanent(e.to_string()))?;
        Ok(self.payload.len() as u64)
    }
}

/// Writes a gzip-compressed tarball containing the given entries.
///
/// # Panics
///
/// Panics on IO errors; fixtures fail loudly.
pub fn write_tar_gz(path: &Path, entries: &[(&str, &[u8])]) {
    if let Some(parent) = path.parent() {
        #[allow(clippy::expect_used)]
        std::fs::create_dir_all(parent).expect("fixture directory");
    }
    #[allow(clippy::expect_used)]
    let file = std::fs::File::create(path).expect("fixture archive");
    let encoder = GzEncoder::new(file, Compression::fast());
    let mut builder = tar::Builder::new(encoder);

    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        #[allow(clippy::expect_used)]
        builder
            .append_data(&mut header, name, *data)
            .expect("fixture entry");
    }

    #[allow(clippy::expect_used)]
    builder
        .into_inner()
        .and_then(GzEncoder::finish)
        .expect("fixture archive finalized");
}
