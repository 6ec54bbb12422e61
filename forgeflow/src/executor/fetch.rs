//! Fetch stages: retrieve a remote resource into the working directory.
//!
//! Transient failures (timeouts, connection resets, 5xx) retry a bounded
//! number of times with linear backoff. Client errors and checksum
//! mismatches fail immediately; re-requesting the same broken resource
//! cannot succeed.

use super::OperationOutcome;
use crate::cancellation::CancellationToken;
use crate::errors::{FetchError, ForgeflowError};
use crate::events::EventSink;
use crate::retry::{RetryConfig, RetryState};
use async_trait::async_trait;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::fmt::Debug;
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

/// A single failed fetch attempt.
#[derive(Debug, Clone)]
pub struct FetchFailure {
    /// Why the attempt failed.
    pub reason: String,
    /// Whether another attempt could plausibly succeed.
    pub retryable: bool,
}

impl FetchFailure {
    /// Creates a retryable failure (network hiccup, server error).
    #[must_use]
    pub fn transient(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: true,
        }
    }

    /// Creates a permanent failure (404, bad request).
    #[must_use]
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: false,
        }
    }
}

/// Retrieves remote resources. The production implementation speaks HTTP;
/// tests script failure sequences.
#[async_trait]
pub trait Fetcher: Send + Sync + Debug {
    /// Fetches `url` into `dest`, returning the number of bytes written.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchFailure>;
}

/// HTTP fetcher backed by `reqwest`.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher {
    /// Creates a new HTTP fetcher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchFailure> {
        let response = self.client.get(url).send().await.map_err(|e| {
            // Transport-level problems (DNS, connect, timeout) are transient.
            FetchFailure::transient(format!("request failed: {e}"))
        })?;

        let status = response.status();
        if status.is_client_error() {
            return Err(FetchFailure::permanent(format!("server returned {status}")));
        }
        if !status.is_success() {
            return Err(FetchFailure::transient(format!("server returned {status}")));
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| FetchFailure::permanent(format!("cannot create '{}': {e}", parent.display())))?;
        }

        // Stream to disk; toolchain archives run to gigabytes and must
        // never be buffered whole in memory.
        let mut file = std::fs::File::create(dest)
            .map_err(|e| FetchFailure::permanent(format!("cannot create '{}': {e}", dest.display())))?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| FetchFailure::transient(format!("body read failed: {e}")))?;
            file.write_all(&chunk)
                .map_err(|e| FetchFailure::permanent(format!("cannot write '{}': {e}", dest.display())))?;
            written += chunk.len() as u64;
        }

        Ok(written)
    }
}

/// Runs one fetch stage: bounded retries, size and checksum verification.
pub(crate) async fn run_fetch(
    fetcher: &dyn Fetcher,
    url: &str,
    dest: &Path,
    checksum: Option<&str>,
    retry: &RetryConfig,
    token: &CancellationToken,
    sink: &dyn EventSink,
) -> Result<OperationOutcome, ForgeflowError> {
    let mut state = RetryState::new();

    loop {
        if token.is_cancelled() {
            return Err(ForgeflowError::Cancelled(
                token.reason().unwrap_or_else(|| "cancelled".to_string()),
            ));
        }

        match fetcher.fetch(url, dest).await {
            Ok(0) => {
                return Err(FetchError::new(
                    url,
                    state.attempt + 1,
                    "retrieved resource is empty",
                )
                .into());
            }
            Ok(bytes) => {
                if let Some(expected) = checksum {
                    verify_checksum(url, dest, expected, state.attempt + 1)?;
                }
                debug!(url, bytes, "fetch succeeded");
                return Ok(OperationOutcome::logged(format!(
                    "fetched {url} ({bytes} bytes) -> {}",
                    dest.display()
                )));
            }
            Err(failure) if failure.retryable => {
                if state.increment(retry) {
                    let delay = state.calculate_delay(retry);
                    warn!(url, attempt = state.attempt, reason = %failure.reason, "fetch attempt failed, retrying");
                    sink.try_emit(
                        "fetch.retry",
                        Some(serde_json::json!({
                            "url": url,
                            "attempt": state.attempt,
                            "delay_ms": delay.as_millis() as u64,
                            "reason": failure.reason,
                        })),
                    );
                    tokio::time::sleep(delay).await;
                } else {
                    return Err(FetchError::new(url, state.attempt, failure.reason).into());
                }
            }
            Err(failure) => {
                return Err(FetchError::new(url, state.attempt + 1, failure.reason).into());
            }
        }
    }
}

/// Verifies the SHA-256 checksum of a fetched file against the expected hex
/// digest. A mismatch is permanent; the stage fails without retrying.
fn verify_checksum(
    url: &str,
    dest: &Path,
    expected: &str,
    attempts: usize,
) -> Result<(), ForgeflowError> {
    let contents = std::fs::read(dest)?;
    let digest = hex::encode(Sha256::digest(&contents));
    if digest.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(FetchError::new(
            url,
            attempts,
            format!("checksum mismatch: expected {expected}, got {digest}"),
        )
        .into())
    }
}
