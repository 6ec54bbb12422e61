//! Compile stages: drive an external build tool and stream its output.
//!
//! Output is streamed line-by-line while the tool runs so a multi-hour
//! compile stays observable; nothing buffers to the end. The exit status is
//! the sole success signal.

use super::{LogTail, OperationOutcome};
use crate::cancellation::CancellationToken;
use crate::errors::{ForgeflowError, StageExecutionError};
use crate::events::EventSink;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

/// Everything one compile invocation needs.
pub(crate) struct CompileRequest<'a> {
    pub stage_id: &'a str,
    pub command: &'a str,
    pub workdir: &'a Path,
    pub env: &'a [(String, String)],
    pub log_file: Option<PathBuf>,
    pub sink: &'a dyn EventSink,
    pub token: &'a CancellationToken,
}

pub(crate) async fn run_compile(
    req: CompileRequest<'_>,
) -> Result<OperationOutcome, ForgeflowError> {
    std::fs::create_dir_all(req.workdir)?;

    let mut log_writer = match &req.log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Some(std::io::BufWriter::new(std::fs::File::create(path)?))
        }
        None => None,
    };

    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(req.command)
        .current_dir(req.workdir)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);
    for (name, value) in req.env {
        command.env(name, value);
    }

    info!(stage = %req.stage_id, command = %req.command, "spawning build tool");
    let mut child = command.spawn().map_err(|e| {
        ForgeflowError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to spawn build tool in {}: {e}", req.workdir.display()),
        ))
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let mut stdout_lines = stdout.map(|s| BufReader::new(s).lines());
    let mut stderr_lines = stderr.map(|s| BufReader::new(s).lines());

    let mut tail = LogTail::default();
    let mut stdout_closed = stdout_lines.is_none();
    let mut stderr_closed = stderr_lines.is_none();

    while !(stdout_closed && stderr_closed) {
        if req.token.is_cancelled() {
            let _ = child.kill().await;
            return Err(ForgeflowError::Cancelled(
                req.token
                    .reason()
                    .unwrap_or_else(|| "cancelled".to_string()),
            ));
        }

        tokio::select! {
            line = next_line(&mut stdout_lines), if !stdout_closed => {
                match line {
                    Some(line) => record_line(&req, &mut tail, &mut log_writer, &line),
                    None => stdout_closed = true,
                }
            }
            line = next_line(&mut stderr_lines), if !stderr_closed => {
                match line {
                    Some(line) => record_line(&req, &mut tail, &mut log_writer, &line),
                    None => stderr_closed = true,
                }
            }
            // Wake periodically so cancellation is noticed even while the
            // tool is silent.
            () = tokio::time::sleep(std::time::Duration::from_millis(250)) => {}
        }
    }

    let status = child.wait().await?;
    if let Some(writer) = &mut log_writer {
        let _ = writer.flush();
    }

    debug!(stage = %req.stage_id, code = ?status.code(), "build tool exited");
    if status.success() {
        Ok(OperationOutcome {
            artifacts: Vec::new(),
            log: tail.into_lines(),
        })
    } else {
        Err(StageExecutionError::new(req.stage_id, status.code())
            .with_log_tail(tail.into_lines())
            .into())
    }
}

async fn next_line(
    lines: &mut Option<tokio::io::Lines<BufReader<impl tokio::io::AsyncRead + Unpin>>>,
) -> Option<String> {
    match lines {
        Some(lines) => lines.next_line().await.ok().flatten(),
        None => None,
    }
}

fn record_line(
    req: &CompileRequest<'_>,
    tail: &mut LogTail,
    log_writer: &mut Option<std::io::BufWriter<std::fs::File>>,
    line: &str,
) {
    req.sink.try_emit(
        "stage.log_line",
        Some(serde_json::json!({
            "stage": req.stage_id,
            "line": line,
        })),
    );
    if let Some(writer) = log_writer {
        let _ = writeln!(writer, "{line}");
    }
    tail.push(line.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use pretty_assertions::assert_eq;

    fn request<'a>(
        command: &'a str,
        workdir: &'a Path,
        log_file: Option<PathBuf>,
        sink: &'a CollectingEventSink,
        token: &'a CancellationToken,
    ) -> CompileRequest<'a> {
        CompileRequest {
            stage_id: "compile",
            command,
            workdir,
            env: &[],
            log_file,
            sink,
            token,
        }
    }

    #[tokio::test]
    async fn streams_lines_while_the_tool_runs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = CollectingEventSink::new();
        let token = CancellationToken::new();
        let log_file = dir.path().join("logs/compile.log");

        let outcome = run_compile(request(
            "echo building; echo done",
            dir.path(),
            Some(log_file.clone()),
            &sink,
            &token,
        ))
        .await
        .expect("must succeed");

        assert_eq!(sink.count("stage.log_line"), 2);
        assert!(outcome.log.contains(&"building".to_string()));

        let persisted = std::fs::read_to_string(&log_file).expect("log file");
        assert!(persisted.contains("building"));
        assert!(persisted.contains("done"));
    }

    #[tokio::test]
    async fn nonzero_exit_fails_with_the_log_tail() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = CollectingEventSink::new();
        let token = CancellationToken::new();

        let err = run_compile(request(
            "echo 'error: missing header' >&2; exit 2",
            dir.path(),
            None,
            &sink,
            &token,
        ))
        .await
        .expect_err("must fail");

        match err {
            ForgeflowError::StageExecution(e) => {
                assert_eq!(e.exit_code, Some(2));
                assert!(e.log_tail.iter().any(|l| l.contains("missing header")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn environment_reaches_the_tool() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = CollectingEventSink::new();
        let token = CancellationToken::new();
        let env = vec![("MAX_JOBS".to_string(), "7".to_string())];

        let outcome = run_compile(CompileRequest {
            stage_id: "compile",
            command: "echo jobs=$MAX_JOBS",
            workdir: dir.path(),
            env: &env,
            log_file: None,
            sink: &sink,
            token: &token,
        })
        .await
        .expect("must succeed");

        assert!(outcome.log.contains(&"jobs=7".to_string()));
    }

    #[tokio::test]
    async fn cancellation_terminates_the_tool() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = CollectingEventSink::new();
        let token = CancellationToken::new();
        token.cancel("operator interrupt");

        let started = std::time::Instant::now();
        let err = run_compile(request("sleep 30", dir.path(), None, &sink, &token))
            .await
            .expect_err("cancelled run must fail");

        assert!(matches!(err, ForgeflowError::Cancelled(_)));
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }
}
