//! End-to-end orchestrator tests: full pipeline runs over a temporary
//! working directory, with a scripted fetcher standing in for the network.

use super::*;
use crate::config::{ParameterResolver, Profile};
use crate::events::CollectingEventSink;
use crate::graph::{GraphBuilder, Operation, StageGraph, StageSpec};
use crate::testing::{write_tar_gz, ScriptedFetcher};
use pretty_assertions::assert_eq;
use std::path::Path;
use tempfile::TempDir;

fn test_config(dir: &TempDir) -> BuildConfiguration {
    ParameterResolver::new(Profile::Framework)
        .with_working_dir(dir.path().join("work"))
        .with_output_dir(dir.path().join("out"))
        .resolve()
        .expect("configuration resolves")
}

/// A five-stage pipeline shaped like the framework profile, with the
/// compile stage replaced by a shell command that fabricates a wheel.
fn sample_graph(compile_command: &str) -> StageGraph {
    GraphBuilder::new("sample")
        .stage(
            StageSpec::new(
                "fetch",
                Operation::Fetch {
                    url: "https://example.invalid/pkg-{framework_version}.tar.gz".to_string(),
                    dest: "downloads/pkg.tar.gz".to_string(),
                    checksum: None,
                },
            )
            .with_output("downloads/pkg.tar.gz"),
        )
        .and_then(|b| {
            b.stage(
                StageSpec::new(
                    "extract",
                    Operation::Extract {
                        archive: "downloads/pkg.tar.gz".to_string(),
                        dest: "src".to_string(),
                    },
                )
                .after("fetch")
                .with_output("src/pkg/README"),
            )
        })
        .and_then(|b| {
            b.stage(
                StageSpec::new(
                    "link",
                    Operation::Link {
                        target: "downloads/pkg.tar.gz".to_string(),
                        link: "links/pkg.so".to_string(),
                    },
                )
                .after("extract")
                .with_output("links/pkg.so"),
            )
        })
        .and_then(|b| {
            b.stage(
                StageSpec::new(
                    "compile",
                    Operation::Compile {
                        command: compile_command.to_string(),
                        workdir: "src/pkg".to_string(),
                        env: vec![("JOBS".to_string(), "{jobs}".to_string())],
                    },
                )
                .after("link")
                .with_output("src/pkg/dist"),
            )
        })
        .and_then(|b| {
            b.stage(
                StageSpec::new(
                    "collect",
                    Operation::Collect {
                        root: "src/pkg/dist".to_string(),
                        pattern: "*.whl".to_string(),
                    },
                )
                .after("compile"),
            )
        })
        .and_then(GraphBuilder::build)
        .expect("sample graph builds")
}

fn archive_bytes() -> Vec<u8> {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("pkg.tar.gz");
    write_tar_gz(&path, &[("pkg/README", b"sample package")]);
    std::fs::read(&path).expect("archive bytes")
}

const GOOD_COMPILE: &str =
    "mkdir -p dist && echo compiling && cp README dist/pkg-1.0-py3-none-any.whl";

#[tokio::test]
async fn five_stage_run_completes_end_to_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(&dir);
    let sink = Arc::new(CollectingEventSink::new());
    let fetcher = Arc::new(ScriptedFetcher::failing_then_ok(0, &archive_bytes()));

    let report = Orchestrator::new(
        sample_graph(GOOD_COMPILE),
        config.clone(),
        sink.clone(),
        Arc::new(CancellationToken::new()),
    )
    .with_fetcher(fetcher.clone())
    .run()
    .await
    .expect("run starts");

    assert_eq!(report.status, RunStatus::Completed);
    assert!(report.is_success());
    assert!(report.failure.is_none());
    assert_eq!(fetcher.attempts(), 1);

    let executed: Vec<&str> = report.stages.iter().map(|r| r.stage_id.as_str()).collect();
    assert_eq!(executed, vec!["fetch", "extract", "link", "compile", "collect"]);
    assert!(report.stages.iter().all(StageResult::is_success));

    // Exactly the collected wheel lands in the output directory.
    assert_eq!(report.artifacts_written.len(), 1);
    let wheel = config.output_dir().join("pkg-1.0-py3-none-any.whl");
    assert!(wheel.is_file());
    // Collection copies; the stage's own product stays in place.
    assert!(config
        .working_dir()
        .join("src/pkg/dist/pkg-1.0-py3-none-any.whl")
        .is_file());

    assert_eq!(sink.count("stage.completed"), 5);
    assert_eq!(sink.count("run.completed"), 1);
    assert_eq!(sink.count("run.failed"), 0);

    // Each success was recorded as it happened.
    let manifest = RunManifest::load(config.working_dir())
        .expect("manifest readable")
        .expect("manifest present");
    for stage in ["fetch", "extract", "link", "compile", "collect"] {
        assert!(manifest.is_completed(stage), "{stage} missing from manifest");
    }
}

#[tokio::test]
async fn compile_failure_halts_before_collection() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(&dir);
    let sink = Arc::new(CollectingEventSink::new());
    let fetcher = Arc::new(ScriptedFetcher::failing_then_ok(0, &archive_bytes()));

    let report = Orchestrator::new(
        sample_graph("echo the build exploded && exit 9"),
        config.clone(),
        sink.clone(),
        Arc::new(CancellationToken::new()),
    )
    .with_fetcher(fetcher)
    .run()
    .await
    .expect("run starts");

    assert_eq!(report.status, RunStatus::Failed);
    let failure = report.failure.expect("failure detail");
    assert_eq!(failure.stage, "compile");
    assert_eq!(failure.kind, "StageExecutionError");
    assert!(failure
        .log_tail
        .iter()
        .any(|line| line.contains("the build exploded")));

    // Collect never ran and nothing was materialized.
    let executed: Vec<&str> = report.stages.iter().map(|r| r.stage_id.as_str()).collect();
    assert_eq!(executed, vec!["fetch", "extract", "link", "compile"]);
    assert!(report.artifacts_written.is_empty());
    assert!(!config.output_dir().exists());
    assert_eq!(sink.count("run.failed"), 1);
}

#[tokio::test]
async fn resume_skips_completed_stages_without_refetching() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(&dir);

    let first = Arc::new(ScriptedFetcher::failing_then_ok(0, &archive_bytes()));
    Orchestrator::new(
        sample_graph(GOOD_COMPILE),
        config.clone(),
        Arc::new(CollectingEventSink::new()),
        Arc::new(CancellationToken::new()),
    )
    .with_fetcher(first)
    .run()
    .await
    .expect("first run starts");

    // A resumed run must never touch the network again.
    let second = Arc::new(ScriptedFetcher::always_permanent("no network on resume"));
    let report = Orchestrator::new(
        sample_graph(GOOD_COMPILE),
        config.clone(),
        Arc::new(CollectingEventSink::new()),
        Arc::new(CancellationToken::new()),
    )
    .with_fetcher(second.clone())
    .with_options(RunOptions {
        resume_from: Some("compile".to_string()),
    })
    .run()
    .await
    .expect("resumed run starts");

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(second.attempts(), 0);

    let statuses: Vec<(&str, StageStatus)> = report
        .stages
        .iter()
        .map(|r| (r.stage_id.as_str(), r.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("fetch", StageStatus::Skipped),
            ("extract", StageStatus::Skipped),
            ("link", StageStatus::Skipped),
            ("compile", StageStatus::Succeeded),
            ("collect", StageStatus::Succeeded),
        ]
    );
}

#[tokio::test]
async fn resume_into_missing_prerequisites_fails_fast() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(&dir);

    // Fresh working directory: the skipped fetch stage left nothing behind.
    let report = Orchestrator::new(
        sample_graph(GOOD_COMPILE),
        config,
        Arc::new(CollectingEventSink::new()),
        Arc::new(CancellationToken::new()),
    )
    .with_options(RunOptions {
        resume_from: Some("extract".to_string()),
    })
    .run()
    .await
    .expect("run starts");

    assert_eq!(report.status, RunStatus::Failed);
    let failure = report.failure.expect("failure detail");
    assert_eq!(failure.stage, "extract");
    assert_eq!(failure.kind, "MissingPrerequisiteError");
    assert!(failure.message.contains("pkg.tar.gz"));
}

#[tokio::test]
async fn unknown_resume_stage_is_a_configuration_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = Orchestrator::new(
        sample_graph(GOOD_COMPILE),
        test_config(&dir),
        Arc::new(CollectingEventSink::new()),
        Arc::new(CancellationToken::new()),
    )
    .with_options(RunOptions {
        resume_from: Some("nonesuch".to_string()),
    })
    .run()
    .await
    .expect_err("unknown stage id is rejected");

    assert_eq!(err.exit_code(), 1);
}

/// What, if anything, depends on the failing best-effort stage.
#[derive(Clone, Copy)]
enum Dependent {
    None,
    Required,
    Optional,
}

fn best_effort_graph(dependent: Dependent) -> StageGraph {
    let builder = GraphBuilder::new("extras")
        .stage(StageSpec::new(
            "prep",
            Operation::Install {
                command: "true".to_string(),
            },
        ))
        .and_then(|b| {
            b.stage(
                StageSpec::new(
                    "extras",
                    Operation::Install {
                        command: "exit 7".to_string(),
                    },
                )
                .after("prep")
                .best_effort()
                .with_output("extras-marker"),
            )
        })
        .and_then(|b| {
            b.stage(
                StageSpec::new(
                    "finish",
                    Operation::Install {
                        command: "true".to_string(),
                    },
                )
                .after("prep"),
            )
        })
        .expect("stages accepted");

    let builder = match dependent {
        Dependent::None => builder,
        Dependent::Required | Dependent::Optional => {
            let mut spec = StageSpec::new(
                "needs-extras",
                Operation::Install {
                    command: "true".to_string(),
                },
            )
            .after("extras");
            if matches!(dependent, Dependent::Optional) {
                spec = spec.best_effort();
            }
            builder.stage(spec).expect("consumer accepted")
        }
    };

    builder.build().expect("graph builds")
}

#[tokio::test]
async fn best_effort_failure_becomes_a_warning() {
    let dir = tempfile::tempdir().expect("tempdir");
    let report = Orchestrator::new(
        best_effort_graph(Dependent::None),
        test_config(&dir),
        Arc::new(CollectingEventSink::new()),
        Arc::new(CancellationToken::new()),
    )
    .run()
    .await
    .expect("run starts");

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].contains("best-effort stage 'extras' failed"));
    let extras = report
        .stages
        .iter()
        .find(|r| r.stage_id == "extras")
        .expect("extras result recorded");
    assert_eq!(extras.status, StageStatus::Failed);
}

#[tokio::test]
async fn dependents_of_a_failed_best_effort_stage_need_its_outputs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let report = Orchestrator::new(
        best_effort_graph(Dependent::Required),
        test_config(&dir),
        Arc::new(CollectingEventSink::new()),
        Arc::new(CancellationToken::new()),
    )
    .run()
    .await
    .expect("run starts");

    assert_eq!(report.status, RunStatus::Failed);
    let failure = report.failure.expect("failure detail");
    assert_eq!(failure.stage, "needs-extras");
    assert_eq!(failure.kind, "MissingPrerequisiteError");
}

#[tokio::test]
async fn a_chain_of_best_effort_stages_degrades_to_warnings() {
    let dir = tempfile::tempdir().expect("tempdir");
    let report = Orchestrator::new(
        best_effort_graph(Dependent::Optional),
        test_config(&dir),
        Arc::new(CollectingEventSink::new()),
        Arc::new(CancellationToken::new()),
    )
    .run()
    .await
    .expect("run starts");

    // The optional chain fails link by link; the run still completes.
    assert_eq!(report.status, RunStatus::Completed);
    assert!(report.failure.is_none());
    assert_eq!(report.warnings.len(), 2);
    assert!(report.warnings[0].contains("'extras'"));
    assert!(report.warnings[1].contains("'needs-extras'"));

    let chained = report
        .stages
        .iter()
        .find(|r| r.stage_id == "needs-extras")
        .expect("chained result recorded");
    assert_eq!(chained.status, StageStatus::Failed);
    assert_eq!(
        chained.error_kind.as_deref(),
        Some("MissingPrerequisiteError")
    );
}

#[tokio::test]
async fn resume_warns_about_stages_the_manifest_never_recorded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(&dir);

    Orchestrator::new(
        sample_graph(GOOD_COMPILE),
        config.clone(),
        Arc::new(CollectingEventSink::new()),
        Arc::new(CancellationToken::new()),
    )
    .with_fetcher(Arc::new(ScriptedFetcher::failing_then_ok(0, &archive_bytes())))
    .run()
    .await
    .expect("first run starts");

    // The working directory is intact but the completion record is gone.
    std::fs::remove_file(config.working_dir().join(".forgeflow-manifest.json"))
        .expect("manifest removed");

    let report = Orchestrator::new(
        sample_graph(GOOD_COMPILE),
        config,
        Arc::new(CollectingEventSink::new()),
        Arc::new(CancellationToken::new()),
    )
    .with_options(RunOptions {
        resume_from: Some("collect".to_string()),
    })
    .run()
    .await
    .expect("resumed run starts");

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.warnings.len(), 4);
    assert!(report
        .warnings
        .iter()
        .all(|w| w.contains("not recorded as completed")));
}

#[tokio::test]
async fn concurrent_runs_on_one_workdir_are_refused() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(&dir);
    let lock = WorkdirLock::acquire(config.working_dir()).expect("first lock");

    let err = Orchestrator::new(
        sample_graph(GOOD_COMPILE),
        config,
        Arc::new(CollectingEventSink::new()),
        Arc::new(CancellationToken::new()),
    )
    .run()
    .await
    .expect_err("locked working directory is refused");

    assert_eq!(err.kind(), "WorkdirLockedError");
    assert_eq!(err.exit_code(), 2);
    lock.release();
}

/// Declared outputs resolve relative to the working directory, including
/// templated segments.
#[test]
fn output_resolution_joins_the_working_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(&dir);
    let orchestrator = Orchestrator::new(
        sample_graph(GOOD_COMPILE),
        config.clone(),
        Arc::new(CollectingEventSink::new()),
        Arc::new(CancellationToken::new()),
    );
    assert_eq!(
        orchestrator.resolve_output("downloads/pkg.tar.gz"),
        config.working_dir().join("downloads/pkg.tar.gz")
    );
    assert_eq!(
        orchestrator.resolve_output("/abs/path"),
        Path::new("/abs/path")
    );
}
