//! forgeflow - resumable build orchestrator for native-extension pipelines
//!
//! Thin binary over the `forgeflow` library: parses arguments, resolves the
//! configuration, runs the orchestrator, and maps outcomes to exit codes.
//!
//! Exit codes: 0 success, 1 configuration error, 2 execution failure,
//! 3 graph definition error.

mod cli;

use crate::cli::{split_param, Cli, Commands};
use clap::Parser;
use forgeflow::prelude::*;
use std::collections::HashMap;
use std::process;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json_mode = cli.global.json;

    init_tracing(json_mode, cli.global.debug);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            if !json_mode {
                eprintln!("Error: {err}");
            }
            err.exit_code()
        }
    };
    process::exit(code);
}

async fn run(cli: Cli) -> Result<i32, ForgeflowError> {
    match cli.command {
        Commands::Build {
            profile,
            params,
            resume_from,
            working_dir,
            output_dir,
        } => {
            let config = resolve_config(&profile, &params)?
                .with_working_dir(working_dir)
                .with_output_dir(output_dir)
                .resolve()?;
            let graph = profile_graph(&config)?;

            let token = Arc::new(CancellationToken::new());
            spawn_interrupt_handler(token.clone());

            let sink: Arc<dyn EventSink> = if cli.global.json {
                Arc::new(NoOpEventSink)
            } else {
                Arc::new(LoggingEventSink::default())
            };

            let report = Orchestrator::new(graph, config, sink, token)
                .with_options(RunOptions { resume_from })
                .run()
                .await?;

            if cli.global.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.render_text());
            }

            Ok(if report.is_success() { 0 } else { 2 })
        }
        Commands::Plan { profile, params } => {
            let config = resolve_config(&profile, &params)?.resolve()?;
            let graph = profile_graph(&config)?;

            if cli.global.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "profile": graph.name(),
                        "stages": graph.execution_order(),
                    }))?
                );
            } else {
                info!(profile = %graph.name(), stages = graph.stage_count(), "resolved plan");
                for stage_id in graph.execution_order() {
                    println!("{stage_id}");
                }
            }
            Ok(0)
        }
    }
}

/// Builds a resolver from the profile name, the process environment, and
/// the `--param` overrides, in that precedence order.
fn resolve_config(profile: &str, params: &[String]) -> Result<ParameterResolver, ForgeflowError> {
    let profile: Profile = profile.parse()?;
    let env: HashMap<String, String> = std::env::vars().collect();

    let mut resolver = ParameterResolver::new(profile).with_env(env);
    for raw in params {
        let Some((name, value)) = split_param(raw) else {
            return Err(ConfigurationError::invalid_value(
                "param",
                raw,
                "expected name=value",
            )
            .into());
        };
        resolver = resolver.with_override(name, value);
    }
    Ok(resolver)
}

/// Cancels the run on the first interrupt; a second interrupt kills the
/// process the usual way.
fn spawn_interrupt_handler(token: Arc<CancellationToken>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling run");
            token.cancel("interrupted");
        }
    });
}

fn init_tracing(json_mode: bool, debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    if json_mode {
        // Keep stdout clean for the JSON report; logs go to stderr as JSON.
        tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .init();
    }
}
