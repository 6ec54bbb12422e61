//! Command line interface definition

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// forgeflow - resumable build orchestrator for native-extension pipelines
#[derive(Parser)]
#[command(name = "forgeflow")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Resumable build orchestrator for native-extension pipelines")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Global arguments available for all commands
#[derive(Parser)]
pub struct GlobalArgs {
    /// Output the final report as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run a build pipeline to completion
    #[command(alias = "b")]
    Build {
        /// Build profile (framework, framework+vision+audio)
        #[arg(short, long, default_value = "framework")]
        profile: String,

        /// Parameter or toggle override, as name=value (repeatable)
        #[arg(long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,

        /// Resume from this stage, trusting earlier stages' artifacts
        #[arg(long, value_name = "STAGE")]
        resume_from: Option<String>,

        /// Working directory for intermediate state
        #[arg(short, long, default_value = "work")]
        working_dir: PathBuf,

        /// Output directory artifacts are collected into
        #[arg(short, long, default_value = "dist")]
        output_dir: PathBuf,
    },

    /// Print the resolved stage order for a profile without running it
    Plan {
        /// Build profile (framework, framework+vision+audio)
        #[arg(short, long, default_value = "framework")]
        profile: String,

        /// Parameter or toggle override, as name=value (repeatable)
        #[arg(long = "param", value_name = "NAME=VALUE")]
        params: Vec<String>,
    },
}

/// Splits a `name=value` argument at the first `=`.
pub fn split_param(raw: &str) -> Option<(&str, &str)> {
    let (name, value) = raw.split_once('=')?;
    if name.is_empty() {
        return None;
    }
    Some((name, value))
}
