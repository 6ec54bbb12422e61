//! # Forgeflow
//!
//! A deterministic, resumable, parameterized build orchestrator for
//! native-extension pipelines: fetch pinned sources, extract them, patch
//! the filesystem, drive an external build tool, and collect the wheels it
//! produces.
//!
//! - **Stage graph**: declared stages with predecessors, executed in a
//!   stable topological order
//! - **Parameter resolution**: defaults, an environment allowlist, and
//!   explicit overrides folded into one immutable configuration
//! - **Opaque execution**: external tools are commands with an exit
//!   status, never parsed or special-cased
//! - **Resume**: skip completed stages, trusting their recorded artifacts
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use forgeflow::prelude::*;
//!
//! let config = ParameterResolver::new(Profile::Framework)
//!     .with_override("framework_version", "2.4.0")
//!     .resolve()?;
//! let graph = profile_graph(&config)?;
//!
//! let report = Orchestrator::new(
//!     graph,
//!     config,
//!     Arc::new(LoggingEventSink::default()),
//!     Arc::new(CancellationToken::new()),
//! )
//! .run()
//! .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod artifacts;
pub mod cancellation;
pub mod config;
pub mod errors;
pub mod events;
pub mod executor;
pub mod graph;
pub mod orchestrator;
pub mod retry;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::artifacts::{Artifact, ArtifactCollector, CollectionSummary};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{BuildConfiguration, ParameterResolver, Profile};
    pub use crate::errors::{
        ConfigurationError, CyclicDependencyError, ExtractionError, FetchError, ForgeflowError,
        GraphValidationError, MissingPrerequisiteError, StageExecutionError, WorkdirLockedError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::executor::{
        FetchFailure, Fetcher, HttpFetcher, StageExecutor, StageResult, StageStatus,
    };
    pub use crate::graph::{profile_graph, GraphBuilder, Operation, StageGraph, StageSpec};
    pub use crate::orchestrator::{
        Orchestrator, PipelineState, RunManifest, RunOptions, RunReport, RunStatus, WorkdirLock,
    };
    pub use crate::retry::{BackoffStrategy, JitterStrategy, RetryConfig};
}
