//! Stage graph: the ordered, parameterized set of build stages.
//!
//! A graph is fixed at startup for a given build profile and never mutated
//! during execution. The execution order is a stable topological sort:
//! whenever several stages are ready, declaration order breaks the tie, so
//! identical configurations always produce identical runs.

mod profiles;

pub use profiles::profile_graph;

use crate::config::BuildConfiguration;
use crate::errors::{ConfigurationError, CyclicDependencyError, GraphValidationError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// The operation a stage performs. Opaque to the orchestrator, which only
/// cares about the success/failure outcome; all string fields are templates
/// interpolated against the [`BuildConfiguration`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operation {
    /// Retrieve a remote resource into the working directory.
    Fetch {
        /// URL template of the resource.
        url: String,
        /// Destination path template, relative to the working directory.
        dest: String,
        /// Optional expected SHA-256 checksum (hex).
        checksum: Option<String>,
    },
    /// Unpack an archive into a target directory.
    Extract {
        /// Archive path template, relative to the working directory.
        archive: String,
        /// Destination directory template, relative to the working directory.
        dest: String,
    },
    /// Create a compatibility symlink. Re-running against an existing,
    /// identical link is a success, not an error.
    Link {
        /// Link target template (what the symlink points at).
        target: String,
        /// Link path template.
        link: String,
    },
    /// Run a package-install command. "Already satisfied" is success.
    Install {
        /// Shell command template, run with `sh -c`.
        command: String,
    },
    /// Invoke an external build tool, streaming its output.
    Compile {
        /// Shell command template, run with `sh -c`.
        command: String,
        /// Working directory template, relative to the run working directory.
        workdir: String,
        /// Environment entries (name, value template) for the child process.
        env: Vec<(String, String)>,
    },
    /// Enumerate produced files under a directory and register them as
    /// artifacts.
    Collect {
        /// Root directory template, relative to the working directory.
        root: String,
        /// File name pattern (`*` wildcard).
        pattern: String,
    },
}

impl Operation {
    /// Short name of the operation kind, used in logs and reports.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fetch { .. } => "fetch",
            Self::Extract { .. } => "extract",
            Self::Link { .. } => "link",
            Self::Install { .. } => "install",
            Self::Compile { .. } => "compile",
            Self::Collect { .. } => "collect",
        }
    }

    /// Returns every template string the operation carries, for
    /// resolve-time validation.
    #[must_use]
    pub fn templates(&self) -> Vec<&str> {
        match self {
            Self::Fetch { url, dest, .. } => vec![url, dest],
            Self::Extract { archive, dest } => vec![archive, dest],
            Self::Link { target, link } => vec![target, link],
            Self::Install { command } => vec![command],
            Self::Compile {
                command,
                workdir,
                env,
            } => {
                let mut t = vec![command.as_str(), workdir.as_str()];
                t.extend(env.iter().map(|(_, v)| v.as_str()));
                t
            }
            Self::Collect { root, pattern } => vec![root, pattern],
        }
    }
}

/// Specification of one stage: identity, predecessors, operation, declared
/// outputs, and execution hints. Immutable after definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSpec {
    /// Unique, stable stage identifier.
    pub id: String,
    /// Predecessor stage ids, in declaration order.
    pub predecessors: Vec<String>,
    /// The operation this stage performs.
    pub operation: Operation,
    /// Declared output path templates, relative to the working directory.
    /// Consulted to verify prerequisites when a run resumes past this stage.
    pub outputs: Vec<String>,
    /// Whether failure is recorded without halting the pipeline.
    pub best_effort: bool,
    /// Whether re-running the stage is safe.
    pub idempotent: bool,
    /// Optional per-stage timeout in seconds. Stages default to unbounded.
    pub timeout_secs: Option<u64>,
    /// Whether partially written outputs are removed on cancellation.
    /// Defaults to false: partial state is left for operator inspection.
    pub cleanup_on_cancel: bool,
}

impl StageSpec {
    /// Creates a new stage spec with no predecessors.
    #[must_use]
    pub fn new(id: impl Into<String>, operation: Operation) -> Self {
        Self {
            id: id.into(),
            predecessors: Vec::new(),
            operation,
            outputs: Vec::new(),
            best_effort: false,
            idempotent: false,
            timeout_secs: None,
            cleanup_on_cancel: false,
        }
    }

    /// Adds a predecessor stage id.
    #[must_use]
    pub fn after(mut self, predecessor: impl Into<String>) -> Self {
        self.predecessors.push(predecessor.into());
        self
    }

    /// Declares an output path template.
    #[must_use]
    pub fn with_output(mut self, path: impl Into<String>) -> Self {
        self.outputs.push(path.into());
        self
    }

    /// Marks the stage best-effort: failure is recorded, not fatal.
    #[must_use]
    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }

    /// Marks the stage safe to re-run.
    #[must_use]
    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    /// Sets a per-stage timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs());
        self
    }

    /// Opts the stage into cleanup of partial outputs on cancellation.
    #[must_use]
    pub fn cleanup_on_cancel(mut self) -> Self {
        self.cleanup_on_cancel = true;
        self
    }

    /// Validates the spec in isolation.
    ///
    /// # Errors
    ///
    /// Returns a [`GraphValidationError`] for an empty or malformed id, or
    /// a self-dependency.
    pub fn validate(&self) -> Result<(), GraphValidationError> {
        if self.id.is_empty() {
            return Err(GraphValidationError::new("stage id must not be empty"));
        }
        if !self
            .id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(GraphValidationError::new(format!(
                "stage id '{}' must be lowercase alphanumeric with dashes",
                self.id
            ))
            .with_stages(vec![self.id.clone()]));
        }
        if self.predecessors.iter().any(|p| p == &self.id) {
            return Err(GraphValidationError::new(format!(
                "stage '{}' cannot depend on itself",
                self.id
            ))
            .with_stages(vec![self.id.clone()]));
        }
        Ok(())
    }
}

/// Builder for a validated stage graph.
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    name: String,
    stages: Vec<StageSpec>,
}

impl GraphBuilder {
    /// Creates a new graph builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Adds a stage. Declaration order is the topological tie-break.
    ///
    /// # Errors
    ///
    /// Returns a [`GraphValidationError`] for an invalid spec or a
    /// duplicate stage id.
    pub fn stage(mut self, spec: StageSpec) -> Result<Self, GraphValidationError> {
        spec.validate()?;
        if self.stages.iter().any(|s| s.id == spec.id) {
            return Err(GraphValidationError::new(format!(
                "duplicate stage id '{}'",
                spec.id
            ))
            .with_stages(vec![spec.id]));
        }
        self.stages.push(spec);
        Ok(self)
    }

    /// Builds the graph, computing the execution order.
    ///
    /// # Errors
    ///
    /// Returns a [`GraphValidationError`] for an empty graph or an unknown
    /// predecessor, or a wrapped [`CyclicDependencyError`] if no valid
    /// order exists.
    pub fn build(self) -> Result<StageGraph, GraphValidationError> {
        if self.stages.is_empty() {
            return Err(GraphValidationError::new("stage graph has no stages"));
        }

        let known: HashSet<&str> = self.stages.iter().map(|s| s.id.as_str()).collect();
        for spec in &self.stages {
            for pred in &spec.predecessors {
                if !known.contains(pred.as_str()) {
                    return Err(GraphValidationError::new(format!(
                        "stage '{}' depends on unknown stage '{}'",
                        spec.id, pred
                    ))
                    .with_stages(vec![spec.id.clone(), pred.clone()]));
                }
            }
        }

        let execution_order = stable_topological_order(&self.stages)?;

        Ok(StageGraph {
            name: self.name,
            stages: self.stages,
            execution_order,
        })
    }
}

/// A validated, immutable stage graph with a precomputed execution order.
#[derive(Debug, Clone)]
pub struct StageGraph {
    name: String,
    stages: Vec<StageSpec>,
    execution_order: Vec<String>,
}

impl StageGraph {
    /// Returns the graph name (usually the profile).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns the execution order (topological, declaration-order stable).
    #[must_use]
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Looks up a stage spec by id.
    #[must_use]
    pub fn stage(&self, id: &str) -> Option<&StageSpec> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Iterates the stage specs in declaration order.
    pub fn stages(&self) -> impl Iterator<Item = &StageSpec> {
        self.stages.iter()
    }

    /// Checks that every template in the graph is resolvable against the
    /// configuration, before anything executes.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] naming the first unresolvable
    /// placeholder.
    pub fn validate_against(&self, config: &BuildConfiguration) -> Result<(), ConfigurationError> {
        for spec in &self.stages {
            for template in spec.operation.templates() {
                config.validate_template(template)?;
            }
            for output in &spec.outputs {
                config.validate_template(output)?;
            }
        }
        Ok(())
    }
}

/// Computes a topological order where ready stages are taken in declaration
/// order, keeping runs reproducible.
fn stable_topological_order(stages: &[StageSpec]) -> Result<Vec<String>, GraphValidationError> {
    let index: HashMap<&str, usize> = stages
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    let mut remaining: Vec<usize> = (0..stages.len()).collect();
    let mut done: HashSet<usize> = HashSet::new();
    let mut order = Vec::with_capacity(stages.len());

    while !remaining.is_empty() {
        let ready = remaining.iter().copied().find(|&i| {
            stages[i]
                .predecessors
                .iter()
                .all(|p| index.get(p.as_str()).is_some_and(|pi| done.contains(pi)))
        });

        match ready {
            Some(i) => {
                order.push(stages[i].id.clone());
                done.insert(i);
                remaining.retain(|&r| r != i);
            }
            None => {
                let cycle = find_cycle(stages, &index, &done);
                return Err(CyclicDependencyError::new(cycle).into());
            }
        }
    }

    Ok(order)
}

/// Finds one cycle among the stages that could not be scheduled.
fn find_cycle(
    stages: &[StageSpec],
    index: &HashMap<&str, usize>,
    done: &HashSet<usize>,
) -> Vec<String> {
    // Walk predecessors from any stuck stage until an id repeats.
    let start = (0..stages.len()).find(|i| !done.contains(i)).unwrap_or(0);
    let mut path: Vec<usize> = vec![start];
    let mut seen: HashSet<usize> = HashSet::from([start]);

    loop {
        let current = *path.last().unwrap_or(&start);
        let next = stages[current]
            .predecessors
            .iter()
            .filter_map(|p| index.get(p.as_str()).copied())
            .find(|i| !done.contains(i));

        match next {
            Some(i) if seen.contains(&i) => {
                let from = path.iter().position(|&p| p == i).unwrap_or(0);
                let mut cycle: Vec<String> =
                    path[from..].iter().map(|&p| stages[p].id.clone()).collect();
                cycle.push(stages[i].id.clone());
                return cycle;
            }
            Some(i) => {
                seen.insert(i);
                path.push(i);
            }
            None => return path.iter().map(|&p| stages[p].id.clone()).collect(),
        }
    }
}
