//! Evaluator bridge
//!
//! The core treats the configuration evaluator as a collaborator behind
//! this narrow surface: it owns the persistent snapshot history, the
//! command registry, cache entries, and the project map the generator
//! produced. [`script::ScriptEvaluator`] is the reference implementation;
//! protocol code only ever sees the traits.

pub mod cache;
pub mod script;

#[cfg(test)]
pub mod testing;

use crate::listfile::{ListFileContext, ListFileFunction};
use crate::snapshot::Snapshot;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("Failed to load cache in build directory.")]
    CacheLoad,

    #[error("Generator \"{0}\" not recognized.")]
    UnknownGenerator(String),

    #[error("Configuration failed: {0}")]
    Configure(String),

    #[error("Failed to compute build system: {0}")]
    Compute(String),
}

/// Progress/message sink installed for the duration of a single request
/// handler and released on every exit path.
pub trait Reporter {
    fn progress(&self, min: i64, current: i64, max: i64, message: &str);
    fn message(&self, text: &str, title: &str);
}

/// Reporter that drops everything; for paths with no request in flight.
#[allow(dead_code)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn progress(&self, _min: i64, _current: i64, _max: i64, _message: &str) {}
    fn message(&self, _text: &str, _title: &str) {}
}

/// What a command parameter at a given position identifies, for contextual
/// help and completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterContext {
    TargetProperty,
    DirectoryProperty,
    VariableIdentifier,
    Policy,
    ModuleName,
    PackageName,
    Plain,
}

/// Registered command metadata.
#[derive(Debug, Clone)]
pub struct CommandInfo {
    pub name: String,
    /// Parameter positions with a known identifier context.
    pub parameter_contexts: Vec<(usize, ParameterContext)>,
}

impl CommandInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameter_contexts: Vec::new(),
        }
    }

    pub fn with_context(mut self, index: usize, context: ParameterContext) -> Self {
        self.parameter_contexts.push((index, context));
        self
    }

    pub fn context_for_parameter(&self, _args: &[String], index: usize) -> ParameterContext {
        self.parameter_contexts
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, context)| *context)
            .unwrap_or(ParameterContext::Plain)
    }
}

/// Target kinds the reference generator distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TargetType {
    #[serde(rename = "EXECUTABLE")]
    Executable,
    #[serde(rename = "STATIC_LIBRARY")]
    StaticLibrary,
    #[serde(rename = "SHARED_LIBRARY")]
    SharedLibrary,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetModel {
    pub name: String,
    #[serde(rename = "type")]
    pub target_type: TargetType,
    pub sources: Vec<String>,
    /// Where the target was defined.
    pub defined_at: Option<BacktraceFrame>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktraceFrame {
    pub path: String,
    pub line: i64,
}

impl From<&ListFileContext> for BacktraceFrame {
    fn from(context: &ListFileContext) -> Self {
        Self {
            path: context.file_path.display().to_string(),
            line: context.line,
        }
    }
}

/// The project tree produced by the generator's compute pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectModel {
    pub name: String,
    #[serde(rename = "sourceDirectory")]
    pub source_directory: String,
    #[serde(rename = "buildDirectory")]
    pub build_directory: String,
    pub targets: Vec<TargetModel>,
}

/// One `KEY:TYPE=VALUE` entry of the build-directory cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub entry_type: String,
    pub value: String,
    pub advanced: bool,
}

/// Read-only view of the evaluator's persistent state.
pub trait EvaluatorState {
    /// Variable names visible at a snapshot (innermost scope last wins).
    fn closure_keys(&self, snapshot: Snapshot) -> Vec<String>;

    fn definition(&self, snapshot: Snapshot, key: &str) -> Option<String>;

    /// Half-open `[lo, hi)` line intervals of `file` the full evaluation
    /// never reached, in increasing order.
    fn not_executed(&self, file: &Path) -> Vec<(i64, i64)>;

    /// Snapshots that wrote `key`, most recent first.
    fn writers(&self, snapshot: Snapshot, key: &str) -> Vec<Snapshot>;

    fn command(&self, name: &str) -> Option<CommandInfo>;

    fn command_names(&self) -> Vec<String>;

    /// The linearised trace of the last full evaluation: entry point plus
    /// the snapshot chain at that point, outermost first.
    fn trace_snapshots(&self) -> Vec<(ListFileContext, Vec<Snapshot>)>;

    /// Remove the snapshot's entry-point frame, exposing the enclosing
    /// frame. `None` at the root.
    fn pop_arbitrary(&self, snapshot: Snapshot) -> Option<Snapshot>;

    /// The list file a snapshot was executing.
    fn execution_file(&self, snapshot: Snapshot) -> PathBuf;

    /// The line at which the snapshot's frame was entered.
    fn starting_line(&self, snapshot: Snapshot) -> i64;
}

/// Everything the core relies on from the configuration evaluator.
pub trait Evaluator: Send {
    fn load_cache(&mut self, build_directory: &Path) -> Result<(), EvalError>;

    fn set_directories(&mut self, source: &Path, build: &Path);

    fn set_generator(&mut self, generator: &str, extra: Option<&str>) -> Result<(), EvalError>;

    fn recognizes_generator(&self, name: &str) -> bool;

    fn known_generators(&self) -> Vec<String>;

    /// Run the configure pass, reporting progress and messages through the
    /// scoped reporter.
    fn configure(
        &mut self,
        cache_arguments: &[String],
        reporter: &dyn Reporter,
    ) -> Result<(), EvalError>;

    /// Run the generator's compute pass.
    fn compute(&mut self) -> Result<(), EvalError>;

    /// Input files consumed by the last configure, for the file monitor
    /// and the `cmakeInputs` reply.
    fn consumed_inputs(&self) -> Vec<PathBuf>;

    fn cache_entries(&self) -> Vec<CacheEntry>;

    /// Execute the first `count` of the given parsed functions against the
    /// base snapshot, returning the refined snapshot and the last function
    /// executed. `None` when the base snapshot is unknown.
    fn read_commands(
        &mut self,
        base: Snapshot,
        functions: &[ListFileFunction],
        count: usize,
    ) -> Option<(Snapshot, Option<ListFileFunction>)>;

    fn state(&self) -> &dyn EvaluatorState;

    fn project_map(&self) -> ProjectModel;

    fn find_target(&self, name: &str) -> Option<TargetModel>;
}

/// Creates a fresh evaluator per handshake.
pub trait EvaluatorFactory: Send {
    fn create(&self) -> Box<dyn Evaluator>;
}
