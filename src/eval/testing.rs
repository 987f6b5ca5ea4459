//! Hand-scriptable evaluator for protocol tests
//!
//! Lets tests build an exact snapshot history (arena, trace, not-executed
//! ranges) without touching disk, and fail configure/compute on demand.

use super::{
    CacheEntry, CommandInfo, EvalError, Evaluator, EvaluatorFactory, EvaluatorState, ProjectModel,
    Reporter, TargetModel,
};
use crate::listfile::{ListFileContext, ListFileFunction};
use crate::snapshot::Snapshot;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
struct FakeNode {
    parent: Option<u64>,
    exec_file: PathBuf,
    start_line: i64,
    defs: HashMap<String, Option<String>>,
}

#[derive(Default)]
pub struct FakeEvaluator {
    nodes: Vec<FakeNode>,
    trace: Vec<(ListFileContext, Vec<Snapshot>)>,
    not_executed: HashMap<PathBuf, Vec<(i64, i64)>>,
    writers: HashMap<String, Vec<Snapshot>>,
    commands: HashMap<String, CommandInfo>,
    pub configure_error: Option<String>,
    pub compute_error: Option<String>,
    pub inputs: Vec<PathBuf>,
    pub cache: Vec<CacheEntry>,
    pub project: ProjectModel,
}

impl FakeEvaluator {
    pub fn new() -> Self {
        let mut fake = Self::default();
        for info in [
            CommandInfo::new("set").with_context(0, super::ParameterContext::VariableIdentifier),
            CommandInfo::new("unset").with_context(0, super::ParameterContext::VariableIdentifier),
            CommandInfo::new("include").with_context(0, super::ParameterContext::ModuleName),
            CommandInfo::new("message"),
            CommandInfo::new("if"),
            CommandInfo::new("endif"),
        ] {
            fake.commands.insert(info.name.clone(), info);
        }
        fake
    }

    pub fn add_snapshot(
        &mut self,
        parent: Option<Snapshot>,
        file: impl Into<PathBuf>,
        line: i64,
    ) -> Snapshot {
        let id = self.nodes.len() as u64;
        self.nodes.push(FakeNode {
            parent: parent.map(|s| s.0),
            exec_file: file.into(),
            start_line: line,
            defs: HashMap::new(),
        });
        Snapshot(id)
    }

    pub fn define(&mut self, snapshot: Snapshot, key: &str, value: &str) {
        if let Some(node) = self.nodes.get_mut(snapshot.0 as usize) {
            node.defs.insert(key.to_string(), Some(value.to_string()));
        }
        self.writers
            .entry(key.to_string())
            .or_default()
            .insert(0, snapshot);
    }

    pub fn add_trace_entry(&mut self, file: impl Into<PathBuf>, line: i64, chain: Vec<Snapshot>) {
        self.trace
            .push((ListFileContext::new(file.into(), line), chain));
    }

    pub fn set_not_executed(&mut self, file: impl Into<PathBuf>, ranges: Vec<(i64, i64)>) {
        self.not_executed.insert(file.into(), ranges);
    }

    pub fn add_command(&mut self, info: CommandInfo) {
        self.commands.insert(info.name.clone(), info);
    }

    /// A typical fixture: a root file with `set` commands at the given
    /// lines, each defining `VAR_<line>`.
    pub fn with_linear_history(file: &str, lines: &[i64]) -> Self {
        let mut fake = Self::new();
        let root = fake.add_snapshot(None, file, 0);
        let mut previous = root;
        for &line in lines {
            let entry = fake.add_snapshot(Some(previous), file, line);
            fake.define(entry, &format!("VAR_{line}"), &line.to_string());
            fake.add_trace_entry(file, line, vec![entry]);
            previous = entry;
        }
        fake
    }
}

pub struct FakeEvaluatorFactory {
    pub build: Box<dyn Fn() -> FakeEvaluator + Send + Sync>,
}

impl EvaluatorFactory for FakeEvaluatorFactory {
    fn create(&self) -> Box<dyn Evaluator> {
        Box::new((self.build)())
    }
}

impl Evaluator for FakeEvaluator {
    fn load_cache(&mut self, _build_directory: &Path) -> Result<(), EvalError> {
        Ok(())
    }

    fn set_directories(&mut self, _source: &Path, _build: &Path) {}

    fn set_generator(&mut self, generator: &str, _extra: Option<&str>) -> Result<(), EvalError> {
        if self.recognizes_generator(generator) {
            Ok(())
        } else {
            Err(EvalError::UnknownGenerator(generator.to_string()))
        }
    }

    fn recognizes_generator(&self, name: &str) -> bool {
        name == "Unix Makefiles" || name == "Ninja"
    }

    fn known_generators(&self) -> Vec<String> {
        vec!["Unix Makefiles".to_string(), "Ninja".to_string()]
    }

    fn configure(
        &mut self,
        _cache_arguments: &[String],
        reporter: &dyn Reporter,
    ) -> Result<(), EvalError> {
        reporter.progress(0, 0, 1, "configuring");
        if let Some(message) = &self.configure_error {
            return Err(EvalError::Configure(message.clone()));
        }
        reporter.progress(0, 1, 1, "configured");
        Ok(())
    }

    fn compute(&mut self) -> Result<(), EvalError> {
        match &self.compute_error {
            Some(message) => Err(EvalError::Compute(message.clone())),
            None => Ok(()),
        }
    }

    fn consumed_inputs(&self) -> Vec<PathBuf> {
        self.inputs.clone()
    }

    fn cache_entries(&self) -> Vec<CacheEntry> {
        self.cache.clone()
    }

    fn read_commands(
        &mut self,
        base: Snapshot,
        functions: &[ListFileFunction],
        count: usize,
    ) -> Option<(Snapshot, Option<ListFileFunction>)> {
        self.nodes.get(base.0 as usize)?;
        let exec_file = self.nodes[base.0 as usize].exec_file.clone();

        let mut current = base;
        let mut last = None;
        for function in functions.iter().take(count) {
            let entry = self.add_snapshot(Some(current), exec_file.clone(), function.line);
            if function.name.eq_ignore_ascii_case("set") {
                if let Some(key) = function.arguments.first() {
                    let value = function
                        .arguments
                        .iter()
                        .skip(1)
                        .map(|a| a.value.clone())
                        .collect::<Vec<_>>()
                        .join(";");
                    self.define(entry, &key.value, &value);
                }
            }
            current = entry;
            last = Some(function.clone());
        }
        Some((current, last))
    }

    fn state(&self) -> &dyn EvaluatorState {
        self
    }

    fn project_map(&self) -> ProjectModel {
        self.project.clone()
    }

    fn find_target(&self, name: &str) -> Option<TargetModel> {
        self.project.targets.iter().find(|t| t.name == name).cloned()
    }
}

impl EvaluatorState for FakeEvaluator {
    fn closure_keys(&self, snapshot: Snapshot) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut keys = Vec::new();
        let mut cursor = Some(snapshot.0);
        while let Some(id) = cursor {
            let Some(node) = self.nodes.get(id as usize) else { break };
            for (key, value) in &node.defs {
                if seen.insert(key.clone()) && value.is_some() {
                    keys.push(key.clone());
                }
            }
            cursor = node.parent;
        }
        keys.sort();
        keys
    }

    fn definition(&self, snapshot: Snapshot, key: &str) -> Option<String> {
        let mut cursor = Some(snapshot.0);
        while let Some(id) = cursor {
            let node = self.nodes.get(id as usize)?;
            if let Some(value) = node.defs.get(key) {
                return value.clone();
            }
            cursor = node.parent;
        }
        None
    }

    fn not_executed(&self, file: &Path) -> Vec<(i64, i64)> {
        self.not_executed.get(file).cloned().unwrap_or_default()
    }

    fn writers(&self, _snapshot: Snapshot, key: &str) -> Vec<Snapshot> {
        self.writers.get(key).cloned().unwrap_or_default()
    }

    fn command(&self, name: &str) -> Option<CommandInfo> {
        self.commands.get(&name.to_lowercase()).cloned()
    }

    fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.keys().cloned().collect();
        names.sort();
        names
    }

    fn trace_snapshots(&self) -> Vec<(ListFileContext, Vec<Snapshot>)> {
        self.trace.clone()
    }

    fn pop_arbitrary(&self, snapshot: Snapshot) -> Option<Snapshot> {
        self.nodes
            .get(snapshot.0 as usize)?
            .parent
            .map(Snapshot)
    }

    fn execution_file(&self, snapshot: Snapshot) -> PathBuf {
        self.nodes
            .get(snapshot.0 as usize)
            .map(|n| n.exec_file.clone())
            .unwrap_or_default()
    }

    fn starting_line(&self, snapshot: Snapshot) -> i64 {
        self.nodes
            .get(snapshot.0 as usize)
            .map(|n| n.start_line)
            .unwrap_or(0)
    }
}
