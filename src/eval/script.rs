//! Reference evaluator
//!
//! A minimal interpreter for the configuration language, enough to drive
//! the snapshot machinery for real: it records a snapshot per executed
//! command, tracks variable scopes through a persistent parent chain,
//! collects not-executed ranges from skipped branches and recorded macro
//! bodies, and derives the project map from `project`/`add_executable`/
//! `add_library` calls. The full build-system evaluator lives elsewhere;
//! everything here stays behind the bridge traits.

use super::cache::{CacheFile, CACHE_FILE_NAME, EXTRA_GENERATOR_KEY, GENERATOR_KEY, HOME_DIRECTORY_KEY};
use super::{
    CacheEntry, CommandInfo, EvalError, Evaluator, EvaluatorFactory, EvaluatorState,
    ParameterContext, ProjectModel, Reporter, TargetModel, TargetType,
};
use crate::listfile::parser::Parser;
use crate::listfile::{
    CollectingMessenger, ListFileArgument, ListFileContext, ListFileFunction, MessageKind,
};
use crate::snapshot::Snapshot;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const KNOWN_GENERATORS: &[&str] = &["Unix Makefiles", "Ninja"];

pub struct ScriptEvaluatorFactory;

impl EvaluatorFactory for ScriptEvaluatorFactory {
    fn create(&self) -> Box<dyn Evaluator> {
        Box::new(ScriptEvaluator::new())
    }
}

/// One node of the persistent state history. A [`Snapshot`] is an index
/// into the node arena; a node sees every definition at or before it on
/// its parent chain.
#[derive(Debug)]
struct Node {
    parent: Option<u64>,
    exec_file: PathBuf,
    start_line: i64,
    /// Definition delta; `None` is an unset tombstone.
    defs: HashMap<String, Option<String>>,
}

pub struct ScriptEvaluator {
    source_dir: PathBuf,
    build_dir: PathBuf,
    generator: String,
    extra_generator: String,

    cache: CacheFile,
    nodes: Vec<Node>,
    current: Option<Snapshot>,
    trace: Vec<(ListFileContext, Vec<Snapshot>)>,
    not_executed: HashMap<PathBuf, Vec<(i64, i64)>>,
    writers: HashMap<String, Vec<Snapshot>>,
    commands: HashMap<String, CommandInfo>,
    inputs: Vec<PathBuf>,
    project: ProjectModel,
    configured: bool,
}

impl ScriptEvaluator {
    pub fn new() -> Self {
        Self {
            source_dir: PathBuf::new(),
            build_dir: PathBuf::new(),
            generator: String::new(),
            extra_generator: String::new(),
            cache: CacheFile::default(),
            nodes: Vec::new(),
            current: None,
            trace: Vec::new(),
            not_executed: HashMap::new(),
            writers: HashMap::new(),
            commands: builtin_commands(),
            inputs: Vec::new(),
            project: ProjectModel::default(),
            configured: false,
        }
    }

    fn node(&self, snapshot: Snapshot) -> Option<&Node> {
        self.nodes.get(snapshot.0 as usize)
    }

    fn new_node(&mut self, parent: Option<Snapshot>, exec_file: PathBuf, start_line: i64) -> Snapshot {
        let id = self.nodes.len() as u64;
        self.nodes.push(Node {
            parent: parent.map(|s| s.0),
            exec_file,
            start_line,
            defs: HashMap::new(),
        });
        Snapshot(id)
    }

    fn define(&mut self, snapshot: Snapshot, key: &str, value: Option<String>) {
        if let Some(node) = self.nodes.get_mut(snapshot.0 as usize) {
            node.defs.insert(key.to_string(), value);
        }
        self.writers
            .entry(key.to_string())
            .or_default()
            .insert(0, snapshot);
    }

    fn lookup(&self, snapshot: Snapshot, key: &str) -> Option<String> {
        let mut cursor = Some(snapshot);
        while let Some(snap) = cursor {
            let node = self.node(snap)?;
            if let Some(value) = node.defs.get(key) {
                return value.clone();
            }
            cursor = node.parent.map(Snapshot);
        }
        None
    }

    /// Expand `${NAME}` references against the state at `snapshot`.
    /// Single level, innermost first.
    fn expand(&self, snapshot: Snapshot, value: &str) -> String {
        let mut result = String::with_capacity(value.len());
        let chars: Vec<char> = value.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            if chars[i] == '$' && chars.get(i + 1) == Some(&'{') {
                if let Some(close) = chars[i + 2..].iter().position(|&c| c == '}') {
                    let name: String = chars[i + 2..i + 2 + close].iter().collect();
                    if let Some(resolved) = self.lookup(snapshot, &name) {
                        result.push_str(&resolved);
                    }
                    i += close + 3;
                    continue;
                }
            }
            result.push(chars[i]);
            i += 1;
        }
        result
    }

    fn expand_args(&self, snapshot: Snapshot, args: &[ListFileArgument]) -> Vec<String> {
        args.iter()
            .map(|a| self.expand(snapshot, &a.value))
            .collect()
    }

    fn record_not_executed(&mut self, file: &Path, lo: i64, hi: i64) {
        if lo >= hi {
            return;
        }
        self.not_executed
            .entry(file.to_path_buf())
            .or_default()
            .push((lo, hi));
    }

    /// Apply one `-DVAR[:TYPE]=VALUE` cache argument.
    fn apply_cache_argument(&mut self, root: Snapshot, argument: &str) {
        let Some(definition) = argument.strip_prefix("-D") else {
            debug!("Ignoring cache argument {:?}", argument);
            return;
        };
        let Some(eq_pos) = definition.find('=') else {
            warn!("Malformed cache argument {:?}", argument);
            return;
        };
        let (key_part, value) = definition.split_at(eq_pos);
        let value = &value[1..];
        let (key, entry_type) = match key_part.find(':') {
            Some(colon) => (&key_part[..colon], &key_part[colon + 1..]),
            None => (key_part, "STRING"),
        };

        self.define(root, key, Some(value.to_string()));
        let (key, entry_type, value) = (key.to_string(), entry_type.to_string(), value.to_string());
        self.upsert_cache_entry(&key, &entry_type, value);
    }

    fn execute_file(
        &mut self,
        path: &Path,
        frame_stack: &[Snapshot],
        reporter: &dyn Reporter,
    ) -> Result<(), EvalError> {
        debug!("Evaluating {:?}", path);
        self.inputs.push(path.to_path_buf());

        let mut messenger = CollectingMessenger::new();
        let parsed = Parser::new(path, &mut messenger).parse_file(path);
        for (kind, text, _) in &messenger.messages {
            let title = match kind {
                MessageKind::AuthorWarning => "Warning",
                MessageKind::FatalError => "Error",
            };
            reporter.message(text, title);
        }
        let list_file =
            parsed.map_err(|e| EvalError::Configure(format!("Parse failed: {e}")))?;

        self.execute_functions(&list_file.functions, path, frame_stack, reporter)
    }

    fn execute_functions(
        &mut self,
        functions: &[ListFileFunction],
        file: &Path,
        frame_stack: &[Snapshot],
        reporter: &dyn Reporter,
    ) -> Result<(), EvalError> {
        let mut index = 0;
        while index < functions.len() {
            let name = functions[index].name.to_lowercase();
            match name.as_str() {
                "if" => {
                    index = self.execute_if(functions, index, file, frame_stack, reporter)?;
                }
                "macro" | "function" => {
                    index = self.record_user_command(functions, index, file, frame_stack);
                }
                _ => {
                    self.execute_command(&functions[index], file, frame_stack, reporter)?;
                    index += 1;
                }
            }
        }
        Ok(())
    }

    /// Execute an `if` block: evaluate branch conditions in order, run the
    /// chosen branch, and record every skipped body as not executed.
    /// Returns the index just past the matching `endif`.
    fn execute_if(
        &mut self,
        functions: &[ListFileFunction],
        start: usize,
        file: &Path,
        frame_stack: &[Snapshot],
        reporter: &dyn Reporter,
    ) -> Result<usize, EvalError> {
        self.execute_command(&functions[start], file, frame_stack, reporter)?;

        // Markers at nesting depth zero: elseif/else plus the endif.
        let mut markers: Vec<usize> = Vec::new();
        let mut end = functions.len();
        let mut depth = 0usize;
        for (offset, function) in functions.iter().enumerate().skip(start + 1) {
            match function.name.to_lowercase().as_str() {
                "if" => depth += 1,
                "endif" if depth == 0 => {
                    end = offset;
                    break;
                }
                "endif" => depth -= 1,
                "elseif" | "else" if depth == 0 => markers.push(offset),
                _ => {}
            }
        }

        // Branch boundaries: the if itself, each marker, then the endif.
        let mut boundaries = vec![start];
        boundaries.extend(&markers);
        boundaries.push(end);

        let mut taken = None;
        for window in 0..boundaries.len() - 1 {
            let head = boundaries[window];
            let condition = match functions[head].name.to_lowercase().as_str() {
                "if" | "elseif" => {
                    let base = self.current.unwrap_or(Snapshot(0));
                    self.condition(base, &functions[head].arguments)
                }
                _ => true, // else
            };
            if taken.is_none() && condition {
                taken = Some(window);
            }
        }

        for window in 0..boundaries.len() - 1 {
            let head = boundaries[window];
            let body = &functions[head + 1..boundaries[window + 1]];
            if taken == Some(window) {
                self.execute_functions(body, file, frame_stack, reporter)?;
            } else {
                let lo = functions[head].line + 1;
                let hi = if boundaries[window + 1] < functions.len() {
                    functions[boundaries[window + 1]].line
                } else {
                    functions.last().map(|f| f.close_paren_line + 1).unwrap_or(lo)
                };
                self.record_not_executed(file, lo, hi);
            }
        }

        Ok(end.saturating_add(1).min(functions.len() + 1))
    }

    /// Evaluate a condition. The reference evaluator understands literal
    /// constants, plain variable references, `NOT`, `DEFINED` and
    /// `STREQUAL`; anything more elaborate evaluates to true.
    fn condition(&self, snapshot: Snapshot, args: &[ListFileArgument]) -> bool {
        let values = self.expand_args(snapshot, args);
        match values.as_slice() {
            [] => false,
            [single] => self.truthy_reference(snapshot, single),
            [not_keyword, rest @ ..] if not_keyword == "NOT" && !rest.is_empty() => {
                !self.condition(snapshot, &args[1..])
            }
            [defined, var] if defined == "DEFINED" => self.lookup(snapshot, var).is_some(),
            [lhs, op, rhs] if op == "STREQUAL" => {
                self.resolve_operand(snapshot, lhs) == self.resolve_operand(snapshot, rhs)
            }
            _ => true,
        }
    }

    fn resolve_operand(&self, snapshot: Snapshot, operand: &str) -> String {
        self.lookup(snapshot, operand)
            .unwrap_or_else(|| operand.to_string())
    }

    fn truthy_reference(&self, snapshot: Snapshot, value: &str) -> bool {
        if is_true_constant(value) {
            return true;
        }
        if is_false_constant(value) {
            return false;
        }
        match self.lookup(snapshot, value) {
            Some(resolved) => !is_false_constant(&resolved),
            None => false,
        }
    }

    /// Record a macro/function definition without executing its body.
    /// Returns the index just past the matching end marker.
    fn record_user_command(
        &mut self,
        functions: &[ListFileFunction],
        start: usize,
        file: &Path,
        frame_stack: &[Snapshot],
    ) -> usize {
        let header = &functions[start];
        let opener = header.name.to_lowercase();
        let closer = format!("end{opener}");

        let mut depth = 0usize;
        let mut end = functions.len();
        for (offset, function) in functions.iter().enumerate().skip(start + 1) {
            let name = function.name.to_lowercase();
            if name == opener {
                depth += 1;
            } else if name == closer {
                if depth == 0 {
                    end = offset;
                    break;
                }
                depth -= 1;
            }
        }

        self.snapshot_command(header, file, frame_stack);
        if let Some(argument) = header.arguments.first() {
            let name = argument.value.to_lowercase();
            self.commands
                .entry(name.clone())
                .or_insert_with(|| CommandInfo::new(name));
        }

        let hi = if end < functions.len() {
            functions[end].line
        } else {
            functions.last().map(|f| f.close_paren_line + 1).unwrap_or(header.line + 1)
        };
        self.record_not_executed(file, header.line + 1, hi);

        end.saturating_add(1).min(functions.len() + 1)
    }

    /// Create the entry snapshot for a command and record the trace entry.
    fn snapshot_command(
        &mut self,
        function: &ListFileFunction,
        file: &Path,
        frame_stack: &[Snapshot],
    ) -> Snapshot {
        let entry = self.new_node(self.current, file.to_path_buf(), function.line);
        self.current = Some(entry);

        let mut chain = frame_stack.to_vec();
        chain.push(entry);
        self.trace
            .push((ListFileContext::new(file, function.line), chain));
        entry
    }

    fn execute_command(
        &mut self,
        function: &ListFileFunction,
        file: &Path,
        frame_stack: &[Snapshot],
        reporter: &dyn Reporter,
    ) -> Result<(), EvalError> {
        let entry = self.snapshot_command(function, file, frame_stack);
        let args = self.expand_args(entry, &function.arguments);

        match function.name.to_lowercase().as_str() {
            "set" => {
                if let Some((key, value)) = args.split_first() {
                    let key = key.clone();
                    self.define(entry, &key, Some(value.join(";")));
                }
            }
            "option" => {
                if let Some(key) = args.first() {
                    let key = key.clone();
                    let value = args.get(2).cloned().unwrap_or_else(|| "OFF".to_string());
                    self.define(entry, &key, Some(value));
                }
            }
            "unset" => {
                if let Some(key) = args.first() {
                    let key = key.clone();
                    self.define(entry, &key, None);
                }
            }
            "project" => {
                if let Some(name) = args.first() {
                    self.project.name = name.clone();
                    let name = name.clone();
                    self.define(entry, "PROJECT_NAME", Some(name));
                }
            }
            "add_executable" => {
                if let Some((name, sources)) = args.split_first() {
                    self.add_target(
                        name.clone(),
                        TargetType::Executable,
                        sources.to_vec(),
                        ListFileContext::new(file, function.line),
                    );
                }
            }
            "add_library" => {
                if let Some((name, rest)) = args.split_first() {
                    let (kind, sources) = match rest.first().map(String::as_str) {
                        Some("SHARED") => (TargetType::SharedLibrary, &rest[1..]),
                        Some("STATIC") => (TargetType::StaticLibrary, &rest[1..]),
                        _ => (TargetType::StaticLibrary, rest),
                    };
                    self.add_target(
                        name.clone(),
                        kind,
                        sources.to_vec(),
                        ListFileContext::new(file, function.line),
                    );
                }
            }
            "include" => {
                if let Some(target) = args.first() {
                    let resolved = self.resolve_path(file, target);
                    match resolved {
                        Some(path) => {
                            let mut frames = frame_stack.to_vec();
                            frames.push(entry);
                            self.execute_file(&path, &frames, reporter)?;
                        }
                        None => {
                            reporter.message(
                                &format!("include could not find load file:\n\n  {target}"),
                                "Warning",
                            );
                        }
                    }
                }
            }
            "add_subdirectory" => {
                if let Some(dir) = args.first() {
                    let child = self
                        .resolve_path(file, &format!("{dir}/CMakeLists.txt"))
                        .filter(|p| p.is_file());
                    match child {
                        Some(path) => {
                            let mut frames = frame_stack.to_vec();
                            frames.push(entry);
                            self.execute_file(&path, &frames, reporter)?;
                        }
                        None => {
                            reporter.message(
                                &format!("add_subdirectory given source \"{dir}\" which is not an existing directory."),
                                "Warning",
                            );
                        }
                    }
                }
            }
            "message" => {
                if let Some(text) = args.last() {
                    reporter.message(text, "Message");
                }
            }
            _ => {
                // Unknown and unmodelled commands execute as no-ops; the
                // snapshot still marks the line as reached.
            }
        }
        Ok(())
    }

    fn add_target(
        &mut self,
        name: String,
        target_type: TargetType,
        sources: Vec<String>,
        origin: ListFileContext,
    ) {
        self.project.targets.push(TargetModel {
            name,
            target_type,
            sources,
            defined_at: Some((&origin).into()),
        });
    }

    fn resolve_path(&self, current_file: &Path, target: &str) -> Option<PathBuf> {
        let target_path = PathBuf::from(target);
        if target_path.is_absolute() {
            return target_path.is_file().then_some(target_path);
        }
        let sibling = current_file.parent()?.join(&target_path);
        if sibling.is_file() {
            return Some(sibling);
        }
        let from_source = self.source_dir.join(&target_path);
        from_source.is_file().then_some(from_source)
    }

    fn ancestors(&self, snapshot: Snapshot) -> Vec<u64> {
        let mut out = Vec::new();
        let mut cursor = Some(snapshot.0);
        while let Some(id) = cursor {
            out.push(id);
            cursor = self.nodes.get(id as usize).and_then(|n| n.parent);
        }
        out
    }

    fn upsert_cache_entry(&mut self, key: &str, entry_type: &str, value: String) {
        self.cache.entries.retain(|e| e.key != key);
        self.cache.entries.push(CacheEntry {
            key: key.to_string(),
            entry_type: entry_type.to_string(),
            value,
            advanced: false,
        });
        self.cache.entries.sort_by(|a, b| a.key.cmp(&b.key));
    }

    /// Write the cache back to the build directory so a later handshake
    /// can recover the generator and source directory from it.
    fn persist_cache(&mut self) {
        self.upsert_cache_entry(GENERATOR_KEY, "INTERNAL", self.generator.clone());
        if !self.extra_generator.is_empty() {
            self.upsert_cache_entry(
                EXTRA_GENERATOR_KEY,
                "INTERNAL",
                self.extra_generator.clone(),
            );
        }
        self.upsert_cache_entry(
            HOME_DIRECTORY_KEY,
            "INTERNAL",
            self.source_dir.display().to_string(),
        );

        if let Err(e) = std::fs::create_dir_all(&self.build_dir) {
            warn!("Cannot create build directory {:?}: {}", self.build_dir, e);
            return;
        }
        let mut out = String::from("# This is the CMakeCache file.\n\n");
        for entry in &self.cache.entries {
            out.push_str(&format!(
                "{}:{}={}\n",
                entry.key, entry.entry_type, entry.value
            ));
            if entry.advanced {
                out.push_str(&format!("{}-ADVANCED:INTERNAL=1\n", entry.key));
            }
        }
        if let Err(e) = std::fs::write(self.build_dir.join(CACHE_FILE_NAME), out) {
            warn!("Failed to write cache file: {}", e);
        }
    }
}

impl Default for ScriptEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator for ScriptEvaluator {
    fn load_cache(&mut self, build_directory: &Path) -> Result<(), EvalError> {
        self.cache = CacheFile::load(build_directory).map_err(|_| EvalError::CacheLoad)?;
        Ok(())
    }

    fn set_directories(&mut self, source: &Path, build: &Path) {
        self.source_dir = source.to_path_buf();
        self.build_dir = build.to_path_buf();
    }

    fn set_generator(&mut self, generator: &str, extra: Option<&str>) -> Result<(), EvalError> {
        if !self.recognizes_generator(generator) {
            return Err(EvalError::UnknownGenerator(generator.to_string()));
        }
        self.generator = generator.to_string();
        self.extra_generator = extra.unwrap_or("").to_string();
        Ok(())
    }

    fn recognizes_generator(&self, name: &str) -> bool {
        KNOWN_GENERATORS.contains(&name)
    }

    fn known_generators(&self) -> Vec<String> {
        KNOWN_GENERATORS.iter().map(|s| s.to_string()).collect()
    }

    fn configure(
        &mut self,
        cache_arguments: &[String],
        reporter: &dyn Reporter,
    ) -> Result<(), EvalError> {
        let root_file = self.source_dir.join("CMakeLists.txt");
        if !root_file.is_file() {
            return Err(EvalError::Configure(
                "No CMakeLists.txt found in source directory.".to_string(),
            ));
        }

        // A re-run starts from a clean history.
        self.nodes.clear();
        self.trace.clear();
        self.not_executed.clear();
        self.writers.clear();
        self.inputs.clear();
        self.commands = builtin_commands();
        self.project = ProjectModel::default();
        self.configured = false;

        reporter.progress(0, 0, 2, "configuring");

        let root = self.new_node(None, root_file.clone(), 0);
        self.current = Some(root);
        for argument in cache_arguments {
            self.apply_cache_argument(root, argument);
        }

        self.execute_file(&root_file, &[], reporter)?;
        reporter.progress(0, 1, 2, "configured");

        self.persist_cache();
        self.configured = true;
        reporter.progress(0, 2, 2, "done");
        Ok(())
    }

    fn compute(&mut self) -> Result<(), EvalError> {
        if !self.configured {
            return Err(EvalError::Compute("Not configured.".to_string()));
        }
        self.project.source_directory = self.source_dir.display().to_string();
        self.project.build_directory = self.build_dir.display().to_string();
        if self.project.name.is_empty() {
            self.project.name = "Project".to_string();
        }
        Ok(())
    }

    fn consumed_inputs(&self) -> Vec<PathBuf> {
        self.inputs.clone()
    }

    fn cache_entries(&self) -> Vec<CacheEntry> {
        self.cache.entries.clone()
    }

    fn read_commands(
        &mut self,
        base: Snapshot,
        functions: &[ListFileFunction],
        count: usize,
    ) -> Option<(Snapshot, Option<ListFileFunction>)> {
        self.node(base)?;
        let exec_file = self.node(base)?.exec_file.clone();

        let mut current = base;
        let mut last = None;
        for function in functions.iter().take(count) {
            let entry = self.new_node(Some(current), exec_file.clone(), function.line);
            let args = self.expand_args(entry, &function.arguments);
            match function.name.to_lowercase().as_str() {
                "set" => {
                    if let Some((key, value)) = args.split_first() {
                        let key = key.clone();
                        self.define(entry, &key, Some(value.join(";")));
                    }
                }
                "unset" => {
                    if let Some(key) = args.first() {
                        let key = key.clone();
                        self.define(entry, &key, None);
                    }
                }
                _ => {}
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

impl EvaluatorState for ScriptEvaluator {
    fn closure_keys(&self, snapshot: Snapshot) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut keys = Vec::new();
        let mut cursor = Some(snapshot);
        while let Some(snap) = cursor {
            let Some(node) = self.node(snap) else { break };
            for (key, value) in &node.defs {
                if seen.insert(key.clone()) && value.is_some() {
                    keys.push(key.clone());
                }
            }
            cursor = node.parent.map(Snapshot);
        }
        keys.sort();
        keys
    }

    fn definition(&self, snapshot: Snapshot, key: &str) -> Option<String> {
        self.lookup(snapshot, key)
    }

    fn not_executed(&self, file: &Path) -> Vec<(i64, i64)> {
        let mut ranges = self
            .not_executed
            .get(file)
            .cloned()
            .unwrap_or_default();
        ranges.sort_unstable();
        ranges
    }

    fn writers(&self, snapshot: Snapshot, key: &str) -> Vec<Snapshot> {
        let Some(recorded) = self.writers.get(key) else {
            return Vec::new();
        };
        let visible: std::collections::HashSet<u64> =
            self.ancestors(snapshot).into_iter().collect();
        recorded
            .iter()
            .filter(|s| visible.contains(&s.0))
            .copied()
            .collect()
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
        self.node(snapshot)?.parent.map(Snapshot)
    }

    fn execution_file(&self, snapshot: Snapshot) -> PathBuf {
        self.node(snapshot)
            .map(|n| n.exec_file.clone())
            .unwrap_or_default()
    }

    fn starting_line(&self, snapshot: Snapshot) -> i64 {
        self.node(snapshot).map(|n| n.start_line).unwrap_or(0)
    }
}

fn is_true_constant(value: &str) -> bool {
    let upper = value.to_uppercase();
    matches!(upper.as_str(), "1" | "ON" | "YES" | "TRUE" | "Y")
        || value.parse::<f64>().map(|n| n != 0.0).unwrap_or(false)
}

fn is_false_constant(value: &str) -> bool {
    let upper = value.to_uppercase();
    upper.is_empty()
        || upper.ends_with("-NOTFOUND")
        || matches!(upper.as_str(), "0" | "OFF" | "NO" | "FALSE" | "N" | "IGNORE" | "NOTFOUND")
}

/// The builtin command registry with per-parameter identifier contexts.
fn builtin_commands() -> HashMap<String, CommandInfo> {
    let specs = vec![
        CommandInfo::new("set").with_context(0, ParameterContext::VariableIdentifier),
        CommandInfo::new("unset").with_context(0, ParameterContext::VariableIdentifier),
        CommandInfo::new("option").with_context(0, ParameterContext::VariableIdentifier),
        CommandInfo::new("include").with_context(0, ParameterContext::ModuleName),
        CommandInfo::new("find_package").with_context(0, ParameterContext::PackageName),
        CommandInfo::new("cmake_policy").with_context(1, ParameterContext::Policy),
        CommandInfo::new("set_target_properties").with_context(1, ParameterContext::TargetProperty),
        CommandInfo::new("get_target_property")
            .with_context(0, ParameterContext::VariableIdentifier)
            .with_context(2, ParameterContext::TargetProperty),
        CommandInfo::new("set_directory_properties")
            .with_context(1, ParameterContext::DirectoryProperty),
        CommandInfo::new("project"),
        CommandInfo::new("add_executable"),
        CommandInfo::new("add_library"),
        CommandInfo::new("add_subdirectory"),
        CommandInfo::new("target_link_libraries"),
        CommandInfo::new("cmake_minimum_required"),
        CommandInfo::new("message"),
        CommandInfo::new("if"),
        CommandInfo::new("elseif"),
        CommandInfo::new("else"),
        CommandInfo::new("endif"),
        CommandInfo::new("foreach"),
        CommandInfo::new("endforeach"),
        CommandInfo::new("while"),
        CommandInfo::new("endwhile"),
        CommandInfo::new("macro"),
        CommandInfo::new("endmacro"),
        CommandInfo::new("function"),
        CommandInfo::new("endfunction"),
        CommandInfo::new("string"),
        CommandInfo::new("list"),
        CommandInfo::new("math"),
    ];
    specs
        .into_iter()
        .map(|info| (info.name.clone(), info))
        .collect()
}
