//! Protocol version (1, 0)
//!
//! Everything behind the handshake: activation prerequisites (build/source
//! directory and generator resolution against the build-directory cache),
//! the configure/compute lifecycle with progress and message plumbing, the
//! model introspection commands, and the differential query surface backed
//! by the snapshot index.

use crate::eval::cache::CacheFile;
use crate::eval::{Evaluator, EvaluatorFactory, ParameterContext, Reporter};
use crate::listfile::parser::Parser;
use crate::listfile::{CollectingMessenger, Delimiter, ListFileContext, ListFileFunction};
use crate::monitor::{FileMonitor, PathEvent};
use crate::protocol::{Protocol, ProtocolVersion};
use crate::server::message::{keys, Emitter, Request, Response};
use crate::snapshot::diff::DifferentialFileContent;
use crate::snapshot::index::SnapshotIndex;
use crate::snapshot::{query, Snapshot};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const FILE_PATH_KEY: &str = "file_path";
const FILE_LINE_KEY: &str = "file_line";
const FILE_COLUMN_KEY: &str = "file_column";
const FILE_CONTENT_KEY: &str = "file_content";
const MATCHER_KEY: &str = "matcher";
const CONTENT_RESULT_KEY: &str = "content_result";
const UNEXECUTED: &str = "unexecuted";

/// Session lifecycle once a protocol is bound. The unbound phase lives in
/// the server's dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SessionState {
    Active,
    Configured,
    Computed,
}

/// Boolean diagnostics flags mirrored by `globalSettings` /
/// `setGlobalSettings`.
#[derive(Debug, Clone, Copy)]
struct GlobalFlags {
    debug_output: bool,
    trace: bool,
    trace_expand: bool,
    warn_uninitialized: bool,
    warn_unused: bool,
    warn_unused_cli: bool,
    check_system_vars: bool,
}

impl Default for GlobalFlags {
    fn default() -> Self {
        Self {
            debug_output: false,
            trace: false,
            trace_expand: false,
            warn_uninitialized: false,
            warn_unused: false,
            warn_unused_cli: true,
            check_system_vars: false,
        }
    }
}

const FLAG_KEYS: &[&str] = &[
    "debugOutput",
    "trace",
    "traceExpand",
    "warnUninitialized",
    "warnUnused",
    "warnUnusedCli",
    "checkSystemVars",
];

impl Reporter for Request {
    fn progress(&self, min: i64, current: i64, max: i64, message: &str) {
        self.report_progress(min, current, max, message);
    }

    fn message(&self, text: &str, title: &str) {
        self.report_message(text, title);
    }
}

pub struct ProtocolV1 {
    factory: Box<dyn EvaluatorFactory>,
    signal: Emitter,
    path_events: mpsc::UnboundedSender<PathEvent>,

    evaluator: Option<Box<dyn Evaluator>>,
    state: SessionState,
    source_dir: PathBuf,
    build_dir: PathBuf,
    generator: String,
    extra_generator: String,
    flags: GlobalFlags,
    snapshots: SnapshotIndex,
    monitor: Option<FileMonitor>,
    dirty: bool,
}

impl ProtocolV1 {
    pub fn new(
        factory: Box<dyn EvaluatorFactory>,
        signal: Emitter,
        path_events: mpsc::UnboundedSender<PathEvent>,
    ) -> Self {
        Self {
            factory,
            signal,
            path_events,
            evaluator: None,
            state: SessionState::Active,
            source_dir: PathBuf::new(),
            build_dir: PathBuf::new(),
            generator: String::new(),
            extra_generator: String::new(),
            flags: GlobalFlags::default(),
            snapshots: SnapshotIndex::new(),
            monitor: None,
            dirty: false,
        }
    }

    #[cfg(test)]
    pub(crate) fn install_evaluator_computed(&mut self, evaluator: Box<dyn Evaluator>) {
        self.evaluator = Some(evaluator);
        self.state = SessionState::Computed;
        self.rebuild_index();
    }

    fn rebuild_index(&mut self) {
        self.snapshots.clear();
        let Some(evaluator) = self.evaluator.as_ref() else {
            return;
        };
        for (context, chain) in evaluator.state().trace_snapshots() {
            self.snapshots.insert(context, chain);
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    fn process_global_settings(&mut self, request: &Request) -> Response {
        let Some(evaluator) = self.evaluator.as_ref() else {
            return request.report_error("Not active.");
        };
        request.reply(json!({
            (keys::BUILD_DIRECTORY_KEY): self.build_dir.display().to_string(),
            (keys::SOURCE_DIRECTORY_KEY): self.source_dir.display().to_string(),
            (keys::GENERATOR_KEY): self.generator,
            (keys::EXTRA_GENERATOR_KEY): self.extra_generator,
            "capabilities": {
                "generators": evaluator.known_generators(),
                "serverMode": true,
                "version": env!("CARGO_PKG_VERSION"),
            },
            "debugOutput": self.flags.debug_output,
            "trace": self.flags.trace,
            "traceExpand": self.flags.trace_expand,
            "warnUninitialized": self.flags.warn_uninitialized,
            "warnUnused": self.flags.warn_unused,
            "warnUnusedCli": self.flags.warn_unused_cli,
            "checkSystemVars": self.flags.check_system_vars,
        }))
    }

    fn process_set_global_settings(&mut self, request: &Request) -> Response {
        for key in FLAG_KEYS {
            match request.data.get(*key) {
                None | Some(Value::Null) | Some(Value::Bool(_)) => {}
                Some(_) => {
                    return request
                        .report_error(format!("\"{key}\" must be unset or a bool value."));
                }
            }
        }

        let mut set = |key: &str, slot: &mut bool| {
            if let Some(value) = request.data.get(key).and_then(Value::as_bool) {
                *slot = value;
            }
        };
        set("debugOutput", &mut self.flags.debug_output);
        set("trace", &mut self.flags.trace);
        set("traceExpand", &mut self.flags.trace_expand);
        set("warnUninitialized", &mut self.flags.warn_uninitialized);
        set("warnUnused", &mut self.flags.warn_unused);
        set("warnUnusedCli", &mut self.flags.warn_unused_cli);
        set("checkSystemVars", &mut self.flags.check_system_vars);

        request.reply(json!({}))
    }

    fn process_configure(&mut self, request: &Request) -> Response {
        let cache_arguments = match request.data.get(keys::CACHE_ARGUMENTS_KEY) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(argument)) => vec![argument.clone()],
            Some(Value::Array(values)) => {
                let mut arguments = Vec::with_capacity(values.len());
                for value in values {
                    match value.as_str() {
                        Some(argument) => arguments.push(argument.to_string()),
                        None => {
                            return request.report_error(
                                "\"cacheArguments\" should be unset, a string or an array of strings.",
                            );
                        }
                    }
                }
                arguments
            }
            Some(_) => {
                return request.report_error(
                    "\"cacheArguments\" should be unset, a string or an array of strings.",
                );
            }
        };

        if self.build_dir.as_os_str().is_empty() {
            return request.report_error("No build directory set via handshake.");
        }
        if let Err(message) = self.check_cache_consistency() {
            return request.report_error(message);
        }

        let Some(evaluator) = self.evaluator.as_mut() else {
            return request.report_error("Not active.");
        };

        // The request is the scoped progress/message sink for the duration
        // of the evaluator call.
        if let Err(e) = evaluator.configure(&cache_arguments, request) {
            return request.report_error(e.to_string());
        }

        self.state = SessionState::Configured;
        self.dirty = false;
        self.snapshots.clear();
        self.watch_inputs();

        request.reply(json!({}))
    }

    /// Re-verify the build-directory cache against the bound settings; the
    /// cache may have been rewritten since handshake.
    fn check_cache_consistency(&mut self) -> Result<(), String> {
        if !CacheFile::exists_in(&self.build_dir) {
            return Ok(());
        }
        let cache = CacheFile::load(&self.build_dir)
            .map_err(|_| "Failed to load cache in build directory.".to_string())?;

        if let Some(cached) = cache.generator() {
            if !cached.is_empty() && cached != self.generator {
                return Err(
                    "Configured generator does not match the generator in the cache.".to_string(),
                );
            }
        }
        if let Some(cached) = cache.home_directory() {
            if self.source_dir.as_os_str().is_empty() {
                self.source_dir = PathBuf::from(cached);
            } else if Path::new(cached) != self.source_dir.as_path() {
                return Err(
                    "Configured source directory does not match the source directory in the cache."
                        .to_string(),
                );
            }
        }
        Ok(())
    }

    /// Point the file monitor at the inputs of the last configure.
    fn watch_inputs(&mut self) {
        let Some(evaluator) = self.evaluator.as_ref() else {
            return;
        };
        let inputs = evaluator.consumed_inputs();

        if self.monitor.is_none() {
            match FileMonitor::new(self.path_events.clone()) {
                Ok(monitor) => self.monitor = Some(monitor),
                Err(e) => {
                    warn!("File monitoring unavailable: {}", e);
                    return;
                }
            }
        }
        if let Some(monitor) = self.monitor.as_mut() {
            if let Err(e) = monitor.monitor(inputs) {
                warn!("Failed to watch configure inputs: {}", e);
            }
        }
    }

    fn process_compute(&mut self, request: &Request) -> Response {
        match self.state {
            SessionState::Computed => {
                return request.report_error("This build system was already generated.");
            }
            SessionState::Active => {
                return request.report_error("This project was not configured yet.");
            }
            SessionState::Configured => {}
        }

        let Some(evaluator) = self.evaluator.as_mut() else {
            return request.report_error("Not active.");
        };
        if let Err(e) = evaluator.compute() {
            return request.report_error(e.to_string());
        }

        self.rebuild_index();
        self.state = SessionState::Computed;
        request.reply(json!({}))
    }

    fn require_computed(&self, request: &Request) -> Option<Response> {
        if self.state != SessionState::Computed {
            return Some(request.report_error("No build system was generated yet."));
        }
        None
    }

    fn process_codemodel(&mut self, request: &Request) -> Response {
        if let Some(error) = self.require_computed(request) {
            return error;
        }
        let Some(evaluator) = self.evaluator.as_ref() else {
            return request.report_error("Not active.");
        };
        let project = evaluator.project_map();
        let project_value = match serde_json::to_value(&project) {
            Ok(value) => value,
            Err(e) => return request.report_error(format!("Failed to serialize project: {e}")),
        };
        request.reply(json!({
            "configurations": [
                { "name": "", "projects": [project_value] }
            ]
        }))
    }

    fn process_cmake_inputs(&mut self, request: &Request) -> Response {
        if let Some(error) = self.require_computed(request) {
            return error;
        }
        let Some(evaluator) = self.evaluator.as_ref() else {
            return request.report_error("Not active.");
        };

        let sources: Vec<String> = evaluator
            .consumed_inputs()
            .iter()
            .map(|path| {
                path.strip_prefix(&self.source_dir)
                    .unwrap_or(path)
                    .display()
                    .to_string()
            })
            .collect();

        request.reply(json!({
            (keys::SOURCE_DIRECTORY_KEY): self.source_dir.display().to_string(),
            "buildFiles": [
                { "isCMake": false, "isTemporary": false, "sources": sources }
            ],
        }))
    }

    fn process_cache(&mut self, request: &Request) -> Response {
        if let Some(error) = self.require_computed(request) {
            return error;
        }

        let filter: Option<Vec<String>> = match request.data.get("key") {
            None | Some(Value::Null) => None,
            Some(Value::Array(values)) => {
                let mut wanted = Vec::with_capacity(values.len());
                for value in values {
                    match value.as_str() {
                        Some(key) => wanted.push(key.to_string()),
                        None => {
                            return request
                                .report_error("\"key\" must be unset or an array of strings.");
                        }
                    }
                }
                Some(wanted)
            }
            Some(_) => {
                return request.report_error("\"key\" must be unset or an array of strings.");
            }
        };

        let Some(evaluator) = self.evaluator.as_ref() else {
            return request.report_error("Not active.");
        };
        let entries: Vec<Value> = evaluator
            .cache_entries()
            .into_iter()
            .filter(|entry| {
                filter
                    .as_ref()
                    .map_or(true, |wanted| wanted.contains(&entry.key))
            })
            .map(|entry| {
                json!({
                    "key": entry.key,
                    "type": entry.entry_type,
                    "value": entry.value,
                    "properties": { "ADVANCED": if entry.advanced { "1" } else { "0" } },
                })
            })
            .collect();

        request.reply(json!({ "cache": entries }))
    }

    fn process_file_system_watchers(&mut self, request: &Request) -> Response {
        let (files, directories) = match self.monitor.as_ref() {
            Some(monitor) => (monitor.watched_files(), monitor.watched_directories()),
            None => (Vec::new(), Vec::new()),
        };
        request.reply(json!({
            "watchedFiles": files,
            "watchedDirectories": directories,
        }))
    }

    // ------------------------------------------------------------------
    // Differential queries
    // ------------------------------------------------------------------

    fn required_path(&self, request: &Request, key: &str) -> Result<PathBuf, Response> {
        match request.data.get(key).and_then(Value::as_str) {
            Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
            _ => Err(request.report_error(format!("\"{key}\" is missing."))),
        }
    }

    fn required_line(&self, request: &Request, key: &str) -> Result<i64, Response> {
        match request.data.get(key).and_then(Value::as_i64) {
            Some(line) if line > 0 => Ok(line),
            _ => Err(request.report_error(format!("\"{key}\" must be a positive integer."))),
        }
    }

    /// Build the buffer-vs-indexed diff for a query: the baseline is the
    /// on-disk file the evaluation consumed; an absent buffer means the
    /// editor matches the disk.
    fn build_diff(&self, request: &Request, path: &Path, content_key: &str) -> DifferentialFileContent {
        let baseline = std::fs::read_to_string(path).unwrap_or_default();
        match request.data.get(content_key).and_then(Value::as_str) {
            Some(edited) => DifferentialFileContent::compute(&baseline, edited),
            None => DifferentialFileContent::identity(&baseline),
        }
    }

    /// Resolve `(path, line, diff)` to the replayed snapshot, or `None`
    /// for the caller's sentinel reply.
    fn resolve_query_snapshot(
        &mut self,
        path: &Path,
        line: i64,
        diff: &DifferentialFileContent,
        completion_mode: bool,
    ) -> Option<(Snapshot, Option<ListFileFunction>, i64)> {
        let evaluator = self.evaluator.as_ref()?;
        let (base, start) = query::snapshot_and_start_line(
            &self.snapshots,
            evaluator.state(),
            path,
            line,
            diff,
        )?;

        let evaluator = self.evaluator.as_mut()?;
        let (snapshot, last) = query::desired_snapshot(
            evaluator.as_mut(),
            &diff.editor_lines,
            start,
            base,
            line,
            completion_mode,
        )?;
        Some((snapshot, last, start))
    }

    fn process_content(&mut self, request: &Request) -> Response {
        if let Some(error) = self.require_computed(request) {
            return error;
        }
        let path = match self.required_path(request, FILE_PATH_KEY) {
            Ok(path) => path,
            Err(error) => return error,
        };
        let line = match self.required_line(request, FILE_LINE_KEY) {
            Ok(line) => line,
            Err(error) => return error,
        };
        let matcher = request
            .data
            .get(MATCHER_KEY)
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        let unexecuted = || json!({ CONTENT_RESULT_KEY: UNEXECUTED });

        if let Some(evaluator) = self.evaluator.as_ref() {
            if query::is_not_executed(evaluator.state(), &path, line) {
                return request.reply(unexecuted());
            }
        } else {
            return request.report_error("Not active.");
        }

        let diff = self.build_diff(request, &path, FILE_CONTENT_KEY);
        let Some((snapshot, _, _)) = self.resolve_query_snapshot(&path, line, &diff, false) else {
            return request.reply(unexecuted());
        };

        let Some(evaluator) = self.evaluator.as_ref() else {
            return request.report_error("Not active.");
        };
        let state = evaluator.state();
        let mut content = Map::new();
        for key in state.closure_keys(snapshot) {
            if key.starts_with(&matcher) {
                let value = state.definition(snapshot, &key).unwrap_or_default();
                content.insert(key, value.into());
            }
        }
        request.reply(json!({ "content": content }))
    }

    fn process_content_diff(&mut self, request: &Request) -> Response {
        if let Some(error) = self.require_computed(request) {
            return error;
        }

        let mut sides = Vec::with_capacity(2);
        for suffix in ["1", "2"] {
            let path = match self.required_path(request, &format!("file_path{suffix}")) {
                Ok(path) => path,
                Err(error) => return error,
            };
            let line = match self.required_line(request, &format!("file_line{suffix}")) {
                Ok(line) => line,
                Err(error) => return error,
            };
            sides.push((path, line, format!("file_content{suffix}")));
        }

        let unexecuted = || json!({ CONTENT_RESULT_KEY: UNEXECUTED });

        if let Some(evaluator) = self.evaluator.as_ref() {
            let state = evaluator.state();
            for (path, line, _) in &sides {
                if query::is_not_executed(state, path, *line) {
                    return request.reply(unexecuted());
                }
            }
        }

        let mut snapshots = Vec::with_capacity(2);
        for (path, line, content_key) in &sides {
            let diff = self.build_diff(request, path, content_key);
            match self.resolve_query_snapshot(path, *line, &diff, false) {
                Some((snapshot, _, _)) => snapshots.push(snapshot),
                None => return request.reply(unexecuted()),
            }
        }

        let Some(evaluator) = self.evaluator.as_ref() else {
            return request.report_error("Not active.");
        };
        let state = evaluator.state();
        let keys1 = state.closure_keys(snapshots[0]);
        let keys2 = state.closure_keys(snapshots[1]);

        let mut added = Vec::new();
        for key in &keys2 {
            let d1 = state.definition(snapshots[0], key).unwrap_or_default();
            let d2 = state.definition(snapshots[1], key).unwrap_or_default();
            if keys1.contains(key) && d1 == d2 {
                continue;
            }
            added.push(json!({ "key": key, "value": d2 }));
        }
        let mut removed = Vec::new();
        for key in &keys1 {
            let d1 = state.definition(snapshots[0], key).unwrap_or_default();
            let d2 = state.definition(snapshots[1], key).unwrap_or_default();
            if d1 == d2 {
                continue;
            }
            removed.push(json!({ "key": key, "value": d1 }));
        }

        request.reply(json!({
            "content_diff": { "addedDefs": added, "removedDefs": removed }
        }))
    }

    fn process_code_complete(&mut self, request: &Request) -> Response {
        if let Some(error) = self.require_computed(request) {
            return error;
        }
        let path = match self.required_path(request, FILE_PATH_KEY) {
            Ok(path) => path,
            Err(error) => return error,
        };
        let line = match self.required_line(request, FILE_LINE_KEY) {
            Ok(line) => line,
            Err(error) => return error,
        };
        let column = request
            .data
            .get(FILE_COLUMN_KEY)
            .and_then(Value::as_i64)
            .unwrap_or(0);

        let no_completions = || json!({ "result": "no_completions" });

        let diff = self.build_diff(request, &path, FILE_CONTENT_KEY);
        let Some((snapshot, last, start)) = self.resolve_query_snapshot(&path, line, &diff, true)
        else {
            return request.reply(no_completions());
        };

        // The replay window was parsed with line numbers relative to its
        // first line; translate back to buffer coordinates.
        let function = last.map(|f| translate_function(f, start - 1));
        let line_text = diff
            .editor_lines
            .get(line as usize - 1)
            .cloned()
            .unwrap_or_default();

        request.reply(self.complete_at(snapshot, function.as_ref(), &line_text, line, column))
    }

    fn process_context_writers(&mut self, request: &Request) -> Response {
        if let Some(error) = self.require_computed(request) {
            return error;
        }
        let path = match self.required_path(request, FILE_PATH_KEY) {
            Ok(path) => path,
            Err(error) => return error,
        };
        let line = match self.required_line(request, FILE_LINE_KEY) {
            Ok(line) => line,
            Err(error) => return error,
        };
        let column = request
            .data
            .get(FILE_COLUMN_KEY)
            .and_then(Value::as_i64)
            .unwrap_or(0);

        let no_context = || json!({ "result": "no_context" });

        let diff = self.build_diff(request, &path, FILE_CONTENT_KEY);
        let Some((snapshot, last, start)) = self.resolve_query_snapshot(&path, line, &diff, true)
        else {
            return request.reply(no_context());
        };

        let function = last.map(|f| translate_function(f, start - 1));
        let line_text = diff
            .editor_lines
            .get(line as usize - 1)
            .cloned()
            .unwrap_or_default();
        let completion = self.complete_at(snapshot, function.as_ref(), &line_text, line, column);

        let Some(matcher) = completion
            .get("context_origin")
            .and_then(|origin| origin.get(MATCHER_KEY))
            .and_then(Value::as_str)
            .filter(|matcher| !matcher.is_empty())
            .map(str::to_string)
        else {
            return request.reply(no_context());
        };

        let Some(evaluator) = self.evaluator.as_ref() else {
            return request.report_error("Not active.");
        };
        let state = evaluator.state();
        let writers = state.writers(snapshot, &matcher);
        let Some(writer) = writers.first() else {
            return request.reply(no_context());
        };

        let context =
            ListFileContext::new(state.execution_file(*writer), state.starting_line(*writer));
        let Some((entry, _)) = self.snapshots.lower_bound(&context) else {
            return request.reply(no_context());
        };
        request.reply(json!({
            "def_match": matcher,
            "def_origin": entry.line - 1,
        }))
    }

    fn process_contextual_help(&mut self, request: &Request) -> Response {
        if let Some(error) = self.require_computed(request) {
            return error;
        }
        let path = match self.required_path(request, FILE_PATH_KEY) {
            Ok(path) => path,
            Err(error) => return error,
        };
        let line = match self.required_line(request, FILE_LINE_KEY) {
            Ok(line) => line,
            Err(error) => return error,
        };
        let column = request
            .data
            .get(FILE_COLUMN_KEY)
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let content = request
            .data
            .get(FILE_CONTENT_KEY)
            .and_then(Value::as_str)
            .unwrap_or("");

        // Only the lines up to the cursor are relevant; everything below
        // may be mid-edit.
        let truncated: String = content
            .lines()
            .take(line as usize)
            .collect::<Vec<_>>()
            .join("\n");

        let mut messenger = CollectingMessenger::new();
        let Ok(list_file) = Parser::new(&path, &mut messenger).parse_string(&truncated) else {
            return request.report_error("Failed to parse.");
        };

        for function in &list_file.functions {
            if function.line > line {
                return request.reply(json!({ "contextual_help": { "nocontext": true } }));
            }
            if function.line <= line && function.close_paren_line >= line {
                if let Some(help) = self.help_within_function(function, line, column) {
                    return request.reply(help);
                }
                return request.reply(contextual_help("command", &function.name.to_lowercase()));
            }
        }
        request.reply(json!({}))
    }

    /// Help topic for a cursor inside a function's argument list, if any
    /// argument pins one down.
    fn help_within_function(
        &self,
        function: &ListFileFunction,
        line: i64,
        column: i64,
    ) -> Option<Value> {
        for (index, argument) in function.arguments.iter().enumerate() {
            if argument.delimiter == Delimiter::Bracket {
                continue;
            }
            // Cursor in the whitespace before this argument: the command
            // itself is the topic.
            if argument.line > line || (argument.line == line && argument.column > column) {
                return Some(contextual_help("command", &function.name.to_lowercase()));
            }

            // Locate the cursor within the argument, segment by line for
            // multi-line values.
            let segments: Vec<&str> = argument.value.split('\n').collect();
            let segment_index = (line - argument.line) as usize;
            if segment_index >= segments.len() {
                continue;
            }
            let segment = segments[segment_index];
            let segment_start = if segment_index == 0 { argument.column } else { 1 };
            let segment_end = segment_start + segment.chars().count() as i64;
            if column < segment_start || column > segment_end {
                continue;
            }

            let in_position = (column - segment_start) as usize;
            if let Some(name) = variable_reference_at(segment, in_position) {
                return Some(contextual_help("variable", &name));
            }
            if argument.delimiter == Delimiter::Unquoted {
                if let Some(help) = self.typed_identifier_help(function, index) {
                    return Some(help);
                }
            }
            return None;
        }
        None
    }

    /// Help for an identifier argument classified by the command registry.
    fn typed_identifier_help(&self, function: &ListFileFunction, index: usize) -> Option<Value> {
        let evaluator = self.evaluator.as_ref()?;
        let command = evaluator.state().command(&function.name)?;
        let values: Vec<String> = function.arguments.iter().map(|a| a.value.clone()).collect();
        let value = values.get(index)?.clone();

        let (context, key) = match command.context_for_parameter(&values, index) {
            ParameterContext::TargetProperty => ("prop_tgt", value),
            ParameterContext::DirectoryProperty => ("prop_dir", value),
            ParameterContext::VariableIdentifier => ("variable", value),
            ParameterContext::Policy => ("policy", value),
            ParameterContext::ModuleName => ("module", value),
            ParameterContext::PackageName => ("module", format!("Find{value}")),
            ParameterContext::Plain => return None,
        };
        Some(contextual_help(context, &key))
    }

    fn process_parse(&mut self, request: &Request) -> Response {
        if let Some(error) = self.require_computed(request) {
            return error;
        }
        let path = match self.required_path(request, FILE_PATH_KEY) {
            Ok(path) => path,
            Err(error) => return error,
        };

        let diff = self.build_diff(request, &path, FILE_CONTENT_KEY);
        let text = diff.editor_lines.join("\n");

        let mut messenger = CollectingMessenger::new();
        let Ok(list_file) = Parser::new(&path, &mut messenger).parse_string(&text) else {
            return request.report_error("Failed to parse.");
        };

        let tokens: Vec<Value> = list_file
            .functions
            .iter()
            .map(|function| {
                let arguments: Vec<Value> = function
                    .arguments
                    .iter()
                    .map(|argument| {
                        json!({
                            "value": argument.value,
                            "delimiter": match argument.delimiter {
                                Delimiter::Unquoted => "unquoted",
                                Delimiter::Quoted => "quoted",
                                Delimiter::Bracket => "bracket",
                            },
                            "line": argument.line,
                            "column": argument.column,
                        })
                    })
                    .collect();
                json!({
                    "name": function.name,
                    "line": function.line,
                    "column": function.column,
                    "closeParenLine": function.close_paren_line,
                    "closeParenColumn": function.close_paren_column,
                    "arguments": arguments,
                })
            })
            .collect();

        // Map the not-executed ranges into edited-buffer coordinates;
        // ranges that start inside an edited region are dropped.
        let mut unreachable = Vec::new();
        if let Some(evaluator) = self.evaluator.as_ref() {
            for (lo, hi) in evaluator.state().not_executed(&path) {
                let Some(index) = query::chunk_containing_orig(&diff.chunks, lo) else {
                    continue;
                };
                let chunk = &diff.chunks[index];
                if !chunk.is_common() {
                    continue;
                }
                let offset = chunk.new_start - chunk.orig_start;
                unreachable.push(json!({ "begin": lo + offset, "end": hi + offset }));
            }
        }

        request.reply(json!({
            "parsed": { "tokens": tokens, "unreachable": unreachable }
        }))
    }

    // ------------------------------------------------------------------
    // Completion
    // ------------------------------------------------------------------

    /// Completion result for a cursor position given the replayed snapshot
    /// and the last parsed function (in buffer coordinates).
    fn complete_at(
        &self,
        snapshot: Snapshot,
        function: Option<&ListFileFunction>,
        line_text: &str,
        line: i64,
        column: i64,
    ) -> Value {
        let no_completions = json!({ "result": "no_completions" });
        let Some(evaluator) = self.evaluator.as_ref() else {
            return no_completions;
        };
        let state = evaluator.state();

        let column_text: String = line_text
            .chars()
            .take(column.max(0) as usize)
            .collect();
        let word = current_word(&column_text);

        if let Some(function) = function.filter(|f| !f.name.is_empty()) {
            let name_end = function.column + function.name.chars().count() as i64;
            let in_name_span = function.line == line
                && column >= function.column
                && column <= name_end;
            if in_name_span {
                return complete_commands(state.command_names(), &word);
            }

            let after_close = function.close_paren_line < line
                || (function.close_paren_line == line && function.close_paren_column < column);
            if after_close {
                return complete_commands(state.command_names(), &word);
            }

            // Inside the argument list.
            if let Some(dollar) = word.rfind("${") {
                let prefix = &word[dollar + 2..];
                return complete_variables(state.closure_keys(snapshot), prefix);
            }

            let Some(command) = state.command(&function.name) else {
                return no_completions;
            };
            let values: Vec<String> = function.arguments.iter().map(|a| a.value.clone()).collect();
            let index = parameter_index(function, line, column);
            return match command.context_for_parameter(&values, index) {
                ParameterContext::VariableIdentifier => {
                    complete_variables(state.closure_keys(snapshot), &word)
                }
                ParameterContext::TargetProperty => {
                    let names: Vec<String> = evaluator
                        .project_map()
                        .targets
                        .iter()
                        .map(|t| t.name.clone())
                        .collect();
                    json!({ "completions": { "targets": names } })
                }
                _ => no_completions,
            };
        }

        if word.is_empty() && column_text.ends_with(' ') {
            return no_completions;
        }
        complete_commands(state.command_names(), &word)
    }

    fn handshake_error(message: impl Into<String>) -> Result<(), String> {
        Err(message.into())
    }
}

impl Protocol for ProtocolV1 {
    fn version(&self) -> ProtocolVersion {
        ProtocolVersion::new(1, 0)
    }

    fn activate(&mut self, request: &Request) -> Result<(), String> {
        let data = &request.data;

        let build_dir = data
            .get(keys::BUILD_DIRECTORY_KEY)
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        if build_dir.is_empty() {
            return Self::handshake_error("\"buildDirectory\" is missing.");
        }
        let build_path = PathBuf::from(&build_dir);

        let mut source_dir = data
            .get(keys::SOURCE_DIRECTORY_KEY)
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let mut generator = data
            .get(keys::GENERATOR_KEY)
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let mut extra_generator = data
            .get(keys::EXTRA_GENERATOR_KEY)
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        let mut evaluator = self.factory.create();

        if build_path.exists() {
            if !build_path.is_dir() {
                return Self::handshake_error("\"buildDirectory\" exists but is not a directory.");
            }
            if CacheFile::exists_in(&build_path) {
                let cache = CacheFile::load(&build_path)
                    .map_err(|_| "Failed to load cache in build directory.".to_string())?;

                if let Some(cached) = cache.generator() {
                    if generator.is_empty() {
                        generator = cached.to_string();
                    } else if generator != cached {
                        return Self::handshake_error(
                            "\"generator\" set but does not match the generator found in the cache.",
                        );
                    }
                }
                if let Some(cached) = cache.extra_generator() {
                    if extra_generator.is_empty() {
                        extra_generator = cached.to_string();
                    } else if extra_generator != cached {
                        return Self::handshake_error(
                            "\"extraGenerator\" set but does not match the extra generator found in the cache.",
                        );
                    }
                }
                if let Some(cached) = cache.home_directory() {
                    if source_dir.is_empty() {
                        source_dir = cached.to_string();
                    } else if Path::new(&source_dir) != Path::new(cached) {
                        return Self::handshake_error(
                            "\"sourceDirectory\" set but does not match the source directory found in the cache.",
                        );
                    }
                }

                evaluator
                    .load_cache(&build_path)
                    .map_err(|e| e.to_string())?;
            }
        }

        if source_dir.is_empty() {
            return Self::handshake_error("\"sourceDirectory\" is missing.");
        }
        let source_path = PathBuf::from(&source_dir);
        if !source_path.is_dir() {
            return Self::handshake_error("\"sourceDirectory\" is not a directory.");
        }
        if generator.is_empty() {
            return Self::handshake_error("\"generator\" is missing.");
        }
        if !evaluator.recognizes_generator(&generator) {
            return Self::handshake_error(format!("Generator \"{generator}\" not recognized."));
        }

        evaluator.set_directories(&source_path, &build_path);
        evaluator
            .set_generator(&generator, Some(&extra_generator))
            .map_err(|e| e.to_string())?;

        info!(
            "Session active: source={:?} build={:?} generator={:?}",
            source_path, build_path, generator
        );

        self.evaluator = Some(evaluator);
        self.source_dir = source_path;
        self.build_dir = build_path;
        self.generator = generator;
        self.extra_generator = extra_generator;
        self.state = SessionState::Active;
        self.dirty = false;
        self.snapshots.clear();
        Ok(())
    }

    fn process(&mut self, request: &Request) -> Response {
        match request.ty.as_str() {
            "globalSettings" => self.process_global_settings(request),
            "setGlobalSettings" => self.process_set_global_settings(request),
            "configure" => self.process_configure(request),
            "compute" => self.process_compute(request),
            "codemodel" => self.process_codemodel(request),
            "cmakeInputs" => self.process_cmake_inputs(request),
            "cache" => self.process_cache(request),
            "fileSystemWatchers" => self.process_file_system_watchers(request),
            "content" => self.process_content(request),
            "contentDiff" => self.process_content_diff(request),
            "codeComplete" => self.process_code_complete(request),
            "contextualHelp" => self.process_contextual_help(request),
            "contextWriters" => self.process_context_writers(request),
            "parse" => self.process_parse(request),
            _ => request.report_error("Unknown command!"),
        }
    }

    fn on_path_event(&mut self, event: &PathEvent) {
        debug!("Watched path changed: {:?} ({})", event.path, event.kind.as_str());

        let mut payload = Map::new();
        payload.insert("path".into(), event.path.display().to_string().into());
        payload.insert("properties".into(), json!([event.kind.as_str()]));
        self.signal.signal("fileChange", payload);

        if !self.dirty {
            self.dirty = true;
            self.signal.signal("dirty", Map::new());
        }
    }
}

/// Shift a function parsed from a replay window back into buffer
/// coordinates.
fn translate_function(mut function: ListFileFunction, offset: i64) -> ListFileFunction {
    function.line += offset;
    function.open_paren_line += offset;
    function.close_paren_line += offset;
    for argument in &mut function.arguments {
        argument.line += offset;
    }
    function
}

/// The identifier being typed at the end of `text`.
fn current_word(text: &str) -> String {
    text.rsplit(|c: char| matches!(c, ' ' | '\t' | '(' | ')' | '"' | ';' | ','))
        .next()
        .unwrap_or("")
        .to_string()
}

/// Zero-based index of the parameter the cursor is at.
fn parameter_index(function: &ListFileFunction, line: i64, column: i64) -> usize {
    let mut index = 0;
    for (i, argument) in function.arguments.iter().enumerate() {
        let starts_before = argument.line < line || (argument.line == line && argument.column <= column);
        if !starts_before {
            break;
        }
        let length = argument.value.chars().count() as i64;
        let inside = argument.line == line
            && argument.column <= column
            && column <= argument.column + length;
        index = if inside { i } else { i + 1 };
    }
    index
}

/// `${NAME}` reference containing the cursor, if any.
fn variable_reference_at(segment: &str, position: usize) -> Option<String> {
    let chars: Vec<char> = segment.chars().collect();
    let position = position.min(chars.len());
    let open = (0..position).rev().find(|&i| chars[i] == '{')?;
    if open == 0 || chars[open - 1] != '$' {
        return None;
    }
    let end = (open..chars.len())
        .find(|&i| chars[i] == '}')
        .unwrap_or(chars.len());
    if end < position {
        return None;
    }
    Some(chars[open + 1..end].iter().collect())
}

fn contextual_help(context: &str, key: &str) -> Value {
    let normalized: String = key.chars().filter(|c| !matches!(c, '<' | '>')).collect();
    json!({
        "contextual_help": { "context": context, "help_key": normalized }
    })
}

fn complete_commands(names: Vec<String>, prefix: &str) -> Value {
    let prefix = prefix.to_lowercase();
    let matches: Vec<String> = names
        .into_iter()
        .filter(|name| name.starts_with(&prefix))
        .collect();
    json!({ "completions": { "commands": matches } })
}

fn complete_variables(keys: Vec<String>, prefix: &str) -> Value {
    let matches: Vec<String> = keys
        .into_iter()
        .filter(|key| key.starts_with(prefix))
        .collect();
    json!({
        "completions": { "variables": matches },
        "context_origin": { "matcher": prefix },
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::testing::{FakeEvaluator, FakeEvaluatorFactory};
    use crate::eval::{CacheEntry, ProjectModel, TargetModel, TargetType};

    struct Harness {
        protocol: ProtocolV1,
        frames: mpsc::UnboundedReceiver<Value>,
        emitter: Emitter,
    }

    impl Harness {
        fn new(build: impl Fn() -> FakeEvaluator + Send + Sync + 'static) -> Self {
            let (tx, frames) = mpsc::unbounded_channel();
            let emitter = Emitter::new(tx);
            let (path_tx, _path_rx) = mpsc::unbounded_channel();
            let protocol = ProtocolV1::new(
                Box::new(FakeEvaluatorFactory {
                    build: Box::new(build),
                }),
                emitter.clone(),
                path_tx,
            );
            Self {
                protocol,
                frames,
                emitter,
            }
        }

        fn request(&self, ty: &str, data: Value) -> Request {
            Request::new(self.emitter.clone(), ty.to_string(), "c".to_string(), data)
        }

        fn process(&mut self, ty: &str, data: Value) -> Value {
            let request = self.request(ty, data);
            self.protocol.process(&request).into_frame()
        }

        fn activate(&mut self, data: Value) -> Result<(), String> {
            let request = self.request("handshake", data);
            self.protocol.activate(&request)
        }

        fn drain_frames(&mut self) -> Vec<Value> {
            let mut out = Vec::new();
            while let Ok(frame) = self.frames.try_recv() {
                out.push(frame);
            }
            out
        }
    }

    fn dirs() -> (tempfile::TempDir, Value) {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src");
        let build = dir.path().join("build");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::create_dir_all(&build).unwrap();
        let data = json!({
            "sourceDirectory": source.display().to_string(),
            "buildDirectory": build.display().to_string(),
            "generator": "Ninja",
        });
        (dir, data)
    }

    fn computed_harness(build: impl Fn() -> FakeEvaluator + Send + Sync + 'static) -> Harness {
        let mut harness = Harness::new(move || FakeEvaluator::new());
        harness
            .protocol
            .install_evaluator_computed(Box::new(build()));
        harness
    }

    #[test]
    fn test_activate_requires_build_directory() {
        let mut harness = Harness::new(FakeEvaluator::new);
        let error = harness.activate(json!({})).unwrap_err();
        assert_eq!(error, "\"buildDirectory\" is missing.");
    }

    #[test]
    fn test_activate_requires_existing_source_directory() {
        let mut harness = Harness::new(FakeEvaluator::new);
        let dir = tempfile::tempdir().unwrap();
        let error = harness
            .activate(json!({
                "buildDirectory": dir.path().join("build").display().to_string(),
                "sourceDirectory": dir.path().join("nope").display().to_string(),
                "generator": "Ninja",
            }))
            .unwrap_err();
        assert_eq!(error, "\"sourceDirectory\" is not a directory.");
    }

    #[test]
    fn test_activate_rejects_unknown_generator() {
        let mut harness = Harness::new(FakeEvaluator::new);
        let (_dir, mut data) = dirs();
        data["generator"] = json!("Xcode");
        let error = harness.activate(data).unwrap_err();
        assert_eq!(error, "Generator \"Xcode\" not recognized.");
    }

    #[test]
    fn test_activate_happy_path() {
        let mut harness = Harness::new(FakeEvaluator::new);
        let (_dir, data) = dirs();
        harness.activate(data).unwrap();
        assert_eq!(harness.protocol.state, SessionState::Active);
        assert_eq!(harness.protocol.generator, "Ninja");
    }

    #[test]
    fn test_activate_fills_settings_from_cache() {
        let mut harness = Harness::new(FakeEvaluator::new);
        let (dir, mut data) = dirs();
        let source = dir.path().join("src");
        let build = dir.path().join("build");
        std::fs::write(
            build.join("CMakeCache.txt"),
            format!(
                "CMAKE_GENERATOR:INTERNAL=Unix Makefiles\nCMAKE_HOME_DIRECTORY:INTERNAL={}\n",
                source.display()
            ),
        )
        .unwrap();

        // Request omits generator and source dir; both come from the cache.
        data["generator"] = json!("");
        data["sourceDirectory"] = json!("");
        harness.activate(data).unwrap();
        assert_eq!(harness.protocol.generator, "Unix Makefiles");
        assert_eq!(harness.protocol.source_dir, source);
    }

    #[test]
    fn test_activate_rejects_cache_generator_mismatch() {
        let mut harness = Harness::new(FakeEvaluator::new);
        let (dir, data) = dirs();
        std::fs::write(
            dir.path().join("build").join("CMakeCache.txt"),
            "CMAKE_GENERATOR:INTERNAL=Unix Makefiles\n",
        )
        .unwrap();

        let error = harness.activate(data).unwrap_err();
        assert_eq!(
            error,
            "\"generator\" set but does not match the generator found in the cache."
        );
    }

    #[test]
    fn test_compute_before_configure_is_rejected() {
        let mut harness = Harness::new(FakeEvaluator::new);
        let (_dir, data) = dirs();
        harness.activate(data).unwrap();

        let frame = harness.process("compute", json!({}));
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["errorMessage"], "This project was not configured yet.");
        assert_eq!(harness.protocol.state, SessionState::Active);
    }

    #[test]
    fn test_configure_emits_progress_then_reply() {
        let mut harness = Harness::new(FakeEvaluator::new);
        let (_dir, data) = dirs();
        harness.activate(data).unwrap();

        let frame = harness.process("configure", json!({}));
        assert_eq!(frame["type"], "reply");
        assert_eq!(harness.protocol.state, SessionState::Configured);

        let progress: Vec<Value> = harness
            .drain_frames()
            .into_iter()
            .filter(|f| f["type"] == "progress")
            .collect();
        assert!(!progress.is_empty());
        assert_eq!(progress[0]["inReplyTo"], "configure");
        let min = progress[0]["progressMinimum"].as_i64().unwrap();
        let current = progress[0]["progressCurrent"].as_i64().unwrap();
        let max = progress[0]["progressMaximum"].as_i64().unwrap();
        assert!(min <= current && current <= max);
    }

    #[test]
    fn test_configure_cache_arguments_validation() {
        let mut harness = Harness::new(FakeEvaluator::new);
        let (_dir, data) = dirs();
        harness.activate(data).unwrap();

        let frame = harness.process("configure", json!({"cacheArguments": 42}));
        assert_eq!(
            frame["errorMessage"],
            "\"cacheArguments\" should be unset, a string or an array of strings."
        );

        let frame = harness.process("configure", json!({"cacheArguments": "-DA=1"}));
        assert_eq!(frame["type"], "reply");
    }

    #[test]
    fn test_configure_failure_does_not_advance_state() {
        let mut harness = Harness::new(|| {
            let mut fake = FakeEvaluator::new();
            fake.configure_error = Some("broken project".to_string());
            fake
        });
        let (_dir, data) = dirs();
        harness.activate(data).unwrap();

        let frame = harness.process("configure", json!({}));
        assert_eq!(frame["type"], "error");
        assert!(frame["errorMessage"]
            .as_str()
            .unwrap()
            .contains("broken project"));
        assert_eq!(harness.protocol.state, SessionState::Active);
    }

    #[test]
    fn test_compute_transitions_and_builds_index() {
        let mut harness = Harness::new(|| {
            FakeEvaluator::with_linear_history("/src/CMakeLists.txt", &[1, 2, 3])
        });
        let (_dir, data) = dirs();
        harness.activate(data).unwrap();
        harness.process("configure", json!({}));

        let frame = harness.process("compute", json!({}));
        assert_eq!(frame["type"], "reply");
        assert_eq!(harness.protocol.state, SessionState::Computed);
        assert_eq!(harness.protocol.snapshots.len(), 3);

        // A second compute is rejected.
        let frame = harness.process("compute", json!({}));
        assert_eq!(frame["errorMessage"], "This build system was already generated.");
    }

    #[test]
    fn test_global_settings_round_trip_and_idempotence() {
        let mut harness = Harness::new(FakeEvaluator::new);
        let (_dir, data) = dirs();
        harness.activate(data).unwrap();

        let before = harness.process("globalSettings", json!({}));
        assert_eq!(before["type"], "reply");
        assert_eq!(before["generator"], "Ninja");
        assert_eq!(before["debugOutput"], false);
        assert_eq!(before["warnUnusedCli"], true);

        // Setting the current values changes nothing observable.
        let frame = harness.process(
            "setGlobalSettings",
            json!({"debugOutput": false, "warnUnusedCli": true}),
        );
        assert_eq!(frame["type"], "reply");
        let after = harness.process("globalSettings", json!({}));
        for key in FLAG_KEYS {
            assert_eq!(before[key], after[key], "{key} changed");
        }

        // A real change is visible.
        harness.process("setGlobalSettings", json!({"debugOutput": true}));
        let changed = harness.process("globalSettings", json!({}));
        assert_eq!(changed["debugOutput"], true);
    }

    #[test]
    fn test_set_global_settings_rejects_non_bool() {
        let mut harness = Harness::new(FakeEvaluator::new);
        let (_dir, data) = dirs();
        harness.activate(data).unwrap();

        let frame = harness.process("setGlobalSettings", json!({"trace": "yes"}));
        assert_eq!(frame["errorMessage"], "\"trace\" must be unset or a bool value.");
    }

    #[test]
    fn test_unknown_command() {
        let mut harness = Harness::new(FakeEvaluator::new);
        let (_dir, data) = dirs();
        harness.activate(data).unwrap();

        let frame = harness.process("fooBar", json!({}));
        assert_eq!(frame["errorMessage"], "Unknown command!");
    }

    #[test]
    fn test_codemodel_requires_computed() {
        let mut harness = Harness::new(FakeEvaluator::new);
        let (_dir, data) = dirs();
        harness.activate(data).unwrap();

        let frame = harness.process("codemodel", json!({}));
        assert_eq!(frame["errorMessage"], "No build system was generated yet.");
    }

    #[test]
    fn test_codemodel_returns_project_tree() {
        let mut harness = computed_harness(|| {
            let mut fake = FakeEvaluator::new();
            fake.project = ProjectModel {
                name: "demo".to_string(),
                source_directory: "/src".to_string(),
                build_directory: "/build".to_string(),
                targets: vec![TargetModel {
                    name: "app".to_string(),
                    target_type: TargetType::Executable,
                    sources: vec!["main.c".to_string()],
                    defined_at: None,
                }],
            };
            fake
        });

        let frame = harness.process("codemodel", json!({}));
        assert_eq!(frame["type"], "reply");
        let project = &frame["configurations"][0]["projects"][0];
        assert_eq!(project["name"], "demo");
        assert_eq!(project["targets"][0]["name"], "app");
        assert_eq!(project["targets"][0]["type"], "EXECUTABLE");
    }

    #[test]
    fn test_cache_command_with_key_filter() {
        let mut harness = computed_harness(|| {
            let mut fake = FakeEvaluator::new();
            fake.cache = vec![
                CacheEntry {
                    key: "CMAKE_BUILD_TYPE".to_string(),
                    entry_type: "STRING".to_string(),
                    value: "Debug".to_string(),
                    advanced: false,
                },
                CacheEntry {
                    key: "HIDDEN".to_string(),
                    entry_type: "BOOL".to_string(),
                    value: "ON".to_string(),
                    advanced: true,
                },
            ];
            fake
        });

        let all = harness.process("cache", json!({}));
        assert_eq!(all["cache"].as_array().unwrap().len(), 2);
        assert_eq!(all["cache"][1]["properties"]["ADVANCED"], "1");

        let filtered = harness.process("cache", json!({"key": ["CMAKE_BUILD_TYPE"]}));
        let entries = filtered["cache"].as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["value"], "Debug");

        let invalid = harness.process("cache", json!({"key": "CMAKE_BUILD_TYPE"}));
        assert_eq!(invalid["errorMessage"], "\"key\" must be unset or an array of strings.");
    }

    #[test]
    fn test_cmake_inputs_lists_sources() {
        let mut harness = computed_harness(|| {
            let mut fake = FakeEvaluator::new();
            fake.inputs = vec![PathBuf::from("/src/CMakeLists.txt")];
            fake
        });
        harness.protocol.source_dir = PathBuf::from("/src");

        let frame = harness.process("cmakeInputs", json!({}));
        assert_eq!(frame["buildFiles"][0]["isCMake"], false);
        assert_eq!(frame["buildFiles"][0]["sources"][0], "CMakeLists.txt");
    }

    #[test]
    fn test_file_system_watchers_empty_without_monitor() {
        let mut harness = Harness::new(FakeEvaluator::new);
        let (_dir, data) = dirs();
        harness.activate(data).unwrap();

        let frame = harness.process("fileSystemWatchers", json!({}));
        assert!(frame["watchedFiles"].as_array().unwrap().is_empty());
        assert!(frame["watchedDirectories"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_path_event_emits_file_change_and_one_dirty_signal() {
        let mut harness = Harness::new(FakeEvaluator::new);
        let (_dir, data) = dirs();
        harness.activate(data).unwrap();

        let event = PathEvent {
            path: PathBuf::from("/src/CMakeLists.txt"),
            kind: crate::monitor::PathEventKind::Change,
        };
        harness.protocol.on_path_event(&event);
        harness.protocol.on_path_event(&event);

        let frames = harness.drain_frames();
        let signals: Vec<&Value> = frames.iter().filter(|f| f["type"] == "signal").collect();
        let file_changes = signals.iter().filter(|f| f["name"] == "fileChange").count();
        let dirty = signals.iter().filter(|f| f["name"] == "dirty").count();
        assert_eq!(file_changes, 2);
        assert_eq!(dirty, 1);
        for signal in &signals {
            assert_eq!(signal["cookie"], "");
            assert_eq!(signal["inReplyTo"], "");
        }
    }

    // ------------------------------------------------------------------
    // Differential query tests
    // ------------------------------------------------------------------

    /// A real file on disk plus a matching fake history: `set` commands at
    /// lines 1..=3, each defining `VAR_<line>`.
    fn linear_fixture() -> (tempfile::TempDir, PathBuf, Harness) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CMakeLists.txt");
        std::fs::write(&path, "set(A 1)\nset(B 2)\nset(C 3)\n").unwrap();

        let path_for_history = path.clone();
        let harness = computed_harness(move || {
            FakeEvaluator::with_linear_history(path_for_history.to_str().unwrap(), &[1, 2, 3])
        });
        (dir, path, harness)
    }

    #[test]
    fn test_content_on_not_executed_line_is_unexecuted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CMakeLists.txt");
        std::fs::write(&path, "set(A 1)\n").unwrap();

        let path_for_history = path.clone();
        let mut harness = computed_harness(move || {
            let mut fake =
                FakeEvaluator::with_linear_history(path_for_history.to_str().unwrap(), &[1]);
            fake.set_not_executed(path_for_history.to_str().unwrap(), vec![(10, 20)]);
            fake
        });

        // Any diff: the not-executed test short-circuits first.
        let frame = harness.process(
            "content",
            json!({
                "file_path": path.display().to_string(),
                "file_line": 15,
                "file_content": "completely\nunrelated\nbuffer\n",
            }),
        );
        assert_eq!(frame["type"], "reply");
        assert_eq!(frame["content_result"], "unexecuted");
    }

    #[test]
    fn test_content_shows_variables_defined_above_cursor() {
        let (_dir, path, mut harness) = linear_fixture();

        let frame = harness.process(
            "content",
            json!({
                "file_path": path.display().to_string(),
                "file_line": 3,
            }),
        );
        assert_eq!(frame["type"], "reply");
        let content = frame["content"].as_object().unwrap();
        assert!(content.contains_key("VAR_1"));
        assert!(content.contains_key("VAR_2"));
        assert!(!content.contains_key("VAR_3"));
    }

    #[test]
    fn test_content_matcher_filters_keys() {
        let (_dir, path, mut harness) = linear_fixture();

        let frame = harness.process(
            "content",
            json!({
                "file_path": path.display().to_string(),
                "file_line": 3,
                "matcher": "VAR_2",
            }),
        );
        let content = frame["content"].as_object().unwrap();
        assert_eq!(content.len(), 1);
        assert!(content.contains_key("VAR_2"));
    }

    #[test]
    fn test_content_replays_edited_lines() {
        // History has entries at lines 1 and 4 only; querying line 3 steps
        // back to the entry at line 1 and replays lines 1..2 from the
        // edited buffer.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CMakeLists.txt");
        std::fs::write(&path, "set(A 1)\nset(B 2)\nset(C 3)\nset(D 4)\n").unwrap();

        let path_for_history = path.clone();
        let mut harness = computed_harness(move || {
            FakeEvaluator::with_linear_history(path_for_history.to_str().unwrap(), &[1, 4])
        });

        let frame = harness.process(
            "content",
            json!({
                "file_path": path.display().to_string(),
                "file_line": 3,
                "file_content": "set(A 1)\nset(B 42)\nset(C 3)\nset(D 4)\n",
            }),
        );
        let content = frame["content"].as_object().unwrap();
        assert_eq!(content["A"], "1");
        assert_eq!(content["B"], "42");
        assert!(!content.contains_key("C"));
    }

    #[test]
    fn test_content_line_validation() {
        let (_dir, path, mut harness) = linear_fixture();

        let frame = harness.process(
            "content",
            json!({"file_path": path.display().to_string(), "file_line": 0}),
        );
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["errorMessage"], "\"file_line\" must be a positive integer.");

        let frame = harness.process("content", json!({"file_line": 1}));
        assert_eq!(frame["errorMessage"], "\"file_path\" is missing.");
    }

    #[test]
    fn test_content_past_buffer_end_is_unexecuted() {
        let (_dir, path, mut harness) = linear_fixture();

        let frame = harness.process(
            "content",
            json!({
                "file_path": path.display().to_string(),
                "file_line": 100,
            }),
        );
        assert_eq!(frame["content_result"], "unexecuted");
    }

    #[test]
    fn test_content_diff_reports_added_and_removed_defs() {
        let (_dir, path, mut harness) = linear_fixture();

        // Side 1 at line 2 sees VAR_1; side 2 at line 3 sees VAR_1+VAR_2.
        let frame = harness.process(
            "contentDiff",
            json!({
                "file_path1": path.display().to_string(),
                "file_line1": 2,
                "file_path2": path.display().to_string(),
                "file_line2": 3,
            }),
        );
        assert_eq!(frame["type"], "reply");
        let added = frame["content_diff"]["addedDefs"].as_array().unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0]["key"], "VAR_2");
        assert!(frame["content_diff"]["removedDefs"]
            .as_array()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_code_complete_commands_on_new_line() {
        let (_dir, path, mut harness) = linear_fixture();

        // Cursor on a fresh empty line 4.
        let frame = harness.process(
            "codeComplete",
            json!({
                "file_path": path.display().to_string(),
                "file_line": 4,
                "file_column": 0,
                "file_content": "set(A 1)\nset(B 2)\nset(C 3)\n\n",
            }),
        );
        assert_eq!(frame["type"], "reply");
        let commands = frame["completions"]["commands"].as_array().unwrap();
        assert!(commands.iter().any(|c| c == "set"));
    }

    #[test]
    fn test_code_complete_variables_in_reference() {
        let (_dir, path, mut harness) = linear_fixture();

        // Completing ${VAR_ inside a new set command on line 4.
        let line = "set(X ${VAR_";
        let frame = harness.process(
            "codeComplete",
            json!({
                "file_path": path.display().to_string(),
                "file_line": 4,
                "file_column": line.len(),
                "file_content": format!("set(A 1)\nset(B 2)\nset(C 3)\n{line})\n"),
            }),
        );
        assert_eq!(frame["type"], "reply");
        let variables = frame["completions"]["variables"].as_array().unwrap();
        assert!(variables.iter().any(|v| v == "VAR_1"));
        assert!(variables.iter().any(|v| v == "VAR_2"));
    }

    #[test]
    fn test_context_writers_locates_definition() {
        let (_dir, path, mut harness) = linear_fixture();

        // Cursor on "VAR_2" as the first parameter of a set() on line 4,
        // which the command registry classifies as a variable identifier.
        let line = "set(VAR_2";
        let frame = harness.process(
            "contextWriters",
            json!({
                "file_path": path.display().to_string(),
                "file_line": 4,
                "file_column": line.len(),
                "file_content": format!("set(A 1)\nset(B 2)\nset(C 3)\n{line} x)\n"),
            }),
        );
        assert_eq!(frame["type"], "reply");
        assert_eq!(frame["def_match"], "VAR_2");
        assert_eq!(frame["def_origin"], 1); // defined at line 2, zero-based
    }

    #[test]
    fn test_contextual_help_for_command_and_variable() {
        let (_dir, path, mut harness) = linear_fixture();
        let content = "set(A 1)\nmessage(\"x ${FOO} y\")\n";

        // Cursor on the command name.
        let frame = harness.process(
            "contextualHelp",
            json!({
                "file_path": path.display().to_string(),
                "file_line": 1,
                "file_column": 2,
                "file_content": content,
            }),
        );
        assert_eq!(frame["contextual_help"]["context"], "command");
        assert_eq!(frame["contextual_help"]["help_key"], "set");

        // Cursor inside ${FOO} on line 2 (column within the braces).
        let frame = harness.process(
            "contextualHelp",
            json!({
                "file_path": path.display().to_string(),
                "file_line": 2,
                "file_column": 15,
                "file_content": content,
            }),
        );
        assert_eq!(frame["contextual_help"]["context"], "variable");
        assert_eq!(frame["contextual_help"]["help_key"], "FOO");
    }

    #[test]
    fn test_contextual_help_outside_any_function_is_empty() {
        let (_dir, path, mut harness) = linear_fixture();

        let frame = harness.process(
            "contextualHelp",
            json!({
                "file_path": path.display().to_string(),
                "file_line": 1,
                "file_column": 0,
                "file_content": "\n\nset(A 1)\n",
            }),
        );
        assert_eq!(frame["type"], "reply");
        assert!(frame.get("contextual_help").is_none());
    }

    #[test]
    fn test_parse_reports_tokens_and_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CMakeLists.txt");
        std::fs::write(&path, "if(OFF)\nset(A 1)\nendif()\n").unwrap();

        let path_for_history = path.clone();
        let mut harness = computed_harness(move || {
            let mut fake =
                FakeEvaluator::with_linear_history(path_for_history.to_str().unwrap(), &[1]);
            fake.set_not_executed(path_for_history.to_str().unwrap(), vec![(2, 3)]);
            fake
        });

        let frame = harness.process(
            "parse",
            json!({"file_path": path.display().to_string()}),
        );
        assert_eq!(frame["type"], "reply");

        let tokens = frame["parsed"]["tokens"].as_array().unwrap();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[1]["name"], "set");
        assert_eq!(tokens[1]["arguments"][0]["value"], "A");
        assert_eq!(tokens[1]["arguments"][0]["delimiter"], "unquoted");

        let unreachable = frame["parsed"]["unreachable"].as_array().unwrap();
        assert_eq!(unreachable[0]["begin"], 2);
        assert_eq!(unreachable[0]["end"], 3);
    }

    #[test]
    fn test_parse_maps_unreachable_through_inserted_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("CMakeLists.txt");
        std::fs::write(&path, "if(OFF)\nset(A 1)\nendif()\n").unwrap();

        let path_for_history = path.clone();
        let mut harness = computed_harness(move || {
            let mut fake =
                FakeEvaluator::with_linear_history(path_for_history.to_str().unwrap(), &[1]);
            fake.set_not_executed(path_for_history.to_str().unwrap(), vec![(2, 3)]);
            fake
        });

        // One line inserted at the top shifts the range down by one.
        let frame = harness.process(
            "parse",
            json!({
                "file_path": path.display().to_string(),
                "file_content": "set(NEW 0)\nif(OFF)\nset(A 1)\nendif()\n",
            }),
        );
        let unreachable = frame["parsed"]["unreachable"].as_array().unwrap();
        assert_eq!(unreachable[0]["begin"], 3);
        assert_eq!(unreachable[0]["end"], 4);
    }

    #[test]
    fn test_current_word_extraction() {
        assert_eq!(current_word("set(MY_VA"), "MY_VA");
        assert_eq!(current_word("  se"), "se");
        assert_eq!(current_word("set(A \"b"), "b");
        assert_eq!(current_word(""), "");
        assert_eq!(current_word("set(A "), "");
    }

    #[test]
    fn test_variable_reference_at() {
        assert_eq!(variable_reference_at("x ${FOO} y", 5), Some("FOO".to_string()));
        assert_eq!(variable_reference_at("${BAR", 4), Some("BAR".to_string()));
        assert_eq!(variable_reference_at("plain", 3), None);
        // Cursor past the closing brace.
        assert_eq!(variable_reference_at("${FOO} tail", 9), None);
    }
}
