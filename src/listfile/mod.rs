//! Configuration-language list files
//!
//! A list file is an ordered sequence of function calls. This module holds
//! the parsed representation with precise source positions, the lexer and
//! recursive-descent parser that produce it, and the message collaborator
//! through which syntax diagnostics surface.

pub mod lexer;
pub mod parser;

use std::path::PathBuf;

/// How an argument was delimited in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Unquoted,
    Quoted,
    Bracket,
}

/// One argument of a parsed function call.
#[derive(Debug, Clone, PartialEq)]
pub struct ListFileArgument {
    pub value: String,
    pub delimiter: Delimiter,
    pub line: i64,
    pub column: i64,
}

impl ListFileArgument {
    pub fn new(value: impl Into<String>, delimiter: Delimiter, line: i64, column: i64) -> Self {
        Self {
            value: value.into(),
            delimiter,
            line,
            column,
        }
    }
}

/// A parsed function call with its source span.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ListFileFunction {
    pub name: String,
    pub line: i64,
    pub column: i64,
    pub open_paren_line: i64,
    pub open_paren_column: i64,
    pub close_paren_line: i64,
    pub close_paren_column: i64,
    pub arguments: Vec<ListFileArgument>,
}

/// An entire parsed list file.
#[derive(Debug, Clone, Default)]
pub struct ListFile {
    pub functions: Vec<ListFileFunction>,
}

/// A source location: `(file, line)` is totally ordered by file then line
/// and keys the snapshot index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ListFileContext {
    pub file_path: PathBuf,
    pub line: i64,
}

impl ListFileContext {
    pub fn new(file_path: impl Into<PathBuf>, line: i64) -> Self {
        Self {
            file_path: file_path.into(),
            line,
        }
    }
}

/// A full source position attached to diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePosition {
    pub file: PathBuf,
    pub line: i64,
    pub column: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    AuthorWarning,
    FatalError,
}

/// Collaborator through which the parser reports diagnostics.
pub trait Messenger {
    fn issue_message(&mut self, kind: MessageKind, text: &str, position: Option<&SourcePosition>);
}

/// Messenger that records everything it is given.
#[derive(Debug, Default)]
pub struct CollectingMessenger {
    pub messages: Vec<(MessageKind, String, Option<SourcePosition>)>,
}

impl CollectingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &(MessageKind, String, Option<SourcePosition>)> {
        self.messages
            .iter()
            .filter(|(kind, _, _)| *kind == MessageKind::AuthorWarning)
    }
}

impl Messenger for CollectingMessenger {
    fn issue_message(&mut self, kind: MessageKind, text: &str, position: Option<&SourcePosition>) {
        self.messages
            .push((kind, text.to_string(), position.cloned()));
    }
}
