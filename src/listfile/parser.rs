//! Recursive-descent parser for list files
//!
//! A file is a sequence of commands; a command is an identifier at the
//! start of a line followed by a balanced, comment-free argument list.
//! Nested parens are recorded as unquoted `(` / `)` arguments with the
//! surrounding depth tracked, so the argument sequence round-trips.

use super::lexer::{detect_bom, type_name, Bom, Lexer, Token, TokenType};
use super::{
    Delimiter, ListFile, ListFileArgument, ListFileFunction, MessageKind, Messenger, SourcePosition,
};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Cannot open file: {0}")]
    Io(#[from] std::io::Error),

    #[error("File {0:?} starts with a Byte-Order-Mark that is not UTF-8.")]
    BadByteOrderMark(PathBuf),

    #[error("File {0:?} is not valid UTF-8.")]
    BadEncoding(PathBuf),

    #[error("Parse error in {file:?}:{line}: {message}")]
    Syntax {
        file: PathBuf,
        line: i64,
        message: String,
    },
}

/// Argument separation state. After an argument or a closing paren the
/// next significant token must be preceded by whitespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Separation {
    Okay,
    Warning,
    Error,
}

pub struct Parser<'m> {
    file_name: PathBuf,
    messenger: &'m mut dyn Messenger,
}

impl<'m> Parser<'m> {
    pub fn new(file_name: impl Into<PathBuf>, messenger: &'m mut dyn Messenger) -> Self {
        Self {
            file_name: file_name.into(),
            messenger,
        }
    }

    /// Parse a file from disk, enforcing the BOM policy.
    pub fn parse_file(&mut self, path: &Path) -> Result<ListFile, ParseError> {
        let bytes = std::fs::read(path)?;
        let (bom, bom_len) = detect_bom(&bytes);
        if bom == Bom::Other {
            let message = format!(
                "File\n  {}\nstarts with a Byte-Order-Mark that is not UTF-8.",
                path.display()
            );
            self.messenger
                .issue_message(MessageKind::FatalError, &message, None);
            return Err(ParseError::BadByteOrderMark(path.to_path_buf()));
        }
        let content = std::str::from_utf8(&bytes[bom_len..])
            .map_err(|_| ParseError::BadEncoding(path.to_path_buf()))?;
        self.parse_string(content)
    }

    /// Parse in-memory content, e.g. an editor buffer.
    pub fn parse_string(&mut self, content: &str) -> Result<ListFile, ParseError> {
        let mut lexer = Lexer::new(content);
        let mut list_file = ListFile::default();

        let mut have_newline = true;
        while let Some(token) = lexer.scan() {
            match token.ty {
                TokenType::Space => {}
                TokenType::Newline => have_newline = true,
                TokenType::CommentBracket => have_newline = false,
                TokenType::Identifier => {
                    if !have_newline {
                        return Err(self.syntax_error(
                            token.line,
                            format!(
                                "Parse error.  Expected a newline, got {} with text \"{}\".",
                                type_name(token.ty),
                                token.text
                            ),
                        ));
                    }
                    have_newline = false;
                    let function = self.parse_function(&mut lexer, &token)?;
                    list_file.functions.push(function);
                }
                _ => {
                    return Err(self.syntax_error(
                        token.line,
                        format!(
                            "Parse error.  Expected a command name, got {} with text \"{}\".",
                            type_name(token.ty),
                            token.text
                        ),
                    ));
                }
            }
        }
        Ok(list_file)
    }

    /// Parse one command starting at the already-consumed name token.
    fn parse_function(
        &mut self,
        lexer: &mut Lexer,
        name: &Token,
    ) -> Result<ListFileFunction, ParseError> {
        let mut function = ListFileFunction {
            name: name.text.clone(),
            line: name.line,
            column: name.column,
            ..Default::default()
        };

        // Read the opening paren, skipping spaces.
        let mut token = lexer.scan();
        while matches!(&token, Some(t) if t.ty == TokenType::Space) {
            token = lexer.scan();
        }
        let open = match token {
            None => {
                return Err(self.syntax_error(
                    lexer.current_line(),
                    "Parse error.  Function missing opening \"(\".".to_string(),
                ));
            }
            Some(t) if t.ty != TokenType::ParenLeft => {
                return Err(self.syntax_error(
                    lexer.current_line(),
                    format!(
                        "Parse error.  Expected \"(\", got {} with text \"{}\".",
                        type_name(t.ty),
                        t.text
                    ),
                ));
            }
            Some(t) => t,
        };
        function.open_paren_line = open.line;
        function.open_paren_column = open.column;

        // Argument list.
        let mut paren_depth: u32 = 0;
        let mut separation = Separation::Okay;
        let mut last_line = lexer.current_line();

        loop {
            let Some(token) = lexer.scan() else { break };
            match token.ty {
                TokenType::Space | TokenType::Newline => {
                    separation = Separation::Okay;
                }
                TokenType::ParenLeft => {
                    paren_depth += 1;
                    separation = Separation::Okay;
                    self.add_argument(&mut function, &token, Delimiter::Unquoted, separation)?;
                }
                TokenType::ParenRight => {
                    if paren_depth == 0 {
                        function.close_paren_line = token.line;
                        function.close_paren_column = token.column;
                        return Ok(function);
                    }
                    paren_depth -= 1;
                    self.add_argument(
                        &mut function,
                        &token,
                        Delimiter::Unquoted,
                        Separation::Okay,
                    )?;
                    separation = Separation::Warning;
                }
                TokenType::Identifier | TokenType::ArgumentUnquoted => {
                    self.add_argument(&mut function, &token, Delimiter::Unquoted, separation)?;
                    separation = Separation::Warning;
                }
                TokenType::ArgumentQuoted => {
                    self.add_argument(&mut function, &token, Delimiter::Quoted, separation)?;
                    separation = Separation::Warning;
                }
                TokenType::ArgumentBracket => {
                    self.add_argument(&mut function, &token, Delimiter::Bracket, separation)?;
                    separation = Separation::Error;
                }
                TokenType::CommentBracket => {
                    separation = Separation::Error;
                }
            }
            last_line = lexer.current_line();
        }

        Err(self.syntax_error(
            last_line,
            "Parse error.  Function missing ending \")\".  End of file reached.".to_string(),
        ))
    }

    /// Record an argument, enforcing the separation rule: a violation is a
    /// warning for quoted/unquoted arguments and a fatal error for bracket
    /// arguments or when the previous token left an error-state separator.
    fn add_argument(
        &mut self,
        function: &mut ListFileFunction,
        token: &Token,
        delimiter: Delimiter,
        separation: Separation,
    ) -> Result<(), ParseError> {
        function.arguments.push(ListFileArgument::new(
            token.text.clone(),
            delimiter,
            token.line,
            token.column,
        ));
        if separation == Separation::Okay {
            return Ok(());
        }

        let is_error = separation == Separation::Error || delimiter == Delimiter::Bracket;
        let message = format!(
            "Syntax {} in cmake code at\n  {}:{}:{}\nArgument not separated from preceding token by whitespace.",
            if is_error { "Error" } else { "Warning" },
            self.file_name.display(),
            token.line,
            token.column
        );
        let position = SourcePosition {
            file: self.file_name.clone(),
            line: token.line,
            column: token.column,
        };

        if is_error {
            self.messenger
                .issue_message(MessageKind::FatalError, &message, Some(&position));
            Err(ParseError::Syntax {
                file: self.file_name.clone(),
                line: token.line,
                message: "Argument not separated from preceding token by whitespace.".to_string(),
            })
        } else {
            self.messenger
                .issue_message(MessageKind::AuthorWarning, &message, Some(&position));
            Ok(())
        }
    }

    fn syntax_error(&mut self, line: i64, message: String) -> ParseError {
        let full = format!(
            "Error in cmake code at\n{}:{}:\n{}",
            self.file_name.display(),
            line,
            message
        );
        self.messenger
            .issue_message(MessageKind::FatalError, &full, None);
        ParseError::Syntax {
            file: self.file_name.clone(),
            line,
            message,
        }
    }
}
