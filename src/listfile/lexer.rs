//! List-file token scanner
//!
//! Classifies input into the token stream the recursive-descent parser
//! consumes. Line comments are consumed by the scanner and never surface
//! as tokens; bracket comments do, because they interact with the
//! argument-separation rules.

/// Token classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Space,
    Newline,
    Identifier,
    ArgumentUnquoted,
    ArgumentQuoted,
    ArgumentBracket,
    ParenLeft,
    ParenRight,
    CommentBracket,
}

/// Human-readable token type name for diagnostics.
pub fn type_name(ty: TokenType) -> &'static str {
    match ty {
        TokenType::Space => "space",
        TokenType::Newline => "newline",
        TokenType::Identifier => "identifier",
        TokenType::ArgumentUnquoted => "unquoted argument",
        TokenType::ArgumentQuoted => "quoted argument",
        TokenType::ArgumentBracket => "bracket argument",
        TokenType::ParenLeft => "left paren",
        TokenType::ParenRight => "right paren",
        TokenType::CommentBracket => "bracket comment",
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub ty: TokenType,
    /// Token text. For quoted and bracket arguments this is the content
    /// with the delimiters stripped; escape sequences are kept verbatim.
    pub text: String,
    pub line: i64,
    pub column: i64,
}

/// Byte-order-mark classification. Only "none" and UTF-8 are accepted;
/// everything else is a fatal parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bom {
    None,
    Utf8,
    Other,
}

/// Classify a leading byte-order mark. Returns the BOM kind and its
/// length in bytes.
pub fn detect_bom(bytes: &[u8]) -> (Bom, usize) {
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        (Bom::Utf8, 3)
    } else if bytes.starts_with(&[0xFF, 0xFE, 0x00, 0x00]) || bytes.starts_with(&[0x00, 0x00, 0xFE, 0xFF]) {
        (Bom::Other, 4) // UTF-32
    } else if bytes.starts_with(&[0xFF, 0xFE]) || bytes.starts_with(&[0xFE, 0xFF]) {
        (Bom::Other, 2) // UTF-16
    } else {
        (Bom::None, 0)
    }
}

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: i64,
    column: i64,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        let input = input.strip_prefix('\u{feff}').unwrap_or(input);
        Self {
            chars: input.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// The line the scanner is currently positioned at; used for
    /// diagnostics after the token stream runs out.
    pub fn current_line(&self) -> i64 {
        self.line
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    /// Consume one character, updating line/column bookkeeping.
    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    /// Length of a bracket opener `[=*[` at the given offset, if present.
    /// Returns the nesting level (number of `=`).
    fn bracket_open_level(&self, offset: usize) -> Option<usize> {
        if self.peek_at(offset)? != '[' {
            return None;
        }
        let mut level = 0;
        loop {
            match self.peek_at(offset + 1 + level) {
                Some('=') => level += 1,
                Some('[') => return Some(level),
                _ => return None,
            }
        }
    }

    /// Scan the next token, or `None` at end of input.
    pub fn scan(&mut self) -> Option<Token> {
        let c = self.peek()?;
        let (line, column) = (self.line, self.column);

        match c {
            ' ' | '\t' => {
                let mut text = String::new();
                while matches!(self.peek(), Some(' ') | Some('\t')) {
                    text.push(self.advance().unwrap_or(' '));
                }
                Some(Token {
                    ty: TokenType::Space,
                    text,
                    line,
                    column,
                })
            }
            '\r' if self.peek_at(1) == Some('\n') => {
                self.advance();
                self.advance();
                Some(Token {
                    ty: TokenType::Newline,
                    text: "\n".to_string(),
                    line,
                    column,
                })
            }
            '\r' => {
                // A stray carriage return counts as whitespace.
                self.advance();
                Some(Token {
                    ty: TokenType::Space,
                    text: " ".to_string(),
                    line,
                    column,
                })
            }
            '\n' => {
                self.advance();
                Some(Token {
                    ty: TokenType::Newline,
                    text: "\n".to_string(),
                    line,
                    column,
                })
            }
            '(' => {
                self.advance();
                Some(Token {
                    ty: TokenType::ParenLeft,
                    text: "(".to_string(),
                    line,
                    column,
                })
            }
            ')' => {
                self.advance();
                Some(Token {
                    ty: TokenType::ParenRight,
                    text: ")".to_string(),
                    line,
                    column,
                })
            }
            '#' => {
                if let Some(level) = self.bracket_open_level(1) {
                    self.advance(); // '#'
                    let text = self.scan_bracket_block(level);
                    Some(Token {
                        ty: TokenType::CommentBracket,
                        text,
                        line,
                        column,
                    })
                } else {
                    // Line comment: consumed without producing a token.
                    while !matches!(self.peek(), None | Some('\n')) {
                        self.advance();
                    }
                    self.scan()
                }
            }
            '"' => {
                self.advance();
                let mut text = String::new();
                loop {
                    match self.peek() {
                        None => break,
                        Some('"') => {
                            self.advance();
                            break;
                        }
                        Some('\\') => {
                            text.push(self.advance().unwrap_or('\\'));
                            if let Some(escaped) = self.advance() {
                                text.push(escaped);
                            }
                        }
                        Some(_) => {
                            if let Some(next) = self.advance() {
                                text.push(next);
                            }
                        }
                    }
                }
                Some(Token {
                    ty: TokenType::ArgumentQuoted,
                    text,
                    line,
                    column,
                })
            }
            '[' if self.bracket_open_level(0).is_some() => {
                let level = self.bracket_open_level(0).unwrap_or(0);
                let text = self.scan_bracket_block(level);
                Some(Token {
                    ty: TokenType::ArgumentBracket,
                    text,
                    line,
                    column,
                })
            }
            _ => {
                let mut text = String::new();
                let mut identifier = matches!(c, 'A'..='Z' | 'a'..='z' | '_');
                while let Some(next) = self.peek() {
                    match next {
                        ' ' | '\t' | '\r' | '\n' | '(' | ')' | '#' | '"' => break,
                        '\\' => {
                            identifier = false;
                            text.push(self.advance().unwrap_or('\\'));
                            if let Some(escaped) = self.advance() {
                                text.push(escaped);
                            }
                        }
                        _ => {
                            if !matches!(next, 'A'..='Z' | 'a'..='z' | '0'..='9' | '_') {
                                identifier = false;
                            }
                            if let Some(consumed) = self.advance() {
                                text.push(consumed);
                            }
                        }
                    }
                }
                Some(Token {
                    ty: if identifier {
                        TokenType::Identifier
                    } else {
                        TokenType::ArgumentUnquoted
                    },
                    text,
                    line,
                    column,
                })
            }
        }
    }

    /// Consume a `[=*[ ... ]=*]` block (opener included) and return the
    /// content. A newline immediately after the opener is dropped.
    fn scan_bracket_block(&mut self, level: usize) -> String {
        // Opener: '[' + '='*level + '['
        for _ in 0..level + 2 {
            self.advance();
        }
        if self.peek() == Some('\r') && self.peek_at(1) == Some('\n') {
            self.advance();
            self.advance();
        } else if self.peek() == Some('\n') {
            self.advance();
        }

        let closer: String = std::iter::once(']')
            .chain(std::iter::repeat('=').take(level))
            .chain(std::iter::once(']'))
            .collect();

        let mut text = String::new();
        loop {
            if self.peek().is_none() {
                break;
            }
            if self.remaining_starts_with(&closer) {
                for _ in 0..closer.len() {
                    self.advance();
                }
                break;
            }
            if let Some(next) = self.advance() {
                text.push(next);
            }
        }
        text
    }

    fn remaining_starts_with(&self, needle: &str) -> bool {
        needle
            .chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(input);
        let mut out = Vec::new();
        while let Some(token) = lexer.scan() {
            out.push(token);
        }
        out
    }

    fn significant(input: &str) -> Vec<(TokenType, String)> {
        tokens(input)
            .into_iter()
            .filter(|t| !matches!(t.ty, TokenType::Space | TokenType::Newline))
            .map(|t| (t.ty, t.text))
            .collect()
    }

    #[test]
    fn test_simple_command() {
        let toks = significant("set(FOO bar)\n");
        assert_eq!(
            toks,
            vec![
                (TokenType::Identifier, "set".to_string()),
                (TokenType::ParenLeft, "(".to_string()),
                (TokenType::Identifier, "FOO".to_string()),
                (TokenType::Identifier, "bar".to_string()),
                (TokenType::ParenRight, ")".to_string()),
            ]
        );
    }

    #[test]
    fn test_positions_are_one_based() {
        let toks = tokens("set(A)\nmessage(B)\n");
        let set = &toks[0];
        assert_eq!((set.line, set.column), (1, 1));

        let message = toks
            .iter()
            .find(|t| t.text == "message")
            .expect("message token");
        assert_eq!((message.line, message.column), (2, 1));
    }

    #[test]
    fn test_quoted_argument_strips_quotes() {
        let toks = significant(r#"set(FOO "a b c")"#);
        assert!(toks.contains(&(TokenType::ArgumentQuoted, "a b c".to_string())));
    }

    #[test]
    fn test_quoted_argument_keeps_escapes() {
        let toks = significant(r#"set(FOO "a\"b")"#);
        assert!(toks.contains(&(TokenType::ArgumentQuoted, "a\\\"b".to_string())));
    }

    #[test]
    fn test_unquoted_with_special_chars() {
        let toks = significant("set(FOO ${BAR}/baz)");
        assert!(toks.contains(&(TokenType::ArgumentUnquoted, "${BAR}/baz".to_string())));
    }

    #[test]
    fn test_line_comment_produces_no_token() {
        let toks = tokens("# a comment\nset(A)\n");
        assert_eq!(toks[0].ty, TokenType::Newline);
        assert_eq!(toks[1].ty, TokenType::Identifier);
    }

    #[test]
    fn test_bracket_argument() {
        let toks = significant("set(FOO [[raw ${not expanded}]])");
        assert!(toks.contains(&(
            TokenType::ArgumentBracket,
            "raw ${not expanded}".to_string()
        )));
    }

    #[test]
    fn test_bracket_argument_with_level() {
        let toks = significant("set(FOO [=[a ]] b]=])");
        assert!(toks.contains(&(TokenType::ArgumentBracket, "a ]] b".to_string())));
    }

    #[test]
    fn test_bracket_argument_eats_leading_newline() {
        let toks = significant("set(FOO [[\ncontent]])");
        assert!(toks.contains(&(TokenType::ArgumentBracket, "content".to_string())));
    }

    #[test]
    fn test_bracket_comment_token() {
        let toks = significant("#[[ block comment ]]\nset(A)");
        assert_eq!(toks[0].0, TokenType::CommentBracket);
        assert_eq!(toks[1], (TokenType::Identifier, "set".to_string()));
    }

    #[test]
    fn test_crlf_newlines() {
        let toks = tokens("set(A)\r\nset(B)\r\n");
        let newlines = toks.iter().filter(|t| t.ty == TokenType::Newline).count();
        assert_eq!(newlines, 2);
        let b_line = toks.iter().find(|t| t.text == "B").map(|t| t.line);
        assert_eq!(b_line, Some(2));
    }

    #[test]
    fn test_utf8_bom_is_stripped() {
        let toks = tokens("\u{feff}set(A)");
        assert_eq!(toks[0].ty, TokenType::Identifier);
        assert_eq!((toks[0].line, toks[0].column), (1, 1));
    }

    #[test]
    fn test_detect_bom() {
        assert_eq!(detect_bom(b"set(A)"), (Bom::None, 0));
        assert_eq!(detect_bom(&[0xEF, 0xBB, 0xBF, b's']), (Bom::Utf8, 3));
        assert_eq!(detect_bom(&[0xFF, 0xFE, 0x00, 0x61]).0, Bom::Other);
        assert_eq!(detect_bom(&[0xFE, 0xFF, 0x00, 0x61]).0, Bom::Other);
    }

    #[test]
    fn test_multiline_quoted_argument_line_tracking() {
        let toks = tokens("set(FOO \"a\nb\")\nset(BAR x)\n");
        let bar = toks.iter().find(|t| t.text == "BAR").expect("BAR token");
        assert_eq!(bar.line, 3);
    }
}
