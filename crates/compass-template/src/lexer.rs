//! Lexer: splits template source into literal text and action tokens
//!
//! Text outside `{{ … }}` becomes a single `Text` token. Inside an action the
//! lexer produces field paths, identifiers, literals, parentheses and pipes.
//! Trim markers (`{{-` and `-}}`) are applied here, and comments
//! (`{{/* … */}}`) never reach the parser.

use crate::error::{TemplateError, TemplateResult};

/// A token produced by the lexer
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    /// The kind of token
    pub kind: TokenKind,
    /// The raw text of the token (unescaped for string literals)
    pub text: String,
    /// Line number (1-based)
    pub line: usize,
    /// Column number (1-based)
    pub col: usize,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
            col,
        }
    }
}

/// Token types
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenKind {
    /// Literal text between actions
    Text,
    /// `{{`
    Open,
    /// `}}`
    Close,
    /// `.`, `.Field`, `.Field.Nested`
    Field,
    Identifier,
    StringLiteral,
    NumberLiteral,
    LeftParen,
    RightParen,
    Pipe,
    Eof,
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Open => write!(f, "{{{{"),
            Self::Close => write!(f, "}}}}"),
            Self::Field => write!(f, "field"),
            Self::Identifier => write!(f, "identifier"),
            Self::StringLiteral => write!(f, "string literal"),
            Self::NumberLiteral => write!(f, "number"),
            Self::LeftParen => write!(f, "("),
            Self::RightParen => write!(f, ")"),
            Self::Pipe => write!(f, "|"),
            Self::Eof => write!(f, "end of input"),
        }
    }
}

/// Lexer for the template language
pub struct Lexer {
    input: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
    /// Set by `-}}`: strip leading whitespace from the next text token.
    trim_next: bool,
}

impl Lexer {
    /// Create a new lexer from template source
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
            trim_next: false,
        }
    }

    /// Tokenize the entire input
    pub fn tokenize(&mut self) -> TemplateResult<Vec<Token>> {
        let mut tokens = Vec::new();

        loop {
            self.read_text(&mut tokens);
            if self.pos >= self.input.len() {
                tokens.push(Token::new(TokenKind::Eof, "", self.line, self.col));
                break;
            }
            self.read_action(&mut tokens)?;
        }

        Ok(tokens)
    }

    /// Read literal text up to the next `{{` or end of input.
    fn read_text(&mut self, tokens: &mut Vec<Token>) {
        let line = self.line;
        let col = self.col;
        let mut text = String::new();
        while self.pos < self.input.len() && !self.starts_with("{{") {
            text.push(self.input[self.pos]);
            self.advance();
        }
        if self.trim_next {
            text = text.trim_start().to_string();
            self.trim_next = false;
        }
        if !text.is_empty() {
            tokens.push(Token::new(TokenKind::Text, text, line, col));
        }
    }

    /// Read one `{{ … }}` action, starting at its opening delimiter.
    fn read_action(&mut self, tokens: &mut Vec<Token>) -> TemplateResult<()> {
        let line = self.line;
        let col = self.col;
        self.advance_by(2);

        if self.peek() == Some('-') && self.peek_at(1).is_some_and(char::is_whitespace) {
            self.advance();
            trim_trailing_text(tokens);
        }

        self.skip_whitespace();
        if self.starts_with("/*") {
            return self.read_comment(line, col);
        }

        tokens.push(Token::new(TokenKind::Open, "{{", line, col));
        loop {
            self.skip_whitespace();
            if self.pos >= self.input.len() {
                return Err(TemplateError::Parse {
                    line,
                    col,
                    message: "unclosed action".into(),
                });
            }
            if self.starts_with("-}}") {
                let close = Token::new(TokenKind::Close, "}}", self.line, self.col);
                self.advance_by(3);
                self.trim_next = true;
                tokens.push(close);
                return Ok(());
            }
            if self.starts_with("}}") {
                tokens.push(Token::new(TokenKind::Close, "}}", self.line, self.col));
                self.advance_by(2);
                return Ok(());
            }
            let token = self.next_token()?;
            tokens.push(token);
        }
    }

    fn read_comment(&mut self, line: usize, col: usize) -> TemplateResult<()> {
        while self.pos < self.input.len() && !self.starts_with("*/") {
            self.advance();
        }
        if self.pos >= self.input.len() {
            return Err(TemplateError::Parse {
                line,
                col,
                message: "unclosed comment".into(),
            });
        }
        self.advance_by(2);
        self.skip_whitespace();
        if self.starts_with("-}}") {
            self.advance_by(3);
            self.trim_next = true;
            Ok(())
        } else if self.starts_with("}}") {
            self.advance_by(2);
            Ok(())
        } else {
            Err(TemplateError::Parse {
                line: self.line,
                col: self.col,
                message: "comment must end the action".into(),
            })
        }
    }

    fn next_token(&mut self) -> TemplateResult<Token> {
        let ch = self.input[self.pos];
        let line = self.line;
        let col = self.col;

        match ch {
            '(' => {
                self.advance();
                Ok(Token::new(TokenKind::LeftParen, "(", line, col))
            }
            ')' => {
                self.advance();
                Ok(Token::new(TokenKind::RightParen, ")", line, col))
            }
            '|' => {
                self.advance();
                Ok(Token::new(TokenKind::Pipe, "|", line, col))
            }
            '.' => Ok(self.read_field()),
            '"' => self.read_string_literal(),
            '`' => self.read_raw_string(),
            '-' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => Ok(self.read_number()),
            c if c.is_ascii_digit() => Ok(self.read_number()),
            c if c.is_alphabetic() || c == '_' => Ok(self.read_identifier()),
            _ => Err(TemplateError::Parse {
                line,
                col,
                message: format!("unexpected character: '{ch}'"),
            }),
        }
    }

    fn read_field(&mut self) -> Token {
        let line = self.line;
        let col = self.col;
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c == '.' || c.is_alphanumeric() || c == '_' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        Token::new(TokenKind::Field, text, line, col)
    }

    fn read_string_literal(&mut self) -> TemplateResult<Token> {
        let line = self.line;
        let col = self.col;
        self.advance(); // skip opening quote

        let mut text = String::new();
        loop {
            match self.peek() {
                None | Some('\n') => {
                    return Err(TemplateError::Parse {
                        line,
                        col,
                        message: "unterminated string literal".into(),
                    });
                }
                Some('"') => break,
                Some('\\') => {
                    self.advance();
                    let escaped = match self.peek() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some(c @ ('"' | '\\')) => c,
                        other => {
                            return Err(TemplateError::Parse {
                                line: self.line,
                                col: self.col,
                                message: format!("invalid escape: {other:?}"),
                            });
                        }
                    };
                    text.push(escaped);
                    self.advance();
                }
                Some(c) => {
                    text.push(c);
                    self.advance();
                }
            }
        }

        self.advance(); // skip closing quote
        Ok(Token::new(TokenKind::StringLiteral, text, line, col))
    }

    fn read_raw_string(&mut self) -> TemplateResult<Token> {
        let line = self.line;
        let col = self.col;
        self.advance();

        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c == '`' {
                self.advance();
                return Ok(Token::new(TokenKind::StringLiteral, text, line, col));
            }
            text.push(c);
            self.advance();
        }
        Err(TemplateError::Parse {
            line,
            col,
            message: "unterminated raw string".into(),
        })
    }

    fn read_number(&mut self) -> Token {
        let line = self.line;
        let col = self.col;
        let mut text = String::new();
        if self.peek() == Some('-') {
            text.push('-');
            self.advance();
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '.' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        Token::new(TokenKind::NumberLiteral, text, line, col)
    }

    fn read_identifier(&mut self) -> Token {
        let line = self.line;
        let col = self.col;
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        Token::new(TokenKind::Identifier, text, line, col)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn starts_with(&self, pattern: &str) -> bool {
        pattern
            .chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c))
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.input.get(self.pos + offset).copied()
    }

    fn advance(&mut self) {
        if let Some(&c) = self.input.get(self.pos) {
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
            self.pos += 1;
        }
    }

    fn advance_by(&mut self, n: usize) {
        for _ in 0..n {
            self.advance();
        }
    }
}

/// Apply a `{{-` marker to the text token immediately before it.
fn trim_trailing_text(tokens: &mut Vec<Token>) {
    if let Some(last) = tokens.last_mut() {
        if last.kind == TokenKind::Text {
            last.text = last.text.trim_end().to_string();
            if last.text.is_empty() {
                tokens.pop();
            }
        }
    }
}
