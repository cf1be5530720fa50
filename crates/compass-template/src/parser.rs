//! Parser: recursive descent over the token stream
//!
//! Produces the template AST: a list of [`Node`]s whose actions hold
//! [`Expr`] pipelines. Function names are resolved to [`Func`] at parse time
//! so unknown functions and wrong arities fail before any rendering.

use serde_json::Value;

use crate::error::{TemplateError, TemplateResult};
use crate::lexer::{Lexer, Token, TokenKind};

/// A node of the template body
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    /// Literal text, emitted verbatim.
    Text(String),
    /// `{{ pipeline }}`
    Output(Expr),
    /// `{{if}} … {{else if}} … {{else}} … {{end}}`
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
}

/// An expression inside an action
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Field path from the context root; empty for `.`
    Path(Vec<String>),
    Literal(Value),
    Call { func: Func, args: Vec<Expr> },
}

impl Expr {
    /// Dotted form of a path expression, for error messages.
    pub fn describe(&self) -> String {
        match self {
            Self::Path(segments) if segments.is_empty() => ".".to_string(),
            Self::Path(segments) => format!(".{}", segments.join(".")),
            Self::Literal(value) => value.to_string(),
            Self::Call { func, .. } => func.name().to_string(),
        }
    }
}

/// Built-in template functions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Func {
    Eq,
    Ne,
    Not,
    And,
    Or,
    Default,
    Json,
    Len,
}

impl Func {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            "not" => Some(Self::Not),
            "and" => Some(Self::And),
            "or" => Some(Self::Or),
            "default" => Some(Self::Default),
            "json" | "toJson" => Some(Self::Json),
            "len" => Some(Self::Len),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Not => "not",
            Self::And => "and",
            Self::Or => "or",
            Self::Default => "default",
            Self::Json => "json",
            Self::Len => "len",
        }
    }

    /// Accepted argument count as (min, max).
    fn arity(&self) -> (usize, Option<usize>) {
        match self {
            Self::Eq => (2, None),
            Self::Ne | Self::Default => (2, Some(2)),
            Self::Not | Self::Json | Self::Len => (1, Some(1)),
            Self::And | Self::Or => (1, None),
        }
    }
}

/// How a node list ended.
enum Stop {
    Eof,
    End,
    Else(Option<Expr>),
}

/// Parser for the template language
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// Parse template source into its node list
    pub fn parse(input: &str) -> TemplateResult<Vec<Node>> {
        let mut lexer = Lexer::new(input);
        let tokens = lexer.tokenize()?;
        let mut parser = Self { tokens, pos: 0 };

        let (nodes, stop) = parser.parse_nodes()?;
        match stop {
            Stop::Eof => Ok(nodes),
            Stop::End => Err(parser.error_at_previous("unexpected {{end}}")),
            Stop::Else(_) => Err(parser.error_at_previous("unexpected {{else}}")),
        }
    }

    fn parse_nodes(&mut self) -> TemplateResult<(Vec<Node>, Stop)> {
        let mut nodes = Vec::new();
        loop {
            let token = self.advance().clone();
            match token.kind {
                TokenKind::Eof => return Ok((nodes, Stop::Eof)),
                TokenKind::Text => nodes.push(Node::Text(token.text)),
                TokenKind::Open => {
                    if self.check_keyword("end") {
                        self.advance();
                        self.expect(TokenKind::Close)?;
                        return Ok((nodes, Stop::End));
                    }
                    if self.check_keyword("else") {
                        self.advance();
                        let condition = if self.check_keyword("if") {
                            self.advance();
                            Some(self.parse_pipeline()?)
                        } else {
                            None
                        };
                        self.expect(TokenKind::Close)?;
                        return Ok((nodes, Stop::Else(condition)));
                    }
                    if self.check_keyword("if") {
                        self.advance();
                        nodes.push(self.parse_if()?);
                        continue;
                    }
                    let expr = self.parse_pipeline()?;
                    self.expect(TokenKind::Close)?;
                    nodes.push(Node::Output(expr));
                }
                _ => {
                    return Err(TemplateError::Parse {
                        line: token.line,
                        col: token.col,
                        message: format!("unexpected {}", token.kind),
                    });
                }
            }
        }
    }

    /// Parse the rest of an `if` after its keyword.
    fn parse_if(&mut self) -> TemplateResult<Node> {
        let start = self.previous().clone();
        let mut condition = self.parse_pipeline()?;
        self.expect(TokenKind::Close)?;

        let mut branches = Vec::new();
        loop {
            let (body, stop) = self.parse_nodes()?;
            match stop {
                Stop::End => {
                    branches.push((condition, body));
                    return Ok(Node::If {
                        branches,
                        otherwise: Vec::new(),
                    });
                }
                Stop::Else(Some(next)) => {
                    branches.push((condition, body));
                    condition = next;
                }
                Stop::Else(None) => {
                    branches.push((condition, body));
                    let (otherwise, stop) = self.parse_nodes()?;
                    return match stop {
                        Stop::End => Ok(Node::If {
                            branches,
                            otherwise,
                        }),
                        Stop::Else(_) => Err(self.error_at_previous("{{else}} after final {{else}}")),
                        Stop::Eof => Err(unclosed_if(&start)),
                    };
                }
                Stop::Eof => return Err(unclosed_if(&start)),
            }
        }
    }

    /// `command ( '|' command )*`: a piped value becomes the last argument.
    fn parse_pipeline(&mut self) -> TemplateResult<Expr> {
        let mut expr = self.parse_command()?;
        while self.check(TokenKind::Pipe) {
            self.advance();
            let token = self.peek().clone();
            let func = self.expect_function()?;
            let mut args = self.parse_operands()?;
            args.push(expr);
            expr = build_call(func, args, &token)?;
        }
        Ok(expr)
    }

    fn parse_command(&mut self) -> TemplateResult<Expr> {
        let token = self.peek().clone();
        if token.kind == TokenKind::Identifier && Func::lookup(&token.text).is_some() {
            let func = self.expect_function()?;
            let args = self.parse_operands()?;
            return build_call(func, args, &token);
        }
        self.parse_operand()
    }

    fn parse_operands(&mut self) -> TemplateResult<Vec<Expr>> {
        let mut args = Vec::new();
        while !matches!(
            self.peek_kind(),
            TokenKind::Close | TokenKind::RightParen | TokenKind::Pipe | TokenKind::Eof
        ) {
            args.push(self.parse_operand()?);
        }
        Ok(args)
    }

    fn parse_operand(&mut self) -> TemplateResult<Expr> {
        let token = self.advance().clone();
        match token.kind {
            TokenKind::Field => Ok(Expr::Path(
                token
                    .text
                    .split('.')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
            TokenKind::StringLiteral => Ok(Expr::Literal(Value::String(token.text))),
            TokenKind::NumberLiteral => parse_number(&token).map(Expr::Literal),
            TokenKind::Identifier => match token.text.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" | "nil" => Ok(Expr::Literal(Value::Null)),
                name if Func::lookup(name).is_some() => Err(TemplateError::Parse {
                    line: token.line,
                    col: token.col,
                    message: format!("function {name} must be called in parentheses here"),
                }),
                name => Err(TemplateError::Parse {
                    line: token.line,
                    col: token.col,
                    message: format!("function \"{name}\" not defined"),
                }),
            },
            TokenKind::LeftParen => {
                let expr = self.parse_pipeline()?;
                self.expect(TokenKind::RightParen)?;
                Ok(expr)
            }
            _ => Err(TemplateError::Parse {
                line: token.line,
                col: token.col,
                message: format!("unexpected {} in action", token.kind),
            }),
        }
    }

    // ── Token helpers ──────────────────────────────────────────────

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.pos.saturating_sub(1)]
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn check_keyword(&self, keyword: &str) -> bool {
        let token = self.peek();
        token.kind == TokenKind::Identifier && token.text == keyword
    }

    fn advance(&mut self) -> &Token {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
            &self.tokens[self.pos - 1]
        } else {
            &self.tokens[self.tokens.len() - 1]
        }
    }

    fn expect(&mut self, kind: TokenKind) -> TemplateResult<&Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            let token = self.peek();
            Err(TemplateError::Parse {
                line: token.line,
                col: token.col,
                message: format!("expected {kind}, found {}", token.kind),
            })
        }
    }

    fn expect_function(&mut self) -> TemplateResult<Func> {
        let token = self.expect(TokenKind::Identifier)?.clone();
        Func::lookup(&token.text).ok_or(TemplateError::Parse {
            line: token.line,
            col: token.col,
            message: format!("function \"{}\" not defined", token.text),
        })
    }

    fn error_at_previous(&self, message: &str) -> TemplateError {
        let token = self.previous();
        TemplateError::Parse {
            line: token.line,
            col: token.col,
            message: message.to_string(),
        }
    }
}

fn build_call(func: Func, args: Vec<Expr>, token: &Token) -> TemplateResult<Expr> {
    let (min, max) = func.arity();
    if args.len() < min || max.is_some_and(|max| args.len() > max) {
        return Err(TemplateError::Parse {
            line: token.line,
            col: token.col,
            message: format!("wrong number of args for {}: got {}", func.name(), args.len()),
        });
    }
    Ok(Expr::Call { func, args })
}

fn parse_number(token: &Token) -> TemplateResult<Value> {
    let invalid = || TemplateError::Parse {
        line: token.line,
        col: token.col,
        message: format!("invalid number: {}", token.text),
    };
    if let Ok(n) = token.text.parse::<i64>() {
        return Ok(Value::from(n));
    }
    let f = token.text.parse::<f64>().map_err(|_| invalid())?;
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(invalid)
}

fn unclosed_if(start: &Token) -> TemplateError {
    TemplateError::Parse {
        line: start.line,
        col: start.col,
        message: "unclosed {{if}}: missing {{end}}".into(),
    }
}
