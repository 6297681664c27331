//! Tokenizer for the pipeline graph language.
//!
//! Recognizes the strict subset used by pipeline definitions: the directed
//! graph keywords, identifiers (including dotted qualifiers), quoted strings
//! with escapes, numbers, the `->` operator, and punctuation. Line (`//`) and
//! block (`/* … */`) comments are skipped. Keywords are case-insensitive;
//! identifiers are case-sensitive. The undirected edge operator `--` is
//! rejected with the exact source position.

use crate::error::{PipelineError, Result};

/// Token kinds produced by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// `digraph` keyword.
    Digraph,
    /// `subgraph` keyword.
    Subgraph,
    /// `node` keyword (node defaults block).
    NodeKw,
    /// `edge` keyword (edge defaults block).
    EdgeKw,
    /// `graph` keyword (graph attribute block).
    GraphKw,
    /// Identifier or bareword value (`build`, `foo.bar`, `250ms`, `true`).
    Ident(String),
    /// Quoted string with escapes resolved.
    Str(String),
    /// Integer literal, optional leading `-`.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// Directed edge operator `->`.
    Arrow,
    Equals,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semicolon,
    Comma,
    Eof,
}

/// A token plus its source position (1-based line and column).
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

/// Tokenize a full pipeline source. The trailing token is always `Eof`.
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn run(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments()?;
            let (line, column) = (self.line, self.column);
            let Some(ch) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    line,
                    column,
                });
                return Ok(tokens);
            };

            let kind = match ch {
                '{' => self.single(TokenKind::LBrace),
                '}' => self.single(TokenKind::RBrace),
                '[' => self.single(TokenKind::LBracket),
                ']' => self.single(TokenKind::RBracket),
                ';' => self.single(TokenKind::Semicolon),
                ',' => self.single(TokenKind::Comma),
                '=' => self.single(TokenKind::Equals),
                '"' => self.string(line, column)?,
                '-' => self.dash(line, column)?,
                c if c.is_ascii_digit() => self.number_or_bareword(false),
                c if c.is_alphabetic() || c == '_' => self.ident(),
                other => {
                    return Err(PipelineError::parse(
                        line,
                        column,
                        format!("unexpected character '{other}'"),
                    ))
                }
            };
            tokens.push(Token { kind, line, column });
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.bump();
        kind
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<()> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    let (line, column) = (self.line, self.column);
                    self.bump();
                    self.bump();
                    let mut closed = false;
                    while let Some(c) = self.bump() {
                        if c == '*' && self.peek() == Some('/') {
                            self.bump();
                            closed = true;
                            break;
                        }
                    }
                    if !closed {
                        return Err(PipelineError::parse(line, column, "unterminated block comment"));
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn string(&mut self, line: usize, column: usize) -> Result<TokenKind> {
        self.bump(); // opening quote
        let mut value = String::new();
        loop {
            match self.bump() {
                None => {
                    return Err(PipelineError::parse(line, column, "unterminated string literal"))
                }
                Some('"') => return Ok(TokenKind::Str(value)),
                Some('\\') => match self.bump() {
                    Some('"') => value.push('"'),
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('\\') => value.push('\\'),
                    Some(other) => {
                        return Err(PipelineError::parse(
                            self.line,
                            self.column,
                            format!("unknown escape '\\{other}'"),
                        ))
                    }
                    None => {
                        return Err(PipelineError::parse(line, column, "unterminated string literal"))
                    }
                },
                Some(other) => value.push(other),
            }
        }
    }

    fn dash(&mut self, line: usize, column: usize) -> Result<TokenKind> {
        self.bump(); // '-'
        match self.peek() {
            Some('>') => {
                self.bump();
                Ok(TokenKind::Arrow)
            }
            Some('-') => Err(PipelineError::parse(
                line,
                column,
                "undirected edge '--' is not allowed; use '->'",
            )),
            Some(c) if c.is_ascii_digit() => Ok(self.number_or_bareword(true)),
            _ => Err(PipelineError::parse(line, column, "unexpected '-'")),
        }
    }

    /// Scan a numeric literal. A trailing alphabetic suffix turns the whole
    /// lexeme into a bareword (`250ms`, `2h`), which the parser coerces.
    fn number_or_bareword(&mut self, negative: bool) -> TokenKind {
        let mut text = String::new();
        if negative {
            text.push('-');
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else if c == '.' && !is_float && matches!(self.peek_at(1), Some(d) if d.is_ascii_digit())
            {
                is_float = true;
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if matches!(self.peek(), Some(c) if c.is_alphabetic() || c == '_') {
            while let Some(c) = self.peek() {
                if c.is_alphanumeric() || c == '_' {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            return TokenKind::Ident(text);
        }
        if is_float {
            match text.parse::<f64>() {
                Ok(f) => TokenKind::Float(f),
                Err(_) => TokenKind::Ident(text),
            }
        } else {
            match text.parse::<i64>() {
                Ok(i) => TokenKind::Int(i),
                Err(_) => TokenKind::Ident(text),
            }
        }
    }

    fn ident(&mut self) -> TokenKind {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        match text.to_ascii_lowercase().as_str() {
            "digraph" => TokenKind::Digraph,
            "subgraph" => TokenKind::Subgraph,
            "node" => TokenKind::NodeKw,
            "edge" => TokenKind::EdgeKw,
            "graph" => TokenKind::GraphKw,
            _ => TokenKind::Ident(text),
        }
    }
}
