//! Syntax tree produced by the [`parser`](crate::parser) and consumed by the
//! [`Compiler`](crate::compiler::Compiler).
//!
//! The tree is deliberately permissive: it can represent a dangling pipe
//! (`a |`) and a block that was never closed (`retry 3 { true`), so that
//! partial input still parses and the compiler is the one that rejects it.

use std::fmt;

/// 1-based position of a token in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A `${NAME}` or `${NAME!fallback}` expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
    pub name: String,
    pub fallback: Option<String>,
}

/// A piece of a double-quoted string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StringPart {
    Literal(String),
    Expansion(Expansion),
}

/// A piece of a word. Adjacent pieces with no blank between them form one word,
/// e.g. `dir/${NAME}'.txt'`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WordPart {
    /// Bare text outside of quotes.
    Literal(String),
    /// `'...'`: raw text, no expansion.
    SingleQuoted(String),
    /// `"..."`: literal spans interleaved with expansions.
    DoubleQuoted(Vec<StringPart>),
    /// Bare `${NAME}`, `${NAME!fallback}` or `$NAME`.
    Expansion(Expansion),
}

/// A word together with the position it started at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    pub parts: Vec<WordPart>,
    pub span: Span,
}

impl Word {
    /// The word's text when it contains no expansion at all.
    pub fn as_literal(&self) -> Option<String> {
        let mut text = String::new();
        for part in &self.parts {
            match part {
                WordPart::Literal(s) | WordPart::SingleQuoted(s) => text.push_str(s),
                WordPart::DoubleQuoted(pieces) => {
                    for piece in pieces {
                        match piece {
                            StringPart::Literal(s) => text.push_str(s),
                            StringPart::Expansion(_) => return None,
                        }
                    }
                }
                WordPart::Expansion(_) => return None,
            }
        }
        Some(text)
    }
}

/// Root of the tree: newline-separated top-level statements.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyntaxTree {
    pub statements: Vec<Sequence>,
}

/// Pipelines joined by `;`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    pub pipelines: Vec<Pipeline>,
}

/// Stages joined by `|`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
    /// Position of a trailing `|` with nothing after it.
    pub dangling_pipe: Option<Span>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Command(SimpleCommand),
    Lambda(Lambda),
}

/// `name arg... [{ block }]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleCommand {
    pub words: Vec<Word>,
    pub block: Option<Block>,
    pub span: Span,
}

/// `{ ... }` following a wrapper command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub body: SyntaxTree,
    pub closed: bool,
    pub span: Span,
}

/// `{ name -> command }`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lambda {
    pub binding: String,
    pub body: SimpleCommand,
    pub closed: bool,
    pub span: Span,
}
