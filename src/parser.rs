//! Recursive-descent parser from tokens to the [`SyntaxTree`].
//!
//! Grammar, informally:
//!
//! ```text
//! program   := (sequence? NEWLINE)* sequence?
//! sequence  := pipeline (';' pipeline)* ';'?
//! pipeline  := stage ('|' stage)* '|'?
//! stage     := lambda | command
//! lambda    := '{' NAME '->' command '}'
//! command   := WORD+ block?
//! block     := '{' program '}'
//! ```
//!
//! A trailing `|` and an unclosed block are accepted here on purpose; the
//! compiler turns them into positioned errors.

use crate::ast::{Block, Lambda, Pipeline, Sequence, SimpleCommand, Span, Stage, SyntaxTree, Word, WordPart};
use crate::lexer::{self, LexingError, Token, TokenKind};
use thiserror::Error;

/// Errors that can occur during the parsing phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParsingError {
    #[error(transparent)]
    Lexing(#[from] LexingError),
    /// A token that was not expected at the current position according to the grammar.
    #[error("line {}:{}: unexpected {found}", .span.line, .span.column)]
    UnexpectedToken { span: Span, found: String },
    /// Input ended while a command was expected.
    #[error("line {}:{}: expected a command", .span.line, .span.column)]
    ExpectedCommand { span: Span },
}

impl ParsingError {
    pub fn span(&self) -> Span {
        match self {
            ParsingError::Lexing(e) => e.span(),
            ParsingError::UnexpectedToken { span, .. } | ParsingError::ExpectedCommand { span } => {
                *span
            }
        }
    }

    /// The message without its position prefix.
    pub fn message(&self) -> String {
        match self {
            ParsingError::Lexing(e) => {
                let text = e.to_string();
                match text.split_once(": ") {
                    Some((_, message)) => message.to_string(),
                    None => text,
                }
            }
            ParsingError::UnexpectedToken { found, .. } => format!("unexpected {found}"),
            ParsingError::ExpectedCommand { .. } => "expected a command".to_string(),
        }
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Word(_) => "word".to_string(),
        TokenKind::Pipe => "'|'".to_string(),
        TokenKind::Semicolon => "';'".to_string(),
        TokenKind::Newline => "end of line".to_string(),
        TokenKind::OpenBrace => "'{'".to_string(),
        TokenKind::CloseBrace => "'}'".to_string(),
        TokenKind::Arrow => "'->'".to_string(),
    }
}

struct AstBuilder {
    tokens: Vec<Token>,
    pos: usize,
    end: Span,
}

impl AstBuilder {
    fn from(tokens: Vec<Token>, end: Span) -> Self {
        AstBuilder { tokens, pos: 0, end }
    }

    fn build_ast(mut self) -> Result<SyntaxTree, ParsingError> {
        let (tree, _) = self.parse_program(false)?;
        Ok(tree)
    }

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn peek_n(&self, n: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + n).map(|t| &t.kind)
    }

    fn current_span(&self) -> Span {
        self.tokens.get(self.pos).map_or(self.end, |t| t.span)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self) -> ParsingError {
        match self.tokens.get(self.pos) {
            Some(token) => ParsingError::UnexpectedToken {
                span: token.span,
                found: describe(&token.kind),
            },
            None => ParsingError::ExpectedCommand { span: self.end },
        }
    }

    /// Parse statements until end of input, or until the `}` closing a block
    /// when `nested`. Returns whether that `}` was found.
    fn parse_program(&mut self, nested: bool) -> Result<(SyntaxTree, bool), ParsingError> {
        let mut statements = Vec::new();
        loop {
            match self.peek() {
                None => return Ok((SyntaxTree { statements }, false)),
                Some(TokenKind::Newline) => {
                    self.consume();
                }
                Some(TokenKind::CloseBrace) if nested => {
                    self.consume();
                    return Ok((SyntaxTree { statements }, true));
                }
                Some(_) => {
                    statements.push(self.parse_sequence()?);
                    match self.peek() {
                        None | Some(TokenKind::Newline) => {}
                        Some(TokenKind::CloseBrace) if nested => {}
                        Some(_) => return Err(self.unexpected()),
                    }
                }
            }
        }
    }

    /// Parse a sequence: pipeline (';' pipeline)*
    fn parse_sequence(&mut self) -> Result<Sequence, ParsingError> {
        let mut pipelines = vec![self.parse_pipeline()?];
        while let Some(TokenKind::Semicolon) = self.peek() {
            self.consume();
            if matches!(
                self.peek(),
                None | Some(TokenKind::Newline) | Some(TokenKind::CloseBrace)
            ) {
                break;
            }
            pipelines.push(self.parse_pipeline()?);
        }
        Ok(Sequence { pipelines })
    }

    /// Parse a pipeline: stage ('|' stage)*
    fn parse_pipeline(&mut self) -> Result<Pipeline, ParsingError> {
        let mut stages = vec![self.parse_stage()?];
        let mut dangling_pipe = None;
        while let Some(TokenKind::Pipe) = self.peek() {
            let pipe = self.consume().map_or(self.end, |t| t.span);
            if matches!(
                self.peek(),
                None | Some(TokenKind::Newline)
                    | Some(TokenKind::Semicolon)
                    | Some(TokenKind::CloseBrace)
            ) {
                dangling_pipe = Some(pipe);
                break;
            }
            stages.push(self.parse_stage()?);
        }
        Ok(Pipeline {
            stages,
            dangling_pipe,
        })
    }

    fn parse_stage(&mut self) -> Result<Stage, ParsingError> {
        let is_lambda = matches!(self.peek(), Some(TokenKind::OpenBrace))
            && matches!(self.peek_n(2), Some(TokenKind::Arrow));
        if is_lambda {
            Ok(Stage::Lambda(self.parse_lambda()?))
        } else {
            Ok(Stage::Command(self.parse_command()?))
        }
    }

    /// Parse a lambda: '{' NAME '->' command '}'
    fn parse_lambda(&mut self) -> Result<Lambda, ParsingError> {
        let span = self.current_span();
        self.consume();

        let binding_span = self.current_span();
        let binding = match self.consume().map(|t| t.kind) {
            Some(TokenKind::Word(parts)) => {
                let word = Word {
                    parts,
                    span: binding_span,
                };
                match word.as_literal() {
                    Some(name) if lexer::is_variable_name(&name) => name,
                    _ => {
                        return Err(ParsingError::UnexpectedToken {
                            span: binding_span,
                            found: "lambda parameter that is not a plain name".to_string(),
                        });
                    }
                }
            }
            _ => return Err(ParsingError::ExpectedCommand { span: binding_span }),
        };
        // '->' was checked by parse_stage
        self.consume();

        let body = self.parse_command()?;
        let closed = match self.peek() {
            Some(TokenKind::CloseBrace) => {
                self.consume();
                true
            }
            None => false,
            Some(_) => return Err(self.unexpected()),
        };
        Ok(Lambda {
            binding,
            body,
            closed,
            span,
        })
    }

    /// Parse a command: WORD+ block?
    fn parse_command(&mut self) -> Result<SimpleCommand, ParsingError> {
        let span = self.current_span();
        let mut words = Vec::new();
        loop {
            let at = self.current_span();
            match self.peek() {
                Some(TokenKind::Word(_)) => {
                    if let Some(Token {
                        kind: TokenKind::Word(parts),
                        ..
                    }) = self.consume()
                    {
                        words.push(Word { parts, span: at });
                    }
                }
                // outside of a lambda header an arrow is just text
                Some(TokenKind::Arrow) if !words.is_empty() => {
                    self.consume();
                    words.push(Word {
                        parts: vec![WordPart::Literal("->".to_string())],
                        span: at,
                    });
                }
                _ => break,
            }
        }

        if words.is_empty() {
            return Err(self.unexpected());
        }

        let block = match self.peek() {
            Some(TokenKind::OpenBrace) => Some(self.parse_block()?),
            _ => None,
        };

        Ok(SimpleCommand { words, block, span })
    }

    /// Parse a block: '{' program '}'
    fn parse_block(&mut self) -> Result<Block, ParsingError> {
        let span = self.current_span();
        self.consume();
        let (body, closed) = self.parse_program(true)?;
        Ok(Block { body, closed, span })
    }
}

/// Parses a script or an interactive line into a [`SyntaxTree`].
pub fn parse(source: &str) -> Result<SyntaxTree, ParsingError> {
    let tokens = lexer::split_into_tokens(source)?;
    let end = end_of(source);
    AstBuilder::from(tokens, end).build_ast()
}

fn end_of(source: &str) -> Span {
    let line = source.matches('\n').count() + 1;
    let column = source
        .rsplit('\n')
        .next()
        .map_or(0, |last| last.chars().count())
        + 1;
    Span::new(line, column)
}
