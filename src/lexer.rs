//! A module implementing lexical analysis (tokenization) for the pipesh command language.
//!
//! The lexer is a small finite state machine over characters. It strips `#` comments,
//! keeps track of line and column for every token and splits words into
//! [`WordPart`]s so that quoting and `${...}` expansions survive into the syntax tree.

use crate::ast::{Expansion, Span, StringPart, WordPart};
use thiserror::Error;

/// Kinds of tokens resulting from lexical analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// A word token, which may be composed of multiple parts.
    Word(Vec<WordPart>),
    /// `|`
    Pipe,
    /// `;`
    Semicolon,
    /// End of a line.
    Newline,
    /// `{`
    OpenBrace,
    /// `}`
    CloseBrace,
    /// A bare `->` word, used by lambdas.
    Arrow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// Errors that can occur during the lexical analysis process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexingError {
    #[error("line {}:{}: unfinished quoted string", .0.line, .0.column)]
    UnfinishedQuote(Span),
    #[error("line {}:{}: unfinished expansion, expected '}}'", .0.line, .0.column)]
    UnfinishedExpansion(Span),
    #[error("line {}:{}: invalid variable name '{}'", .0.line, .0.column, .1)]
    InvalidVariableName(Span, String),
    #[error("line {}:{}: nothing to escape at end of input", .0.line, .0.column)]
    DanglingEscape(Span),
}

impl LexingError {
    pub fn span(&self) -> Span {
        match self {
            LexingError::UnfinishedQuote(span)
            | LexingError::UnfinishedExpansion(span)
            | LexingError::InvalidVariableName(span, _)
            | LexingError::DanglingEscape(span) => *span,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Start,
    ReadingWord,
    ReadingSingleQuote,
    ReadingDoubleQuote,
    Comment,
}

struct LexingFSM {
    input: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    state: LexingState,
    current_word: Vec<WordPart>,
    quoted: Vec<StringPart>,
    buffer: String,
    word_start: Span,
    quote_start: Span,
}

impl LexingFSM {
    fn new(source: &str) -> Self {
        LexingFSM {
            input: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            state: LexingState::Start,
            current_word: Vec::new(),
            quoted: Vec::new(),
            buffer: String::new(),
            word_start: Span::default(),
            quote_start: Span::default(),
        }
    }

    fn make_tokens(&mut self) -> Result<Vec<Token>, LexingError> {
        let mut out = Vec::new();

        while let Some((ch, at)) = self.read_char() {
            match self.state {
                LexingState::Start => self.handle_start(ch, at, &mut out)?,
                LexingState::ReadingWord => self.handle_word(ch, at, &mut out)?,
                LexingState::ReadingSingleQuote => self.handle_single_quote(ch),
                LexingState::ReadingDoubleQuote => self.handle_double_quote(ch, at)?,
                LexingState::Comment => {
                    if ch == '\n' {
                        out.push(Token { kind: TokenKind::Newline, span: at });
                        self.state = LexingState::Start;
                    }
                }
            }
        }

        match self.state {
            LexingState::ReadingSingleQuote | LexingState::ReadingDoubleQuote => {
                return Err(LexingError::UnfinishedQuote(self.quote_start));
            }
            LexingState::ReadingWord => self.finish_word(&mut out),
            LexingState::Start | LexingState::Comment => {}
        }

        Ok(out)
    }

    fn read_char(&mut self) -> Option<(char, Span)> {
        let ch = self.input.get(self.pos).copied()?;
        let at = Span::new(self.line, self.column);
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some((ch, at))
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn handle_start(&mut self, ch: char, at: Span, out: &mut Vec<Token>) -> Result<(), LexingError> {
        let kind = match ch {
            ' ' | '\t' | '\r' => return Ok(()),
            '#' => {
                self.state = LexingState::Comment;
                return Ok(());
            }
            '\n' => TokenKind::Newline,
            '|' => TokenKind::Pipe,
            ';' => TokenKind::Semicolon,
            '{' => TokenKind::OpenBrace,
            '}' => TokenKind::CloseBrace,
            _ => {
                self.word_start = at;
                self.state = LexingState::ReadingWord;
                return self.handle_word(ch, at, out);
            }
        };
        out.push(Token { kind, span: at });
        Ok(())
    }

    fn handle_word(&mut self, ch: char, at: Span, out: &mut Vec<Token>) -> Result<(), LexingError> {
        match ch {
            ' ' | '\t' | '\r' | '\n' | '|' | ';' | '{' | '}' => {
                self.finish_word(out);
                self.handle_start(ch, at, out)?;
            }
            '\'' => {
                self.flush_literal();
                self.quote_start = at;
                self.state = LexingState::ReadingSingleQuote;
            }
            '"' => {
                self.flush_literal();
                self.quote_start = at;
                self.state = LexingState::ReadingDoubleQuote;
            }
            '\\' => match self.read_char() {
                Some((escaped, _)) => self.buffer.push(escaped),
                None => return Err(LexingError::DanglingEscape(at)),
            },
            '$' => match self.read_expansion(at)? {
                Some(expansion) => {
                    self.flush_literal();
                    self.current_word.push(WordPart::Expansion(expansion));
                }
                None => self.buffer.push('$'),
            },
            c => self.buffer.push(c),
        }
        Ok(())
    }

    fn handle_single_quote(&mut self, ch: char) {
        match ch {
            '\'' => {
                self.current_word
                    .push(WordPart::SingleQuoted(std::mem::take(&mut self.buffer)));
                self.state = LexingState::ReadingWord;
            }
            c => self.buffer.push(c),
        }
    }

    fn handle_double_quote(&mut self, ch: char, at: Span) -> Result<(), LexingError> {
        match ch {
            '"' => {
                self.flush_quoted_literal();
                self.current_word
                    .push(WordPart::DoubleQuoted(std::mem::take(&mut self.quoted)));
                self.state = LexingState::ReadingWord;
            }
            '\\' => match self.peek_char() {
                Some(escaped @ ('"' | '\\' | '$')) => {
                    self.read_char();
                    self.buffer.push(escaped);
                }
                _ => self.buffer.push('\\'),
            },
            '$' => match self.read_expansion(at)? {
                Some(expansion) => {
                    self.flush_quoted_literal();
                    self.quoted.push(StringPart::Expansion(expansion));
                }
                None => self.buffer.push('$'),
            },
            c => self.buffer.push(c),
        }
        Ok(())
    }

    /// Reads what follows a `$`. Returns `None` when the `$` does not start an
    /// expansion and should be kept as literal text.
    fn read_expansion(&mut self, at: Span) -> Result<Option<Expansion>, LexingError> {
        match self.peek_char() {
            Some('{') => {
                self.read_char();
                let mut content = String::new();
                loop {
                    match self.read_char() {
                        Some(('}', _)) => break,
                        Some((c, _)) => content.push(c),
                        None => return Err(LexingError::UnfinishedExpansion(at)),
                    }
                }
                let (name, fallback) = match content.split_once('!') {
                    Some((name, fallback)) => (name.to_string(), Some(fallback.to_string())),
                    None => (content, None),
                };
                if !is_variable_name(&name) {
                    return Err(LexingError::InvalidVariableName(at, name));
                }
                Ok(Some(Expansion { name, fallback }))
            }
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(c) = self.peek_char() {
                    if !(c.is_ascii_alphanumeric() || c == '_') {
                        break;
                    }
                    self.read_char();
                    name.push(c);
                }
                Ok(Some(Expansion { name, fallback: None }))
            }
            _ => Ok(None),
        }
    }

    fn flush_literal(&mut self) {
        if !self.buffer.is_empty() {
            self.current_word
                .push(WordPart::Literal(std::mem::take(&mut self.buffer)));
        }
    }

    fn flush_quoted_literal(&mut self) {
        if !self.buffer.is_empty() {
            self.quoted
                .push(StringPart::Literal(std::mem::take(&mut self.buffer)));
        }
    }

    fn finish_word(&mut self, out: &mut Vec<Token>) {
        self.flush_literal();
        self.state = LexingState::Start;
        if self.current_word.is_empty() {
            return;
        }
        let parts = std::mem::take(&mut self.current_word);
        let kind = if parts == [WordPart::Literal("->".to_string())] {
            TokenKind::Arrow
        } else {
            TokenKind::Word(parts)
        };
        out.push(Token { kind, span: self.word_start });
    }
}

/// Whether `name` can be used as a variable (or lambda binding) name.
pub fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Tokenizes a whole script or a single interactive line.
pub fn split_into_tokens(source: &str) -> Result<Vec<Token>, LexingError> {
    LexingFSM::new(source).make_tokens()
}
