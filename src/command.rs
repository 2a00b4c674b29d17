use crate::channel::{InputChannel, OutputChannel, StdinInput, WriterOutput};
use crate::env::Environment;
use crate::interpreter::Interpreter;
use crate::nodes::Statement;
use crate::record::Record;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of running a command.
///
/// Code 0 is success and any other code is an error, mirroring the convention
/// used by POSIX shells and many command-line tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExitStatus(i32);

impl ExitStatus {
    /// Status of a statement cancelled by an interrupt (128 + SIGINT).
    pub const INTERRUPTED: ExitStatus = ExitStatus(130);

    pub const fn success() -> Self {
        ExitStatus(0)
    }

    /// An error status. A code of 0 is turned into 1 so that it stays an error.
    pub const fn error(code: i32) -> Self {
        if code == 0 { ExitStatus(1) } else { ExitStatus(code) }
    }

    pub const fn from_code(code: i32) -> Self {
        ExitStatus(code)
    }

    pub const fn code(self) -> i32 {
        self.0
    }

    /// Code for the exit of the shell process. Errors outside 1..=255 become
    /// 255 so that they never read as success.
    pub fn process_code(self) -> u8 {
        u8::try_from(self.0).unwrap_or(u8::MAX)
    }

    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    pub const fn is_error(self) -> bool {
        self.0 != 0
    }
}

impl Default for ExitStatus {
    fn default() -> Self {
        Self::success()
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of a stage within a pipeline.
///
/// Process-spawning commands use it to decide which standard streams to
/// inherit from the shell and which to connect to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Position {
    /// Not part of a pipeline.
    #[default]
    Sole,
    /// Reads external input, writes to the pipeline.
    First,
    /// Reads from and writes to the pipeline.
    Middle,
    /// Reads from the pipeline, writes external output.
    Last,
}

impl Position {
    pub fn from_ends(external_input: bool, external_output: bool) -> Self {
        match (external_input, external_output) {
            (true, true) => Position::Sole,
            (true, false) => Position::First,
            (false, false) => Position::Middle,
            (false, true) => Position::Last,
        }
    }

    pub fn inherits_input(self) -> bool {
        matches!(self, Position::Sole | Position::First)
    }

    pub fn inherits_output(self) -> bool {
        matches!(self, Position::Sole | Position::Last)
    }
}

/// The three record streams of a running statement.
#[derive(Clone)]
pub struct StageIo {
    pub input: Arc<dyn InputChannel>,
    pub output: Arc<dyn OutputChannel>,
    pub error: Arc<dyn OutputChannel>,
    pub position: Position,
}

impl StageIo {
    pub fn new(
        input: Arc<dyn InputChannel>,
        output: Arc<dyn OutputChannel>,
        error: Arc<dyn OutputChannel>,
    ) -> Self {
        Self {
            input,
            output,
            error,
            position: Position::Sole,
        }
    }

    /// Standard input, output and error of the shell process.
    pub fn terminal() -> Self {
        Self::new(
            Arc::new(StdinInput::new()),
            Arc::new(WriterOutput::stdout()),
            Arc::new(WriterOutput::stderr()),
        )
    }
}

/// Reads one line of user input, e.g. for the `read` builtin.
#[async_trait]
pub trait LineReader: Send + Sync {
    /// `None` at end of input.
    async fn read_line(&self, prompt: &str) -> Result<Option<String>>;
}

/// Everything a command gets to run with.
///
/// Built by the [`Interpreter`] for every invocation: resolved arguments, the
/// statement's streams (the error stream is already tagged with the
/// statement's location), and the collaborators a command may use.
pub struct CommandContext {
    pub arguments: Vec<String>,
    pub input: Arc<dyn InputChannel>,
    pub output: Arc<dyn OutputChannel>,
    pub error: Arc<dyn OutputChannel>,
    pub position: Position,
    pub env: Arc<Environment>,
    pub interpreter: Interpreter,
    pub lines: Arc<dyn LineReader>,
}

impl CommandContext {
    pub fn io(&self) -> StageIo {
        StageIo {
            input: self.input.clone(),
            output: self.output.clone(),
            error: self.error.clone(),
            position: self.position,
        }
    }

    /// Writes a one-line message on the error stream.
    pub async fn report(&self, message: impl Into<String>) -> Result<()> {
        self.error.send(Record::text(message)).await?;
        Ok(())
    }
}

/// Object-safe trait for any command that can be executed by the shell.
///
/// This is implemented by built-ins via an adapter and by external commands.
#[async_trait]
pub trait Command: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: CommandContext) -> Result<ExitStatus>;
}

/// A command that brackets a nested statement, e.g. `retry 3 { ... }`.
///
/// `before` acquires a resource (returning `None` fails fast), `retry` decides
/// after each run of the nested statement whether to run it again, and `after`
/// releases the resource. `after` is called exactly once whenever `before`
/// succeeded, including when the nested statement fails or is cancelled, which
/// is why it is synchronous.
///
/// `before` may also fail with [`HelpShown`] once it has answered `--help`:
/// the wrapper then succeeds without running its block.
#[async_trait]
pub trait CommandWrapper: Send + Sync + 'static {
    type Resource: Send;

    async fn before(&self, ctx: &CommandContext) -> Result<Option<Self::Resource>>;

    async fn retry(
        &self,
        resource: &mut Self::Resource,
        last: ExitStatus,
        ctx: &CommandContext,
    ) -> Result<bool>;

    fn after(&self, resource: Self::Resource);
}

#[derive(Debug, Error)]
#[error("help shown")]
pub struct HelpShown;

/// Type-erased [`CommandWrapper`], as stored in the command graph.
pub trait WrapperCommand: Send + Sync {
    fn wrap<'a>(
        &'a self,
        nested: &'a Arc<Statement>,
        ctx: CommandContext,
    ) -> BoxFuture<'a, Result<ExitStatus>>;
}

/// What a command name resolves to at compile time.
#[derive(Clone)]
pub enum ResolvedCommand {
    Plain(Arc<dyn Command>),
    Wrapper(Arc<dyn WrapperCommand>),
}

impl ResolvedCommand {
    pub fn is_wrapper(&self) -> bool {
        matches!(self, ResolvedCommand::Wrapper(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_is_never_zero() {
        assert_eq!(ExitStatus::error(0).code(), 1);
        assert!(ExitStatus::error(2).is_error());
        assert!(ExitStatus::from_code(0).is_success());
    }

    #[test]
    fn test_process_code_keeps_errors_nonzero() {
        assert_eq!(ExitStatus::success().process_code(), 0);
        assert_eq!(ExitStatus::INTERRUPTED.process_code(), 130);
        assert_eq!(ExitStatus::error(-1).process_code(), 255);
        assert_eq!(ExitStatus::error(256).process_code(), 255);
    }

    #[test]
    fn test_position_from_ends() {
        assert_eq!(Position::from_ends(true, true), Position::Sole);
        assert_eq!(Position::from_ends(true, false), Position::First);
        assert_eq!(Position::from_ends(false, false), Position::Middle);
        assert_eq!(Position::from_ends(false, true), Position::Last);
        assert!(Position::Last.inherits_output());
        assert!(!Position::Middle.inherits_input());
    }
}
