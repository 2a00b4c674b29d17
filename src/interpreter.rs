use crate::channel::{DEFAULT_CAPACITY, LocatedOutput, OutputChannel, ProducerClosed};
use crate::compiler::{CompileError, Compiler};
use crate::command::{BoxFuture, CommandContext, ExitStatus, LineReader, StageIo};
use crate::env::{EXIT_STATUS, Environment};
use crate::nodes::{CommandNode, Program, Statement};
use crate::record::{LOCATION, Record};
use crate::supervisor::Supervisor;
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::Instrument;

/// Runs compiled programs against an [`Environment`].
///
/// Cloning is cheap: every clone drives the same environment, which is how
/// pipeline stages and wrapped commands recurse into the interpreter.
///
/// Example
/// ```no_run
/// use pipesh::{Compiler, Environment, Interpreter, CommandRegistry, NoLineReader, StageIo};
/// use std::sync::Arc;
///
/// # async fn demo() -> anyhow::Result<()> {
/// let env = Arc::new(Environment::new(CommandRegistry::with_builtins()));
/// let sh = Interpreter::new(env.clone(), Arc::new(NoLineReader));
/// let program = Compiler::for_environment(&env).compile_source("seq 3 | count")?;
/// let status = sh.eval_program(&program, StageIo::terminal()).await;
/// assert!(status.is_success());
///
/// let status = sh.run_source("echo done", StageIo::terminal()).await?;
/// assert!(status.is_success());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Interpreter {
    env: Arc<Environment>,
    lines: Arc<dyn LineReader>,
    channel_capacity: usize,
}

impl Interpreter {
    pub fn new(env: Arc<Environment>, lines: Arc<dyn LineReader>) -> Self {
        Self {
            env,
            lines,
            channel_capacity: DEFAULT_CAPACITY,
        }
    }

    /// Number of records buffered between two pipeline stages.
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn env(&self) -> &Arc<Environment> {
        &self.env
    }

    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }

    /// Compiles `source` against the environment as it is now, then runs it.
    pub async fn run_source(&self, source: &str, io: StageIo) -> Result<ExitStatus, CompileError> {
        let program = Compiler::for_environment(&self.env).compile_source(source)?;
        Ok(self.eval_program(&program, io).await)
    }

    /// Runs the top-level statements in order.
    ///
    /// Each statement runs under its own [`Supervisor`],
    /// so Ctrl-C cancels only the statement in flight. The status of every
    /// statement is stored in `EXIT_STATUS`; the loop stops after an error or
    /// once the exit flag is set.
    pub async fn eval_program(&self, program: &Program, io: StageIo) -> ExitStatus {
        let mut status = ExitStatus::success();
        for statement in &program.statements {
            status = self.eval_top_level(statement, io.clone()).await;
            self.env.set_var(EXIT_STATUS, status.code().to_string());
            if self.env.is_exit() || status.is_error() {
                break;
            }
        }
        status
    }

    async fn eval_top_level(&self, statement: &Arc<Statement>, io: StageIo) -> ExitStatus {
        let mut supervisor = Supervisor::new();
        let interpreter = self.clone();
        let statement = statement.clone();
        let span = tracing::debug_span!("statement", location = %statement.location);
        supervisor.submit(
            async move {
                let error = io.error.clone();
                match interpreter.eval(&statement, io).await {
                    Ok(status) => Ok(status),
                    Err(e) if e.is::<ProducerClosed>() => Ok(ExitStatus::success()),
                    Err(e) => {
                        report_fault(&error, &e).await;
                        Ok(ExitStatus::error(1))
                    }
                }
            }
            .instrument(span),
        );
        supervisor.wait_for_all().await
    }

    /// Runs one statement with the given streams.
    ///
    /// Arguments are resolved against the variables as they are now, so an
    /// unbound variable fails the whole statement before it starts. A fault
    /// leaving here carries the location of the innermost statement that
    /// raised it.
    pub fn eval<'a>(
        &'a self,
        statement: &'a Arc<Statement>,
        io: StageIo,
    ) -> BoxFuture<'a, Result<ExitStatus>> {
        Box::pin(async move {
            self.dispatch(statement, io)
                .await
                .map_err(|e| locate(e, &statement.location))
        })
    }

    async fn dispatch(&self, statement: &Arc<Statement>, io: StageIo) -> Result<ExitStatus> {
        let variables = self.env.variables();
        let arguments = statement
            .arguments
            .iter()
            .map(|argument| argument.resolve(&variables))
            .collect::<Result<Vec<_>, _>>()?;

        let io = if statement.location.is_empty() {
            io
        } else {
            StageIo {
                error: Arc::new(LocatedOutput::new(io.error, statement.location.as_str())),
                ..io
            }
        };

        match &statement.command {
            CommandNode::Leaf(command) => command.run(self.context(arguments, io)).await,
            CommandNode::Pipeline(pipeline) => pipeline.run(self, io).await,
            CommandNode::Sequence(sequence) => sequence.run(self, io).await,
            CommandNode::Wrapped(wrapped) => wrapped.run(self.context(arguments, io)).await,
            CommandNode::Lambda(lambda) => lambda.run(self, io).await,
        }
    }

    fn context(&self, arguments: Vec<String>, io: StageIo) -> CommandContext {
        CommandContext {
            arguments,
            input: io.input,
            output: io.output,
            error: io.error,
            position: io.position,
            env: self.env.clone(),
            interpreter: self.clone(),
            lines: self.lines.clone(),
        }
    }
}

/// Location of the statement a fault came from, attached as context.
#[derive(Debug)]
struct Location(String);

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Attaches `location` unless the fault already has one or merely says that
/// the consumer went away.
fn locate(fault: anyhow::Error, location: &str) -> anyhow::Error {
    if location.is_empty()
        || fault.is::<ProducerClosed>()
        || fault.downcast_ref::<Location>().is_some()
    {
        return fault;
    }
    fault.context(Location(location.to_string()))
}

/// Writes a fault on `error`, tagged with the location it carries.
pub(crate) async fn report_fault(error: &Arc<dyn OutputChannel>, fault: &anyhow::Error) {
    let record = match fault.downcast_ref::<Location>() {
        Some(Location(location)) => {
            let message = fault
                .chain()
                .skip(1)
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(": ");
            Record::text(message).tag(LOCATION, location.as_str())
        }
        None => Record::text(format!("{fault:#}")),
    };
    tracing::debug!("statement failed: {:#}", fault);
    if error.send(record).await.is_err() {
        tracing::error!("{:#}", fault);
    }
}

/// Line reader for non-interactive use: input is always at its end.
pub struct NoLineReader;

#[async_trait]
impl LineReader for NoLineReader {
    async fn read_line(&self, _prompt: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Collector, EmptyInput};
    use crate::env::Variables;
    use crate::registry::CommandRegistry;

    struct Harness {
        interpreter: Interpreter,
        output: Arc<Collector>,
        error: Arc<Collector>,
    }

    impl Harness {
        fn new() -> Self {
            let env = Environment::with_state(
                CommandRegistry::with_builtins(),
                std::env::temp_dir(),
                Variables::new(),
                Vec::new(),
            );
            Self {
                interpreter: Interpreter::new(Arc::new(env), Arc::new(NoLineReader)),
                output: Arc::new(Collector::new()),
                error: Arc::new(Collector::new()),
            }
        }

        async fn run(&self, source: &str) -> ExitStatus {
            let program = Compiler::for_environment(self.interpreter.env())
                .compile_source(source)
                .unwrap();
            let io = StageIo::new(
                Arc::new(EmptyInput),
                self.output.clone(),
                self.error.clone(),
            );
            self.interpreter.eval_program(&program, io).await
        }
    }

    #[tokio::test]
    async fn test_exit_status_is_recorded() {
        let sh = Harness::new();
        assert!(sh.run("true").await.is_success());
        assert_eq!(sh.interpreter.env().get_var(EXIT_STATUS), Some("0".to_string()));

        assert_eq!(sh.run("false").await, ExitStatus::error(1));
        assert_eq!(sh.interpreter.env().get_var(EXIT_STATUS), Some("1".to_string()));
    }

    #[tokio::test]
    async fn test_error_stops_the_program() {
        let sh = Harness::new();
        let status = sh.run("echo one\nfalse\necho two").await;
        assert!(status.is_error());
        assert_eq!(sh.output.lines(), vec!["one"]);
    }

    #[tokio::test]
    async fn test_exit_flag_stops_the_program() {
        let sh = Harness::new();
        let status = sh.run("exit 0\necho unreachable").await;
        assert!(status.is_success());
        assert!(sh.output.lines().is_empty());
        assert!(sh.interpreter.env().is_exit());
    }

    #[tokio::test]
    async fn test_sequence_short_circuits() {
        let sh = Harness::new();
        let status = sh.run("echo a; false; echo b").await;
        assert_eq!(status, ExitStatus::error(1));
        assert_eq!(sh.output.lines(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_unresolved_variable_fails_with_location() {
        let sh = Harness::new();
        let status = sh.run("echo ${MISSING}").await;
        assert!(status.is_error());
        assert_eq!(
            sh.error.lines(),
            vec!["echo\tunresolved variable: MISSING"]
        );
    }

    #[tokio::test]
    async fn test_fault_in_sequence_names_its_command() {
        let sh = Harness::new();
        let status = sh.run("echo a; cat /nonexistent/x").await;
        assert!(status.is_error());
        let errors = sh.error.lines();
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert!(errors[0].starts_with("cat\t"), "{errors:?}");
    }

    #[tokio::test]
    async fn test_fault_inside_wrapper_names_the_nested_command() {
        let sh = Harness::new();
        let status = sh.run("retry 2 { cat /nonexistent/y }").await;
        assert!(status.is_error());
        let errors = sh.error.lines();
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert!(errors[0].starts_with("cat\t"), "{errors:?}");
    }

    #[tokio::test]
    async fn test_variables_are_read_at_run_time() {
        let sh = Harness::new();
        sh.run("set NAME world\necho hello ${NAME} ${OTHER!there}")
            .await;
        assert_eq!(sh.output.lines(), vec!["hello world there"]);
    }

    #[tokio::test]
    async fn test_lambda_binds_each_record() {
        let sh = Harness::new();
        let status = sh.run("seq 3 | { value -> echo item ${value} }").await;
        assert!(status.is_success());
        assert_eq!(sh.output.lines(), vec!["item 1", "item 2", "item 3"]);
        assert_eq!(sh.interpreter.env().get_var("value"), None);
    }

    #[tokio::test]
    async fn test_lambda_missing_key_fails() {
        let sh = Harness::new();
        let status = sh.run("seq 3 | { text -> echo ${text} }").await;
        assert!(status.is_error());
        let errors = sh.error.lines();
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert!(errors[0].contains("text"), "{errors:?}");
    }
}
