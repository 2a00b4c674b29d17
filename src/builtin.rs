use crate::command::{
    Command, CommandContext, CommandWrapper, ExitStatus, HelpShown, ResolvedCommand,
};
use crate::record::{Record, Value};
use crate::registry::{CommandFactory, CommandRegistry};
use anyhow::{Context, Result, anyhow, bail};
use argh::{EarlyExit, FromArgs};
use async_trait::async_trait;
use regex::RegexBuilder;
use std::fs;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) when they run, and
/// executed in-process as tasks of the shell.
#[async_trait]
pub trait BuiltinCommand: FromArgs + Send + 'static {
    /// Canonical name of the command, e.g. "echo" or "cd".
    fn name() -> &'static str;

    /// Executes the command with the streams and state of `ctx`.
    async fn execute(self, ctx: &CommandContext) -> Result<ExitStatus>;
}

/// A wrapper builtin, e.g. `retry 3 { ... }`.
pub trait BuiltinWrapper: CommandWrapper + Default {
    fn name() -> &'static str;
}

/// Factory allows creating fresh instances of a builtin.
pub struct Factory<T> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T: BuiltinCommand> CommandFactory for Factory<T> {
    fn create(&self) -> ResolvedCommand {
        ResolvedCommand::Plain(Arc::new(Builtin::<T> {
            _phantom: PhantomData,
        }))
    }
}

pub struct WrapperFactory<T> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Default for WrapperFactory<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T: BuiltinWrapper> CommandFactory for WrapperFactory<T> {
    fn create(&self) -> ResolvedCommand {
        ResolvedCommand::Wrapper(Arc::new(T::default()))
    }
}

/// Adapts a [`BuiltinCommand`] to [`Command`]: arguments are parsed on every run.
struct Builtin<T> {
    _phantom: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T: BuiltinCommand> Command for Builtin<T> {
    fn name(&self) -> &str {
        T::name()
    }

    async fn run(&self, ctx: CommandContext) -> Result<ExitStatus> {
        match parse_args::<T>(T::name(), &ctx.arguments) {
            Ok(command) => command.execute(&ctx).await,
            Err(early_exit) => invalid_args(early_exit, &ctx).await,
        }
    }
}

fn parse_args<T: FromArgs>(name: &str, arguments: &[String]) -> Result<T, EarlyExit> {
    let args: Vec<&str> = arguments.iter().map(String::as_str).collect();
    T::from_args(&[name], &args)
}

/// `--help` goes to the output and succeeds; usage errors go to the error stream.
async fn invalid_args(early_exit: EarlyExit, ctx: &CommandContext) -> Result<ExitStatus> {
    let EarlyExit { output, status } = early_exit;
    let (channel, exit) = match status {
        Ok(()) => (&ctx.output, ExitStatus::success()),
        Err(()) => (&ctx.error, ExitStatus::error(1)),
    };
    for line in output.lines() {
        channel.send(Record::text(line)).await?;
    }
    Ok(exit)
}

fn register<T: BuiltinCommand>(registry: &mut CommandRegistry) {
    if let Err(e) = registry.register_command(T::name(), Factory::<T>::default()) {
        tracing::warn!("{}", e);
    }
}

fn register_wrapper<T: BuiltinWrapper>(registry: &mut CommandRegistry) {
    if let Err(e) = registry.register_command(T::name(), WrapperFactory::<T>::default()) {
        tracing::warn!("{}", e);
    }
}

/// Adds the whole builtin catalog to `registry`.
pub fn register_all(registry: &mut CommandRegistry) {
    register::<Echo>(registry);
    register::<Pwd>(registry);
    register::<Cd>(registry);
    register::<Exit>(registry);
    register::<Set>(registry);
    register::<Unset>(registry);
    register::<Env>(registry);
    register::<SearchPath>(registry);
    register::<Cat>(registry);
    register::<Grep>(registry);
    register::<Take>(registry);
    register::<DropRecords>(registry);
    register::<Count>(registry);
    register::<Seq>(registry);
    register::<Sleep>(registry);
    register::<ReadLine>(registry);
    register::<True>(registry);
    register::<False>(registry);
    register_wrapper::<Time>(registry);
    register_wrapper::<Retry>(registry);
    register_wrapper::<Lock>(registry);
}

#[derive(FromArgs)]
/// Print the current working directory.
pub struct Pwd {}

#[async_trait]
impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    async fn execute(self, ctx: &CommandContext) -> Result<ExitStatus> {
        ctx.output.send(Record::of("path", ctx.env.cwd())).await?;
        Ok(ExitStatus::success())
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME variable.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory. Defaults to $HOME when omitted.
    pub target: Option<String>,
}

#[async_trait]
impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    async fn execute(self, ctx: &CommandContext) -> Result<ExitStatus> {
        let target = match &self.target {
            Some(t) if !t.is_empty() => PathBuf::from(t),
            _ => match ctx.env.get_var("HOME") {
                Some(home) => PathBuf::from(home),
                None => bail!("no target and HOME not set"),
            },
        };

        let new_dir = ctx.env.cwd().join(target);
        let canonical = fs::canonicalize(&new_dir)
            .with_context(|| format!("can't canonicalize {}", new_dir.display()))?;
        if !canonical.is_dir() {
            bail!("{} is not a directory", canonical.display());
        }

        ctx.env.set_cwd(canonical);
        Ok(ExitStatus::success())
    }
}

#[derive(FromArgs)]
/// Ask the shell to exit once the current statement is done.
pub struct Exit {
    #[argh(positional)]
    /// exit status, 0 when omitted.
    pub code: Option<i32>,
}

#[async_trait]
impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    async fn execute(self, ctx: &CommandContext) -> Result<ExitStatus> {
        ctx.env.set_exit(true);
        Ok(ExitStatus::from_code(self.code.unwrap_or(0)))
    }
}

#[derive(FromArgs)]
/// Write the arguments to the output, separated by spaces.
pub struct Echo {
    #[argh(positional, greedy)]
    /// values to print as-is, separated by spaces.
    pub args: Vec<String>,
}

#[async_trait]
impl BuiltinCommand for Echo {
    fn name() -> &'static str {
        "echo"
    }

    async fn execute(self, ctx: &CommandContext) -> Result<ExitStatus> {
        ctx.output.send(Record::text(self.args.join(" "))).await?;
        Ok(ExitStatus::success())
    }
}

#[derive(FromArgs)]
/// Set a shell variable.
pub struct Set {
    #[argh(positional)]
    /// variable name.
    pub name: String,

    #[argh(positional)]
    /// new value.
    pub value: String,
}

#[async_trait]
impl BuiltinCommand for Set {
    fn name() -> &'static str {
        "set"
    }

    async fn execute(self, ctx: &CommandContext) -> Result<ExitStatus> {
        if !crate::lexer::is_variable_name(&self.name) {
            bail!("invalid variable name '{}'", self.name);
        }
        ctx.env.set_var(self.name, self.value);
        Ok(ExitStatus::success())
    }
}

#[derive(FromArgs)]
/// Remove shell variables.
pub struct Unset {
    #[argh(positional, greedy)]
    /// variable names.
    pub names: Vec<String>,
}

#[async_trait]
impl BuiltinCommand for Unset {
    fn name() -> &'static str {
        "unset"
    }

    async fn execute(self, ctx: &CommandContext) -> Result<ExitStatus> {
        for name in &self.names {
            ctx.env.remove_var(name);
        }
        Ok(ExitStatus::success())
    }
}

#[derive(FromArgs)]
/// List shell variables as name/value records.
pub struct Env {}

#[async_trait]
impl BuiltinCommand for Env {
    fn name() -> &'static str {
        "env"
    }

    async fn execute(self, ctx: &CommandContext) -> Result<ExitStatus> {
        for (name, value) in ctx.env.variables().iter() {
            let record = Record::of("name", name.as_str()).with("value", value.as_str());
            ctx.output.send(record).await?;
        }
        Ok(ExitStatus::success())
    }
}

#[derive(FromArgs)]
/// Print the command search path, or replace it with the given directories.
pub struct SearchPath {
    #[argh(positional, greedy)]
    /// new search path, relative directories are taken from the current directory.
    pub dirs: Vec<String>,
}

#[async_trait]
impl BuiltinCommand for SearchPath {
    fn name() -> &'static str {
        "path"
    }

    async fn execute(self, ctx: &CommandContext) -> Result<ExitStatus> {
        if self.dirs.is_empty() {
            for dir in ctx.env.path().iter() {
                ctx.output.send(Record::of("path", dir.clone())).await?;
            }
        } else {
            let cwd = ctx.env.cwd();
            ctx.env
                .set_path(self.dirs.iter().map(|dir| cwd.join(dir)).collect());
        }
        Ok(ExitStatus::success())
    }
}

#[derive(FromArgs)]
/// Print files line by line, or forward the input when no file is given.
pub struct Cat {
    #[argh(positional, greedy)]
    /// files to print.
    pub files: Vec<String>,
}

#[async_trait]
impl BuiltinCommand for Cat {
    fn name() -> &'static str {
        "cat"
    }

    async fn execute(self, ctx: &CommandContext) -> Result<ExitStatus> {
        if self.files.is_empty() {
            while let Some(record) = ctx.input.receive().await {
                ctx.output.send(record).await?;
            }
            return Ok(ExitStatus::success());
        }
        for file_name in &self.files {
            let mut lines = open_lines(ctx, file_name).await?;
            while let Some(line) = lines.next_line().await? {
                ctx.output.send(Record::text(line)).await?;
            }
        }
        Ok(ExitStatus::success())
    }
}

async fn open_lines(
    ctx: &CommandContext,
    file_name: &str,
) -> Result<tokio::io::Lines<BufReader<tokio::fs::File>>> {
    let path = ctx.env.cwd().join(file_name);
    let file = tokio::fs::File::open(&path)
        .await
        .with_context(|| format!("{file_name}: can't open"))?;
    Ok(BufReader::new(file).lines())
}

#[derive(FromArgs)]
/// Print records or lines matching a pattern.
pub struct Grep {
    #[argh(positional)]
    /// the pattern to search for (a regular expression)
    pub pattern: String,

    #[argh(positional, greedy)]
    /// files to search. If none provided, filters the input records.
    pub files: Vec<String>,

    #[argh(switch, short = 'w')]
    /// match only whole words (using non-word characters as boundaries)
    pub word_regexp: bool,

    #[argh(switch, short = 'i')]
    /// ignore case distinctions
    pub ignore_case: bool,

    #[argh(switch, short = 'v')]
    /// select records that do not match
    pub invert_match: bool,
}

impl Grep {
    fn regex(&self) -> Result<regex::Regex> {
        let pattern = if self.word_regexp {
            format!(r"\b({})\b", self.pattern)
        } else {
            self.pattern.clone()
        };
        RegexBuilder::new(&pattern)
            .case_insensitive(self.ignore_case)
            .build()
            .with_context(|| format!("invalid regex pattern: {}", pattern))
    }

    fn selects(&self, re: &regex::Regex, text: &str) -> bool {
        re.is_match(text) != self.invert_match
    }
}

#[async_trait]
impl BuiltinCommand for Grep {
    fn name() -> &'static str {
        "grep"
    }

    async fn execute(self, ctx: &CommandContext) -> Result<ExitStatus> {
        let re = self.regex()?;

        if self.files.is_empty() {
            while let Some(record) = ctx.input.receive().await {
                if self.selects(&re, &record.render("\t")) {
                    ctx.output.send(record).await?;
                }
            }
            return Ok(ExitStatus::success());
        }

        let mut status = ExitStatus::success();
        for file_name in &self.files {
            let mut lines = match open_lines(ctx, file_name).await {
                Ok(lines) => lines,
                Err(e) => {
                    ctx.report(format!("{e:#}")).await?;
                    status = ExitStatus::error(1);
                    continue;
                }
            };
            while let Some(line) = lines.next_line().await? {
                if self.selects(&re, &line) {
                    let record = Record::of("file", file_name.as_str()).with("text", line);
                    ctx.output.send(record).await?;
                }
            }
        }
        Ok(status)
    }
}

#[derive(FromArgs)]
/// Forward the first N input records, then stop reading.
pub struct Take {
    #[argh(positional)]
    /// number of records to forward.
    pub count: usize,
}

#[async_trait]
impl BuiltinCommand for Take {
    fn name() -> &'static str {
        "take"
    }

    async fn execute(self, ctx: &CommandContext) -> Result<ExitStatus> {
        for _ in 0..self.count {
            match ctx.input.receive().await {
                Some(record) => ctx.output.send(record).await?,
                None => break,
            }
        }
        Ok(ExitStatus::success())
    }
}

#[derive(FromArgs)]
/// Skip the first N input records and forward the rest.
pub struct DropRecords {
    #[argh(positional)]
    /// number of records to skip.
    pub count: usize,
}

#[async_trait]
impl BuiltinCommand for DropRecords {
    fn name() -> &'static str {
        "drop"
    }

    async fn execute(self, ctx: &CommandContext) -> Result<ExitStatus> {
        let mut skipped = 0;
        while let Some(record) = ctx.input.receive().await {
            if skipped < self.count {
                skipped += 1;
                continue;
            }
            ctx.output.send(record).await?;
        }
        Ok(ExitStatus::success())
    }
}

#[derive(FromArgs)]
/// Count the input records.
pub struct Count {}

#[async_trait]
impl BuiltinCommand for Count {
    fn name() -> &'static str {
        "count"
    }

    async fn execute(self, ctx: &CommandContext) -> Result<ExitStatus> {
        let mut count: i64 = 0;
        while ctx.input.receive().await.is_some() {
            count += 1;
        }
        ctx.output.send(Record::of("count", count)).await?;
        Ok(ExitStatus::success())
    }
}

#[derive(FromArgs)]
/// Emit increasing integers under the key "value". Without an end, never stops
/// on its own.
pub struct Seq {
    #[argh(option, default = "1")]
    /// first number, 1 by default.
    pub from: i64,

    #[argh(positional)]
    /// last number, inclusive.
    pub end: Option<i64>,
}

/// How many records `seq` emits between two explicit yields.
const SEQ_YIELD_EVERY: u64 = 1024;

#[async_trait]
impl BuiltinCommand for Seq {
    fn name() -> &'static str {
        "seq"
    }

    async fn execute(self, ctx: &CommandContext) -> Result<ExitStatus> {
        let mut next = self.from;
        let mut emitted: u64 = 0;
        while self.end.is_none_or(|end| next <= end) {
            ctx.output.send(Record::of("value", next)).await?;
            emitted += 1;
            // outputs that never block would otherwise starve cancellation
            if emitted % SEQ_YIELD_EVERY == 0 {
                tokio::task::yield_now().await;
            }
            next = match next.checked_add(1) {
                Some(n) => n,
                None => break,
            };
        }
        Ok(ExitStatus::success())
    }
}

#[derive(FromArgs)]
/// Wait for the given number of seconds.
pub struct Sleep {
    #[argh(positional)]
    /// seconds to wait, fractions allowed.
    pub seconds: f64,
}

#[async_trait]
impl BuiltinCommand for Sleep {
    fn name() -> &'static str {
        "sleep"
    }

    async fn execute(self, _ctx: &CommandContext) -> Result<ExitStatus> {
        let duration = Duration::try_from_secs_f64(self.seconds)
            .with_context(|| format!("invalid duration: {}", self.seconds))?;
        tokio::time::sleep(duration).await;
        Ok(ExitStatus::success())
    }
}

#[derive(FromArgs)]
/// Read one line of user input into a variable.
pub struct ReadLine {
    #[argh(option, short = 'p', default = "String::new()")]
    /// prompt shown before reading.
    pub prompt: String,

    #[argh(positional)]
    /// variable receiving the line.
    pub name: String,
}

#[async_trait]
impl BuiltinCommand for ReadLine {
    fn name() -> &'static str {
        "read"
    }

    async fn execute(self, ctx: &CommandContext) -> Result<ExitStatus> {
        match ctx.lines.read_line(&self.prompt).await? {
            Some(line) => {
                ctx.env.set_var(self.name, line);
                Ok(ExitStatus::success())
            }
            None => Ok(ExitStatus::error(1)),
        }
    }
}

#[derive(FromArgs)]
/// Do nothing, successfully.
pub struct True {}

#[async_trait]
impl BuiltinCommand for True {
    fn name() -> &'static str {
        "true"
    }

    async fn execute(self, _ctx: &CommandContext) -> Result<ExitStatus> {
        Ok(ExitStatus::success())
    }
}

#[derive(FromArgs)]
/// Do nothing, unsuccessfully.
pub struct False {}

#[async_trait]
impl BuiltinCommand for False {
    fn name() -> &'static str {
        "false"
    }

    async fn execute(self, _ctx: &CommandContext) -> Result<ExitStatus> {
        Ok(ExitStatus::error(1))
    }
}

/// Parses wrapper arguments. Fails with [`HelpShown`] after printing `--help`.
async fn wrapper_args<A: FromArgs>(name: &str, ctx: &CommandContext) -> Result<A> {
    match parse_args::<A>(name, &ctx.arguments) {
        Ok(args) => Ok(args),
        Err(EarlyExit {
            output,
            status: Ok(()),
        }) => {
            for line in output.lines() {
                ctx.output.send(Record::text(line)).await?;
            }
            Err(HelpShown.into())
        }
        Err(EarlyExit {
            output,
            status: Err(()),
        }) => Err(anyhow!("{}", output.trim_end())),
    }
}

#[derive(FromArgs)]
/// Run a block and report how long it took, in milliseconds.
struct TimeArgs {}

#[derive(Default)]
pub struct Time;

#[async_trait]
impl CommandWrapper for Time {
    type Resource = Instant;

    async fn before(&self, ctx: &CommandContext) -> Result<Option<Instant>> {
        wrapper_args::<TimeArgs>(Self::name(), ctx).await?;
        Ok(Some(Instant::now()))
    }

    async fn retry(
        &self,
        started: &mut Instant,
        _last: ExitStatus,
        ctx: &CommandContext,
    ) -> Result<bool> {
        let elapsed = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
        ctx.output
            .send(Record::of("elapsed_ms", Value::Integer(elapsed)))
            .await?;
        Ok(false)
    }

    fn after(&self, _started: Instant) {}
}

impl BuiltinWrapper for Time {
    fn name() -> &'static str {
        "time"
    }
}

#[derive(FromArgs)]
/// Run a block until it succeeds, at most N times.
struct RetryArgs {
    #[argh(positional)]
    /// maximum number of attempts.
    attempts: usize,
}

pub struct Attempts {
    made: usize,
    allowed: usize,
}

#[derive(Default)]
pub struct Retry;

#[async_trait]
impl CommandWrapper for Retry {
    type Resource = Attempts;

    async fn before(&self, ctx: &CommandContext) -> Result<Option<Attempts>> {
        let args = wrapper_args::<RetryArgs>(Self::name(), ctx).await?;
        if args.attempts == 0 {
            bail!("number of attempts must be positive");
        }
        Ok(Some(Attempts {
            made: 0,
            allowed: args.attempts,
        }))
    }

    async fn retry(
        &self,
        attempts: &mut Attempts,
        last: ExitStatus,
        _ctx: &CommandContext,
    ) -> Result<bool> {
        attempts.made += 1;
        let again = last.is_error() && attempts.made < attempts.allowed;
        if again {
            tracing::debug!(made = attempts.made, allowed = attempts.allowed, "retrying");
        }
        Ok(again)
    }

    fn after(&self, _attempts: Attempts) {}
}

impl BuiltinWrapper for Retry {
    fn name() -> &'static str {
        "retry"
    }
}

#[derive(FromArgs)]
/// Run a block while holding a lock file; fail at once if it is already held.
struct LockArgs {
    #[argh(positional)]
    /// lock file, created on entry and removed on exit.
    file: String,
}

#[derive(Default)]
pub struct Lock;

#[async_trait]
impl CommandWrapper for Lock {
    type Resource = PathBuf;

    async fn before(&self, ctx: &CommandContext) -> Result<Option<PathBuf>> {
        let args = wrapper_args::<LockArgs>(Self::name(), ctx).await?;
        let path = ctx.env.cwd().join(&args.file);
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(_) => Ok(Some(path)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                ctx.report(format!("{} is locked", path.display())).await?;
                Ok(None)
            }
            Err(e) => Err(e).with_context(|| format!("can't create {}", path.display())),
        }
    }

    async fn retry(
        &self,
        _path: &mut PathBuf,
        _last: ExitStatus,
        _ctx: &CommandContext,
    ) -> Result<bool> {
        Ok(false)
    }

    fn after(&self, path: PathBuf) {
        if let Err(e) = fs::remove_file(&path) {
            tracing::warn!("can't remove lock {}: {}", path.display(), e);
        }
    }
}

impl BuiltinWrapper for Lock {
    fn name() -> &'static str {
        "lock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Collector, EmptyInput, InputChannel, PipelineChannel};
    use crate::command::{LineReader, Position};
    use crate::env::{Environment, Variables};
    use crate::interpreter::{Interpreter, NoLineReader};
    use std::io::Write;
    use std::sync::Mutex;

    struct TestContext {
        env: Arc<Environment>,
        output: Arc<Collector>,
        error: Arc<Collector>,
    }

    impl TestContext {
        fn new() -> Self {
            let env = Environment::with_state(
                CommandRegistry::with_builtins(),
                std::env::current_dir().unwrap(),
                Variables::new(),
                Vec::new(),
            );
            Self {
                env: Arc::new(env),
                output: Arc::new(Collector::new()),
                error: Arc::new(Collector::new()),
            }
        }

        fn context(&self, input: Arc<dyn InputChannel>) -> CommandContext {
            self.context_with(input, Arc::new(NoLineReader))
        }

        fn context_with(&self, input: Arc<dyn InputChannel>, lines: Arc<dyn LineReader>) -> CommandContext {
            CommandContext {
                arguments: Vec::new(),
                input,
                output: self.output.clone(),
                error: self.error.clone(),
                position: Position::Sole,
                env: self.env.clone(),
                interpreter: Interpreter::new(self.env.clone(), lines.clone()),
                lines,
            }
        }

        fn empty(&self) -> CommandContext {
            self.context(Arc::new(EmptyInput))
        }
    }

    async fn input_of(lines: &[&str]) -> Arc<dyn InputChannel> {
        let channel = Arc::new(PipelineChannel::new(lines.len() + 1));
        for line in lines {
            channel.send(Record::text(*line)).await.unwrap();
        }
        channel.close_for_consumer();
        channel
    }

    #[tokio::test]
    async fn test_pwd_prints_current_dir() {
        let t = TestContext::new();
        let cur = std::env::current_dir().unwrap();

        let status = Pwd {}.execute(&t.empty()).await.unwrap();

        assert!(status.is_success());
        assert_eq!(t.output.lines(), vec![cur.to_string_lossy().to_string()]);
    }

    #[tokio::test]
    async fn test_echo_joins_arguments() {
        let t = TestContext::new();
        let args = vec!["hello".to_string(), "world".to_string()];
        Echo { args }.execute(&t.empty()).await.unwrap();
        assert_eq!(t.output.lines(), vec!["hello world"]);
    }

    #[tokio::test]
    async fn test_cd_to_absolute_path() {
        let t = TestContext::new();
        let temp = tempfile::tempdir().unwrap();
        let canonical_temp = fs::canonicalize(temp.path()).unwrap();

        let target = Some(canonical_temp.to_string_lossy().to_string());
        let status = Cd { target }.execute(&t.empty()).await.unwrap();

        assert!(status.is_success());
        assert_eq!(t.env.cwd(), canonical_temp);
    }

    #[tokio::test]
    async fn test_cd_to_home_when_none() {
        let t = TestContext::new();
        let temp = tempfile::tempdir().unwrap();
        let canonical_temp = fs::canonicalize(temp.path()).unwrap();
        t.env
            .set_var("HOME", canonical_temp.to_string_lossy().to_string());

        let status = Cd { target: None }.execute(&t.empty()).await.unwrap();

        assert!(status.is_success());
        assert_eq!(t.env.cwd(), canonical_temp);
    }

    #[tokio::test]
    async fn test_cd_nonexistent_path_errors() {
        let t = TestContext::new();
        let orig = t.env.cwd();

        let target = Some(format!("nonexistent_dir_for_test_{}", std::process::id()));
        let res = Cd { target }.execute(&t.empty()).await;

        assert!(res.is_err());
        assert_eq!(t.env.cwd(), orig);
    }

    #[tokio::test]
    async fn test_cat_reads_file() {
        let t = TestContext::new();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "hello\nworld\n").unwrap();

        let cat = Cat {
            files: vec![file.path().to_string_lossy().to_string()],
        };
        cat.execute(&t.empty()).await.unwrap();

        assert_eq!(t.output.lines(), vec!["hello", "world"]);
    }

    #[tokio::test]
    async fn test_cat_forwards_input_when_no_args() {
        let t = TestContext::new();
        let ctx = t.context(input_of(&["from stdin", "line2"]).await);
        Cat { files: Vec::new() }.execute(&ctx).await.unwrap();
        assert_eq!(t.output.lines(), vec!["from stdin", "line2"]);
    }

    #[tokio::test]
    async fn test_grep_ignore_case_in_file() -> Result<()> {
        let t = TestContext::new();
        let mut file = tempfile::NamedTempFile::new()?;
        write!(file, "Target 1\nTaRgEt 2\nNo match\n")?;
        let filename = file.path().to_string_lossy().to_string();

        let grep = Grep {
            pattern: "target".to_string(),
            files: vec![filename.clone()],
            word_regexp: false,
            ignore_case: true,
            invert_match: false,
        };
        assert!(grep.execute(&t.empty()).await?.is_success());

        assert_eq!(
            t.output.lines(),
            vec![format!("{filename}\tTarget 1"), format!("{filename}\tTaRgEt 2")]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_grep_filters_input_records() -> Result<()> {
        let t = TestContext::new();
        let ctx = t.context(input_of(&["Line 1", "Line with pipe target", "pipeline"]).await);
        let grep = Grep {
            pattern: "pipe".to_string(),
            files: Vec::new(),
            word_regexp: true,
            ignore_case: false,
            invert_match: true,
        };
        grep.execute(&ctx).await?;
        assert_eq!(t.output.lines(), vec!["Line 1", "pipeline"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_grep_missing_file_is_reported() -> Result<()> {
        let t = TestContext::new();
        let grep = Grep {
            pattern: "x".to_string(),
            files: vec!["/nonexistent/grep/input".to_string()],
            word_regexp: false,
            ignore_case: false,
            invert_match: false,
        };
        assert!(grep.execute(&t.empty()).await?.is_error());
        assert_eq!(t.error.records().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_take_drop_and_count() {
        let t = TestContext::new();
        let input = input_of(&["a", "b", "c", "d"]).await;
        Take { count: 2 }.execute(&t.context(input.clone())).await.unwrap();
        assert_eq!(t.output.lines(), vec!["a", "b"]);

        DropRecords { count: 1 }.execute(&t.context(input.clone())).await.unwrap();
        assert_eq!(t.output.lines(), vec!["a", "b", "d"]);

        Count {}.execute(&t.context(input)).await.unwrap();
        assert_eq!(t.output.lines(), vec!["a", "b", "d", "0"]);
    }

    #[tokio::test]
    async fn test_seq_range() {
        let t = TestContext::new();
        Seq { from: 4, end: Some(6) }.execute(&t.empty()).await.unwrap();
        assert_eq!(t.output.lines(), vec!["4", "5", "6"]);
        assert_eq!(
            t.output.records()[0].get("value"),
            Some(&Value::Integer(4))
        );
    }

    #[tokio::test]
    async fn test_exit_sets_flag_and_status() {
        let t = TestContext::new();
        let status = Exit { code: Some(7) }.execute(&t.empty()).await.unwrap();
        assert_eq!(status.code(), 7);
        assert!(t.env.is_exit());
    }

    #[tokio::test]
    async fn test_set_and_unset() {
        let t = TestContext::new();
        Set {
            name: "GREETING".to_string(),
            value: "hi".to_string(),
        }
        .execute(&t.empty())
        .await
        .unwrap();
        assert_eq!(t.env.get_var("GREETING"), Some("hi".to_string()));

        Unset {
            names: vec!["GREETING".to_string()],
        }
        .execute(&t.empty())
        .await
        .unwrap();
        assert_eq!(t.env.get_var("GREETING"), None);

        let invalid = Set {
            name: "1abc".to_string(),
            value: "x".to_string(),
        };
        assert!(invalid.execute(&t.empty()).await.is_err());
    }

    struct ScriptedLines(Mutex<Vec<String>>);

    #[async_trait]
    impl LineReader for ScriptedLines {
        async fn read_line(&self, _prompt: &str) -> Result<Option<String>> {
            Ok(self.0.lock().unwrap().pop())
        }
    }

    #[tokio::test]
    async fn test_read_stores_line() {
        let t = TestContext::new();
        let lines = Arc::new(ScriptedLines(Mutex::new(vec!["typed".to_string()])));
        let ctx = t.context_with(Arc::new(EmptyInput), lines);

        let read = || ReadLine {
            prompt: "name? ".to_string(),
            name: "ANSWER".to_string(),
        };
        assert!(read().execute(&ctx).await.unwrap().is_success());
        assert_eq!(t.env.get_var("ANSWER"), Some("typed".to_string()));

        // end of input
        assert!(read().execute(&ctx).await.unwrap().is_error());
    }

    #[tokio::test]
    async fn test_help_goes_to_output() {
        let t = TestContext::new();
        let mut ctx = t.empty();
        ctx.arguments = vec!["--help".to_string()];
        let status = Builtin::<Count> {
            _phantom: PhantomData,
        }
        .run(ctx)
        .await
        .unwrap();
        assert!(status.is_success());
        assert!(!t.output.lines().is_empty());
        assert!(t.error.lines().is_empty());
    }

    #[tokio::test]
    async fn test_bad_arguments_go_to_error() {
        let t = TestContext::new();
        let mut ctx = t.empty();
        ctx.arguments = vec!["not-a-number".to_string()];
        let status = Builtin::<Take> {
            _phantom: PhantomData,
        }
        .run(ctx)
        .await
        .unwrap();
        assert!(status.is_error());
        assert!(!t.error.lines().is_empty());
    }

    #[test]
    fn test_catalog_is_registered_once() {
        let registry = CommandRegistry::with_builtins();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(names.len(), 21);
        assert!(registry.create("retry").is_some_and(|c| c.is_wrapper()));
        assert!(registry.create("echo").is_some_and(|c| !c.is_wrapper()));

        let mut registry = registry;
        assert!(
            registry
                .register_command("echo", Factory::<Echo>::default())
                .is_err()
        );
    }
}
