//! pipesh entry point.
//!
//! Usage:
//!   pipesh                 # Interactive REPL
//!   pipesh -c <command>    # Run one command line and exit
//!   pipesh script.psh      # Run a script

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use pipesh::command::LineReader;
use pipesh::config::{Options, Settings};
use pipesh::repl::{self, PromptLineReader};
use pipesh::{CommandRegistry, Environment, ExitStatus, Interpreter, StageIo};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Exit code when a script fails to parse or compile.
const COMPILE_ERROR: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let options: Options = argh::from_env();

    // respects RUST_LOG unless --log is given
    let filter = match &options.log {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::from_default_env(),
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match run(options).await {
        Ok(status) => ExitCode::from(status.process_code()),
        Err(e) => {
            eprintln!("pipesh: {e:#}");
            ExitCode::from(COMPILE_ERROR)
        }
    }
}

async fn run(options: Options) -> Result<ExitStatus> {
    let env = Arc::new(Environment::new(CommandRegistry::with_builtins()));
    let settings = Settings::new(&options, &env.variables());
    let lines: Arc<dyn LineReader> = Arc::new(PromptLineReader);
    let interpreter =
        Interpreter::new(env, lines).with_channel_capacity(settings.channel_capacity);

    let source = match (&options.command, &options.script) {
        (Some(command), _) => command.clone(),
        (None, Some(script)) => std::fs::read_to_string(script)
            .with_context(|| format!("can't read {}", script.display()))?,
        (None, None) => return repl::run(&interpreter, &settings).await,
    };

    let status = interpreter.run_source(&source, StageIo::terminal()).await?;
    tracing::debug!(%status, "done");
    Ok(status)
}
