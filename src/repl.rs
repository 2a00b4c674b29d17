//! Interactive loop.
//!
//! Line editing and history come from rustyline. The editor blocks, so it is
//! driven from `block_in_place` on the shell's own task; commands run on the
//! runtime in between two prompts.

use crate::command::{ExitStatus, LineReader, StageIo};
use crate::config::Settings;
use crate::interpreter::Interpreter;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::Write;
use std::path::Path;

/// Prompts on standard error and reads one line from standard input.
pub struct PromptLineReader;

#[async_trait]
impl LineReader for PromptLineReader {
    async fn read_line(&self, prompt: &str) -> Result<Option<String>> {
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            write!(stderr, "{prompt}")?;
            stderr.flush()?;

            let mut line = String::new();
            if std::io::stdin().read_line(&mut line)? == 0 {
                return Ok(None);
            }
            let trimmed = line.trim_end_matches(['\n', '\r']).len();
            line.truncate(trimmed);
            Ok(Some(line))
        })
        .await
        .context("line reader task failed")?
    }
}

/// Reads lines until end of input or `exit`; returns the last status.
pub async fn run(interpreter: &Interpreter, settings: &Settings) -> Result<ExitStatus> {
    let mut rl = DefaultEditor::new().context("failed to create editor")?;
    if let Some(path) = &settings.history {
        load_history(&mut rl, path);
    }

    let mut status = ExitStatus::success();
    loop {
        let readline = tokio::task::block_in_place(|| rl.readline(&settings.prompt));
        match readline {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                if let Err(e) = rl.add_history_entry(line.as_str()) {
                    tracing::warn!("failed to add history entry: {}", e);
                }
                status = match interpreter.run_source(&line, StageIo::terminal()).await {
                    Ok(status) => status,
                    Err(e) => {
                        eprintln!("{e}");
                        ExitStatus::error(2)
                    }
                };
                if interpreter.env().is_exit() {
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                tracing::error!("failed to read line: {}", err);
                break;
            }
        }
    }

    if let Some(path) = &settings.history {
        save_history(&mut rl, path);
    }
    Ok(status)
}

fn load_history(rl: &mut DefaultEditor, path: &Path) {
    if let Err(e) = rl.load_history(path) {
        // no history yet on first run
        let is_not_found = matches!(&e, ReadlineError::Io(io_err) if io_err.kind() == std::io::ErrorKind::NotFound);
        if !is_not_found {
            tracing::warn!("failed to load history: {}", e);
        }
    }
}

fn save_history(rl: &mut DefaultEditor, path: &Path) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!("failed to create history directory: {}", e);
        }
    }
    if let Err(e) = rl.save_history(path) {
        tracing::warn!("failed to save history: {}", e);
    }
}
