use crate::channel::InputChannel;
use crate::command::{Command, CommandContext, ExitStatus};
use crate::record::Record;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};

/// Command that is not a builtin: a program found on disk at compile time.
pub struct ExternalCommand {
    name: String,
    path: PathBuf,
}

impl ExternalCommand {
    pub fn new(path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { name, path }
    }
}

#[async_trait]
impl Command for ExternalCommand {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: CommandContext) -> Result<ExitStatus> {
        let variables = ctx.env.variables();
        let mut command = tokio::process::Command::new(&self.path);
        command
            .args(&ctx.arguments)
            .env_clear()
            .envs(variables.iter())
            .current_dir(ctx.env.cwd())
            .stdin(stdio(ctx.position.inherits_input()))
            .stdout(stdio(ctx.position.inherits_output()))
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .with_context(|| format!("can't start {}", self.path.display()))?;
        tracing::debug!(path = %self.path.display(), position = ?ctx.position, "spawned");

        let feeding = feed(child.stdin.take(), ctx.input.as_ref());
        let stdout = child.stdout.take();
        // an error here drops `child`, which kills the process
        let exit = async {
            drain(stdout, &ctx).await?;
            Ok::<_, anyhow::Error>(child.wait().await?)
        };
        tokio::pin!(feeding, exit);

        let status = tokio::select! {
            status = &mut exit => status?,
            fed = &mut feeding => {
                fed?;
                exit.await?
            }
        };

        Ok(ExitStatus::from_code(
            status.code().unwrap_or_else(|| terminated_by_signal(status)),
        ))
    }
}

fn stdio(inherit: bool) -> Stdio {
    if inherit {
        Stdio::inherit()
    } else {
        Stdio::piped()
    }
}

/// Writes input records to the child, one line each, until the input ends or
/// the child stops reading. Dropping the pipe closes the child's stdin.
async fn feed(stdin: Option<ChildStdin>, input: &dyn InputChannel) -> Result<()> {
    let Some(mut stdin) = stdin else {
        return Ok(());
    };
    while let Some(record) = input.receive().await {
        let mut line = record.render("\t");
        line.push('\n');
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            tracing::debug!("child closed its input: {}", e);
            break;
        }
    }
    Ok(())
}

/// Turns the child's output lines into text records.
async fn drain(stdout: Option<ChildStdout>, ctx: &CommandContext) -> Result<()> {
    let Some(stdout) = stdout else {
        return Ok(());
    };
    let mut lines = BufReader::new(stdout).lines();
    while let Some(line) = lines.next_line().await? {
        ctx.output.send(Record::text(line)).await?;
    }
    Ok(())
}

#[cfg(unix)]
fn terminated_by_signal(exit_status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = ExitStatusExt::signal(&exit_status) {
        128 + signal
    } else if ExitStatusExt::core_dumped(&exit_status) {
        255
    } else {
        -1
    }
}

#[cfg(not(unix))]
fn terminated_by_signal(_exit_status: std::process::ExitStatus) -> i32 {
    -1
}

/// Resolve a command path the way a typical shell would.
///
/// Behavior:
/// - Empty name: `None`.
/// - Absolute path: returned if it is an executable regular file.
/// - Anything else: joined onto each directory of `search_paths`, then onto
///   `cwd`; the first executable regular file wins.
pub fn find_command_path(name: &str, search_paths: &[PathBuf], cwd: &Path) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }
    let path = Path::new(name);
    if path.is_absolute() {
        return is_executable(path).then(|| path.to_path_buf());
    }
    find_in_path(path, search_paths.iter().map(PathBuf::as_path).chain([cwd]))
}

fn find_in_path<'a>(cmd: &Path, dirs: impl IntoIterator<Item = &'a Path>) -> Option<PathBuf> {
    dirs.into_iter()
        .map(|dir| dir.join(cmd))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => has_execute_permission(&metadata),
        _ => false,
    }
}

#[cfg(unix)]
fn has_execute_permission(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn has_execute_permission(_metadata: &std::fs::Metadata) -> bool {
    true
}
