//! External tool processes
//!
//! Runs the compose tool and other helpers with the registry's working
//! directory and environment. At a terminal the child inherits our stdio
//! and writes to the terminal itself; nothing is copied in between.
//! Otherwise its output is piped and drained by two independent tasks so
//! neither pipe can fill up and stall the child; the exit status is only
//! inspected once both have finished.

use crate::error::{Result, WardenError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::ffi::OsString;
use std::io::IsTerminal;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

/// Runs external tools
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Locate an executable on the search path
    fn find_executable(&self, name: &str) -> Option<PathBuf>;

    /// Run a tool. At a terminal the child inherits the terminal, otherwise
    /// its output is forwarded line by line.
    async fn run(&self, program: &Path, args: &[String]) -> Result<()>;

    /// Run a tool and return its stdout; stderr is echoed as it arrives
    async fn capture(&self, program: &Path, args: &[String]) -> Result<String>;
}

/// Where a drained stdout goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StdoutSink {
    Capture,
    Forward,
}

/// Process runner
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    /// Working directory for every child
    cwd: PathBuf,
    /// Extra environment, layered over the inherited one
    env: HashMap<String, String>,
    /// Search path override; `PATH` when unset
    search_path: Option<OsString>,
}

impl ProcessRunner {
    /// Create a runner whose children start in `cwd`
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            env: HashMap::new(),
            search_path: None,
        }
    }

    /// Add an environment variable
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Add environment variables
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Search these directories instead of `PATH`
    pub fn search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    /// Working directory
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    fn command(&self, program: &Path, args: &[String]) -> Command {
        debug!("Running {} {}", program.display(), args.join(" "));
        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&self.cwd)
            .envs(&self.env)
            .kill_on_drop(true);
        command
    }

    /// Run with the child inheriting the terminal: our stdin, stdout and
    /// stderr are handed to it directly
    pub async fn run_streamed(&self, program: &Path, args: &[String]) -> Result<()> {
        let status = self
            .command(program, args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| spawn_error(program, e))?;
        check_status(program, args, status)
    }

    /// Run and return stdout; stderr lines are echoed as they arrive
    pub async fn run_captured(&self, program: &Path, args: &[String]) -> Result<String> {
        self.run_piped(program, args, StdoutSink::Capture).await
    }

    /// Run with both streams forwarded line by line
    pub async fn run_forwarded(&self, program: &Path, args: &[String]) -> Result<()> {
        self.run_piped(program, args, StdoutSink::Forward)
            .await
            .map(|_| ())
    }

    async fn run_piped(&self, program: &Path, args: &[String], sink: StdoutSink) -> Result<String> {
        let mut child = self
            .command(program, args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(program, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("child stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("child stderr was not piped"))?;

        let stdout_task = tokio::spawn(drain_stdout(stdout, sink));
        let stderr_task = tokio::spawn(echo_stderr(stderr));

        let (captured, echoed) = tokio::join!(stdout_task, stderr_task);
        let captured = captured.map_err(std::io::Error::other)??;
        echoed.map_err(std::io::Error::other)??;

        let status = child.wait().await?;
        check_status(program, args, status)?;
        Ok(captured)
    }

    /// Locate `name` on the search path
    pub fn lookup(&self, name: &str) -> Option<PathBuf> {
        let path = self
            .search_path
            .clone()
            .or_else(|| std::env::var_os("PATH"))?;
        std::env::split_paths(&path)
            .map(|dir| dir.join(name))
            .find(|candidate| is_executable(candidate))
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    fn find_executable(&self, name: &str) -> Option<PathBuf> {
        self.lookup(name)
    }

    async fn run(&self, program: &Path, args: &[String]) -> Result<()> {
        if std::io::stdout().is_terminal() {
            self.run_streamed(program, args).await
        } else {
            self.run_forwarded(program, args).await
        }
    }

    async fn capture(&self, program: &Path, args: &[String]) -> Result<String> {
        self.run_captured(program, args).await
    }
}

/// Drain a child's stdout, capturing or forwarding each line
async fn drain_stdout<R: AsyncRead + Unpin>(reader: R, sink: StdoutSink) -> std::io::Result<String> {
    let mut lines = BufReader::new(reader).lines();
    let mut captured = String::new();
    while let Some(line) = lines.next_line().await? {
        match sink {
            StdoutSink::Capture => {
                captured.push_str(&line);
                captured.push('\n');
            }
            StdoutSink::Forward => println!("{}", line),
        }
    }
    Ok(captured)
}

/// Drain a child's stderr onto ours
async fn echo_stderr<R: AsyncRead + Unpin>(reader: R) -> std::io::Result<()> {
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        eprintln!("{}", line);
    }
    Ok(())
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn spawn_error(program: &Path, error: std::io::Error) -> WardenError {
    WardenError::Io(std::io::Error::new(
        error.kind(),
        format!("failed to start {}: {}", program.display(), error),
    ))
}

fn check_status(program: &Path, args: &[String], status: ExitStatus) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    Err(WardenError::ToolFailed {
        tool: program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| program.display().to_string()),
        status: status.to_string(),
        args: args.to_vec(),
    })
}
