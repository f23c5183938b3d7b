//! External process execution
//!
//! Every external binary the orchestrator touches (`docker`, `ssh`, `git`,
//! `ss`, ...) goes through this module. Three execution modes share one
//! failure contract:
//!
//! - **captured**: stdin ignored, full stdout/stderr collected in memory
//! - **streaming**: stdio inherited for interactive commands; a "quiet"
//!   variant pipes stderr so it can be attached to the error
//! - **logged**: output tee'd line-by-line to a log file, with an optional
//!   per-line callback
//!
//! A non-zero exit produces a [`CommandError`] unless the call site opted
//! into `ignore_failure`.

use crate::errors::{CommandError, Result, WorkspaceError};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Result of a completed external command
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Exit code, -1 when terminated by a signal
    pub code: i32,
    /// Captured stdout (empty when inherited)
    pub stdout: String,
    /// Captured stderr (empty when inherited)
    pub stderr: String,
}

impl ExecOutput {
    /// Whether the command exited zero
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Per-line callback used by [`Cmd::run_logged`]
pub type LineSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Builder for a single external command invocation.
///
/// The child environment is the parent environment overlaid with any
/// `env(...)` entries; nothing is cleared.
#[derive(Clone)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    cwd: Option<PathBuf>,
    ignore_failure: bool,
}

impl std::fmt::Debug for Cmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.program, self.args.join(" "))
    }
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            cwd: None,
            ignore_failure: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// A non-zero exit is returned as a normal [`ExecOutput`] instead of an error
    pub fn ignore_failure(mut self) -> Self {
        self.ignore_failure = true;
        self
    }

    fn build(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        if let Some(ref dir) = self.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn failure(&self, code: i32, stdout: String, stderr: String, log_path: Option<PathBuf>) -> WorkspaceError {
        CommandError {
            program: self.program.clone(),
            code,
            stdout,
            stderr,
            log_path,
        }
        .into()
    }

    fn spawn_error(&self, e: std::io::Error) -> WorkspaceError {
        CommandError {
            program: self.program.clone(),
            code: -1,
            stdout: String::new(),
            stderr: format!("failed to spawn: {}", e),
            log_path: None,
        }
        .into()
    }

    /// Run with stdin ignored, collecting full stdout and stderr.
    pub async fn run_captured(&self) -> Result<ExecOutput> {
        trace!("run_captured: {:?}", self);

        let output = self
            .build()
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        let result = ExecOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !result.success() && !self.ignore_failure {
            return Err(self.failure(result.code, result.stdout, result.stderr, None));
        }

        Ok(result)
    }

    /// Run with stdio inherited, for interactive invocations
    /// (`docker exec -it`, `ssh -L`, `docker run`).
    ///
    /// With `quiet` set, stderr is piped and captured so it can be included
    /// in the error; stdout still streams to the terminal.
    pub async fn run_streaming(&self, quiet: bool) -> Result<ExecOutput> {
        debug!("run_streaming: {:?}", self);

        let mut cmd = self.build();
        cmd.stdin(Stdio::inherit()).stdout(Stdio::inherit());
        if quiet {
            cmd.stderr(Stdio::piped());
        } else {
            cmd.stderr(Stdio::inherit());
        }

        let mut child = cmd.spawn().map_err(|e| self.spawn_error(e))?;

        let stderr = if quiet {
            let mut buf = String::new();
            if let Some(pipe) = child.stderr.take() {
                let mut reader = BufReader::new(pipe).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    buf.push_str(&line);
                    buf.push('\n');
                }
            }
            buf
        } else {
            String::new()
        };

        let status = child.wait().await.map_err(|e| self.spawn_error(e))?;
        let result = ExecOutput {
            code: status.code().unwrap_or(-1),
            stdout: String::new(),
            stderr,
        };

        if !result.success() && !self.ignore_failure {
            return Err(self.failure(result.code, String::new(), result.stderr, None));
        }

        Ok(result)
    }

    /// Run with output captured to memory and appended to `log_path`,
    /// optionally invoking `sink` for every line.
    ///
    /// On failure the resulting [`CommandError`] carries `log_path` so the
    /// user can be pointed at the full transcript.
    pub async fn run_logged(&self, log_path: &Path, sink: Option<LineSink>) -> Result<ExecOutput> {
        debug!("run_logged: {:?} -> {}", self, log_path.display());

        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.spawn_error(e))?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .await
            .map_err(|e| self.spawn_error(e))?;
        let file = Arc::new(Mutex::new(file));

        let mut child = self
            .build()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout_pipe = child.stdout.take().expect("stdout was piped");
        let stderr_pipe = child.stderr.take().expect("stderr was piped");

        let stdout_task = tee_lines(stdout_pipe, file.clone(), sink.clone());
        let stderr_task = tee_lines(stderr_pipe, file.clone(), sink);

        let (stdout, stderr) = tokio::join!(stdout_task, stderr_task);
        let status = child.wait().await.map_err(|e| self.spawn_error(e))?;

        let result = ExecOutput {
            code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        };

        if !result.success() && !self.ignore_failure {
            return Err(self.failure(
                result.code,
                result.stdout,
                result.stderr,
                Some(log_path.to_path_buf()),
            ));
        }

        Ok(result)
    }
}

/// Read lines from `pipe`, appending each to the shared log file and the
/// returned buffer, invoking `sink` when provided.
async fn tee_lines<R>(
    pipe: R,
    file: Arc<Mutex<tokio::fs::File>>,
    sink: Option<LineSink>,
) -> String
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut collected = String::new();
    let mut lines = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(ref sink) = sink {
            sink(&line);
        }
        {
            let mut f = file.lock().await;
            let _ = f.write_all(line.as_bytes()).await;
            let _ = f.write_all(b"\n").await;
        }
        collected.push_str(&line);
        collected.push('\n');
    }
    collected
}
