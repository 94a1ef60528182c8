//! Verifier Executor
//!
//! This module provides bounded subprocess execution for the external
//! verifier binary. It implements timeout handling, output capture and
//! process-group termination.

use super::timeout::ExecutionTimeout;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command as TokioCommand;
use tracing::{debug, info, warn};

/// Maximum output size in bytes kept per stream (1MB)
const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// A fully resolved command line plus the exact environment it runs with
///
/// The environment is request-scoped: the child sees these variables and
/// nothing else.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, env: BTreeMap<String, String>) -> Self {
        Self {
            program: program.into(),
            args,
            env,
        }
    }

    /// Short description for logs; arguments beyond the first two are elided
    pub fn display(&self) -> String {
        if self.args.len() > 2 {
            format!(
                "{} {} ... ({} args)",
                self.program.display(),
                self.args[..2].join(" "),
                self.args.len()
            )
        } else {
            format!("{} {}", self.program.display(), self.args.join(" "))
        }
    }
}

/// Output of a verifier invocation that ran to completion
#[derive(Debug, Clone, PartialEq)]
pub struct RawProbeResult {
    /// Exit code (None if the process was killed by a signal)
    pub exit_code: Option<i32>,

    /// Standard output (truncated if too large)
    pub stdout: String,

    /// Standard error (truncated if too large)
    pub stderr: String,

    /// Wall-clock time between spawn and exit, in whole milliseconds
    pub elapsed_ms: u64,
}

impl RawProbeResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "{} (exit code: {:?}, {}ms, {} bytes output)",
            if self.success() { "Success" } else { "Failed" },
            self.exit_code,
            self.elapsed_ms,
            self.stdout.len() + self.stderr.len()
        )
    }
}

/// Error types for process execution
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Failed to spawn process {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while waiting for process: {0}")]
    Io(#[from] std::io::Error),

    #[error("Command execution timed out after {0:?}")]
    TimedOut(Duration),
}

/// Seam between the probe engine and the operating system
///
/// The engine only ever starts processes through this trait, which lets
/// tests count or script invocations.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn run(
        &self,
        spec: &CommandSpec,
        timeout: ExecutionTimeout,
    ) -> Result<RawProbeResult, ExecutionError>;
}

/// Configuration for tool execution
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum output size in bytes per stream (default: 1MB)
    pub max_output_size: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_output_size: MAX_OUTPUT_SIZE,
        }
    }
}

impl ExecutorConfig {
    /// Create a new executor config with custom output limit
    pub fn with_max_output_size(size: usize) -> Self {
        Self {
            max_output_size: size,
        }
    }
}

/// Executor for verifier subprocesses
///
/// # Security
///
/// This executor:
/// 1. Uses `tokio::process::Command` without a shell
/// 2. Replaces the child's environment with the request-scoped one
/// 3. Starts the child in its own process group and kills the whole group
///    when the budget expires or the execution is abandoned
/// 4. Limits captured output size to prevent memory exhaustion
#[derive(Debug, Clone, Default)]
pub struct ToolExecutor {
    config: ExecutorConfig,
}

impl ToolExecutor {
    /// Create a new tool executor with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new tool executor with custom configuration
    pub fn with_config(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Execute a command under a wall-clock budget
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Process fails to spawn
    /// - IO error occurs during execution
    /// - The budget expires (the process group is killed and reaped first)
    pub async fn execute(
        &self,
        spec: &CommandSpec,
        timeout: ExecutionTimeout,
    ) -> Result<RawProbeResult, ExecutionError> {
        let cmd_str = spec.display();
        info!("Executing: {}", cmd_str);

        let mut process = TokioCommand::new(&spec.program);
        process
            .args(&spec.args)
            .env_clear()
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        process.process_group(0);

        let start = Instant::now();
        let mut child = process.spawn().map_err(|source| ExecutionError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        // Declared after `child` so it drops first, while the group leader is
        // still unreaped and its pid cannot be reused
        let mut group = ProcessGroupGuard::new(child.id());

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = self.config.max_output_size;

        let waited = timeout
            .run(async {
                let (status, out, err) =
                    tokio::join!(child.wait(), read_stream(stdout, limit), read_stream(stderr, limit));
                Ok::<_, std::io::Error>((status?, out?, err?))
            })
            .await;

        let (status, out, err) = match waited {
            Some(result) => {
                // Reaped, or the wait itself failed and the guard still fires
                let result = result?;
                group.disarm();
                result
            }
            None => {
                warn!("Command timed out after {:?}: {}", timeout.duration(), cmd_str);
                group.kill();
                if let Err(e) = child.kill().await {
                    debug!("Failed to kill timed-out child: {}", e);
                }
                return Err(ExecutionError::TimedOut(timeout.duration()));
            }
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let result = RawProbeResult {
            exit_code: status.code(),
            stdout: truncate_string(String::from_utf8_lossy(&out).into_owned(), limit),
            stderr: truncate_string(String::from_utf8_lossy(&err).into_owned(), limit),
            elapsed_ms,
        };

        if result.success() {
            debug!("Command succeeded: {} ({}ms)", cmd_str, elapsed_ms);
        } else {
            debug!("Command failed: {} ({})", cmd_str, result.summary());
        }
        Ok(result)
    }
}

#[async_trait]
impl ProcessLauncher for ToolExecutor {
    async fn run(
        &self,
        spec: &CommandSpec,
        timeout: ExecutionTimeout,
    ) -> Result<RawProbeResult, ExecutionError> {
        self.execute(spec, timeout).await
    }
}

/// Drain a child pipe, keeping at most `limit` bytes but consuming all of it
async fn read_stream<R>(stream: Option<R>, limit: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut collected = Vec::new();
    let Some(mut stream) = stream else {
        return Ok(collected);
    };
    let mut buf = [0u8; 8192];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(collected.len());
        collected.extend_from_slice(&buf[..n.min(room)]);
    }
    Ok(collected)
}

/// SIGKILLs the child's process group when dropped
///
/// Armed from spawn until the group leader is reaped normally, so a timeout
/// or a dropped execution future takes grandchildren down too.
struct ProcessGroupGuard {
    pid: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self { pid }
    }

    /// The group leader was reaped normally; leave the group alone
    fn disarm(&mut self) {
        self.pid = None;
    }

    fn kill(&mut self) {
        let Some(pid) = self.pid.take() else {
            return;
        };
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                debug!("killpg({}) failed: {}", pid, e);
            }
        }
        #[cfg(not(unix))]
        let _ = pid;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Truncate a string to at most `max_len` bytes on a char boundary,
/// adding ellipsis if truncated
fn truncate_string(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len.saturating_sub(3);
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push_str("...");
    }
    s
}

/// Whether `path` looks like something we can execute
pub fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}
