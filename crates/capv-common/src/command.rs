//! External command execution with deadlines and output mirroring.
//!
//! Every tool the engine drives (kind, clusterctl, kubectl, tridentctl, govc)
//! goes through [`CommandRunner`]. [`CommandInvocation`] is a reusable
//! descriptor, so the same value can be executed repeatedly by the poller.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
#[cfg(test)]
use mockall::automock;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::log_sink::LogSink;
use crate::{Error, Result};

/// Upper bound on a single command when the invocation sets no deadline
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

/// Programs that report progress on stderr, so output there is not a failure
const STDERR_TOLERANT: &[&str] = &["kind"];

/// Environment variable pointing tools at a kubeconfig
pub const KUBECONFIG_ENV: &str = "KUBECONFIG";

/// A program, its arguments and environment overrides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandInvocation {
    /// Variables added on top of the inherited environment
    pub env: IndexMap<String, String>,
    /// Program name resolved through `$PATH`
    pub program: String,
    /// Arguments, in order
    pub args: Vec<String>,
    /// Per-invocation deadline; the runner default applies when unset
    pub timeout: Option<Duration>,
}

impl CommandInvocation {
    /// Start a new invocation of `program`
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set one environment override
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set several environment overrides
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

    /// Point the command at a kubeconfig via `KUBECONFIG`
    pub fn kubeconfig(self, path: &Path) -> Self {
        self.env(KUBECONFIG_ENV, path.display().to_string())
    }

    /// Override the deadline for this invocation
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// `program arg1 arg2 ...`, used in logs and errors
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }

    fn program_name(&self) -> &str {
        Path::new(&self.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.program)
    }

    /// Whether output on stderr should be treated as a failure for this program
    pub fn stderr_is_failure(&self) -> bool {
        !STDERR_TOLERANT.contains(&self.program_name())
    }
}

impl fmt::Display for CommandInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Everything written to stdout
    pub stdout: Vec<u8>,
    /// Everything written to stderr
    pub stderr: Vec<u8>,
    /// Exit code; `None` when killed by a signal
    pub status: Option<i32>,
}

impl CommandOutput {
    /// Whether the process exited with status 0
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// stdout as (lossy) UTF-8
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// stderr as (lossy) UTF-8
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Executes external programs.
///
/// Implementations must fail with [`Error::ToolNotFound`] without spawning
/// anything when the program cannot be resolved.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// `$PATH` lookup only; never spawns
    fn exists(&self, invocation: &CommandInvocation) -> bool;

    /// Run to completion or deadline, returning the captured output.
    ///
    /// A non-zero exit is not an error at this level; see [`CommandRunnerExt`].
    async fn execute(&self, invocation: &CommandInvocation) -> Result<CommandOutput>;
}

/// Strict helpers layered on [`CommandRunner::execute`]
#[async_trait]
pub trait CommandRunnerExt: CommandRunner {
    /// Run and return stdout, failing on non-zero exit or unexpected stderr
    async fn output(&self, invocation: &CommandInvocation) -> Result<String> {
        let output = self.execute(invocation).await?;
        check_output(invocation, &output)?;
        Ok(output.stdout_str())
    }

    /// Run for side effects only
    async fn run(&self, invocation: &CommandInvocation) -> Result<()> {
        self.output(invocation).await.map(|_| ())
    }
}

impl<T: CommandRunner + ?Sized> CommandRunnerExt for T {}

/// Apply the success rules to captured output
pub fn check_output(invocation: &CommandInvocation, output: &CommandOutput) -> Result<()> {
    if !output.success() {
        let message = match output.status {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        };
        return Err(Error::command_failed(
            invocation.command_line(),
            message,
            output.stderr_str(),
        ));
    }
    if invocation.stderr_is_failure() && !output.stderr.is_empty() {
        return Err(Error::command_failed(
            invocation.command_line(),
            "unexpected output on stderr",
            output.stderr_str(),
        ));
    }
    Ok(())
}

/// Runs real processes with `tokio::process`, mirroring output to a [`LogSink`]
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    sink: LogSink,
    default_timeout: Duration,
}

impl ProcessRunner {
    /// Create a runner writing all output to `sink`
    pub fn new(sink: LogSink) -> Self {
        Self {
            sink,
            default_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Change the deadline used for invocations without their own
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// The audit log this runner mirrors into
    pub fn sink(&self) -> &LogSink {
        &self.sink
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    fn exists(&self, invocation: &CommandInvocation) -> bool {
        which::which(&invocation.program).is_ok()
    }

    async fn execute(&self, invocation: &CommandInvocation) -> Result<CommandOutput> {
        let program = which::which(&invocation.program).map_err(|_| Error::ToolNotFound {
            name: invocation.program.clone(),
        })?;
        let timeout = invocation.timeout.unwrap_or(self.default_timeout);

        debug!(command = %invocation, "executing");

        let mut child = Command::new(program)
            .args(&invocation.args)
            .envs(&invocation.env)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::command_failed(
                    invocation.command_line(),
                    format!("failed to execute: {}", e),
                    "",
                )
            })?;

        let stdout = Arc::new(Mutex::new(Vec::new()));
        let stderr = Arc::new(Mutex::new(Vec::new()));
        let stdout_task = tokio::spawn(mirror(
            child.stdout.take(),
            stdout.clone(),
            self.sink.clone(),
        ));
        let stderr_task = tokio::spawn(mirror(
            child.stderr.take(),
            stderr.clone(),
            self.sink.clone(),
        ));

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => {
                let status = status?;
                // Readers finish at EOF once the process has exited
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                Ok(CommandOutput {
                    stdout: std::mem::take(&mut *stdout.lock()),
                    stderr: std::mem::take(&mut *stderr.lock()),
                    status: status.code(),
                })
            }
            Err(_) => {
                warn!(command = %invocation, ?timeout, "command timed out");
                if let Err(e) = child.kill().await {
                    warn!(command = %invocation, error = %e, "failed to kill timed out command");
                }
                // Grandchildren may still hold the pipes open
                stdout_task.abort();
                stderr_task.abort();
                let stdout = String::from_utf8_lossy(&stdout.lock()).into_owned();
                let stderr = String::from_utf8_lossy(&stderr.lock()).into_owned();
                Err(Error::CommandTimeout {
                    command: invocation.command_line(),
                    timeout,
                    stdout,
                    stderr,
                })
            }
        }
    }
}

async fn mirror<R>(reader: Option<R>, buffer: Arc<Mutex<Vec<u8>>>, sink: LogSink)
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                buffer.lock().extend_from_slice(&chunk[..n]);
                sink.write(&chunk[..n]);
            }
            Err(e) => {
                debug!(error = %e, "stopped reading command output");
                break;
            }
        }
    }
}
