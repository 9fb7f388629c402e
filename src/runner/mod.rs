//! External command execution behind a narrow, mockable seam.
//!
//! Every backend call (container engine, remote platform CLI) goes through a
//! [`CommandRunner`]. The real [`ProcessCommandRunner`] enforces a per-call
//! timeout and kills the child when the shared [`Interrupt`] is raised; tests
//! substitute [`crate::test_support::ScriptedRunner`].

use std::ffi::OsString;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use camino::Utf8PathBuf;
use secrecy::{ExposeSecret, SecretString};
use shell_escape::unix::escape;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::sleep;
use tracing::debug;

mod interrupt;

pub use interrupt::{Interrupt, InterruptTrigger};

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Renders the exit status for diagnostics.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }

    /// Returns the most useful diagnostic text: stderr when present,
    /// otherwise stdout.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_owned()
        } else {
            stderr.to_owned()
        }
    }
}

/// A single external command invocation.
///
/// Secret material travels only through `envs` and `stdin`, both of which are
/// redacted by `Debug` and never rendered into log lines.
#[derive(Debug)]
pub struct Invocation {
    /// Program to execute.
    pub program: String,
    /// Arguments passed to the program. Must never contain secret values.
    pub args: Vec<OsString>,
    /// Extra environment variables for the child process.
    pub envs: Vec<(String, SecretString)>,
    /// Payload written to the child's standard input.
    pub stdin: Option<SecretString>,
    /// Working directory for the child process.
    pub current_dir: Option<Utf8PathBuf>,
    /// Upper bound on how long the call may block.
    pub timeout: Duration,
}

impl Invocation {
    /// Starts an invocation of `program` bounded by `timeout`.
    #[must_use]
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            stdin: None,
            current_dir: None,
            timeout,
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<OsString>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    /// Passes a secret value to the child through its environment.
    #[must_use]
    pub fn secret_env(mut self, key: impl Into<String>, value: SecretString) -> Self {
        self.envs.push((key.into(), value));
        self
    }

    /// Writes `payload` to the child's standard input.
    #[must_use]
    pub fn stdin(mut self, payload: SecretString) -> Self {
        self.stdin = Some(payload);
        self
    }

    /// Runs the child inside `dir`.
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Shell-like rendering of program and arguments for logs.
    #[must_use]
    pub fn display_command(&self) -> String {
        let mut rendered = self.program.clone();
        for arg in &self.args {
            rendered.push(' ');
            let text = arg.to_string_lossy();
            rendered.push_str(escape(text).as_ref());
        }
        rendered
    }
}

/// Errors raised while executing an external command.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RunnerError {
    /// Raised when a command cannot be spawned (typically: not installed).
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when talking to the child process fails after spawning.
    #[error("i/o error while running {program}: {message}")]
    Io {
        /// Command being executed.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the command exceeds its call-class timeout.
    #[error("{program} did not finish within {seconds} seconds")]
    Timeout {
        /// Command being executed.
        program: String,
        /// Timeout that elapsed.
        seconds: u64,
    },
    /// Raised when the user interrupts a blocking call.
    #[error("{program} was interrupted by the user")]
    Interrupted {
        /// Command that was killed.
        program: String,
    },
}

/// Future returned by command runners.
pub type RunnerFuture<'a> = Pin<Box<dyn Future<Output = Result<CommandOutput, RunnerError>> + Send + 'a>>;

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner: Send + Sync {
    /// Runs the invocation, capturing stdout and stderr.
    ///
    /// A non-zero exit status is not an error at this level; callers inspect
    /// [`CommandOutput::is_success`].
    fn run<'a>(&'a self, invocation: &'a Invocation) -> RunnerFuture<'a>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner {
    interrupt: Interrupt,
}

impl ProcessCommandRunner {
    /// Creates a runner that kills its children when `interrupt` is raised.
    #[must_use]
    pub const fn new(interrupt: Interrupt) -> Self {
        Self { interrupt }
    }

    async fn execute(&self, invocation: &Invocation) -> Result<CommandOutput, RunnerError> {
        let program = invocation.program.clone();
        if self.interrupt.is_raised() {
            return Err(RunnerError::Interrupted { program });
        }
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .kill_on_drop(true)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });
        for (key, value) in &invocation.envs {
            command.env(key, value.expose_secret());
        }
        if let Some(dir) = &invocation.current_dir {
            command.current_dir(dir);
        }

        debug!(command = %invocation.display_command(), "spawning external command");
        let mut child = command.spawn().map_err(|err| RunnerError::Spawn {
            program: program.clone(),
            message: err.to_string(),
        })?;

        if let Some(payload) = &invocation.stdin
            && let Some(mut stdin) = child.stdin.take()
        {
            stdin
                .write_all(payload.expose_secret().as_bytes())
                .await
                .map_err(|err| RunnerError::Io {
                    program: program.clone(),
                    message: err.to_string(),
                })?;
            drop(stdin);
        }

        // Dropping the pending `wait_with_output` future drops the child,
        // which kills it because of `kill_on_drop`.
        tokio::select! {
            result = child.wait_with_output() => {
                let output = result.map_err(|err| RunnerError::Io {
                    program: program.clone(),
                    message: err.to_string(),
                })?;
                Ok(CommandOutput {
                    code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
            () = sleep(invocation.timeout) => Err(RunnerError::Timeout {
                program,
                seconds: invocation.timeout.as_secs(),
            }),
            () = self.interrupt.raised() => Err(RunnerError::Interrupted { program }),
        }
    }
}

impl CommandRunner for ProcessCommandRunner {
    fn run<'a>(&'a self, invocation: &'a Invocation) -> RunnerFuture<'a> {
        Box::pin(self.execute(invocation))
    }
}
