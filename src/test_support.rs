//! Test support utilities shared across unit and integration tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::Utf8PathBuf;
use secrecy::ExposeSecret;

use crate::config::Configuration;
use crate::config_store::{ConfigRepository, ConfigStoreError};
use crate::runner::{CommandOutput, CommandRunner, Invocation, RunnerError, RunnerFuture};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Clones share the same script and log, so a test can keep one handle while
/// the code under test owns another.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    state: Arc<Mutex<ScriptState>>,
}

#[derive(Debug, Default)]
struct ScriptState {
    responses: VecDeque<Result<CommandOutput, RunnerError>>,
    invocations: Vec<CommandInvocation>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Names of the secret environment variables handed to the child.
    pub env_keys: Vec<String>,
    /// Exposed standard input payload.
    pub stdin: Option<String>,
    /// Working directory requested for the child.
    pub current_dir: Option<Utf8PathBuf>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    /// Returns `true` when the arguments start with `prefix`.
    #[must_use]
    pub fn starts_with(&self, prefix: &[&str]) -> bool {
        self.args.len() >= prefix.len()
            && self
                .args
                .iter()
                .zip(prefix)
                .all(|(arg, expected)| arg == expected)
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.lock().invocations.clone()
    }

    /// Returns every recorded invocation rendered as a command string.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.lock()
            .invocations
            .iter()
            .map(CommandInvocation::command_string)
            .collect()
    }

    /// Number of scripted responses not consumed yet.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.lock().responses.len()
    }

    /// Pushes a successful exit status with empty output.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a successful exit status with `stdout`.
    pub fn push_stdout(&self, stdout: impl Into<String>) {
        self.push_output(Some(0), stdout, "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32, stderr: impl Into<String>) {
        self.push_output(Some(code), "", stderr);
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.lock().responses.push_back(Ok(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }));
    }

    /// Pushes a runner-level failure (spawn error, timeout, interrupt).
    pub fn push_error(&self, error: RunnerError) {
        self.lock().responses.push_back(Err(error));
    }

    fn record(&self, invocation: &Invocation) -> Result<CommandOutput, RunnerError> {
        let mut state = self.lock();
        state.invocations.push(CommandInvocation {
            program: invocation.program.clone(),
            args: invocation
                .args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned())
                .collect(),
            env_keys: invocation.envs.iter().map(|(key, _)| key.clone()).collect(),
            stdin: invocation
                .stdin
                .as_ref()
                .map(|payload| payload.expose_secret().to_owned()),
            current_dir: invocation.current_dir.clone(),
        });
        state.responses.pop_front().unwrap_or_else(|| {
            Err(RunnerError::Spawn {
                program: invocation.program.clone(),
                message: String::from("no scripted response available"),
            })
        })
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(&'a self, invocation: &'a Invocation) -> RunnerFuture<'a> {
        let result = self.record(invocation);
        Box::pin(async move { result })
    }
}

/// In-memory [`ConfigRepository`] that counts saves.
#[derive(Clone, Debug, Default)]
pub struct MemoryConfigStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    config: Option<Configuration>,
    saves: usize,
    fail_saves: bool,
}

impl MemoryConfigStore {
    /// Store seeded with `config`.
    #[must_use]
    pub fn with(config: Configuration) -> Self {
        let store = Self::default();
        store.lock().config = Some(config);
        store
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Currently stored configuration.
    #[must_use]
    pub fn current(&self) -> Option<Configuration> {
        self.lock().config.clone()
    }

    /// Number of successful saves.
    #[must_use]
    pub fn saves(&self) -> usize {
        self.lock().saves
    }

    /// Makes every later save fail with an I/O error.
    pub fn fail_saves(&self) {
        self.lock().fail_saves = true;
    }
}

impl ConfigRepository for MemoryConfigStore {
    fn load(&self) -> Result<Option<Configuration>, ConfigStoreError> {
        Ok(self.current())
    }

    fn save(&self, config: &Configuration) -> Result<Utf8PathBuf, ConfigStoreError> {
        let mut state = self.lock();
        let path = Utf8PathBuf::from("memory://config.toml");
        if state.fail_saves {
            return Err(ConfigStoreError::Io {
                path,
                message: String::from("simulated write failure"),
            });
        }
        state.config = Some(config.clone());
        state.saves += 1;
        Ok(path)
    }
}
