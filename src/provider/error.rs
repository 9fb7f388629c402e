//! Error types shared by provider implementations.

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::config::SecretError;
use crate::runner::RunnerError;

/// Raised when a backend tool is missing, unreachable, or unauthenticated.
/// Always reported before any mutating call.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RequirementError {
    /// The tool could not be executed at all.
    #[error("{tool} is not available: {message}; install it or point {setting} at it")]
    MissingTool {
        /// Program that was looked up.
        tool: String,
        /// Setting that selects the program (for example `OPENCODESPACE_DOCKER_BIN`).
        setting: String,
        /// Underlying spawn or exit diagnostic.
        message: String,
    },
    /// The tool runs but its daemon or API cannot be reached.
    #[error("{tool} is installed but unreachable: {detail}")]
    Unreachable {
        /// Program that was probed.
        tool: String,
        /// Backend diagnostic output.
        detail: String,
    },
    /// The tool has no usable credentials.
    #[error("{tool} is not authenticated: {detail}; set {env_var} or log in with the tool")]
    MissingAuthentication {
        /// Program that was probed.
        tool: String,
        /// Environment variable that would satisfy the check.
        env_var: String,
        /// Backend diagnostic output.
        detail: String,
    },
    /// The user interrupted the check.
    #[error("requirement check for {tool} was interrupted")]
    Interrupted {
        /// Program that was running.
        tool: String,
    },
}

/// Raised while a lifecycle operation is mutating the backend.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Image build failed.
    #[error("failed to build image {image}: {output}")]
    Build {
        /// Image tag being built.
        image: String,
        /// Backend build output.
        output: String,
    },
    /// Creating or starting the container failed.
    #[error("failed to start container {container}: {output}")]
    Run {
        /// Container name.
        container: String,
        /// Backend diagnostic output.
        output: String,
    },
    /// The environment could not be stopped, even by force.
    #[error("failed to stop {resource}: {output}")]
    Stop {
        /// Container or application name.
        resource: String,
        /// Backend diagnostic output.
        output: String,
    },
    /// Releasing the backend resource failed.
    #[error("failed to remove {resource}: {output}")]
    Remove {
        /// Container, image, or application name.
        resource: String,
        /// Backend diagnostic output.
        output: String,
    },
    /// A remote platform call failed.
    #[error("remote {action} for {app} failed: {output}{}", status_suffix(.last_status.as_deref()))]
    Remote {
        /// Application name.
        app: String,
        /// Step that failed (for example `deploy`).
        action: String,
        /// Platform diagnostic output.
        output: String,
        /// Last status the platform reported, when obtainable.
        last_status: Option<String>,
    },
    /// Backend output could not be understood.
    #[error("unexpected output from {command}: {message}")]
    Parse {
        /// Command whose output was parsed.
        command: String,
        /// Parser diagnostic.
        message: String,
    },
    /// Writing generated build files failed.
    #[error("failed to write {path}: {message}")]
    Io {
        /// File or directory being written.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// A secret reference could not be resolved.
    #[error(transparent)]
    Secret(#[from] SecretError),
    /// The command runner failed (spawn, timeout, or interrupt).
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

impl DeployError {
    /// Returns `true` when the user interrupted a blocking call.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, Self::Runner(RunnerError::Interrupted { .. }))
    }

    /// Returns `true` when a call exceeded its timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Runner(RunnerError::Timeout { .. }))
    }
}

fn status_suffix(status: Option<&str>) -> String {
    status.map_or_else(String::new, |text| format!(" (last status: {text})"))
}
