//! Tool settings loaded via `ortho-config`.
//!
//! These are not part of a project's configuration: they say where the
//! backend tools live and how long each class of external call may block.

use std::ffi::OsString;
use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Settings derived from defaults, `opencodespace.toml`, and
/// `OPENCODESPACE_*` environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "OPENCODESPACE",
    discovery(
        app_name = "opencodespace",
        env_var = "OPENCODESPACE_CONFIG_PATH",
        config_file_name = "opencodespace.toml",
        dotfile_name = ".opencodespace.toml",
        project_file_name = "opencodespace.toml"
    )
)]
pub struct Settings {
    /// Container engine CLI.
    #[ortho_config(default = "docker".to_owned())]
    pub docker_bin: String,
    /// Remote platform CLI.
    #[ortho_config(default = "flyctl".to_owned())]
    pub flyctl_bin: String,
    /// Organisation used when creating remote applications.
    #[ortho_config(default = "personal".to_owned())]
    pub fly_org: String,
    /// Image builds may take this long.
    #[ortho_config(default = 1800)]
    pub build_timeout_secs: u64,
    /// Container create/start calls may take this long.
    #[ortho_config(default = 120)]
    pub run_timeout_secs: u64,
    /// Grace period handed to the engine before it kills the container.
    #[ortho_config(default = 10)]
    pub stop_grace_secs: u64,
    /// Stop calls may take this long before escalating to a forced stop.
    #[ortho_config(default = 30)]
    pub stop_timeout_secs: u64,
    /// Short inspection calls (inspect, info, status) may take this long.
    #[ortho_config(default = 30)]
    pub probe_timeout_secs: u64,
    /// One remote deploy attempt may take this long.
    #[ortho_config(default = 900)]
    pub remote_deploy_timeout_secs: u64,
    /// Other remote platform calls may take this long.
    #[ortho_config(default = 120)]
    pub remote_command_timeout_secs: u64,
    /// Remote deploy attempts before giving up on timeouts.
    #[ortho_config(default = 3)]
    pub remote_deploy_attempts: u32,
    /// Base backoff between retries; attempt `n` waits `n` times this.
    #[ortho_config(default = 2000)]
    pub retry_backoff_ms: u64,
}

impl Settings {
    /// Built-in defaults, matching the values the loader falls back to.
    #[must_use]
    pub fn builtin() -> Self {
        Self {
            docker_bin: String::from("docker"),
            flyctl_bin: String::from("flyctl"),
            fly_org: String::from("personal"),
            build_timeout_secs: 1800,
            run_timeout_secs: 120,
            stop_grace_secs: 10,
            stop_timeout_secs: 30,
            probe_timeout_secs: 30,
            remote_deploy_timeout_secs: 900,
            remote_command_timeout_secs: 120,
            remote_deploy_attempts: 3,
            retry_backoff_ms: 2000,
        }
    }

    /// Loads settings without attempting to parse CLI arguments. Values merge
    /// defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Parse`] when the merge fails, or
    /// [`SettingsError::Invalid`] when a merged value is unusable.
    pub fn load_without_cli_args() -> Result<Self, SettingsError> {
        let settings = Self::load_from_iter([OsString::from("opencodespace")])
            .map_err(|err| SettingsError::Parse(err.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects empty binaries and zero timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Invalid`] naming the first bad field.
    pub fn validate(&self) -> Result<(), SettingsError> {
        Self::require_text(&self.docker_bin, "docker_bin")?;
        Self::require_text(&self.flyctl_bin, "flyctl_bin")?;
        Self::require_text(&self.fly_org, "fly_org")?;
        for (value, field) in [
            (self.build_timeout_secs, "build_timeout_secs"),
            (self.run_timeout_secs, "run_timeout_secs"),
            (self.stop_timeout_secs, "stop_timeout_secs"),
            (self.probe_timeout_secs, "probe_timeout_secs"),
            (self.remote_deploy_timeout_secs, "remote_deploy_timeout_secs"),
            (self.remote_command_timeout_secs, "remote_command_timeout_secs"),
        ] {
            if value == 0 {
                return Err(SettingsError::invalid(field, "must be greater than zero"));
            }
        }
        if self.remote_deploy_attempts == 0 {
            return Err(SettingsError::invalid(
                "remote_deploy_attempts",
                "must be at least one",
            ));
        }
        Ok(())
    }

    fn require_text(value: &str, field: &str) -> Result<(), SettingsError> {
        if value.trim().is_empty() {
            return Err(SettingsError::invalid(field, "must not be empty"));
        }
        Ok(())
    }

    /// Backoff before retry number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

/// Errors raised while loading tool settings.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SettingsError {
    /// Surfaces errors from the `ortho-config` loader.
    #[error("settings parsing failed: {0}")]
    Parse(String),
    /// Raised when a merged value is unusable.
    #[error("invalid {field}: {message}; set OPENCODESPACE_{env_suffix} or fix {field} in opencodespace.toml", env_suffix = field.to_uppercase())]
    Invalid {
        /// Offending setting.
        field: String,
        /// What is wrong with it.
        message: String,
    },
}

impl SettingsError {
    fn invalid(field: &str, message: &str) -> Self {
        Self::Invalid {
            field: field.to_owned(),
            message: message.to_owned(),
        }
    }
}

impl From<ortho_config::OrthoError> for SettingsError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
