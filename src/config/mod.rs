//! Project configuration: the typed description of one deployment request.
//!
//! The model is plain data persisted as TOML under
//! `<project>/.opencodespace/config.toml`. Secret references and plain
//! environment values live in structurally distinct tables so providers never
//! string-match to decide what must go through a secret store.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::DeploymentRecord;

mod validation;

pub use validation::{ConfigValidationError, ValidationErrors, host_port_conflicts};

/// Port the bundled editor server listens on inside the environment.
pub const EDITOR_PORT: u16 = 8080;

/// Provider selected when neither the configuration nor the CLI names one.
pub const DEFAULT_PROVIDER: &str = "local";

/// Default region for the remote platform.
pub const DEFAULT_REGION: &str = "ord";

/// Secret name the entrypoint reads the editor password from.
pub const PASSWORD_SECRET: &str = "PASSWORD";

/// Full description of what to deploy and where.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Configuration {
    /// Human-readable project name; seeds remote application names.
    pub name: String,
    /// Name of the active provider in the registry.
    #[serde(alias = "platform")]
    pub provider: String,
    /// Absolute path of the project directory.
    pub project_path: Utf8PathBuf,
    /// Whether the project directory is mounted (local) or shipped (remote).
    #[serde(default = "default_true")]
    pub upload_folder: bool,
    /// Host to environment port mappings.
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    /// Additional volume mounts.
    #[serde(default)]
    pub mounts: Vec<MountSpec>,
    /// Resource limits for the environment.
    #[serde(default)]
    pub resources: ResourceLimits,
    /// Plain (non-secret) environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Secret references, resolved only when a deploy needs them.
    #[serde(default)]
    pub secrets: BTreeMap<String, SecretRef>,
    /// Git identity and remote information.
    #[serde(default)]
    pub git: GitSettings,
    /// Editor settings and extension lists.
    #[serde(default)]
    pub editor: EditorSettings,
    /// Remote platform placement.
    #[serde(default)]
    pub remote: RemoteSettings,
    /// Record of the last deployment, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentRecord>,
}

const fn default_true() -> bool {
    true
}

impl Configuration {
    /// Builds the default configuration for a project directory that has no
    /// configuration file yet.
    #[must_use]
    pub fn for_project(path: impl Into<Utf8PathBuf>, provider: impl Into<String>) -> Self {
        let project_path = path.into();
        let name = project_path
            .file_name()
            .map_or_else(|| String::from("workspace"), ToOwned::to_owned);
        Self {
            name,
            provider: provider.into(),
            project_path,
            upload_folder: true,
            ports: vec![PortMapping {
                host: EDITOR_PORT,
                container: EDITOR_PORT,
            }],
            mounts: Vec::new(),
            resources: ResourceLimits::default(),
            env: BTreeMap::new(),
            secrets: BTreeMap::new(),
            git: GitSettings::default(),
            editor: EditorSettings::default(),
            remote: RemoteSettings::default(),
            deployment: None,
        }
    }

    /// Returns the deployment record when it belongs to the active provider.
    #[must_use]
    pub fn active_record(&self) -> Option<&DeploymentRecord> {
        self.deployment
            .as_ref()
            .filter(|record| record.provider == self.provider)
    }

    /// Port the environment serves the editor on: the first mapping's
    /// container port, or [`EDITOR_PORT`].
    #[must_use]
    pub fn service_port(&self) -> u16 {
        self.ports
            .first()
            .map_or(EDITOR_PORT, |mapping| mapping.container)
    }

    /// Resolves every secret reference, including the editor password.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError`] naming the first reference that cannot be
    /// resolved.
    pub fn resolve_secrets(&self) -> Result<BTreeMap<String, SecretString>, SecretError> {
        let mut resolved = self
            .secrets
            .iter()
            .map(|(key, reference)| reference.resolve(key).map(|value| (key.clone(), value)))
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        if let Some(password) = &self.editor.password {
            resolved.insert(
                String::from(PASSWORD_SECRET),
                password.resolve(PASSWORD_SECRET)?,
            );
        }
        Ok(resolved)
    }

    /// Checks provider-independent invariants and returns every violation.
    ///
    /// This is the only validation step that touches the filesystem: the
    /// project path must exist and be readable.
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();
        validation::require_text(&mut errors, "name", &self.name);
        validation::require_text(&mut errors, "provider", &self.provider);
        self.validate_project_path(&mut errors);
        validation::check_ports(&mut errors, &self.ports);
        errors.extend(host_port_conflicts(&self.ports));
        validation::check_mounts(&mut errors, &self.mounts);
        validation::check_resources(&mut errors, &self.resources);
        validation::check_environment(&mut errors, &self.env, &self.secrets);
        if let Some(password) = &self.editor.password {
            validation::check_password(&mut errors, password, &self.env, &self.secrets);
        }
        if let Some(record) = &self.deployment
            && record.provider != self.provider
        {
            errors.push(ConfigValidationError::new(
                "deployment.provider",
                format!(
                    "existing deployment belongs to provider '{}'; remove it before switching to '{}'",
                    record.provider, self.provider
                ),
            ));
        }
        errors
    }

    fn validate_project_path(&self, errors: &mut Vec<ConfigValidationError>) {
        if !self.project_path.is_absolute() {
            errors.push(ConfigValidationError::new(
                "project_path",
                format!("{} must be an absolute path", self.project_path),
            ));
            return;
        }
        if let Err(err) = readable_dir(&self.project_path) {
            errors.push(ConfigValidationError::new(
                "project_path",
                format!("{} is not a readable directory: {err}", self.project_path),
            ));
        }
    }
}

fn readable_dir(path: &Utf8Path) -> io::Result<()> {
    let dir = Dir::open_ambient_dir(path, ambient_authority())?;
    dir.entries()?;
    Ok(())
}

/// One host to environment port mapping.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PortMapping {
    /// Port bound on the host (local) or exposed publicly (remote).
    pub host: u16,
    /// Port inside the environment.
    pub container: u16,
}

/// An additional volume mount.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct MountSpec {
    /// Host path or named volume.
    pub source: String,
    /// Absolute path inside the environment.
    pub target: String,
    /// Mount read-only.
    #[serde(default)]
    pub read_only: bool,
}

/// Resource limits for the environment.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ResourceLimits {
    /// Number of CPUs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<u32>,
    /// Memory in mebibytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u32>,
}

/// Git identity and remote information handed to the environment.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct GitSettings {
    /// Remote to clone inside the environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    /// `user.name` for commits made in the environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    /// `user.email` for commits made in the environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    /// Private key used for git over SSH.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_path: Option<Utf8PathBuf>,
    /// Host SSH agent socket forwarded into local environments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_agent_socket: Option<Utf8PathBuf>,
}

/// Editor settings copied into the environment.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct EditorSettings {
    /// Whether settings files are copied at all.
    #[serde(default)]
    pub copy_settings: bool,
    /// VS Code `settings.json` on the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vscode_settings_path: Option<Utf8PathBuf>,
    /// Cursor `settings.json` on the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor_settings_path: Option<Utf8PathBuf>,
    /// VS Code extensions to install.
    #[serde(default)]
    pub vscode_extensions: Vec<String>,
    /// Cursor extensions to install.
    #[serde(default)]
    pub cursor_extensions: Vec<String>,
    /// Password protecting the editor; handed over as [`PASSWORD_SECRET`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<SecretRef>,
}

/// Placement on the remote platform.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RemoteSettings {
    /// Primary region.
    #[serde(default = "default_region")]
    pub region: String,
    /// Organisation that owns the application; falls back to tool settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
}

fn default_region() -> String {
    DEFAULT_REGION.to_owned()
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            region: default_region(),
            organization: None,
        }
    }
}

/// Reference to a secret value.
///
/// Literal values are written as plain strings; indirections as
/// `{ from_env = "VAR" }` and are read from the invoking environment at
/// deploy time.
#[derive(Clone, Deserialize, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SecretRef {
    /// Value stored directly in the configuration.
    Literal(String),
    /// Value read from an environment variable.
    FromEnv {
        /// Name of the variable holding the value.
        from_env: String,
    },
}

impl SecretRef {
    /// Resolves the reference to its value.
    ///
    /// # Errors
    ///
    /// Returns [`SecretError::MissingEnv`] when the referenced environment
    /// variable is unset or empty.
    pub fn resolve(&self, key: &str) -> Result<SecretString, SecretError> {
        match self {
            Self::Literal(value) => Ok(SecretString::from(value.clone())),
            Self::FromEnv { from_env } => match std::env::var(from_env) {
                Ok(value) if !value.is_empty() => Ok(SecretString::from(value)),
                _ => Err(SecretError::MissingEnv {
                    key: key.to_owned(),
                    env_var: from_env.clone(),
                }),
            },
        }
    }
}

impl fmt::Debug for SecretRef {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(_) => formatter.write_str("Literal([REDACTED])"),
            Self::FromEnv { from_env } => formatter
                .debug_struct("FromEnv")
                .field("from_env", from_env)
                .finish(),
        }
    }
}

/// Errors raised while resolving secret references.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SecretError {
    /// Raised when an environment-backed secret is not set.
    #[error("secret {key} reads {env_var}, which is not set")]
    MissingEnv {
        /// Secret name in the configuration.
        key: String,
        /// Environment variable that was consulted.
        env_var: String,
    },
}

/// Names of secret references whose environment variable is unset.
pub(crate) fn unresolved_secret_keys(secrets: &BTreeMap<String, SecretRef>) -> BTreeSet<String> {
    secrets
        .iter()
        .filter(|(key, reference)| reference.resolve(key).is_err())
        .map(|(key, _)| key.clone())
        .collect()
}

#[cfg(test)]
mod tests;
