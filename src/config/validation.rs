//! Validation rules shared by every provider.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use thiserror::Error;

use super::{
    MountSpec, PASSWORD_SECRET, PortMapping, ResourceLimits, SecretRef, unresolved_secret_keys,
};

/// A single field that failed validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{field}: {message}")]
pub struct ConfigValidationError {
    /// Dotted path of the offending field (for example `ports[1].host`).
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl ConfigValidationError {
    /// Creates a validation error for `field`.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Every validation failure found in one pass.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ValidationErrors(pub Vec<ConfigValidationError>);

impl ValidationErrors {
    /// Returns the individual errors.
    #[must_use]
    pub fn errors(&self) -> &[ConfigValidationError] {
        &self.0
    }

    /// Returns `true` when some error names `field`.
    #[must_use]
    pub fn mentions(&self, field: &str) -> bool {
        self.0.iter().any(|err| err.field == field)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} configuration problem(s)", self.0.len())?;
        for err in &self.0 {
            write!(formatter, "\n  - {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

pub(super) fn require_text(errors: &mut Vec<ConfigValidationError>, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(ConfigValidationError::new(field, "must not be empty"));
    }
}

pub(super) fn check_ports(errors: &mut Vec<ConfigValidationError>, ports: &[PortMapping]) {
    let mut seen_container = BTreeSet::new();
    for (index, mapping) in ports.iter().enumerate() {
        if mapping.host == 0 {
            errors.push(ConfigValidationError::new(
                format!("ports[{index}].host"),
                "port 0 is not a valid host port",
            ));
        }
        if mapping.container == 0 {
            errors.push(ConfigValidationError::new(
                format!("ports[{index}].container"),
                "port 0 is not a valid container port",
            ));
        }
        if !seen_container.insert(mapping.container) {
            errors.push(ConfigValidationError::new(
                format!("ports[{index}].container"),
                format!("container port {} is mapped more than once", mapping.container),
            ));
        }
    }
}

/// Reports host ports claimed by more than one mapping.
#[must_use]
pub fn host_port_conflicts(ports: &[PortMapping]) -> Vec<ConfigValidationError> {
    let mut first_use: BTreeMap<u16, usize> = BTreeMap::new();
    let mut errors = Vec::new();
    for (index, mapping) in ports.iter().enumerate() {
        if let Some(previous) = first_use.get(&mapping.host) {
            errors.push(ConfigValidationError::new(
                format!("ports[{index}].host"),
                format!(
                    "host port {} conflicts with ports[{previous}]",
                    mapping.host
                ),
            ));
        } else {
            first_use.insert(mapping.host, index);
        }
    }
    errors
}

pub(super) fn check_mounts(errors: &mut Vec<ConfigValidationError>, mounts: &[MountSpec]) {
    let mut targets = BTreeSet::new();
    for (index, mount) in mounts.iter().enumerate() {
        if mount.source.trim().is_empty() {
            errors.push(ConfigValidationError::new(
                format!("mounts[{index}].source"),
                "must not be empty",
            ));
        }
        if !mount.target.starts_with('/') {
            errors.push(ConfigValidationError::new(
                format!("mounts[{index}].target"),
                format!("{} must be an absolute path", mount.target),
            ));
        }
        if !targets.insert(mount.target.as_str()) {
            errors.push(ConfigValidationError::new(
                format!("mounts[{index}].target"),
                format!("{} is mounted more than once", mount.target),
            ));
        }
    }
}

pub(super) fn check_resources(errors: &mut Vec<ConfigValidationError>, resources: &ResourceLimits) {
    if resources.cpus == Some(0) {
        errors.push(ConfigValidationError::new(
            "resources.cpus",
            "must be greater than zero",
        ));
    }
    if resources.memory_mb == Some(0) {
        errors.push(ConfigValidationError::new(
            "resources.memory_mb",
            "must be greater than zero",
        ));
    }
}

pub(super) fn check_environment(
    errors: &mut Vec<ConfigValidationError>,
    env: &BTreeMap<String, String>,
    secrets: &BTreeMap<String, SecretRef>,
) {
    for key in env.keys() {
        if !is_env_name(key) {
            errors.push(ConfigValidationError::new(
                format!("env.{key}"),
                "is not a valid environment variable name",
            ));
        }
        if secrets.contains_key(key) {
            errors.push(ConfigValidationError::new(
                format!("env.{key}"),
                "is also declared under [secrets]; keep each name in one table",
            ));
        }
    }
    for key in secrets.keys() {
        if !is_env_name(key) {
            errors.push(ConfigValidationError::new(
                format!("secrets.{key}"),
                "is not a valid environment variable name",
            ));
        }
    }
    for key in unresolved_secret_keys(secrets) {
        errors.push(ConfigValidationError::new(
            format!("secrets.{key}"),
            "references an environment variable that is not set",
        ));
    }
}

pub(super) fn check_password(
    errors: &mut Vec<ConfigValidationError>,
    password: &SecretRef,
    env: &BTreeMap<String, String>,
    secrets: &BTreeMap<String, SecretRef>,
) {
    if env.contains_key(PASSWORD_SECRET) || secrets.contains_key(PASSWORD_SECRET) {
        errors.push(ConfigValidationError::new(
            "editor.password",
            format!("{PASSWORD_SECRET} is also declared under [env] or [secrets]; keep one"),
        ));
    }
    match password {
        SecretRef::Literal(value) if value.is_empty() => errors.push(ConfigValidationError::new(
            "editor.password",
            "must not be empty",
        )),
        SecretRef::FromEnv { .. } if password.resolve(PASSWORD_SECRET).is_err() => {
            errors.push(ConfigValidationError::new(
                "editor.password",
                "references an environment variable that is not set",
            ));
        }
        SecretRef::Literal(_) | SecretRef::FromEnv { .. } => {}
    }
}

fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first == '_' || first.is_ascii_alphabetic())
        && chars.all(|ch| ch == '_' || ch.is_ascii_alphanumeric())
}
