//! Persistent project configuration with atomic writes.
//!
//! The configuration lives at `<project>/.opencodespace/config.toml` unless an
//! explicit path is supplied. Writes render to a sibling temporary file, sync
//! it, and rename it over the target, so a crash mid-write leaves the last
//! good file in place.

use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::toml;
use thiserror::Error;
use tracing::debug;

use crate::config::Configuration;

/// Directory inside the project that holds generated state.
pub const STATE_DIR_NAME: &str = ".opencodespace";
const CONFIG_FILE_NAME: &str = "config.toml";
const TEMP_SUFFIX: &str = ".tmp";

/// Errors raised while reading or writing the configuration file.
#[derive(Debug, Error)]
pub enum ConfigStoreError {
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when parsing existing TOML content fails.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the configuration cannot be rendered.
    #[error("failed to render configuration for {path}: {message}")]
    Render {
        /// Destination path.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the path has no file name component.
    #[error("configuration path {path} is missing a file name")]
    InvalidPath {
        /// Offending path.
        path: Utf8PathBuf,
    },
}

/// Abstraction over configuration persistence for dependency injection.
pub trait ConfigRepository {
    /// Reads the configuration, returning `None` when no file exists yet.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigStoreError`] when the file exists but cannot be read
    /// or parsed.
    fn load(&self) -> Result<Option<Configuration>, ConfigStoreError>;

    /// Replaces the persisted configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigStoreError`] when rendering or writing fails; the
    /// previously persisted file is left untouched in that case.
    fn save(&self, config: &Configuration) -> Result<Utf8PathBuf, ConfigStoreError>;
}

/// TOML file store for one project configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConfigStore {
    path: Utf8PathBuf,
}

impl ConfigStore {
    /// Store at the default location inside `project_path`.
    #[must_use]
    pub fn for_project(project_path: &Utf8Path) -> Self {
        Self {
            path: project_path.join(STATE_DIR_NAME).join(CONFIG_FILE_NAME),
        }
    }

    /// Store at an explicit path.
    #[must_use]
    pub fn at(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the configuration file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl ConfigRepository for ConfigStore {
    fn load(&self) -> Result<Option<Configuration>, ConfigStoreError> {
        let (dir, file_name) = match open_parent(&self.path) {
            Ok(found) => found,
            Err(ConfigStoreError::Io { .. }) if !parent_of(&self.path).exists() => {
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        let exists = dir
            .try_exists(file_name)
            .map_err(|err| io_error(&self.path, &err))?;
        if !exists {
            return Ok(None);
        }

        let contents = dir
            .read_to_string(file_name)
            .map_err(|err| io_error(&self.path, &err))?;
        parse_config(&self.path, &contents).map(Some)
    }

    fn save(&self, config: &Configuration) -> Result<Utf8PathBuf, ConfigStoreError> {
        let rendered = render_config(&self.path, config)?;
        let parent = parent_of(&self.path);
        Dir::create_ambient_dir_all(parent, ambient_authority())
            .map_err(|err| io_error(parent, &err))?;
        let (dir, file_name) = open_parent(&self.path)?;
        write_atomic(&dir, &self.path, file_name, &rendered)?;
        debug!(path = %self.path, "configuration saved");
        Ok(self.path.clone())
    }
}

fn parent_of(path: &Utf8Path) -> &Utf8Path {
    path.parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."))
}

fn open_parent(path: &Utf8Path) -> Result<(Dir, &str), ConfigStoreError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| ConfigStoreError::InvalidPath {
            path: path.to_path_buf(),
        })?;
    let parent = parent_of(path);
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| io_error(parent, &err))?;
    Ok((dir, file_name))
}

fn write_atomic(
    dir: &Dir,
    path: &Utf8Path,
    file_name: &str,
    rendered: &str,
) -> Result<(), ConfigStoreError> {
    let temp_name = format!("{file_name}{TEMP_SUFFIX}");
    let result = write_temp(dir, &temp_name, rendered)
        .and_then(|()| dir.rename(&temp_name, dir, file_name));
    if let Err(err) = result {
        dir.remove_file(&temp_name).ok();
        return Err(io_error(path, &err));
    }
    Ok(())
}

fn write_temp(dir: &Dir, temp_name: &str, rendered: &str) -> io::Result<()> {
    let mut file = dir.create(temp_name)?;
    file.write_all(rendered.as_bytes())?;
    file.sync_all()
}

fn parse_config(path: &Utf8Path, contents: &str) -> Result<Configuration, ConfigStoreError> {
    toml::from_str(contents).map_err(|err| ConfigStoreError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

fn render_config(path: &Utf8Path, config: &Configuration) -> Result<String, ConfigStoreError> {
    toml::to_string_pretty(config).map_err(|err| ConfigStoreError::Render {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

fn io_error(path: &Utf8Path, err: &io::Error) -> ConfigStoreError {
    ConfigStoreError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
