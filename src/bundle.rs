//! Build resources embedded in the binary and written next to the project.
//!
//! Both providers build the same image: the code-server base plus the
//! entrypoint that wires git, SSH, extensions, and settings at start-up.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};

use crate::config_store::STATE_DIR_NAME;
use crate::environment::WORKSPACE_DIR;
use crate::provider::{DeployError, digest};

const DOCKERFILE_TEMPLATE: &str = include_str!("assets/Dockerfile");
const ENTRYPOINT: &str = include_str!("assets/entrypoint.sh");

/// Directory under `.opencodespace` holding generated build files.
pub const BUILD_DIR_NAME: &str = "build";
const DOCKERFILE_NAME: &str = "Dockerfile";
const ENTRYPOINT_NAME: &str = "entrypoint.sh";
// BuildKit picks up `<Dockerfile>.dockerignore` next to the Dockerfile.
const IGNORE_NAME: &str = "Dockerfile.dockerignore";

/// Where the build context is rooted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BuildContext {
    /// Only the generated build directory; the project is mounted at run time.
    BundleOnly,
    /// The project directory, copied into the image workspace.
    Project,
}

/// Rendered build files for one project.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuildBundle {
    dockerfile: String,
    ignore: String,
    context: BuildContext,
}

impl BuildBundle {
    /// Renders the Dockerfile for `context`, exposing `port`.
    #[must_use]
    pub fn render(context: BuildContext, port: u16) -> Self {
        let (entrypoint, copy, ignore) = match context {
            BuildContext::BundleOnly => (
                String::from(ENTRYPOINT_NAME),
                String::new(),
                format!("{STATE_DIR_NAME}\n"),
            ),
            // The state directory holds literal secrets and must stay out of
            // the image; only the entrypoint is let back in.
            BuildContext::Project => {
                let script = format!("{STATE_DIR_NAME}/{BUILD_DIR_NAME}/{ENTRYPOINT_NAME}");
                let patterns = format!("{STATE_DIR_NAME}\n!{script}\n");
                (
                    script,
                    format!("COPY --chown=coder:coder . {WORKSPACE_DIR}"),
                    patterns,
                )
            }
        };
        let dockerfile = DOCKERFILE_TEMPLATE
            .replace("{{ENTRYPOINT}}", &entrypoint)
            .replace("{{PROJECT_COPY}}", &copy)
            .replace("{{PORT}}", &port.to_string());
        Self {
            dockerfile,
            ignore,
            context,
        }
    }

    /// Rendered Dockerfile text.
    #[must_use]
    pub fn dockerfile(&self) -> &str {
        &self.dockerfile
    }

    /// Rendered ignore patterns for the build context.
    #[must_use]
    pub fn ignore(&self) -> &str {
        &self.ignore
    }

    /// Content hash of every build file plus `extra` inputs.
    #[must_use]
    pub fn fingerprint(&self, extra: &[&str]) -> String {
        let mut parts = vec![self.dockerfile.as_str(), ENTRYPOINT, self.ignore.as_str()];
        parts.extend_from_slice(extra);
        digest(parts)
    }

    /// Directory the files are written to.
    #[must_use]
    pub fn directory(project_path: &Utf8Path) -> Utf8PathBuf {
        project_path.join(STATE_DIR_NAME).join(BUILD_DIR_NAME)
    }

    /// Directory docker should use as build context.
    #[must_use]
    pub fn context_dir(&self, project_path: &Utf8Path) -> Utf8PathBuf {
        match self.context {
            BuildContext::BundleOnly => Self::directory(project_path),
            BuildContext::Project => project_path.to_path_buf(),
        }
    }

    /// Writes the Dockerfile, entrypoint, and ignore file, returning the path
    /// of the Dockerfile.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::Io`] when the directory or a file cannot be
    /// written.
    pub fn write(&self, project_path: &Utf8Path) -> Result<Utf8PathBuf, DeployError> {
        let dir_path = Self::directory(project_path);
        let io_error = |err: std::io::Error| DeployError::Io {
            path: dir_path.clone(),
            message: err.to_string(),
        };
        Dir::create_ambient_dir_all(&dir_path, ambient_authority()).map_err(io_error)?;
        let dir = Dir::open_ambient_dir(&dir_path, ambient_authority()).map_err(io_error)?;
        for (name, contents) in [
            (DOCKERFILE_NAME, self.dockerfile.as_str()),
            (ENTRYPOINT_NAME, ENTRYPOINT),
            (IGNORE_NAME, self.ignore.as_str()),
        ] {
            dir.write(name, contents).map_err(|err| DeployError::Io {
                path: dir_path.join(name),
                message: err.to_string(),
            })?;
        }
        Ok(dir_path.join(DOCKERFILE_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    fn bundle_only_context_does_not_copy_project() {
        let bundle = BuildBundle::render(BuildContext::BundleOnly, 8080);
        assert!(bundle.dockerfile().contains("COPY entrypoint.sh "));
        assert!(!bundle.dockerfile().contains("COPY --chown"));
        assert!(bundle.dockerfile().contains("EXPOSE 8080"));
        assert!(!bundle.dockerfile().contains("{{"));
    }

    #[rstest]
    fn project_context_copies_workspace() {
        let bundle = BuildBundle::render(BuildContext::Project, 3000);
        assert!(bundle
            .dockerfile()
            .contains("COPY .opencodespace/build/entrypoint.sh "));
        assert!(bundle
            .dockerfile()
            .contains("COPY --chown=coder:coder . /home/coder/workspace"));
    }

    /// Applies ignore patterns the way the builder does for plain paths:
    /// the last matching pattern wins and `!` re-includes.
    fn is_ignored(ignore: &str, path: &str) -> bool {
        let mut ignored = false;
        for line in ignore.lines().map(str::trim).filter(|line| !line.is_empty()) {
            let (negated, raw) = line
                .strip_prefix('!')
                .map_or((false, line), |rest| (true, rest));
            let pattern = raw.trim_end_matches('/');
            let matches = path == pattern
                || path
                    .strip_prefix(pattern)
                    .is_some_and(|rest| rest.starts_with('/'));
            if matches {
                ignored = !negated;
            }
        }
        ignored
    }

    fn copy_sources(dockerfile: &str) -> Vec<&str> {
        dockerfile
            .lines()
            .filter_map(|line| line.strip_prefix("COPY "))
            .flat_map(|rest| {
                let mut words: Vec<&str> = rest
                    .split_whitespace()
                    .filter(|word| !word.starts_with("--"))
                    .collect();
                words.pop();
                words
            })
            .collect()
    }

    #[rstest]
    #[case(BuildContext::BundleOnly)]
    #[case(BuildContext::Project)]
    fn copy_sources_survive_the_ignore_file(#[case] context: BuildContext) {
        let bundle = BuildBundle::render(context, 8080);
        let sources = copy_sources(bundle.dockerfile());

        assert!(!sources.is_empty());
        for source in sources {
            assert!(
                !is_ignored(bundle.ignore(), source),
                "{source} is excluded by {:?}",
                bundle.ignore()
            );
        }
    }

    #[rstest]
    fn project_context_keeps_state_directory_out_of_the_image() {
        let bundle = BuildBundle::render(BuildContext::Project, 8080);

        assert!(is_ignored(bundle.ignore(), ".opencodespace/config.toml"));
        assert!(is_ignored(bundle.ignore(), ".opencodespace/fly.toml"));
        assert!(!is_ignored(bundle.ignore(), ".opencodespace/build/entrypoint.sh"));
        assert!(!is_ignored(bundle.ignore(), "src/main.rs"));
    }

    #[rstest]
    fn fingerprint_tracks_inputs() {
        let bundle = BuildBundle::render(BuildContext::BundleOnly, 8080);
        assert_eq!(bundle.fingerprint(&["a"]), bundle.fingerprint(&["a"]));
        assert_ne!(bundle.fingerprint(&["a"]), bundle.fingerprint(&["b"]));
        let other_port = BuildBundle::render(BuildContext::BundleOnly, 9090);
        assert_ne!(bundle.fingerprint(&[]), other_port.fingerprint(&[]));
    }

    #[rstest]
    fn write_places_files_under_state_directory() {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let project = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("utf8 path: {}", path.display()));
        let bundle = BuildBundle::render(BuildContext::BundleOnly, 8080);

        let dockerfile = bundle
            .write(&project)
            .unwrap_or_else(|err| panic!("write bundle: {err}"));

        assert_eq!(dockerfile, project.join(".opencodespace/build/Dockerfile"));
        let entrypoint = std::fs::read_to_string(project.join(".opencodespace/build/entrypoint.sh"))
            .unwrap_or_else(|err| panic!("read entrypoint: {err}"));
        assert!(entrypoint.starts_with("#!/bin/sh"));
        let ignore = std::fs::read_to_string(project.join(".opencodespace/build/Dockerfile.dockerignore"))
            .unwrap_or_else(|err| panic!("read ignore file: {err}"));
        assert_eq!(ignore, bundle.ignore());
        assert_eq!(bundle.context_dir(&project), project.join(".opencodespace/build"));
    }
}
