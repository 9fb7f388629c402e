//! Container engine invocations.
//!
//! Builders only; nothing here executes a process.

use std::collections::BTreeMap;
use std::time::Duration;

use camino::Utf8Path;
use secrecy::{ExposeSecret, SecretString};

use crate::config::Configuration;
use crate::environment::WORKSPACE_DIR;
use crate::runner::{CommandOutput, Invocation};
use crate::settings::Settings;

/// Label carrying the container fingerprint.
pub(super) const FINGERPRINT_LABEL: &str = "opencodespace.fingerprint";
/// Label carrying the project path.
pub(super) const PROJECT_LABEL: &str = "opencodespace.project";

pub(super) const SSH_KEY_TARGET: &str = "/home/coder/.ssh/id_host";
pub(super) const SSH_AGENT_TARGET: &str = "/ssh-agent";
pub(super) const VSCODE_SETTINGS_TARGET: &str = "/home/coder/.opencodespace/vscode-settings.json";
pub(super) const CURSOR_SETTINGS_TARGET: &str = "/home/coder/.opencodespace/cursor-settings.json";

const INSPECT_FORMAT: &str =
    "{{.State.Running}} {{index .Config.Labels \"opencodespace.fingerprint\"}}";

/// Observed state of a container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(super) struct ContainerStatus {
    pub running: bool,
    pub fingerprint: Option<String>,
}

pub(super) fn version(settings: &Settings) -> Invocation {
    Invocation::new(&settings.docker_bin, secs(settings.probe_timeout_secs)).arg("--version")
}

pub(super) fn info(settings: &Settings) -> Invocation {
    Invocation::new(&settings.docker_bin, secs(settings.probe_timeout_secs))
        .args(["info", "--format", "{{.ServerVersion}}"])
}

pub(super) fn inspect_container(settings: &Settings, container: &str) -> Invocation {
    Invocation::new(&settings.docker_bin, secs(settings.probe_timeout_secs))
        .args(["container", "inspect", "--format", INSPECT_FORMAT, container])
}

pub(super) fn inspect_image(settings: &Settings, image: &str) -> Invocation {
    Invocation::new(&settings.docker_bin, secs(settings.probe_timeout_secs))
        .args(["image", "inspect", "--format", "{{.Id}}", image])
}

pub(super) fn build(
    settings: &Settings,
    image: &str,
    dockerfile: &Utf8Path,
    context: &Utf8Path,
) -> Invocation {
    Invocation::new(&settings.docker_bin, secs(settings.build_timeout_secs))
        .args(["build", "--tag", image, "--file"])
        .arg(dockerfile.as_str())
        .arg(context.as_str())
}

pub(super) fn start(settings: &Settings, container: &str) -> Invocation {
    Invocation::new(&settings.docker_bin, secs(settings.run_timeout_secs))
        .args(["start", container])
}

pub(super) fn stop(settings: &Settings, container: &str) -> Invocation {
    Invocation::new(&settings.docker_bin, secs(settings.stop_timeout_secs))
        .args(["stop", "--time"])
        .arg(settings.stop_grace_secs.to_string())
        .arg(container)
}

pub(super) fn kill(settings: &Settings, container: &str) -> Invocation {
    Invocation::new(&settings.docker_bin, secs(settings.stop_timeout_secs))
        .args(["kill", container])
}

pub(super) fn remove_container(settings: &Settings, container: &str) -> Invocation {
    Invocation::new(&settings.docker_bin, secs(settings.stop_timeout_secs))
        .args(["rm", "--force", container])
}

pub(super) fn remove_image(settings: &Settings, image: &str) -> Invocation {
    Invocation::new(&settings.docker_bin, secs(settings.stop_timeout_secs))
        .args(["image", "rm", image])
}

/// Everything `docker run` needs for one container.
pub(super) struct RunSpec<'a> {
    pub container: &'a str,
    pub image: &'a str,
    pub fingerprint: &'a str,
    pub env: &'a BTreeMap<String, String>,
    pub secrets: &'a BTreeMap<String, SecretString>,
}

/// Arguments after `docker`, excluding secret values.
pub(super) fn run_args(config: &Configuration, spec: &RunSpec<'_>) -> Vec<String> {
    let mut args = vec![
        String::from("run"),
        String::from("--detach"),
        String::from("--name"),
        spec.container.to_owned(),
        String::from("--label"),
        format!("{FINGERPRINT_LABEL}={}", spec.fingerprint),
        String::from("--label"),
        format!("{PROJECT_LABEL}={}", config.project_path),
    ];
    for mapping in &config.ports {
        args.push(String::from("--publish"));
        args.push(format!("{}:{}", mapping.host, mapping.container));
    }
    for volume in volumes(config) {
        args.push(String::from("--volume"));
        args.push(volume);
    }
    if let Some(cpus) = config.resources.cpus {
        args.push(String::from("--cpus"));
        args.push(cpus.to_string());
    }
    if let Some(memory) = config.resources.memory_mb {
        args.push(String::from("--memory"));
        args.push(format!("{memory}m"));
    }
    for (key, value) in spec.env {
        args.push(String::from("--env"));
        args.push(format!("{key}={value}"));
    }
    // Bare `--env KEY` makes docker copy the value from its own environment.
    for key in spec.secrets.keys() {
        args.push(String::from("--env"));
        args.push(key.clone());
    }
    args.push(spec.image.to_owned());
    args
}

pub(super) fn run(settings: &Settings, config: &Configuration, spec: &RunSpec<'_>) -> Invocation {
    let mut invocation = Invocation::new(&settings.docker_bin, secs(settings.run_timeout_secs))
        .args(run_args(config, spec));
    for (key, value) in spec.secrets {
        invocation = invocation.secret_env(
            key.clone(),
            SecretString::from(value.expose_secret().to_owned()),
        );
    }
    invocation
}

fn volumes(config: &Configuration) -> Vec<String> {
    let mut volumes = Vec::new();
    if config.upload_folder {
        volumes.push(format!("{}:{WORKSPACE_DIR}", config.project_path));
    }
    if let Some(key) = &config.git.ssh_key_path {
        volumes.push(format!("{key}:{SSH_KEY_TARGET}:ro"));
    }
    if let Some(socket) = &config.git.ssh_agent_socket {
        volumes.push(format!("{socket}:{SSH_AGENT_TARGET}"));
    }
    if config.editor.copy_settings {
        if let Some(path) = &config.editor.vscode_settings_path {
            volumes.push(format!("{path}:{VSCODE_SETTINGS_TARGET}:ro"));
        }
        if let Some(path) = &config.editor.cursor_settings_path {
            volumes.push(format!("{path}:{CURSOR_SETTINGS_TARGET}:ro"));
        }
    }
    for mount in &config.mounts {
        let suffix = if mount.read_only { ":ro" } else { "" };
        volumes.push(format!("{}:{}{suffix}", mount.source, mount.target));
    }
    volumes
}

/// Interprets `docker container inspect` output. `None` means the container
/// does not exist.
pub(super) fn parse_inspect(output: &CommandOutput) -> Option<Result<ContainerStatus, String>> {
    if !output.is_success() {
        if is_missing(output) {
            return None;
        }
        return Some(Err(output.diagnostic()));
    }
    let text = output.stdout.trim();
    let (state, raw_label) = text.split_once(' ').unwrap_or((text, ""));
    let running = match state {
        "true" => true,
        "false" => false,
        other => return Some(Err(format!("unrecognised container state '{other}'"))),
    };
    let label = raw_label.trim();
    let fingerprint = (!label.is_empty() && label != "<no value>").then(|| label.to_owned());
    Some(Ok(ContainerStatus {
        running,
        fingerprint,
    }))
}

/// Whether a failed call reports a missing container or image.
pub(super) fn is_missing(output: &CommandOutput) -> bool {
    let text = output.stderr.to_ascii_lowercase();
    text.contains("no such container") || text.contains("no such image")
}

/// Whether a failed stop or kill reports a container that is already down.
pub(super) fn is_not_running(output: &CommandOutput) -> bool {
    is_missing(output) || output.stderr.to_ascii_lowercase().contains("is not running")
}

const fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}
