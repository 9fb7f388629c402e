//! Remote platform provider.
//!
//! Deploys an application through the platform CLI: the app is created when
//! missing, secrets are staged in the platform's store, then the generated
//! manifest is deployed. Stopping scales the app to zero and keeps it;
//! removing destroys it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::bundle::{BuildBundle, BuildContext, BUILD_DIR_NAME};
use crate::config::{ConfigValidationError, Configuration};
use crate::config_store::STATE_DIR_NAME;
use crate::environment::base_environment;
use crate::provider::{
    Capabilities, DeployError, Provider, ProviderContext, ProviderDescriptor, ProviderFuture,
    ProviderKind, RemoveOptions, RequirementError, app_name, digest, slugify,
};
use crate::runner::{CommandOutput, CommandRunner, Interrupt, Invocation, RunnerError};
use crate::settings::Settings;
use crate::state::{DeploymentRecord, DeploymentState};

mod manifest;

use manifest::{MANIFEST_NAME, Manifest};

/// Registry name of the remote provider.
pub const NAME: &str = "remote";

/// Environment variables that authenticate the platform CLI.
pub const TOKEN_VARS: [&str; 2] = ["FLY_API_TOKEN", "FLY_ACCESS_TOKEN"];

/// Descriptor registered for the remote provider.
#[must_use]
pub fn descriptor() -> ProviderDescriptor {
    ProviderDescriptor {
        name: String::from(NAME),
        kind: ProviderKind::RemotePlatform,
        summary: String::from("Deploy the environment as an app on the remote platform"),
        capabilities: Capabilities {
            secrets: true,
            volumes: false,
            scale_to_zero: true,
        },
        requires: String::from("flyctl"),
    }
}

/// Provider backed by the remote platform CLI.
pub struct RemoteProvider {
    runner: Arc<dyn CommandRunner>,
    settings: Settings,
    interrupt: Interrupt,
}

struct RemotePlan {
    app: String,
    bundle: BuildBundle,
    manifest: String,
    secrets: BTreeMap<String, SecretString>,
    fingerprint: String,
}

#[derive(Debug, Deserialize)]
struct AppEntry {
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct MachineEntry {
    #[serde(default)]
    state: String,
}

impl RemoteProvider {
    /// Creates the provider from the shared context.
    #[must_use]
    pub fn new(context: &ProviderContext) -> Self {
        Self {
            runner: Arc::clone(&context.runner),
            settings: context.settings.clone(),
            interrupt: context.interrupt.clone(),
        }
    }

    fn command(&self) -> Invocation {
        Invocation::new(
            &self.settings.flyctl_bin,
            Duration::from_secs(self.settings.remote_command_timeout_secs),
        )
    }

    async fn call(&self, invocation: Invocation) -> Result<CommandOutput, RunnerError> {
        debug!(command = %invocation.display_command(), "platform call");
        self.runner.run(&invocation).await
    }

    fn remote_error(app: &str, action: &str, output: String) -> DeployError {
        DeployError::Remote {
            app: app.to_owned(),
            action: action.to_owned(),
            output,
            last_status: None,
        }
    }

    fn organization<'a>(&'a self, config: &'a Configuration) -> &'a str {
        config
            .remote
            .organization
            .as_deref()
            .unwrap_or(self.settings.fly_org.as_str())
    }

    fn plan(&self, config: &Configuration) -> Result<RemotePlan, DeployError> {
        let app = self.resource_name(config);
        let context = if config.upload_folder {
            BuildContext::Project
        } else {
            BuildContext::BundleOnly
        };
        let bundle = BuildBundle::render(context, config.service_port());
        // Relative to the manifest, which lives in the state directory.
        let dockerfile = format!("{BUILD_DIR_NAME}/Dockerfile");
        let manifest = Manifest::new(&app, config, &dockerfile, self.build_environment(config))
            .render()
            .map_err(|err| DeployError::Io {
                path: manifest_path(&config.project_path),
                message: err.to_string(),
            })?;
        let secrets = collect_secrets(config)?;

        let secret_parts: Vec<String> = secrets
            .iter()
            .map(|(key, value)| format!("{key}={}", value.expose_secret()))
            .collect();
        let secret_digest = digest(secret_parts.iter().map(String::as_str));
        let bundle_fingerprint = bundle.fingerprint(&[]);
        let fingerprint = digest([
            manifest.as_str(),
            bundle_fingerprint.as_str(),
            secret_digest.as_str(),
        ]);
        Ok(RemotePlan {
            app,
            bundle,
            manifest,
            secrets,
            fingerprint,
        })
    }

    async fn app_exists(&self, app: &str) -> Result<bool, DeployError> {
        let output = self.call(self.command().args(["apps", "list", "--json"])).await?;
        if !output.is_success() {
            return Err(Self::remote_error(app, "apps list", output.diagnostic()));
        }
        let apps: Vec<AppEntry> =
            serde_json::from_str(&output.stdout).map_err(|err| DeployError::Parse {
                command: String::from("flyctl apps list --json"),
                message: err.to_string(),
            })?;
        Ok(apps.iter().any(|entry| entry.name == app))
    }

    async fn last_status(&self, app: &str) -> Option<String> {
        let invocation = self.command().args(["status", "--app", app]);
        match self.call(invocation).await {
            Ok(output) if output.is_success() => Some(output.stdout.trim().to_owned()),
            _ => None,
        }
    }

    fn write_files(config: &Configuration, plan: &RemotePlan) -> Result<(), DeployError> {
        plan.bundle.write(&config.project_path)?;
        let state_dir = config.project_path.join(STATE_DIR_NAME);
        let io_error = |err: std::io::Error| DeployError::Io {
            path: state_dir.join(MANIFEST_NAME),
            message: err.to_string(),
        };
        let dir = Dir::open_ambient_dir(&state_dir, ambient_authority()).map_err(io_error)?;
        dir.write(MANIFEST_NAME, &plan.manifest).map_err(io_error)
    }

    async fn stage_secrets(&self, plan: &RemotePlan) -> Result<(), DeployError> {
        if plan.secrets.is_empty() {
            return Ok(());
        }
        info!(app = %plan.app, count = plan.secrets.len(), "staging secrets");
        let payload = plan
            .secrets
            .iter()
            .map(|(key, value)| import_line(key, value.expose_secret()))
            .collect::<Vec<_>>()
            .join("\n");
        let invocation = self
            .command()
            .args(["secrets", "import", "--app", plan.app.as_str(), "--stage"])
            .stdin(SecretString::from(payload));
        let output = self.call(invocation).await?;
        if !output.is_success() {
            return Err(Self::remote_error(
                &plan.app,
                "secrets import",
                output.diagnostic(),
            ));
        }
        Ok(())
    }

    fn deploy_invocation(&self, config: &Configuration, plan: &RemotePlan) -> Invocation {
        let context = plan.bundle.context_dir(&config.project_path);
        let manifest = manifest_path(&config.project_path);
        Invocation::new(
            &self.settings.flyctl_bin,
            Duration::from_secs(self.settings.remote_deploy_timeout_secs),
        )
        .arg("deploy")
        .arg(context.as_str())
        .arg("--config")
        .arg(manifest.as_str())
        .args(["--app", plan.app.as_str(), "--remote-only", "--yes"])
        .current_dir(context)
    }

    /// Runs the deploy call, retrying timeouts with increasing backoff.
    async fn deploy_with_retries(
        &self,
        config: &Configuration,
        plan: &RemotePlan,
    ) -> Result<(), DeployError> {
        let attempts = self.settings.remote_deploy_attempts;
        let mut attempt = 1;
        loop {
            info!(app = %plan.app, attempt, attempts, "deploying");
            match self.call(self.deploy_invocation(config, plan)).await {
                Ok(output) if output.is_success() => return Ok(()),
                Ok(output) => {
                    return Err(DeployError::Remote {
                        app: plan.app.clone(),
                        action: String::from("deploy"),
                        output: output.diagnostic(),
                        last_status: self.last_status(&plan.app).await,
                    });
                }
                Err(err @ RunnerError::Timeout { .. }) if attempt < attempts => {
                    let delay = self.settings.backoff(attempt);
                    warn!(
                        app = %plan.app,
                        attempt,
                        error = %err,
                        delay = ?delay,
                        "deploy timed out; retrying"
                    );
                    self.interrupt
                        .sleep(delay, &self.settings.flyctl_bin)
                        .await?;
                    attempt += 1;
                }
                Err(err @ RunnerError::Timeout { .. }) => {
                    return Err(DeployError::Remote {
                        app: plan.app.clone(),
                        action: String::from("deploy"),
                        output: format!("{err} (gave up after {attempts} attempts)"),
                        last_status: self.last_status(&plan.app).await,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn scale(&self, app: &str, count: u32) -> Result<CommandOutput, RunnerError> {
        self.call(self.command().args([
            "scale",
            "count",
            count.to_string().as_str(),
            "--app",
            app,
            "--yes",
        ]))
        .await
    }

    async fn deploy_inner(&self, config: &Configuration) -> Result<DeploymentRecord, DeployError> {
        let plan = self.plan(config)?;
        let previous = config.active_record();
        if let Some(record) = previous
            && record.handle == plan.app
            && record.is_running_with(&plan.fingerprint)
        {
            debug!(app = %plan.app, "deployment already running; nothing to do");
            return Ok(record.clone());
        }

        if self.app_exists(&plan.app).await? {
            info!(app = %plan.app, "updating existing app");
        } else {
            let org = self.organization(config);
            info!(app = %plan.app, org, "creating app");
            let output = self
                .call(
                    self.command()
                        .args(["apps", "create", plan.app.as_str(), "--org", org]),
                )
                .await?;
            if !output.is_success() {
                return Err(Self::remote_error(&plan.app, "apps create", output.diagnostic()));
            }
        }

        Self::write_files(config, &plan)?;
        self.stage_secrets(&plan).await?;
        self.deploy_with_retries(config, &plan).await?;

        if previous.is_some_and(|record| record.status == DeploymentState::Stopped) {
            info!(app = %plan.app, "resuming app scaled to zero");
            let output = self.scale(&plan.app, 1).await?;
            if !output.is_success() {
                return Err(Self::remote_error(&plan.app, "scale", output.diagnostic()));
            }
        }

        Ok(
            DeploymentRecord::new(&config.provider, &plan.app, DeploymentState::Running)
                .with_fingerprint(plan.fingerprint),
        )
    }

    async fn scale_to_zero(&self, app: &str) -> Result<(), DeployError> {
        info!(app, "scaling app to zero");
        let output = self.scale(app, 0).await?;
        if output.is_success() {
            Ok(())
        } else {
            Err(DeployError::Stop {
                resource: app.to_owned(),
                output: output.diagnostic(),
            })
        }
    }

    async fn stop_inner(&self, config: &Configuration) -> Result<(), DeployError> {
        let Some(record) = config.active_record() else {
            debug!("no deployment record; nothing to stop");
            return Ok(());
        };
        if matches!(
            record.status,
            DeploymentState::Absent | DeploymentState::Stopped | DeploymentState::Removed
        ) {
            debug!(app = %record.handle, status = %record.status, "nothing to stop");
            return Ok(());
        }
        self.scale_to_zero(&record.handle).await
    }

    async fn remove_inner(
        &self,
        config: &Configuration,
        options: RemoveOptions,
    ) -> Result<(), DeployError> {
        let record = config.active_record();
        let app = record.map_or_else(|| self.resource_name(config), |r| r.handle.clone());
        if options.purge_image {
            debug!(app = %app, "remote images are released with the app");
        }
        if !self.app_exists(&app).await? {
            debug!(app = %app, "app does not exist; nothing to remove");
            return Ok(());
        }
        if record.is_some_and(|r| {
            matches!(
                r.status,
                DeploymentState::Running
                    | DeploymentState::Building
                    | DeploymentState::Stopping
                    | DeploymentState::Failed
            )
        }) {
            self.scale_to_zero(&app).await?;
        }

        info!(app = %app, "destroying app");
        let output = self
            .call(self.command().args(["apps", "destroy", app.as_str(), "--yes"]))
            .await?;
        if !output.is_success() {
            return Err(DeployError::Remove {
                resource: app,
                output: output.diagnostic(),
            });
        }
        Ok(())
    }

    async fn probe_inner(&self, config: &Configuration) -> Result<DeploymentState, DeployError> {
        let app = config
            .active_record()
            .map_or_else(|| self.resource_name(config), |r| r.handle.clone());
        if !self.app_exists(&app).await? {
            return Ok(DeploymentState::Absent);
        }
        let output = self
            .call(
                self.command()
                    .args(["machines", "list", "--app", app.as_str(), "--json"]),
            )
            .await?;
        if !output.is_success() {
            return Err(Self::remote_error(&app, "machines list", output.diagnostic()));
        }
        let machines: Vec<MachineEntry> =
            serde_json::from_str(&output.stdout).map_err(|err| DeployError::Parse {
                command: String::from("flyctl machines list --json"),
                message: err.to_string(),
            })?;
        if machines.iter().any(|machine| machine.state == "started") {
            Ok(DeploymentState::Running)
        } else {
            Ok(DeploymentState::Stopped)
        }
    }

    async fn check_requirements_inner(&self) -> Result<(), RequirementError> {
        let tool = self.settings.flyctl_bin.clone();
        let version = self.call(self.command().arg("version")).await;
        match version {
            Ok(output) if output.is_success() => {}
            Ok(output) => {
                return Err(RequirementError::MissingTool {
                    tool,
                    setting: String::from("OPENCODESPACE_FLYCTL_BIN"),
                    message: output.diagnostic(),
                });
            }
            Err(RunnerError::Interrupted { .. }) => {
                return Err(RequirementError::Interrupted { tool });
            }
            Err(err) => {
                return Err(RequirementError::MissingTool {
                    tool,
                    setting: String::from("OPENCODESPACE_FLYCTL_BIN"),
                    message: err.to_string(),
                });
            }
        }

        if auth_token().is_some() {
            debug!("platform token found in the environment");
            return Ok(());
        }
        let detail = match self.call(self.command().args(["auth", "whoami"])).await {
            Ok(output) if output.is_success() => return Ok(()),
            Ok(output) => output.diagnostic(),
            Err(RunnerError::Interrupted { .. }) => {
                return Err(RequirementError::Interrupted { tool });
            }
            Err(err) => err.to_string(),
        };
        Err(RequirementError::MissingAuthentication {
            tool,
            env_var: String::from("FLY_API_TOKEN"),
            detail,
        })
    }
}

/// Reads the platform token without exposing it.
fn auth_token() -> Option<SecretString> {
    TOKEN_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|value| !value.trim().is_empty())
        .map(SecretString::from)
}

fn manifest_path(project_path: &Utf8Path) -> camino::Utf8PathBuf {
    project_path.join(STATE_DIR_NAME).join(MANIFEST_NAME)
}

/// Secrets pushed to the platform: file-backed credentials first, then the
/// configured `[secrets]` and editor password, which win on name clashes.
fn collect_secrets(config: &Configuration) -> Result<BTreeMap<String, SecretString>, DeployError> {
    let mut secrets = BTreeMap::new();
    if let Some(key) = &config.git.ssh_key_path {
        secrets.insert(String::from("SSH_PRIVATE_KEY"), read_host_file(key)?);
    }
    if config.editor.copy_settings {
        if let Some(path) = &config.editor.vscode_settings_path {
            secrets.insert(String::from("VSCODE_SETTINGS"), read_host_file(path)?);
        }
        if let Some(path) = &config.editor.cursor_settings_path {
            secrets.insert(String::from("CURSOR_SETTINGS"), read_host_file(path)?);
        }
    }
    secrets.extend(config.resolve_secrets()?);
    Ok(secrets)
}

fn read_host_file(path: &Utf8Path) -> Result<SecretString, DeployError> {
    let io_error = |err: std::io::Error| DeployError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    };
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let name = path.file_name().ok_or_else(|| DeployError::Io {
        path: path.to_path_buf(),
        message: String::from("path has no file name"),
    })?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(io_error)?;
    dir.read_to_string(name)
        .map(SecretString::from)
        .map_err(io_error)
}

/// One `KEY=VALUE` line for `secrets import`; multi-line values use the
/// triple-quoted form.
fn import_line(key: &str, value: &str) -> String {
    if value.contains('\n') {
        format!("{key}=\"\"\"\n{}\n\"\"\"", value.trim_end_matches('\n'))
    } else {
        format!("{key}={value}")
    }
}

impl Provider for RemoteProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn check_requirements(&self) -> ProviderFuture<'_, (), RequirementError> {
        Box::pin(self.check_requirements_inner())
    }

    fn validate_config(&self, config: &Configuration) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();
        if config.editor.password.is_none() {
            errors.push(ConfigValidationError::new(
                "editor.password",
                "the remote editor is reachable from the internet; set one under [editor], \
                 for example password = { from_env = \"OPENCODESPACE_PASSWORD\" }",
            ));
        }
        if slugify(&config.name).is_empty() {
            errors.push(ConfigValidationError::new(
                "name",
                format!(
                    "'{}' has no ASCII letters or digits to build an application name from",
                    config.name
                ),
            ));
        }
        let region = config.remote.region.as_str();
        if region.is_empty()
            || !region
                .chars()
                .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit())
        {
            errors.push(ConfigValidationError::new(
                "remote.region",
                format!("'{region}' is not a platform region code (for example 'ord')"),
            ));
        }
        if !config.mounts.is_empty() {
            errors.push(ConfigValidationError::new(
                "mounts",
                "extra mounts are not supported by the remote provider",
            ));
        }
        for (index, mapping) in config.ports.iter().enumerate().skip(1) {
            if matches!(mapping.host, 80 | 443) {
                errors.push(ConfigValidationError::new(
                    format!("ports[{index}].host"),
                    "ports 80 and 443 are reserved for the editor service",
                ));
            }
        }
        errors
    }

    fn resource_name(&self, config: &Configuration) -> String {
        app_name(&config.name, &config.project_path)
    }

    fn build_environment(&self, config: &Configuration) -> BTreeMap<String, String> {
        base_environment(config)
    }

    fn deploy<'a>(
        &'a self,
        config: &'a Configuration,
    ) -> ProviderFuture<'a, DeploymentRecord, DeployError> {
        Box::pin(self.deploy_inner(config))
    }

    fn stop<'a>(&'a self, config: &'a Configuration) -> ProviderFuture<'a, (), DeployError> {
        Box::pin(self.stop_inner(config))
    }

    fn remove<'a>(
        &'a self,
        config: &'a Configuration,
        options: RemoveOptions,
    ) -> ProviderFuture<'a, (), DeployError> {
        Box::pin(self.remove_inner(config, options))
    }

    fn probe<'a>(
        &'a self,
        config: &'a Configuration,
    ) -> ProviderFuture<'a, DeploymentState, DeployError> {
        Box::pin(self.probe_inner(config))
    }
}
