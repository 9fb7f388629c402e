//! Local container provider.
//!
//! Deploy policy for an existing container with the derived name:
//!
//! - running with the current fingerprint label: reused as is;
//! - stopped with the current fingerprint label: started in place;
//! - any other fingerprint: removed and recreated from a fresh image.
//!
//! The image tag embeds the image fingerprint (Dockerfile, entrypoint, and
//! extension lists), so unchanged build inputs never trigger a rebuild.

use std::collections::BTreeMap;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::bundle::{BuildBundle, BuildContext};
use crate::config::{ConfigValidationError, Configuration};
use crate::environment::base_environment;
use crate::provider::{
    Capabilities, DeployError, Provider, ProviderContext, ProviderDescriptor, ProviderFuture,
    ProviderKind, RemoveOptions, RequirementError, container_name, digest,
};
use crate::runner::{CommandOutput, CommandRunner, Interrupt, Invocation, RunnerError};
use crate::settings::Settings;
use crate::state::{DeploymentRecord, DeploymentState};

mod commands;

use commands::{ContainerStatus, RunSpec};

/// Registry name of the local provider.
pub const NAME: &str = "local";

const IMAGE_TAG_LEN: usize = 12;

/// Descriptor registered for the local provider.
#[must_use]
pub fn descriptor() -> ProviderDescriptor {
    ProviderDescriptor {
        name: String::from(NAME),
        kind: ProviderKind::LocalContainer,
        summary: String::from("Run the environment in a container on the local engine"),
        capabilities: Capabilities {
            secrets: false,
            volumes: true,
            scale_to_zero: false,
        },
        requires: String::from("docker"),
    }
}

/// Provider backed by a local container engine CLI.
pub struct LocalProvider {
    runner: Arc<dyn CommandRunner>,
    settings: Settings,
    interrupt: Interrupt,
}

/// Derived names and hashes for one configuration.
struct LocalPlan {
    container: String,
    image: String,
    fingerprint: String,
    env: BTreeMap<String, String>,
    secrets: BTreeMap<String, SecretString>,
    bundle: BuildBundle,
}

impl LocalProvider {
    /// Creates the provider from the shared context.
    #[must_use]
    pub fn new(context: &ProviderContext) -> Self {
        Self {
            runner: Arc::clone(&context.runner),
            settings: context.settings.clone(),
            interrupt: context.interrupt.clone(),
        }
    }

    async fn call(&self, invocation: Invocation) -> Result<CommandOutput, RunnerError> {
        debug!(command = %invocation.display_command(), "docker call");
        self.runner.run(&invocation).await
    }

    fn image_name(config: &Configuration, container: &str) -> (BuildBundle, String, String) {
        let bundle = BuildBundle::render(BuildContext::BundleOnly, config.service_port());
        let vscode = config.editor.vscode_extensions.join(",");
        let cursor = config.editor.cursor_extensions.join(",");
        let image_fingerprint = bundle.fingerprint(&[vscode.as_str(), cursor.as_str()]);
        let tag = image_fingerprint
            .get(..IMAGE_TAG_LEN)
            .unwrap_or(image_fingerprint.as_str());
        let image = format!("{container}:{tag}");
        (bundle, image, image_fingerprint)
    }

    fn plan(&self, config: &Configuration) -> Result<LocalPlan, DeployError> {
        let container = self.resource_name(config);
        let (bundle, image, image_fingerprint) = Self::image_name(config, &container);
        let env = self.build_environment(config);
        let secrets = config.resolve_secrets()?;

        let spec = RunSpec {
            container: &container,
            image: &image,
            fingerprint: "",
            env: &env,
            secrets: &secrets,
        };
        let run_args = commands::run_args(config, &spec).join("\u{1f}");
        let secret_parts: Vec<String> = secrets
            .iter()
            .map(|(key, value)| format!("{key}={}", value.expose_secret()))
            .collect();
        let secret_digest = digest(secret_parts.iter().map(String::as_str));
        let fingerprint = digest([
            image_fingerprint.as_str(),
            run_args.as_str(),
            secret_digest.as_str(),
        ]);

        Ok(LocalPlan {
            container,
            image,
            fingerprint,
            env,
            secrets,
            bundle,
        })
    }

    async fn inspect(&self, container: &str) -> Result<Option<ContainerStatus>, DeployError> {
        let output = self
            .call(commands::inspect_container(&self.settings, container))
            .await?;
        match commands::parse_inspect(&output) {
            None => Ok(None),
            Some(Ok(status)) => Ok(Some(status)),
            Some(Err(message)) => Err(DeployError::Parse {
                command: String::from("docker container inspect"),
                message,
            }),
        }
    }

    async fn ensure_image(
        &self,
        config: &Configuration,
        plan: &LocalPlan,
    ) -> Result<(), DeployError> {
        let existing = self
            .call(commands::inspect_image(&self.settings, &plan.image))
            .await?;
        if existing.is_success() {
            debug!(image = %plan.image, "image is current; skipping build");
            return Ok(());
        }

        info!(image = %plan.image, "building image");
        let dockerfile = plan.bundle.write(&config.project_path)?;
        let context = plan.bundle.context_dir(&config.project_path);
        let build = self
            .call(commands::build(
                &self.settings,
                &plan.image,
                &dockerfile,
                &context,
            ))
            .await?;
        if !build.is_success() {
            return Err(DeployError::Build {
                image: plan.image.clone(),
                output: build.diagnostic(),
            });
        }
        Ok(())
    }

    /// Runs a create/start call, retrying once after a short backoff.
    /// Interrupts are never retried.
    async fn with_one_retry<F>(
        &self,
        container: &str,
        discard_before_retry: bool,
        make: F,
    ) -> Result<(), DeployError>
    where
        F: Fn() -> Invocation + Send + Sync,
    {
        match self.attempt(container, make()).await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_interrupted() => return Err(err),
            Err(err) => warn!(container, error = %err, "container start failed; retrying once"),
        }
        if discard_before_retry {
            self.discard(container).await?;
        }
        self.interrupt
            .sleep(self.settings.backoff(1), &self.settings.docker_bin)
            .await?;
        self.attempt(container, make()).await
    }

    async fn attempt(&self, container: &str, invocation: Invocation) -> Result<(), DeployError> {
        let output = self.call(invocation).await?;
        if output.is_success() {
            Ok(())
        } else {
            Err(DeployError::Run {
                container: container.to_owned(),
                output: output.diagnostic(),
            })
        }
    }

    /// Removes a container, treating "already gone" as success.
    async fn discard(&self, container: &str) -> Result<(), DeployError> {
        let output = self
            .call(commands::remove_container(&self.settings, container))
            .await?;
        if output.is_success() || commands::is_missing(&output) {
            Ok(())
        } else {
            Err(DeployError::Remove {
                resource: container.to_owned(),
                output: output.diagnostic(),
            })
        }
    }

    async fn create(&self, config: &Configuration, plan: &LocalPlan) -> Result<(), DeployError> {
        self.ensure_image(config, plan).await?;
        info!(container = %plan.container, image = %plan.image, "creating container");
        let spec = RunSpec {
            container: &plan.container,
            image: &plan.image,
            fingerprint: &plan.fingerprint,
            env: &plan.env,
            secrets: &plan.secrets,
        };
        self.with_one_retry(&plan.container, true, || {
            commands::run(&self.settings, config, &spec)
        })
        .await
    }

    async fn deploy_inner(&self, config: &Configuration) -> Result<DeploymentRecord, DeployError> {
        let plan = self.plan(config)?;
        if let Some(record) = config.active_record()
            && record.handle == plan.container
            && record.is_running_with(&plan.fingerprint)
        {
            debug!(container = %plan.container, "deployment already running; nothing to do");
            return Ok(record.clone());
        }

        match self.inspect(&plan.container).await? {
            Some(status) if status.fingerprint.as_deref() == Some(plan.fingerprint.as_str()) => {
                if status.running {
                    info!(container = %plan.container, "container already running");
                } else {
                    info!(container = %plan.container, "starting existing container");
                    self.with_one_retry(&plan.container, false, || {
                        commands::start(&self.settings, &plan.container)
                    })
                    .await?;
                }
            }
            Some(_) => {
                info!(
                    container = %plan.container,
                    "configuration changed since the container was created; recreating"
                );
                self.discard(&plan.container).await?;
                self.create(config, &plan).await?;
            }
            None => self.create(config, &plan).await?,
        }

        Ok(
            DeploymentRecord::new(&config.provider, &plan.container, DeploymentState::Running)
                .with_fingerprint(plan.fingerprint)
                .with_image(plan.image),
        )
    }

    /// Graceful stop bounded by the stop timeout, then a forced kill.
    async fn stop_container(&self, container: &str) -> Result<(), DeployError> {
        info!(container, "stopping container");
        let graceful = self.call(commands::stop(&self.settings, container)).await;
        let reason = match graceful {
            Ok(output) if output.is_success() || commands::is_not_running(&output) => {
                return Ok(());
            }
            Ok(output) => output.diagnostic(),
            Err(err @ RunnerError::Interrupted { .. }) => return Err(err.into()),
            Err(err) => err.to_string(),
        };

        warn!(container, reason = %reason, "graceful stop failed; forcing");
        let output = self.call(commands::kill(&self.settings, container)).await?;
        if output.is_success() || commands::is_not_running(&output) {
            return Ok(());
        }
        Err(DeployError::Stop {
            resource: container.to_owned(),
            output: format!("{reason}; forced stop: {}", output.diagnostic()),
        })
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
            debug!(container = %record.handle, status = %record.status, "nothing to stop");
            return Ok(());
        }
        self.stop_container(&record.handle).await
    }

    async fn remove_inner(
        &self,
        config: &Configuration,
        options: RemoveOptions,
    ) -> Result<(), DeployError> {
        let record = config.active_record();
        let container = record.map_or_else(|| self.resource_name(config), |r| r.handle.clone());
        if record.is_some_and(|r| {
            matches!(
                r.status,
                DeploymentState::Running
                    | DeploymentState::Building
                    | DeploymentState::Stopping
                    | DeploymentState::Failed
            )
        }) {
            self.stop_container(&container).await?;
        }

        info!(container = %container, "removing container");
        self.discard(&container).await?;

        if options.purge_image {
            let image = record
                .and_then(|r| r.image.clone())
                .unwrap_or_else(|| Self::image_name(config, &container).1);
            info!(image = %image, "removing image");
            let output = self
                .call(commands::remove_image(&self.settings, &image))
                .await?;
            if !output.is_success() && !commands::is_missing(&output) {
                return Err(DeployError::Remove {
                    resource: image,
                    output: output.diagnostic(),
                });
            }
        }
        Ok(())
    }

    async fn probe_inner(&self, config: &Configuration) -> Result<DeploymentState, DeployError> {
        let container = config
            .active_record()
            .map_or_else(|| self.resource_name(config), |r| r.handle.clone());
        Ok(match self.inspect(&container).await? {
            None => DeploymentState::Absent,
            Some(status) if status.running => DeploymentState::Running,
            Some(_) => DeploymentState::Stopped,
        })
    }

    async fn check_requirements_inner(&self) -> Result<(), RequirementError> {
        let tool = self.settings.docker_bin.clone();
        let version = self
            .call(commands::version(&self.settings))
            .await
            .map_err(|err| requirement_from_runner(&tool, err))?;
        if !version.is_success() {
            return Err(RequirementError::MissingTool {
                tool,
                setting: String::from("OPENCODESPACE_DOCKER_BIN"),
                message: version.diagnostic(),
            });
        }

        let info = self
            .call(commands::info(&self.settings))
            .await
            .map_err(|err| requirement_from_runner(&tool, err))?;
        if !info.is_success() {
            return Err(RequirementError::Unreachable {
                tool,
                detail: info.diagnostic(),
            });
        }
        debug!(server = %info.stdout.trim(), "container engine reachable");
        Ok(())
    }
}

fn requirement_from_runner(tool: &str, err: RunnerError) -> RequirementError {
    match err {
        RunnerError::Spawn { message, .. } => RequirementError::MissingTool {
            tool: tool.to_owned(),
            setting: String::from("OPENCODESPACE_DOCKER_BIN"),
            message,
        },
        RunnerError::Interrupted { .. } => RequirementError::Interrupted {
            tool: tool.to_owned(),
        },
        other @ (RunnerError::Io { .. } | RunnerError::Timeout { .. }) => {
            RequirementError::Unreachable {
                tool: tool.to_owned(),
                detail: other.to_string(),
            }
        }
    }
}

impl Provider for LocalProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn check_requirements(&self) -> ProviderFuture<'_, (), RequirementError> {
        Box::pin(self.check_requirements_inner())
    }

    fn validate_config(&self, config: &Configuration) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();
        let mut require_absolute = |field: &str, path: Option<&camino::Utf8PathBuf>| {
            if let Some(path) = path
                && !path.is_absolute()
            {
                errors.push(ConfigValidationError::new(
                    field,
                    format!("{path} must be an absolute path to be mounted"),
                ));
            }
        };
        require_absolute("git.ssh_key_path", config.git.ssh_key_path.as_ref());
        require_absolute("git.ssh_agent_socket", config.git.ssh_agent_socket.as_ref());
        if config.editor.copy_settings {
            require_absolute(
                "editor.vscode_settings_path",
                config.editor.vscode_settings_path.as_ref(),
            );
            require_absolute(
                "editor.cursor_settings_path",
                config.editor.cursor_settings_path.as_ref(),
            );
        }
        for (index, mount) in config.mounts.iter().enumerate() {
            if mount.source.contains('/') && !mount.source.starts_with('/') {
                errors.push(ConfigValidationError::new(
                    format!("mounts[{index}].source"),
                    format!(
                        "{} is a relative path; use an absolute path or a named volume",
                        mount.source
                    ),
                ));
            }
        }
        errors
    }

    fn resource_name(&self, config: &Configuration) -> String {
        container_name(&config.project_path, &config.provider)
    }

    fn build_environment(&self, config: &Configuration) -> BTreeMap<String, String> {
        let mut env = base_environment(config);
        if config.git.ssh_key_path.is_some() {
            env.insert(
                String::from("SSH_KEY_PATH"),
                String::from(commands::SSH_KEY_TARGET),
            );
        }
        if config.git.ssh_agent_socket.is_some() {
            env.insert(
                String::from("SSH_AUTH_SOCK"),
                String::from(commands::SSH_AGENT_TARGET),
            );
        }
        if config.editor.copy_settings {
            if config.editor.vscode_settings_path.is_some() {
                env.insert(
                    String::from("VSCODE_SETTINGS_PATH"),
                    String::from(commands::VSCODE_SETTINGS_TARGET),
                );
            }
            if config.editor.cursor_settings_path.is_some() {
                env.insert(
                    String::from("CURSOR_SETTINGS_PATH"),
                    String::from(commands::CURSOR_SETTINGS_TARGET),
                );
            }
        }
        env
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
