//! Binary entry point for the OpenCodeSpace CLI.

use std::env;
use std::io::{self, IsTerminal, Write};
use std::path::{self, PathBuf};
use std::process;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::Parser;
use dialoguer::Confirm;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use opencodespace::{
    ConfigRepository, ConfigStore, ConfigStoreError, Configuration, DEFAULT_PROVIDER,
    DeployOptions, DeploymentRecord, Interrupt, Orchestrator, OrchestratorError,
    ProcessCommandRunner, ProviderContext, ProviderKind, ProviderRegistry, RegistryError,
    RemoveOptions, Settings, SettingsError, StatusReport,
};

mod cli;

use cli::{Cli, Command, ProjectArgs};

/// Environment variable holding the log filter directives.
const LOG_ENV: &str = "OPENCODESPACE_LOG";

#[derive(Debug, Error)]
enum CliError {
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),
    #[error("{0}")]
    Store(#[from] ConfigStoreError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error("invalid project path {path}: {message}")]
    ProjectPath { path: String, message: String },
    #[error("removal of {handle} cancelled")]
    Declined { handle: String },
    #[error("confirmation prompt failed: {0}")]
    Prompt(#[from] dialoguer::Error),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

impl CliError {
    const fn exit_code(&self) -> u8 {
        match self {
            Self::Orchestrator(err) => err.exit_code(),
            Self::Registry(RegistryError::Unknown { .. }) => 6,
            Self::Registry(RegistryError::Duplicate { .. }) => 7,
            Self::Settings(_)
            | Self::Store(_)
            | Self::ProjectPath { .. }
            | Self::Declined { .. }
            | Self::Prompt(_)
            | Self::Output(_) => 1,
        }
    }
}

/// Project being operated on: its configuration and where it is persisted.
struct Project {
    config: Configuration,
    store: ConfigStore,
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            err.exit_code()
        }
    };

    process::exit(i32::from(exit_code));
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let registry = ProviderRegistry::with_builtin_providers()?;
    if matches!(cli.command, Command::ListProviders) {
        return list_providers(&registry, io::stdout());
    }

    let settings = Settings::load_without_cli_args()?;
    let interrupt = Interrupt::listen_for_ctrl_c();
    let context = ProviderContext {
        runner: Arc::new(ProcessCommandRunner::new(interrupt.clone())),
        settings,
        interrupt,
    };

    match cli.command {
        Command::Deploy(args) => {
            let project = load_project(
                cli.config.as_deref(),
                cli.provider.as_deref(),
                &args.project,
            )?;
            let orchestrator = Orchestrator::new(&registry, context, project.store);
            let record = orchestrator
                .deploy(&project.config, DeployOptions { retry: args.retry })
                .await?;
            write_deployed(io::stdout(), &registry, &project.config, &record)
        }
        Command::Stop(args) => {
            let project = load_project(cli.config.as_deref(), cli.provider.as_deref(), &args)?;
            let orchestrator = Orchestrator::new(&registry, context, project.store);
            let mut stdout = io::stdout();
            match orchestrator.stop(&project.config).await? {
                Some(record) => writeln!(stdout, "{} is {}", record.handle, record.status)?,
                None => writeln!(stdout, "nothing to stop")?,
            }
            Ok(())
        }
        Command::Remove(args) => {
            let project = load_project(
                cli.config.as_deref(),
                cli.provider.as_deref(),
                &args.project,
            )?;
            let orchestrator = Orchestrator::new(&registry, context, project.store);
            let report = orchestrator.status(&project.config, false).await?;
            let descriptor = registry.resolve(&project.config.provider)?.descriptor();
            if descriptor.kind == ProviderKind::RemotePlatform
                && !cli.yes
                && !confirm(&report.handle)?
            {
                return Err(CliError::Declined {
                    handle: report.handle,
                });
            }
            orchestrator
                .remove(
                    &project.config,
                    RemoveOptions {
                        purge_image: args.purge_image,
                    },
                )
                .await?;
            writeln!(io::stdout(), "removed {}", report.handle)?;
            Ok(())
        }
        Command::Status(args) => {
            let project = load_project(
                cli.config.as_deref(),
                cli.provider.as_deref(),
                &args.project,
            )?;
            let orchestrator = Orchestrator::new(&registry, context, project.store);
            let report = orchestrator.status(&project.config, args.live).await?;
            write_status(io::stdout(), &report)
        }
        Command::ListProviders => list_providers(&registry, io::stdout()),
    }
}

/// Loads the persisted configuration, or the default one for a project that
/// has none yet, and applies the provider override.
fn load_project(
    config_path: Option<&str>,
    provider: Option<&str>,
    args: &ProjectArgs,
) -> Result<Project, CliError> {
    let explicit_dir = args.path.as_deref().map(project_dir).transpose()?;
    let dir = match &explicit_dir {
        Some(path) => path.clone(),
        None => current_dir()?,
    };
    let store = config_path.map_or_else(|| ConfigStore::for_project(&dir), ConfigStore::at);

    let mut config = store.load()?.unwrap_or_else(|| {
        Configuration::for_project(dir, provider.unwrap_or(DEFAULT_PROVIDER))
    });
    if let Some(path) = explicit_dir {
        config.project_path = path;
    }
    if let Some(name) = provider {
        name.clone_into(&mut config.provider);
    }
    Ok(Project { config, store })
}

fn project_dir(raw: &str) -> Result<Utf8PathBuf, CliError> {
    let absolute = path::absolute(raw).map_err(|err| CliError::ProjectPath {
        path: raw.to_owned(),
        message: err.to_string(),
    })?;
    utf8(absolute)
}

fn current_dir() -> Result<Utf8PathBuf, CliError> {
    let cwd = env::current_dir().map_err(|err| CliError::ProjectPath {
        path: String::from("."),
        message: err.to_string(),
    })?;
    utf8(cwd)
}

fn utf8(path: PathBuf) -> Result<Utf8PathBuf, CliError> {
    Utf8PathBuf::from_path_buf(path).map_err(|non_utf8| CliError::ProjectPath {
        path: non_utf8.display().to_string(),
        message: String::from("path is not valid UTF-8"),
    })
}

/// Asks before destroying a remote application. Without a terminal to ask
/// on, the answer is "no"; pass `--yes` to skip the prompt.
fn confirm(handle: &str) -> Result<bool, CliError> {
    if !(io::stdin().is_terminal() && io::stderr().is_terminal()) {
        return Ok(false);
    }
    let answer = Confirm::new()
        .with_prompt(format!(
            "Remove {handle}? This destroys the remote application and cannot be undone."
        ))
        .default(false)
        .interact_opt()?;
    Ok(answer == Some(true))
}

fn write_deployed(
    mut out: impl Write,
    registry: &ProviderRegistry,
    config: &Configuration,
    record: &DeploymentRecord,
) -> Result<(), CliError> {
    writeln!(out, "{} is {} on {}", record.handle, record.status, record.provider)?;
    let kind = registry.resolve(&record.provider)?.descriptor().kind;
    match kind {
        ProviderKind::LocalContainer => {
            if let Some(mapping) = config.ports.first() {
                writeln!(out, "editor: http://localhost:{}", mapping.host)?;
            }
        }
        ProviderKind::RemotePlatform => {
            writeln!(out, "editor: https://{}.fly.dev", record.handle)?;
        }
    }
    Ok(())
}

fn write_status(mut out: impl Write, report: &StatusReport) -> Result<(), CliError> {
    writeln!(out, "provider: {}", report.provider)?;
    writeln!(out, "handle:   {}", report.handle)?;
    writeln!(out, "status:   {}", report.recorded)?;
    if let Some(live) = report.live {
        writeln!(out, "live:     {live}")?;
    }
    if let Some(detail) = &report.detail {
        writeln!(out, "detail:   {detail}")?;
    }
    Ok(())
}

fn list_providers(registry: &ProviderRegistry, mut out: impl Write) -> Result<(), CliError> {
    for descriptor in registry.list() {
        writeln!(
            out,
            "{:<8} {:<16} {:<24} requires {:<8} {}",
            descriptor.name,
            descriptor.kind.as_str(),
            descriptor.capabilities.to_string(),
            descriptor.requires,
            descriptor.summary
        )?;
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "error: {err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencodespace::DeploymentState;
    use rstest::rstest;

    fn render(write: impl FnOnce(&mut Vec<u8>) -> Result<(), CliError>) -> String {
        let mut buf = Vec::new();
        write(&mut buf).unwrap_or_else(|err| panic!("write: {err}"));
        String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"))
    }

    #[rstest]
    fn list_providers_prints_builtins_in_registration_order() {
        let registry = ProviderRegistry::with_builtin_providers()
            .unwrap_or_else(|err| panic!("registry: {err}"));
        let rendered = render(|buf| list_providers(&registry, buf));

        let names: Vec<&str> = rendered
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .collect();
        assert_eq!(names, ["local", "remote"]);
        assert!(rendered.contains("requires docker"), "{rendered}");
        assert!(rendered.contains("requires flyctl"), "{rendered}");
    }

    #[rstest]
    fn status_output_includes_live_state_and_detail() {
        let report = StatusReport {
            provider: String::from("local"),
            handle: String::from("opencodespace-abc"),
            recorded: DeploymentState::Failed,
            live: Some(DeploymentState::Stopped),
            detail: Some(String::from("build failed")),
        };
        let rendered = render(|buf| write_status(buf, &report));

        assert!(rendered.contains("status:   failed"), "{rendered}");
        assert!(rendered.contains("live:     stopped"), "{rendered}");
        assert!(rendered.contains("detail:   build failed"), "{rendered}");
    }

    #[rstest]
    fn deployed_output_points_at_local_editor_port() {
        let registry = ProviderRegistry::with_builtin_providers()
            .unwrap_or_else(|err| panic!("registry: {err}"));
        let config = Configuration::for_project("/tmp/project", "local");
        let record = DeploymentRecord::new("local", "opencodespace-abc", DeploymentState::Running);
        let rendered = render(|buf| write_deployed(buf, &registry, &config, &record));

        assert!(rendered.contains("opencodespace-abc is running on local"), "{rendered}");
        assert!(rendered.contains("http://localhost:8080"), "{rendered}");
    }

    #[rstest]
    #[case(CliError::Declined { handle: String::from("app") }, 1)]
    #[case(
        CliError::Registry(RegistryError::Unknown {
            name: String::from("gcp"),
            known: String::from("local, remote"),
        }),
        6
    )]
    #[case(
        CliError::Orchestrator(OrchestratorError::PreviouslyFailed {
            handle: String::from("app"),
            detail: String::from("boom"),
        }),
        8
    )]
    fn exit_codes_follow_error_class(#[case] err: CliError, #[case] code: u8) {
        assert_eq!(err.exit_code(), code);
    }

    #[rstest]
    fn write_error_prefixes_message() {
        let mut buf = Vec::new();
        write_error(
            &mut buf,
            &CliError::Declined {
                handle: String::from("opencodespace-app"),
            },
        );
        let rendered = String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"));
        assert_eq!(rendered, "error: removal of opencodespace-app cancelled\n");
    }

    #[rstest]
    fn provider_override_applies_to_default_configuration() {
        let tmp = tempfile::TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let raw = tmp.path().to_string_lossy().into_owned();
        let project = load_project(
            None,
            Some("remote"),
            &ProjectArgs {
                path: Some(raw.clone()),
            },
        )
        .unwrap_or_else(|err| panic!("load: {err}"));

        assert_eq!(project.config.provider, "remote");
        assert_eq!(project.config.project_path.as_str(), raw);
        assert!(project.config.deployment.is_none());
        assert_eq!(
            project.store.path(),
            project.config.project_path.join(".opencodespace/config.toml")
        );
    }
}
