//! Command-line interface definitions for the `opencodespace` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `opencodespace` binary.
#[derive(Debug, Parser)]
#[command(
    name = "opencodespace",
    about = "Launch and tear down disposable development environments",
    version,
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Project configuration file (defaults to `<PATH>/.opencodespace/config.toml`).
    #[arg(long, global = true, value_name = "FILE")]
    pub(crate) config: Option<String>,
    /// Provider to use for this invocation, overriding the configuration.
    #[arg(long, global = true, value_name = "NAME")]
    pub(crate) provider: Option<String>,
    /// Never prompt; assume yes for confirmations.
    #[arg(
        short = 'y',
        long = "yes",
        visible_alias = "non-interactive",
        global = true
    )]
    pub(crate) yes: bool,
    /// Operation to perform.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Lifecycle operations.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Build and start the environment, or confirm it is already running.
    #[command(name = "deploy")]
    Deploy(DeployCommand),
    /// Stop the environment, keeping it for a later deploy.
    #[command(name = "stop")]
    Stop(ProjectArgs),
    /// Stop the environment and release its backend resources.
    #[command(name = "remove")]
    Remove(RemoveCommand),
    /// Show the recorded state of the environment.
    #[command(name = "status")]
    Status(StatusCommand),
    /// List the registered providers.
    #[command(name = "list-providers")]
    ListProviders,
}

/// Project directory shared by every lifecycle subcommand.
#[derive(Debug, Args)]
pub(crate) struct ProjectArgs {
    /// Project directory (defaults to the current directory).
    #[arg(value_name = "PATH")]
    pub(crate) path: Option<String>,
}

/// Arguments for `opencodespace deploy`.
#[derive(Debug, Args)]
pub(crate) struct DeployCommand {
    #[command(flatten)]
    pub(crate) project: ProjectArgs,
    /// Deploy again even though an earlier run left the environment failed.
    #[arg(long)]
    pub(crate) retry: bool,
}

/// Arguments for `opencodespace remove`.
#[derive(Debug, Args)]
pub(crate) struct RemoveCommand {
    #[command(flatten)]
    pub(crate) project: ProjectArgs,
    /// Also delete the built image.
    #[arg(long)]
    pub(crate) purge_image: bool,
}

/// Arguments for `opencodespace status`.
#[derive(Debug, Args)]
pub(crate) struct StatusCommand {
    #[command(flatten)]
    pub(crate) project: ProjectArgs,
    /// Ask the backend for the actual state as well.
    #[arg(long)]
    pub(crate) live: bool,
}
