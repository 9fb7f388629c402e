//! Core library for the OpenCodeSpace environment launcher.
//!
//! The crate exposes a provider abstraction for disposable development
//! environments, a local container implementation and a remote platform
//! implementation, and an orchestrator that drives them through one
//! deployment lifecycle (check requirements → validate → act → persist).

pub mod bundle;
pub mod config;
pub mod config_store;
pub mod environment;
pub mod local;
pub mod orchestrator;
pub mod provider;
pub mod remote;
pub mod runner;
pub mod settings;
pub mod state;
pub mod test_support;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use config::{
    ConfigValidationError, Configuration, DEFAULT_PROVIDER, SecretRef, ValidationErrors,
};
pub use config_store::{ConfigRepository, ConfigStore, ConfigStoreError};
pub use local::LocalProvider;
pub use orchestrator::{DeployOptions, Orchestrator, OrchestratorError, StatusReport};
pub use provider::{
    DeployError, Provider, ProviderContext, ProviderDescriptor, ProviderKind, ProviderRegistry,
    RegistryError, RemoveOptions, RequirementError,
};
pub use remote::RemoteProvider;
pub use runner::{
    CommandOutput, CommandRunner, Interrupt, Invocation, ProcessCommandRunner, RunnerError,
};
pub use settings::{Settings, SettingsError};
pub use state::{DeploymentRecord, DeploymentState, TransitionError};
