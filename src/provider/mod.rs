//! Provider capability interface shared by every backend.
//!
//! A provider turns a validated [`Configuration`] into a running environment
//! on one backend and back again. Backend calls go through the injected
//! [`crate::runner::CommandRunner`], so every implementation can be driven by
//! a scripted runner in tests.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use crate::config::{ConfigValidationError, Configuration};
use crate::state::{DeploymentRecord, DeploymentState};

mod error;
mod naming;
mod registry;

pub use error::{DeployError, RequirementError};
pub use naming::{app_name, container_name, digest, slugify};
pub use registry::{
    Capabilities, ProviderContext, ProviderDescriptor, ProviderFactory, ProviderKind,
    ProviderRegistry, RegisteredProvider, RegistryError,
};

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Options accepted by [`Provider::remove`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RemoveOptions {
    /// Also delete the built image. Containers are cheap to recreate; images
    /// are not, so this is opt-in.
    pub purge_image: bool,
}

/// Lifecycle contract implemented by every backend.
pub trait Provider: Send + Sync {
    /// Registry name of the provider.
    fn name(&self) -> &str;

    /// Verifies the backend tool is installed, reachable, and authenticated.
    /// Never mutates backend state.
    fn check_requirements(&self) -> ProviderFuture<'_, (), RequirementError>;

    /// Provider-specific validation. Pure: performs no I/O.
    fn validate_config(&self, config: &Configuration) -> Vec<ConfigValidationError>;

    /// Backend handle the configuration maps to (container or app name).
    fn resource_name(&self, config: &Configuration) -> String;

    /// Runtime environment the backend hands to the environment. Pure.
    fn build_environment(&self, config: &Configuration) -> BTreeMap<String, String>;

    /// Brings the environment up, returning the record to persist.
    ///
    /// Returns the existing record untouched, without backend calls, when it
    /// is already running with the current fingerprint.
    fn deploy<'a>(
        &'a self,
        config: &'a Configuration,
    ) -> ProviderFuture<'a, DeploymentRecord, DeployError>;

    /// Stops the environment. A no-op for absent or stopped records.
    fn stop<'a>(&'a self, config: &'a Configuration) -> ProviderFuture<'a, (), DeployError>;

    /// Stops if needed, then releases the backend resource. Idempotent.
    fn remove<'a>(
        &'a self,
        config: &'a Configuration,
        options: RemoveOptions,
    ) -> ProviderFuture<'a, (), DeployError>;

    /// Asks the backend for the resource's actual state without mutating it.
    fn probe<'a>(
        &'a self,
        config: &'a Configuration,
    ) -> ProviderFuture<'a, DeploymentState, DeployError>;
}
