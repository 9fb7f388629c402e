//! Catalogue of known providers, built once at start-up.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::Provider;
use crate::runner::{CommandRunner, Interrupt};
use crate::settings::Settings;

/// Closed set of backend families.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProviderKind {
    /// Containers on a local engine.
    LocalContainer,
    /// Applications on a remote hosting platform.
    RemotePlatform,
}

impl ProviderKind {
    /// Label used in listings.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocalContainer => "local-container",
            Self::RemotePlatform => "remote-platform",
        }
    }
}

/// What a provider can do beyond the base contract.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Capabilities {
    /// Secrets are delivered through a dedicated store.
    pub secrets: bool,
    /// Extra volume mounts are honoured.
    pub volumes: bool,
    /// `stop` keeps the resource and scales it to zero.
    pub scale_to_zero: bool,
}

impl fmt::Display for Capabilities {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags: Vec<&str> = [
            (self.secrets, "secrets"),
            (self.volumes, "volumes"),
            (self.scale_to_zero, "scale-to-zero"),
        ]
        .into_iter()
        .filter_map(|(enabled, label)| enabled.then_some(label))
        .collect();
        if flags.is_empty() {
            formatter.write_str("-")
        } else {
            formatter.write_str(&flags.join(","))
        }
    }
}

/// Static description of a registered provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProviderDescriptor {
    /// Case-sensitive registry key.
    pub name: String,
    /// Backend family.
    pub kind: ProviderKind,
    /// One-line description for `list-providers`.
    pub summary: String,
    /// Capability flags.
    pub capabilities: Capabilities,
    /// External tool the requirement check looks for.
    pub requires: String,
}

/// Dependencies handed to provider factories.
#[derive(Clone)]
pub struct ProviderContext {
    /// Executes backend commands.
    pub runner: Arc<dyn CommandRunner>,
    /// Tool settings (binaries, timeouts, retry policy).
    pub settings: Settings,
    /// User interrupt shared with the runner; cancels backoff sleeps.
    pub interrupt: Interrupt,
}

impl fmt::Debug for ProviderContext {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ProviderContext")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Builds a provider instance from the shared context.
pub type ProviderFactory = Box<dyn Fn(&ProviderContext) -> Box<dyn Provider> + Send + Sync>;

/// A descriptor together with the factory that instantiates it.
pub struct RegisteredProvider {
    descriptor: ProviderDescriptor,
    factory: ProviderFactory,
}

impl RegisteredProvider {
    /// Static description.
    #[must_use]
    pub const fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    /// Instantiates the provider.
    #[must_use]
    pub fn instantiate(&self, context: &ProviderContext) -> Box<dyn Provider> {
        (self.factory)(context)
    }
}

impl fmt::Debug for RegisteredProvider {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RegisteredProvider")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Errors raised by registry misuse.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RegistryError {
    /// A provider with the same name is already registered.
    #[error("provider '{name}' is already registered")]
    Duplicate {
        /// Conflicting name.
        name: String,
    },
    /// No provider is registered under the name.
    #[error("unknown provider '{name}'; known providers: {known}")]
    Unknown {
        /// Requested name.
        name: String,
        /// Comma-separated registered names.
        known: String,
    },
}

/// Provider catalogue. Populated during start-up, then only read.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    entries: Vec<RegisteredProvider>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the local container and remote platform providers.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if the built-in names clash,
    /// which indicates a programming error.
    pub fn with_builtin_providers() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        registry.register(
            crate::local::descriptor(),
            Box::new(|context: &ProviderContext| -> Box<dyn Provider> {
                Box::new(crate::local::LocalProvider::new(context))
            }),
        )?;
        registry.register(
            crate::remote::descriptor(),
            Box::new(|context: &ProviderContext| -> Box<dyn Provider> {
                Box::new(crate::remote::RemoteProvider::new(context))
            }),
        )?;
        Ok(registry)
    }

    /// Adds a provider.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] when the name is taken; the
    /// existing entry is kept.
    pub fn register(
        &mut self,
        descriptor: ProviderDescriptor,
        factory: ProviderFactory,
    ) -> Result<(), RegistryError> {
        if self.find(&descriptor.name).is_some() {
            return Err(RegistryError::Duplicate {
                name: descriptor.name,
            });
        }
        self.entries.push(RegisteredProvider {
            descriptor,
            factory,
        });
        Ok(())
    }

    /// Looks up a provider by exact name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unknown`] listing the registered names.
    pub fn resolve(&self, name: &str) -> Result<&RegisteredProvider, RegistryError> {
        self.find(name).ok_or_else(|| RegistryError::Unknown {
            name: name.to_owned(),
            known: self.names().join(", "),
        })
    }

    /// Descriptors in registration order.
    pub fn list(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.entries.iter().map(RegisteredProvider::descriptor)
    }

    fn names(&self) -> Vec<&str> {
        self.list().map(|descriptor| descriptor.name.as_str()).collect()
    }

    fn find(&self, name: &str) -> Option<&RegisteredProvider> {
        self.entries
            .iter()
            .find(|entry| entry.descriptor.name == name)
    }
}
