//! Lifecycle orchestration: resolve, check requirements, validate, act,
//! persist.
//!
//! Requirement and validation failures happen before any mutating backend
//! call, so they never leave partial state. Backend failures are recorded as
//! a `failed` deployment record so the next run can surface them.

use tracing::{info, warn};

use crate::config::{Configuration, ValidationErrors};
use crate::config_store::ConfigRepository;
use crate::provider::{
    DeployError, Provider, ProviderContext, ProviderRegistry, RemoveOptions, RequirementError,
};
use crate::state::{DeploymentRecord, DeploymentState};

mod error;

pub use error::OrchestratorError;

/// Options for [`Orchestrator::deploy`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DeployOptions {
    /// Re-enter `building` from a record left `failed` by an earlier run.
    pub retry: bool,
}

/// Persisted and, optionally, observed state of a deployment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StatusReport {
    /// Active provider name.
    pub provider: String,
    /// Backend handle: the recorded one, or the one a deploy would use.
    pub handle: String,
    /// State from the persisted record (`absent` when there is none).
    pub recorded: DeploymentState,
    /// State reported by the backend when a live check was requested.
    pub live: Option<DeploymentState>,
    /// Diagnostic attached to a failed record.
    pub detail: Option<String>,
}

/// Drives providers through the lifecycle and persists the results.
pub struct Orchestrator<'r, S> {
    registry: &'r ProviderRegistry,
    context: ProviderContext,
    store: S,
}

impl<'r, S: ConfigRepository> Orchestrator<'r, S> {
    /// Creates an orchestrator over a built registry.
    #[must_use]
    pub const fn new(registry: &'r ProviderRegistry, context: ProviderContext, store: S) -> Self {
        Self {
            registry,
            context,
            store,
        }
    }

    /// Returns the configuration store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    fn resolve(&self, config: &Configuration) -> Result<Box<dyn Provider>, OrchestratorError> {
        let entry = self.registry.resolve(&config.provider)?;
        Ok(entry.instantiate(&self.context))
    }

    /// Resolves the provider, checks its requirements, and validates the
    /// configuration. Performs no mutating backend call.
    async fn prepare(
        &self,
        config: &Configuration,
    ) -> Result<Box<dyn Provider>, OrchestratorError> {
        let provider = self.resolve(config)?;
        provider
            .check_requirements()
            .await
            .map_err(|err| match err {
                RequirementError::Interrupted { .. } => OrchestratorError::UserAbort {
                    operation: String::from("requirement check"),
                    resource: None,
                    note: String::new(),
                },
                other => OrchestratorError::Requirement(other),
            })?;

        let mut errors = config.validate();
        errors.extend(provider.validate_config(config));
        if !errors.is_empty() {
            return Err(OrchestratorError::Validation(ValidationErrors(errors)));
        }
        Ok(provider)
    }

    fn persist(
        &self,
        config: &Configuration,
        deployment: Option<DeploymentRecord>,
    ) -> Result<(), OrchestratorError> {
        let mut updated = config.clone();
        updated.deployment = deployment;
        self.store.save(&updated)?;
        Ok(())
    }

    /// Records a backend failure and converts it to the matching error.
    fn fail(
        &self,
        config: &Configuration,
        operation: &str,
        mut record: DeploymentRecord,
        err: DeployError,
    ) -> OrchestratorError {
        record.status = DeploymentState::Failed;
        record.detail = Some(err.to_string());
        let resource = record.handle.clone();
        let note = self
            .persist(config, Some(record))
            .err()
            .map_or_else(String::new, |store_err| {
                format!(" (recording the failure also failed: {store_err})")
            });

        if err.is_interrupted() {
            warn!(resource = %resource, operation, "interrupted; record marked failed");
            return OrchestratorError::UserAbort {
                operation: operation.to_owned(),
                resource: Some(resource),
                note,
            };
        }
        OrchestratorError::Deploy {
            operation: operation.to_owned(),
            resource,
            source: Box::new(err),
            note,
        }
    }

    /// Deploys the configuration and persists the resulting record.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when resolution, requirements,
    /// validation, or the backend fail, or when a failed record exists and
    /// `options.retry` is not set.
    pub async fn deploy(
        &self,
        config: &Configuration,
        options: DeployOptions,
    ) -> Result<DeploymentRecord, OrchestratorError> {
        let provider = self.prepare(config).await?;
        let previous = config.active_record();
        let from = previous.map_or(DeploymentState::Absent, |record| record.status);
        if let Some(record) = previous
            && record.status == DeploymentState::Failed
            && !options.retry
        {
            return Err(OrchestratorError::PreviouslyFailed {
                handle: record.handle.clone(),
                detail: record
                    .detail
                    .clone()
                    .unwrap_or_else(|| String::from("no diagnostic recorded")),
            });
        }
        if from != DeploymentState::Running {
            from.transition(DeploymentState::Building)?;
        }

        let handle = provider.resource_name(config);
        info!(provider = %config.provider, handle = %handle, from = %from, "deploying");
        match provider.deploy(config).await {
            Ok(record) => {
                if previous == Some(&record) {
                    info!(handle = %record.handle, "already up to date");
                    return Ok(record);
                }
                self.persist(config, Some(record.clone()))?;
                info!(handle = %record.handle, status = %record.status, "deployment recorded");
                Ok(record)
            }
            Err(err) => {
                let failed = DeploymentRecord::new(
                    config.provider.clone(),
                    handle,
                    DeploymentState::Failed,
                );
                Err(self.fail(config, "deploy", failed, err))
            }
        }
    }

    /// Stops the deployment. Returns the updated record, or `None` when
    /// there was nothing to stop.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when resolution, requirements,
    /// validation, or the backend fail.
    pub async fn stop(
        &self,
        config: &Configuration,
    ) -> Result<Option<DeploymentRecord>, OrchestratorError> {
        let provider = self.prepare(config).await?;
        let Some(record) = config.active_record() else {
            info!(provider = %config.provider, "no deployment recorded; nothing to stop");
            return Ok(None);
        };
        if matches!(
            record.status,
            DeploymentState::Absent | DeploymentState::Stopped
        ) {
            info!(handle = %record.handle, status = %record.status, "already stopped");
            return Ok(Some(record.clone()));
        }
        if record.status == DeploymentState::Failed {
            warn!(handle = %record.handle, "stopping a deployment marked failed");
        }
        record.status.transition(DeploymentState::Stopping)?;

        info!(handle = %record.handle, "stopping");
        match provider.stop(config).await {
            Ok(()) => {
                let mut stopped = record.clone();
                stopped.advance(&[DeploymentState::Stopping, DeploymentState::Stopped])?;
                self.persist(config, Some(stopped.clone()))?;
                Ok(Some(stopped))
            }
            Err(err) => Err(self.fail(config, "stop", record.clone(), err)),
        }
    }

    /// Removes the deployment and clears the persisted record.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when resolution, requirements,
    /// validation, or the backend fail.
    pub async fn remove(
        &self,
        config: &Configuration,
        options: RemoveOptions,
    ) -> Result<(), OrchestratorError> {
        let provider = self.prepare(config).await?;
        let record = config.active_record();
        if record.is_some_and(|r| r.status == DeploymentState::Failed) {
            warn!(provider = %config.provider, "removing a deployment marked failed");
        }
        let handle = record.map_or_else(|| provider.resource_name(config), |r| r.handle.clone());

        info!(handle = %handle, purge_image = options.purge_image, "removing");
        match provider.remove(config, options).await {
            Ok(()) => {
                if config.deployment.is_some() {
                    self.persist(config, None)?;
                }
                info!(handle = %handle, "removed");
                Ok(())
            }
            Err(err) => {
                let failed = record.cloned().unwrap_or_else(|| {
                    DeploymentRecord::new(config.provider.clone(), handle, DeploymentState::Failed)
                });
                Err(self.fail(config, "remove", failed, err))
            }
        }
    }

    /// Reports the persisted state; with `live`, also asks the backend.
    /// Never writes.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] when the provider is unknown or the
    /// live probe fails.
    pub async fn status(
        &self,
        config: &Configuration,
        live: bool,
    ) -> Result<StatusReport, OrchestratorError> {
        let provider = self.resolve(config)?;
        let record = config.active_record();
        let mut report = StatusReport {
            provider: config.provider.clone(),
            handle: record.map_or_else(|| provider.resource_name(config), |r| r.handle.clone()),
            recorded: record.map_or(DeploymentState::Absent, |r| r.status),
            live: None,
            detail: record.and_then(|r| r.detail.clone()),
        };
        if live {
            let observed = provider.probe(config).await.map_err(|err| {
                if err.is_interrupted() {
                    OrchestratorError::UserAbort {
                        operation: String::from("status"),
                        resource: None,
                        note: String::new(),
                    }
                } else {
                    OrchestratorError::Deploy {
                        operation: String::from("status"),
                        resource: report.handle.clone(),
                        source: Box::new(err),
                        note: String::new(),
                    }
                }
            })?;
            report.live = Some(observed);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests;
