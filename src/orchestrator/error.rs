//! Error types for lifecycle orchestration.

use thiserror::Error;

use crate::config::ValidationErrors;
use crate::config_store::ConfigStoreError;
use crate::provider::{DeployError, RegistryError, RequirementError};
use crate::state::TransitionError;

/// Errors raised while driving a lifecycle operation.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Raised when the provider name is unknown or registered twice.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// Raised when the provider's external tool is missing or unusable.
    #[error(transparent)]
    Requirement(#[from] RequirementError),
    /// Raised when the configuration fails validation; lists every problem.
    #[error("invalid configuration: {0}")]
    Validation(ValidationErrors),
    /// Raised when deploy meets a record left failed by an earlier run.
    #[error(
        "{handle} is marked failed by an earlier run ({detail}); run `deploy --retry` to try again, or `stop`/`remove` to clean up"
    )]
    PreviouslyFailed {
        /// Backend handle of the failed resource.
        handle: String,
        /// Diagnostic recorded with the failure.
        detail: String,
    },
    /// Raised when the backend fails mid-operation. The record is left
    /// failed.
    #[error("{operation} of {resource} failed: {source}{note}")]
    Deploy {
        /// Lifecycle operation (`deploy`, `stop`, `remove`).
        operation: String,
        /// Backend handle involved.
        resource: String,
        /// Provider error.
        #[source]
        source: Box<DeployError>,
        /// Extra note when recording the failure also failed.
        note: String,
    },
    /// Raised when the user interrupts a blocking call.
    #[error("{operation} interrupted by the user; {}{note}", abort_hint(.resource.as_deref()))]
    UserAbort {
        /// Lifecycle operation that was interrupted.
        operation: String,
        /// Backend resource that may be left behind, if any was touched.
        resource: Option<String>,
        /// Extra note when recording the interruption also failed.
        note: String,
    },
    /// Raised when an operation would make an illegal state transition.
    #[error(transparent)]
    Transition(#[from] TransitionError),
    /// Raised when the configuration cannot be persisted.
    #[error("failed to persist configuration: {0}")]
    Store(#[from] ConfigStoreError),
}

impl OrchestratorError {
    /// Process exit code for this error class.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Requirement(_) => 3,
            Self::Validation(_) => 4,
            Self::Deploy { .. } => 5,
            Self::Registry(RegistryError::Unknown { .. }) => 6,
            Self::Registry(RegistryError::Duplicate { .. }) => 7,
            Self::PreviouslyFailed { .. } => 8,
            Self::UserAbort { .. } => 130,
            Self::Transition(_) | Self::Store(_) => 1,
        }
    }
}

fn abort_hint(resource: Option<&str>) -> String {
    resource.map_or_else(
        || String::from("nothing was changed on the backend"),
        |name| {
            format!(
                "{name} may still exist on the backend; run `status --live` to check and `remove` to clean up"
            )
        },
    )
}
