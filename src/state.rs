//! Deployment records and the lifecycle state machine.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of one backend resource.
///
/// `Absent` is initial and `Removed` is terminal. `Failed` is terminal unless
/// the user explicitly retries, which re-enters `Building`.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    /// No backend resource has been created.
    #[default]
    Absent,
    /// A deploy is in flight.
    Building,
    /// The resource is up.
    Running,
    /// A stop is in flight.
    Stopping,
    /// The resource exists but is not running.
    Stopped,
    /// The resource was released.
    Removed,
    /// An operation failed or was interrupted.
    Failed,
}

impl DeploymentState {
    /// Returns `true` when moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Absent | Self::Stopped | Self::Running | Self::Failed, Self::Building)
                | (Self::Building, Self::Running | Self::Failed)
                | (Self::Running | Self::Failed, Self::Stopping)
                | (Self::Stopping, Self::Stopped | Self::Failed)
                | (
                    Self::Absent | Self::Stopped | Self::Failed,
                    Self::Removed
                )
        )
    }

    /// Moves to `next`, rejecting illegal transitions.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when the move is not part of the lifecycle.
    pub const fn transition(self, next: Self) -> Result<Self, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError { from: self, to: next })
        }
    }

    /// Lowercase label used in user-facing output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Building => "building",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Removed => "removed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Raised when a lifecycle transition is not permitted.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[error("cannot move deployment from {from} to {to}")]
pub struct TransitionError {
    /// State the record was in.
    pub from: DeploymentState,
    /// State that was requested.
    pub to: DeploymentState,
}

/// Persisted handle and status for one backend resource.
///
/// Created on the first successful deploy, updated on later deploy/stop
/// calls, and cleared when the resource is removed.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DeploymentRecord {
    /// Provider that owns the resource.
    pub provider: String,
    /// Container name or remote application name.
    pub handle: String,
    /// Current lifecycle state.
    pub status: DeploymentState,
    /// Content hash of the inputs the resource was built from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Image reference used by the resource, when the backend has one locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Diagnostic text attached to a failed record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl DeploymentRecord {
    /// Creates a record without fingerprint, image, or diagnostics.
    #[must_use]
    pub fn new(
        provider: impl Into<String>,
        handle: impl Into<String>,
        status: DeploymentState,
    ) -> Self {
        Self {
            provider: provider.into(),
            handle: handle.into(),
            status,
            fingerprint: None,
            image: None,
            detail: None,
        }
    }

    /// Sets the fingerprint.
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// Sets the image reference.
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Returns `true` when the record describes a running resource built from
    /// `fingerprint`.
    #[must_use]
    pub fn is_running_with(&self, fingerprint: &str) -> bool {
        self.status == DeploymentState::Running
            && self.fingerprint.as_deref() == Some(fingerprint)
    }

    /// Walks the record through `steps`, validating each hop.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] at the first illegal hop; the record is
    /// left unchanged in that case.
    pub fn advance(&mut self, steps: &[DeploymentState]) -> Result<(), TransitionError> {
        let mut state = self.status;
        for step in steps {
            state = state.transition(*step)?;
        }
        self.status = state;
        if state != DeploymentState::Failed {
            self.detail = None;
        }
        Ok(())
    }
}
