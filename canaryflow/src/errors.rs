//! Error types for canaryflow.
//!
//! Two layers are kept apart:
//! - [`StageFailure`] is the reason a run halted. It is part of the run record
//!   and is persisted with it; a failed stage is a normal run outcome.
//! - [`CanaryflowError`] is returned by coordinator operations when the
//!   coordinator itself cannot proceed (bad config, unknown run, store I/O).

use crate::core::{RunState, StageName};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// The main error type for canaryflow operations.
#[derive(Debug, Error)]
pub enum CanaryflowError {
    /// The pipeline configuration is invalid.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The trigger does not target the configured repository and branch.
    #[error("Trigger for '{actual}' does not match configured source '{expected}'")]
    TriggerMismatch {
        /// Configured `<repository>@<branch>`.
        expected: String,
        /// `<repository>@<branch>` named by the trigger.
        actual: String,
    },

    /// No run with this id exists in the store.
    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    /// The run is already being driven by this coordinator.
    #[error("Run {0} is already active")]
    RunAlreadyActive(Uuid),

    /// The run is not suspended at the approval gate.
    #[error("Run {run_id} is not awaiting approval (state: {state})")]
    NotAwaitingApproval {
        /// The run id.
        run_id: Uuid,
        /// The run's current state.
        state: RunState,
    },

    /// The run is suspended at the approval gate but no coordinator is
    /// driving it, e.g. after a restart. It must be resumed first.
    #[error("Run {0} is awaiting approval but is not active; resume it first")]
    RunNotActive(Uuid),

    /// The run is entering the approval stage and has not registered at the
    /// gate yet.
    #[error("Run {0} has not reached the approval gate yet")]
    GateNotReady(Uuid),

    /// A state transition was refused.
    #[error("{0}")]
    Transition(#[from] TransitionError),

    /// The run store failed.
    #[error("{0}")]
    Store(#[from] StoreError),
}

/// Why a run halted. Each variant is terminal for the run.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageFailure {
    /// The source snapshot could not be fetched.
    #[error("Source fetch failed: {message}")]
    SourceFetch {
        /// Error reported by the source provider.
        message: String,
    },

    /// The image build failed.
    #[error("Build failed: {message}")]
    Build {
        /// Error reported by the image builder.
        message: String,
    },

    /// A service update failed.
    #[error("Deployment to service '{service}' failed: {message}")]
    Deployment {
        /// Service that was being updated.
        service: String,
        /// Error reported by the deployer.
        message: String,
    },

    /// The approver rejected the canary.
    #[error("Approval rejected")]
    ApprovalRejected {
        /// Who rejected.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        actor: Option<String>,
    },

    /// No decision arrived within the configured approval timeout.
    #[error("Approval timed out after {timeout_secs}s")]
    ApprovalTimedOut {
        /// The configured timeout.
        timeout_secs: u64,
    },

    /// An operator aborted the run while it waited for approval.
    #[error("Run aborted: {reason}")]
    Aborted {
        /// Reason given by the operator.
        reason: String,
    },
}

impl StageFailure {
    /// Stable error code for reporting.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::SourceFetch { .. } => "SourceFetchError",
            Self::Build { .. } => "BuildError",
            Self::Deployment { .. } => "DeploymentError",
            Self::ApprovalRejected { .. } => "ApprovalRejected",
            Self::ApprovalTimedOut { .. } => "ApprovalTimedOut",
            Self::Aborted { .. } => "Aborted",
        }
    }

    /// Creates a source fetch failure.
    #[must_use]
    pub fn source_fetch(message: impl Into<String>) -> Self {
        Self::SourceFetch {
            message: message.into(),
        }
    }

    /// Creates a build failure.
    #[must_use]
    pub fn build(message: impl Into<String>) -> Self {
        Self::Build {
            message: message.into(),
        }
    }

    /// Creates a deployment failure.
    #[must_use]
    pub fn deployment(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Deployment {
            service: service.into(),
            message: message.into(),
        }
    }
}

/// Error raised when a run refuses a state transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Run {run_id}: cannot transition stage '{stage}' in state '{state}': {reason}")]
pub struct TransitionError {
    /// The run id.
    pub run_id: Uuid,
    /// The stage the transition targeted.
    pub stage: StageName,
    /// The run's state at the time.
    pub state: RunState,
    /// Why the transition was refused.
    pub reason: String,
}

impl TransitionError {
    /// Creates a new transition error.
    #[must_use]
    pub fn new(run_id: Uuid, stage: StageName, state: RunState, reason: impl Into<String>) -> Self {
        Self {
            run_id,
            stage,
            state,
            reason: reason.into(),
        }
    }
}

/// Errors raised while loading or validating a pipeline configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        /// The file path.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// The config could not be parsed.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A field holds an invalid value.
    #[error("Invalid config field '{field}': {reason}")]
    Invalid {
        /// The field path (e.g. `canary.service`).
        field: String,
        /// Why it is invalid.
        reason: String,
    },
}

impl ConfigError {
    /// Creates an invalid field error.
    #[must_use]
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by a run store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem access failed.
    #[error("Run store I/O error at {}: {source}", path.display())]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// A run record could not be (de)serialized.
    #[error("Run store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The blocking store task panicked or was cancelled.
    #[error("Run store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Errors raised when constructing an image reference.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageReferenceError {
    /// The repository URI is empty.
    #[error("Image repository URI is empty")]
    EmptyRepository,

    /// The tag is not a valid image tag.
    #[error("Invalid image tag: '{0}'")]
    InvalidTag(String),

    /// The image string has no tag.
    #[error("Image reference has no tag: '{0}'")]
    MissingTag(String),
}
