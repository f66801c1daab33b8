//! Stage status and run state enums.

use super::StageName;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution status of a single stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage has not started.
    #[default]
    Pending,
    /// Stage is currently running (or suspended, for the approval stage).
    Running,
    /// Stage completed successfully.
    Succeeded,
    /// Stage failed. Terminal for the run.
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// The state machine position of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Fetching source.
    Source,
    /// Building the image.
    Build,
    /// Deploying to the canary service.
    DeployCanary,
    /// Suspended at the manual approval gate.
    AwaitingApproval,
    /// Deploying to the production service.
    DeployProduction,
    /// All stages succeeded.
    Succeeded,
    /// A stage failed or the approval was rejected.
    Failed,
}

impl RunState {
    /// The state a run is in while `stage` is executing.
    #[must_use]
    pub const fn for_stage(stage: StageName) -> Self {
        match stage {
            StageName::Source => Self::Source,
            StageName::Build => Self::Build,
            StageName::DeployCanary => Self::DeployCanary,
            StageName::Approval => Self::AwaitingApproval,
            StageName::DeployProduction => Self::DeployProduction,
        }
    }

    /// The stage that executes in this state, if any.
    #[must_use]
    pub const fn stage(self) -> Option<StageName> {
        match self {
            Self::Source => Some(StageName::Source),
            Self::Build => Some(StageName::Build),
            Self::DeployCanary => Some(StageName::DeployCanary),
            Self::AwaitingApproval => Some(StageName::Approval),
            Self::DeployProduction => Some(StageName::DeployProduction),
            Self::Succeeded | Self::Failed => None,
        }
    }

    /// Returns true if the run has finished.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Build => write!(f, "build"),
            Self::DeployCanary => write!(f, "deploy_canary"),
            Self::AwaitingApproval => write!(f, "awaiting_approval"),
            Self::DeployProduction => write!(f, "deploy_production"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
