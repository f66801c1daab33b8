//! The fixed stage sequence of a canary pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One discrete step of the deployment sequence.
///
/// The declaration order is the execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Fetch a source snapshot for the pushed commit.
    Source,
    /// Build a container image from the source snapshot.
    Build,
    /// Roll the image out to the canary service.
    DeployCanary,
    /// Wait for a human decision on the canary.
    Approval,
    /// Roll the image out to the production service.
    DeployProduction,
}

impl StageName {
    /// All stages in execution order.
    pub const SEQUENCE: [Self; 5] = [
        Self::Source,
        Self::Build,
        Self::DeployCanary,
        Self::Approval,
        Self::DeployProduction,
    ];

    /// Position of the stage in [`Self::SEQUENCE`].
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Source => 0,
            Self::Build => 1,
            Self::DeployCanary => 2,
            Self::Approval => 3,
            Self::DeployProduction => 4,
        }
    }

    /// The first stage of every run.
    #[must_use]
    pub const fn first() -> Self {
        Self::Source
    }

    /// The stage that follows this one, or `None` for the last stage.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        Self::SEQUENCE.get(self.index() + 1).copied()
    }

    /// The stage that precedes this one, or `None` for the first stage.
    #[must_use]
    pub fn previous(self) -> Option<Self> {
        self.index().checked_sub(1).map(|i| Self::SEQUENCE[i])
    }

    /// Name of the pipeline action executed by this stage.
    #[must_use]
    pub const fn action_name(self) -> &'static str {
        match self {
            Self::Source => "FetchSource",
            Self::Build => "BuildImage",
            Self::DeployCanary => "DeployCanary",
            Self::Approval => "ApproveDeployment",
            Self::DeployProduction => "DeployProduction",
        }
    }

    /// Returns the stage name as a static string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Build => "build",
            Self::DeployCanary => "deploy_canary",
            Self::Approval => "approval",
            Self::DeployProduction => "deploy_production",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
