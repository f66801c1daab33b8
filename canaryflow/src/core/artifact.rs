//! Artifacts handed from one stage to the next.
//!
//! An artifact is written once, when its producing stage succeeds, and is
//! never mutated afterwards. The build stage's [`ImageReference`] is the value
//! consumed by both deploy stages.

use crate::errors::ImageReferenceError;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static TAG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$")
        .unwrap_or_else(|_| panic!("static regex 'TAG_PATTERN' failed to compile"))
});

/// Snapshot of the repository produced by the source stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSnapshot {
    /// Repository the snapshot was taken from.
    pub repository: String,
    /// Branch that was pushed.
    pub branch: String,
    /// Commit the snapshot points at.
    pub commit: String,
    /// Opaque location of the fetched sources (bucket key, checkout path...).
    pub location: String,
}

/// A built container image: `<repository_uri>:<tag>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    /// Registry repository URI (e.g. `123.dkr.ecr.us-east-1.amazonaws.com/app`).
    pub repository_uri: String,
    /// Image tag.
    pub tag: String,
}

impl ImageReference {
    /// Creates an image reference, validating the tag.
    pub fn new(
        repository_uri: impl Into<String>,
        tag: impl Into<String>,
    ) -> Result<Self, ImageReferenceError> {
        let repository_uri = repository_uri.into();
        let tag = tag.into();

        if repository_uri.trim().is_empty() {
            return Err(ImageReferenceError::EmptyRepository);
        }
        if !TAG_PATTERN.is_match(&tag) {
            return Err(ImageReferenceError::InvalidTag(tag));
        }

        Ok(Self {
            repository_uri,
            tag,
        })
    }

    /// Parses `<repository_uri>:<tag>`.
    ///
    /// The tag separator is the last `:` after the last `/`, so registry
    /// hosts with a port are handled.
    pub fn parse(image: &str) -> Result<Self, ImageReferenceError> {
        let name_start = image.rfind('/').map_or(0, |i| i + 1);
        match image[name_start..].rfind(':') {
            Some(sep) => {
                let sep = name_start + sep;
                Self::new(&image[..sep], &image[sep + 1..])
            }
            None => Err(ImageReferenceError::MissingTag(image.to_string())),
        }
    }

    /// The canonical `<repository_uri>:<tag>` string.
    #[must_use]
    pub fn uri(&self) -> String {
        format!("{}:{}", self.repository_uri, self.tag)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository_uri, self.tag)
    }
}

/// Result of updating a service to a new image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Cluster the service runs in.
    pub cluster: String,
    /// Service that was updated.
    pub service: String,
    /// Image the service now runs.
    pub image: ImageReference,
    /// Identifier assigned by the orchestration service.
    pub deployment_id: String,
    /// Desired task count for the service.
    pub desired_count: u32,
}

/// The two outcomes an approver can record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    /// Promote the canary to production.
    Approve,
    /// Stop the run before production.
    Reject,
}

impl fmt::Display for ApprovalDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approve => write!(f, "approve"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

/// Record of an approval decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    /// The decision.
    pub decision: ApprovalDecision,
    /// Who decided, for audit only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// When the decision was recorded.
    pub decided_at: DateTime<Utc>,
}

/// Data produced by a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Artifact {
    /// Produced by the source stage.
    SourceSnapshot(SourceSnapshot),
    /// Produced by the build stage.
    Image(ImageReference),
    /// Produced by each deploy stage.
    Deployment(DeploymentRecord),
    /// Produced by the approval stage.
    Approval(ApprovalRecord),
}

impl Artifact {
    /// Returns the source snapshot, if this is one.
    #[must_use]
    pub fn as_source_snapshot(&self) -> Option<&SourceSnapshot> {
        match self {
            Self::SourceSnapshot(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the image reference, if this is one.
    #[must_use]
    pub fn as_image(&self) -> Option<&ImageReference> {
        match self {
            Self::Image(image) => Some(image),
            _ => None,
        }
    }

    /// Returns the deployment record, if this is one.
    #[must_use]
    pub fn as_deployment(&self) -> Option<&DeploymentRecord> {
        match self {
            Self::Deployment(d) => Some(d),
            _ => None,
        }
    }

    /// Returns the approval record, if this is one.
    #[must_use]
    pub fn as_approval(&self) -> Option<&ApprovalRecord> {
        match self {
            Self::Approval(a) => Some(a),
            _ => None,
        }
    }

    /// Short kind label used in logs and events.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SourceSnapshot(_) => "source_snapshot",
            Self::Image(_) => "image",
            Self::Deployment(_) => "deployment",
            Self::Approval(_) => "approval",
        }
    }
}
