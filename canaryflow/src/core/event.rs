//! Lifecycle events emitted while a run progresses.

use super::StageName;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A run was created.
    #[serde(rename = "run.started")]
    RunStarted,
    /// A persisted run was picked up again.
    #[serde(rename = "run.resumed")]
    RunResumed,
    /// A stage began executing.
    #[serde(rename = "stage.started")]
    StageStarted,
    /// A stage succeeded.
    #[serde(rename = "stage.succeeded")]
    StageSucceeded,
    /// A stage failed.
    #[serde(rename = "stage.failed")]
    StageFailed,
    /// The run suspended at the approval gate.
    #[serde(rename = "approval.requested")]
    ApprovalRequested,
    /// The approval gate released the run.
    #[serde(rename = "approval.decided")]
    ApprovalDecided,
    /// The run reached a terminal state.
    #[serde(rename = "run.completed")]
    RunCompleted,
}

impl EventKind {
    /// Dotted event type string (e.g. `stage.started`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RunStarted => "run.started",
            Self::RunResumed => "run.resumed",
            Self::StageStarted => "stage.started",
            Self::StageSucceeded => "stage.succeeded",
            Self::StageFailed => "stage.failed",
            Self::ApprovalRequested => "approval.requested",
            Self::ApprovalDecided => "approval.decided",
            Self::RunCompleted => "run.completed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event emitted by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// The event kind.
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// The run the event belongs to.
    pub run_id: Uuid,
    /// The stage involved, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageName>,
    /// When the event occurred (ISO 8601).
    pub timestamp: String,
    /// Event payload.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl PipelineEvent {
    /// Creates a run-level event.
    #[must_use]
    pub fn new(kind: EventKind, run_id: Uuid) -> Self {
        Self {
            kind,
            run_id,
            stage: None,
            timestamp: crate::utils::iso_timestamp(),
            data: serde_json::Value::Null,
        }
    }

    /// Creates a stage-level event.
    #[must_use]
    pub fn for_stage(kind: EventKind, run_id: Uuid, stage: StageName) -> Self {
        Self {
            stage: Some(stage),
            ..Self::new(kind, run_id)
        }
    }

    /// Attaches a payload.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}
