//! Core domain model types for canaryflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - The fixed stage sequence
//! - Stage status and run state enums
//! - Artifacts passed between stages and the image-definitions manifest
//! - Pipeline runs and their stage execution records
//! - Lifecycle events

mod artifact;
mod event;
mod image_definitions;
mod run;
mod stage;
mod status;

pub use artifact::{
    ApprovalDecision, ApprovalRecord, Artifact, DeploymentRecord, ImageReference, SourceSnapshot,
};
pub use event::{EventKind, PipelineEvent};
pub use image_definitions::{ImageDefinition, ImageDefinitions, IMAGE_DEFINITIONS_FILE};
pub use run::{PipelineRun, RunFailure, StageExecution, Trigger};
pub use stage::StageName;
pub use status::{RunState, StageStatus};
