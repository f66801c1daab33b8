//! # Canaryflow
//!
//! A coordinator for canary deployment pipelines.
//!
//! Every push to the configured branch starts a run that moves through a
//! fixed sequence of stages:
//!
//! - **Source**: fetch a snapshot of the pushed commit
//! - **Build**: build a container image and push it to the registry
//! - **DeployCanary**: roll the image out to the canary service
//! - **Approval**: suspend until a human approves or rejects the canary
//! - **DeployProduction**: roll the same image out to production
//!
//! The first failing stage halts the run. Source control, image builds and
//! container orchestration are supplied as collaborator traits.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use canaryflow::prelude::*;
//! use std::sync::Arc;
//!
//! let config = PipelineConfig::new("canary-app", "123456789012.dkr.ecr.us-east-1.amazonaws.com/canary-app");
//! let coordinator = Arc::new(PipelineCoordinator::new(Arc::new(config), collaborators)?);
//!
//! let run = coordinator.run_pipeline(Trigger::push("canary-app", "main", "abc123")).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod approval;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod store;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::approval::{ApprovalGate, ApprovalOutcome, ApprovalRequest};
    pub use crate::config::{
        ApprovalPolicy, PipelineConfig, RegistryConfig, ServiceTarget, SourceConfig,
        TimeoutAction,
    };
    pub use crate::core::{
        ApprovalDecision, ApprovalRecord, Artifact, DeploymentRecord, EventKind,
        ImageDefinitions, ImageReference, PipelineEvent, PipelineRun, RunState, SourceSnapshot,
        StageName, StageStatus, Trigger,
    };
    pub use crate::errors::{CanaryflowError, StageFailure};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::PipelineCoordinator;
    pub use crate::stages::{
        Collaborators, DeployRequest, ImageBuilder, ServiceDeployer, SourceProvider,
    };
    pub use crate::store::{FileRunStore, MemoryRunStore, RunStore};
    pub use crate::utils::{generate_run_id, iso_timestamp, Timestamp};
}
