//! Pipeline execution.

mod coordinator;

pub use coordinator::{PipelineCoordinator, TIMEOUT_POLICY_ACTOR};
