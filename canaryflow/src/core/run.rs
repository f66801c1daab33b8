//! Pipeline runs and their per-stage execution records.

use super::{
    ApprovalRecord, Artifact, DeploymentRecord, ImageReference, RunState, SourceSnapshot,
    StageName, StageStatus,
};
use crate::errors::{StageFailure, TransitionError};
use crate::utils::{generate_run_id, now_utc, Timestamp};
use serde::{de, Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// A source-control push that starts a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    /// Repository that received the push.
    pub repository: String,
    /// Branch that was pushed.
    pub branch: String,
    /// Commit reference at the head of the push.
    pub commit: String,
    /// When the push event was received.
    pub received_at: Timestamp,
}

impl Trigger {
    /// Creates a push trigger received now.
    #[must_use]
    pub fn push(
        repository: impl Into<String>,
        branch: impl Into<String>,
        commit: impl Into<String>,
    ) -> Self {
        Self {
            repository: repository.into(),
            branch: branch.into(),
            commit: commit.into(),
            received_at: now_utc(),
        }
    }
}

/// Execution record of one stage within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageExecution {
    /// The stage.
    pub stage: StageName,
    /// Current status.
    pub status: StageStatus,
    /// Artifact produced when the stage succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,
    /// When the stage started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// When the stage reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
    /// Error message if the stage failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageExecution {
    fn pending(stage: StageName) -> Self {
        Self {
            stage,
            status: StageStatus::Pending,
            artifact: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// Wall-clock duration in milliseconds, once finished.
    #[must_use]
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// Why a run ended in [`RunState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    /// The stage that halted the run.
    pub stage: StageName,
    /// What went wrong.
    pub error: StageFailure,
}

/// One execution of the pipeline for a trigger.
///
/// State only moves forward through the transition methods, which enforce
/// that a stage starts only after its predecessor succeeded and that a failure
/// is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    id: Uuid,
    pipeline_name: String,
    trigger: Trigger,
    state: RunState,
    #[serde(deserialize_with = "deserialize_stages")]
    stages: Vec<StageExecution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<RunFailure>,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl PipelineRun {
    /// Creates a run positioned at the source stage, with every stage pending.
    #[must_use]
    pub fn new(pipeline_name: impl Into<String>, trigger: Trigger) -> Self {
        let now = now_utc();
        Self {
            id: generate_run_id(),
            pipeline_name: pipeline_name.into(),
            trigger,
            state: RunState::for_stage(StageName::first()),
            stages: StageName::SEQUENCE
                .iter()
                .copied()
                .map(StageExecution::pending)
                .collect(),
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The run id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Name of the pipeline this run belongs to.
    #[must_use]
    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    /// The trigger that started the run.
    #[must_use]
    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Stage execution records in execution order.
    #[must_use]
    pub fn stages(&self) -> &[StageExecution] {
        &self.stages
    }

    /// Failure record, if the run failed.
    #[must_use]
    pub fn failure(&self) -> Option<&RunFailure> {
        self.failure.as_ref()
    }

    /// When the run was created.
    #[must_use]
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// When the run last changed.
    #[must_use]
    pub fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    /// Returns true once the run succeeded or failed.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// The stage currently executing, if the run is not terminal.
    #[must_use]
    pub fn current_stage(&self) -> Option<StageName> {
        self.state.stage()
    }

    /// The stage that halted the run, if it failed.
    #[must_use]
    pub fn halted_stage(&self) -> Option<StageName> {
        self.failure.as_ref().map(|f| f.stage)
    }

    /// Execution record of a stage.
    #[must_use]
    pub fn execution(&self, stage: StageName) -> &StageExecution {
        &self.stages[stage.index()]
    }

    /// Stages that have left `pending`, in execution order.
    #[must_use]
    pub fn executed_stages(&self) -> Vec<StageName> {
        self.stages
            .iter()
            .filter(|e| e.status != StageStatus::Pending)
            .map(|e| e.stage)
            .collect()
    }

    /// Artifact produced by a stage.
    #[must_use]
    pub fn artifact(&self, stage: StageName) -> Option<&Artifact> {
        self.execution(stage).artifact.as_ref()
    }

    /// Source snapshot produced by the source stage.
    #[must_use]
    pub fn source_snapshot(&self) -> Option<&SourceSnapshot> {
        self.artifact(StageName::Source)
            .and_then(Artifact::as_source_snapshot)
    }

    /// Image produced by the build stage.
    #[must_use]
    pub fn image(&self) -> Option<&ImageReference> {
        self.artifact(StageName::Build).and_then(Artifact::as_image)
    }

    /// Deployment record of the canary stage.
    #[must_use]
    pub fn canary_deployment(&self) -> Option<&DeploymentRecord> {
        self.artifact(StageName::DeployCanary)
            .and_then(Artifact::as_deployment)
    }

    /// Recorded approval decision.
    #[must_use]
    pub fn approval(&self) -> Option<&ApprovalRecord> {
        self.artifact(StageName::Approval)
            .and_then(Artifact::as_approval)
    }

    /// Deployment record of the production stage.
    #[must_use]
    pub fn production_deployment(&self) -> Option<&DeploymentRecord> {
        self.artifact(StageName::DeployProduction)
            .and_then(Artifact::as_deployment)
    }

    /// Marks `stage` as running.
    ///
    /// Re-entering a stage that is already running is allowed so that a run
    /// reloaded after a restart can pick up where it stopped.
    pub fn start_stage(&mut self, stage: StageName) -> Result<(), TransitionError> {
        self.expect_current(stage)?;

        if let Some(prev) = stage.previous() {
            if self.execution(prev).status != StageStatus::Succeeded {
                return Err(self.transition_error(
                    stage,
                    format!("predecessor '{prev}' has not succeeded"),
                ));
            }
        }

        let now = now_utc();
        let execution = &mut self.stages[stage.index()];
        match execution.status {
            StageStatus::Pending => {
                execution.status = StageStatus::Running;
                execution.started_at = Some(now);
            }
            StageStatus::Running => {}
            status => {
                return Err(self.transition_error(stage, format!("stage is already {status}")));
            }
        }
        self.updated_at = now;
        Ok(())
    }

    /// Marks `stage` as succeeded with its artifact and advances the run.
    pub fn complete_stage(
        &mut self,
        stage: StageName,
        artifact: Artifact,
    ) -> Result<(), TransitionError> {
        self.expect_running(stage)?;

        let now = now_utc();
        let execution = &mut self.stages[stage.index()];
        execution.status = StageStatus::Succeeded;
        execution.artifact = Some(artifact);
        execution.finished_at = Some(now);

        self.state = stage.next().map_or(RunState::Succeeded, RunState::for_stage);
        self.updated_at = now;
        Ok(())
    }

    /// Marks `stage` as failed and halts the run.
    pub fn fail_stage(
        &mut self,
        stage: StageName,
        failure: StageFailure,
    ) -> Result<(), TransitionError> {
        self.expect_running(stage)?;

        let now = now_utc();
        let execution = &mut self.stages[stage.index()];
        execution.status = StageStatus::Failed;
        execution.error = Some(failure.to_string());
        execution.finished_at = Some(now);

        self.failure = Some(RunFailure {
            stage,
            error: failure,
        });
        self.state = RunState::Failed;
        self.updated_at = now;
        Ok(())
    }

    fn expect_current(&self, stage: StageName) -> Result<(), TransitionError> {
        if self.state.is_terminal() {
            return Err(self.transition_error(stage, "run is terminal"));
        }
        if self.state != RunState::for_stage(stage) {
            return Err(self.transition_error(stage, "stage is not the current stage"));
        }
        Ok(())
    }

    fn expect_running(&self, stage: StageName) -> Result<(), TransitionError> {
        self.expect_current(stage)?;
        let status = self.execution(stage).status;
        if status != StageStatus::Running {
            return Err(self.transition_error(stage, format!("stage is {status}, not running")));
        }
        Ok(())
    }

    fn transition_error(&self, stage: StageName, reason: impl Into<String>) -> TransitionError {
        TransitionError::new(self.id, stage, self.state, reason)
    }
}

/// Accepts only one execution record per stage, in sequence order, so
/// stage lookups by index cannot go out of bounds.
fn deserialize_stages<'de, D>(deserializer: D) -> Result<Vec<StageExecution>, D::Error>
where
    D: Deserializer<'de>,
{
    let stages = Vec::<StageExecution>::deserialize(deserializer)?;
    let in_sequence = stages.len() == StageName::SEQUENCE.len()
        && stages
            .iter()
            .zip(StageName::SEQUENCE)
            .all(|(execution, stage)| execution.stage == stage);
    if !in_sequence {
        let found: Vec<_> = stages.iter().map(|e| e.stage.as_str()).collect();
        return Err(de::Error::custom(format!(
            "stage records must follow the pipeline sequence, found [{}]",
            found.join(", ")
        )));
    }
    Ok(stages)
}
