//! The deployment pipeline coordinator.
//!
//! Drives a [`PipelineRun`] through Source → Build → DeployCanary →
//! Approval → DeployProduction. Each stage is delegated to a collaborator;
//! the coordinator only sequences the calls, hands artifacts forward, waits at
//! the approval gate and persists the run after every transition.

use crate::approval::{ApprovalGate, ApprovalOutcome, ApprovalRequest};
use crate::config::{PipelineConfig, ServiceTarget, TimeoutAction};
use crate::core::{
    ApprovalDecision, ApprovalRecord, Artifact, EventKind, ImageReference, PipelineEvent,
    PipelineRun, RunState, StageName, Trigger,
};
use crate::errors::{CanaryflowError, StageFailure, StoreError, TransitionError};
use crate::events::{EventSink, NoOpEventSink};
use crate::stages::{Collaborators, DeployRequest};
use crate::store::{FileRunStore, MemoryRunStore, RunStore};
use crate::utils::now_utc;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Actor recorded when the timeout policy approves a canary.
pub const TIMEOUT_POLICY_ACTOR: &str = "timeout-policy";

type StageResult = Result<Artifact, StageFailure>;

/// Sequences pipeline runs.
///
/// The coordinator is `Send + Sync`; share it with `Arc` to drive several
/// runs concurrently. Stages within one run always execute sequentially.
pub struct PipelineCoordinator {
    config: Arc<PipelineConfig>,
    collaborators: Collaborators,
    store: Arc<dyn RunStore>,
    gate: Arc<ApprovalGate>,
    events: Arc<dyn EventSink>,
    active: DashMap<Uuid, ()>,
}

impl PipelineCoordinator {
    /// Creates a coordinator for a validated config.
    ///
    /// Runs are persisted to a [`FileRunStore`] under `config.state_dir` when
    /// set, and kept in memory otherwise.
    pub fn new(
        config: Arc<PipelineConfig>,
        collaborators: Collaborators,
    ) -> Result<Self, CanaryflowError> {
        config.validate()?;

        let store: Arc<dyn RunStore> = match &config.state_dir {
            Some(dir) => Arc::new(FileRunStore::open(dir)?),
            None => Arc::new(MemoryRunStore::new()),
        };

        Ok(Self {
            config,
            collaborators,
            store,
            gate: Arc::new(ApprovalGate::new()),
            events: Arc::new(NoOpEventSink),
            active: DashMap::new(),
        })
    }

    /// Replaces the run store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = store;
        self
    }

    /// Replaces the approval gate.
    #[must_use]
    pub fn with_approval_gate(mut self, gate: Arc<ApprovalGate>) -> Self {
        self.gate = gate;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// The pipeline config.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The approval gate runs wait at.
    #[must_use]
    pub fn approval_gate(&self) -> &Arc<ApprovalGate> {
        &self.gate
    }

    /// The run store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Starts a run for `trigger` and drives it to a terminal state.
    ///
    /// A failed stage is a normal outcome: the returned run is
    /// [`crate::core::RunState::Failed`] with its failure recorded. `Err` is
    /// returned only when the trigger does not match the configured source or
    /// the coordinator itself cannot proceed.
    pub async fn run_pipeline(&self, trigger: Trigger) -> Result<PipelineRun, CanaryflowError> {
        self.check_trigger(&trigger)?;

        let run = PipelineRun::new(&self.config.pipeline_name, trigger);
        let _active = self.activate(run.id())?;
        self.persist(&run).await?;

        info!(
            run_id = %run.id(),
            commit = %run.trigger().commit,
            branch = %run.trigger().branch,
            "Pipeline run started"
        );
        self.emit(
            PipelineEvent::new(EventKind::RunStarted, run.id()).with_data(serde_json::json!({
                "pipeline": run.pipeline_name(),
                "repository": run.trigger().repository,
                "branch": run.trigger().branch,
                "commit": run.trigger().commit,
            })),
        )
        .await;

        let span = info_span!("pipeline_run", run_id = %run.id(), pipeline = %run.pipeline_name());
        self.drive(run).instrument(span).await
    }

    /// Reloads a persisted run and continues it from its persisted state.
    ///
    /// Terminal runs are returned unchanged. A run that was executing a stage
    /// when the process stopped re-enters that stage; a run suspended at the
    /// approval gate waits again, with any approval timeout measured from the
    /// original suspension.
    pub async fn resume(&self, run_id: Uuid) -> Result<PipelineRun, CanaryflowError> {
        let store = Arc::clone(&self.store);
        let run = tokio::task::spawn_blocking(move || store.load(run_id))
            .await
            .map_err(StoreError::from)??
            .ok_or(CanaryflowError::RunNotFound(run_id))?;
        if run.is_terminal() {
            return Ok(run);
        }

        let _active = self.activate(run_id)?;
        info!(run_id = %run_id, state = %run.state(), "Resuming pipeline run");
        self.emit(
            PipelineEvent::new(EventKind::RunResumed, run_id)
                .with_data(serde_json::json!({ "state": run.state() })),
        )
        .await;

        let span = info_span!("pipeline_run", run_id = %run_id, pipeline = %run.pipeline_name());
        self.drive(run).instrument(span).await
    }

    /// Ids of persisted runs that have not finished, oldest first.
    pub fn unfinished_runs(&self) -> Result<Vec<Uuid>, CanaryflowError> {
        Ok(self
            .store
            .list_unfinished()?
            .into_iter()
            .map(|run| run.id())
            .collect())
    }

    /// Loads a run.
    pub fn get_run(&self, run_id: Uuid) -> Result<PipelineRun, CanaryflowError> {
        self.store
            .load(run_id)?
            .ok_or(CanaryflowError::RunNotFound(run_id))
    }

    /// Runs currently waiting at the approval gate.
    #[must_use]
    pub fn pending_approvals(&self) -> Vec<ApprovalRequest> {
        self.gate.pending_requests()
    }

    /// Approves a run waiting at the gate.
    ///
    /// A run is persisted as awaiting approval slightly before it registers
    /// at the gate. A decision arriving in between fails with
    /// [`CanaryflowError::GateNotReady`]; callers that race the run should
    /// first await [`ApprovalGate::wait_until_pending`].
    pub fn approve(&self, run_id: Uuid, actor: Option<&str>) -> Result<(), CanaryflowError> {
        if self.gate.approve(run_id, actor) {
            return Ok(());
        }
        Err(self.not_awaiting(run_id))
    }

    /// Rejects a run waiting at the gate.
    pub fn reject(&self, run_id: Uuid, actor: Option<&str>) -> Result<(), CanaryflowError> {
        if self.gate.reject(run_id, actor) {
            return Ok(());
        }
        Err(self.not_awaiting(run_id))
    }

    /// Aborts a run waiting at the gate. Runs in any other state cannot be
    /// aborted.
    pub fn abort(&self, run_id: Uuid, reason: impl Into<String>) -> Result<(), CanaryflowError> {
        if self.gate.abort(run_id, reason) {
            return Ok(());
        }
        Err(self.not_awaiting(run_id))
    }

    fn not_awaiting(&self, run_id: Uuid) -> CanaryflowError {
        match self.get_run(run_id) {
            Ok(run) if run.state() == RunState::AwaitingApproval => {
                if self.active.contains_key(&run_id) {
                    CanaryflowError::GateNotReady(run_id)
                } else {
                    CanaryflowError::RunNotActive(run_id)
                }
            }
            Ok(run) => CanaryflowError::NotAwaitingApproval {
                run_id,
                state: run.state(),
            },
            Err(e) => e,
        }
    }

    fn check_trigger(&self, trigger: &Trigger) -> Result<(), CanaryflowError> {
        let source = &self.config.source;
        if trigger.repository != source.repository || trigger.branch != source.branch {
            warn!(
                repository = %trigger.repository,
                branch = %trigger.branch,
                "Ignoring trigger for unconfigured source"
            );
            return Err(CanaryflowError::TriggerMismatch {
                expected: format!("{}@{}", source.repository, source.branch),
                actual: format!("{}@{}", trigger.repository, trigger.branch),
            });
        }
        Ok(())
    }

    fn activate(&self, run_id: Uuid) -> Result<ActiveRun<'_>, CanaryflowError> {
        if self.active.insert(run_id, ()).is_some() {
            return Err(CanaryflowError::RunAlreadyActive(run_id));
        }
        Ok(ActiveRun {
            active: &self.active,
            run_id,
        })
    }

    async fn drive(&self, mut run: PipelineRun) -> Result<PipelineRun, CanaryflowError> {
        while let Some(stage) = run.current_stage() {
            run.start_stage(stage)?;
            self.persist(&run).await?;
            info!(stage = %stage, action = stage.action_name(), "Stage started");
            self.emit(PipelineEvent::for_stage(EventKind::StageStarted, run.id(), stage))
                .await;

            match self.execute_stage(stage, &run).await? {
                Ok(artifact) => {
                    let data = event_data(&artifact);
                    run.complete_stage(stage, artifact)?;
                    self.persist(&run).await?;
                    info!(stage = %stage, "Stage succeeded");
                    self.emit(with_payload(
                        PipelineEvent::for_stage(EventKind::StageSucceeded, run.id(), stage),
                        data,
                    ))
                    .await;
                }
                Err(failure) => {
                    error!(stage = %stage, code = failure.code(), error = %failure, "Stage failed");
                    let data = event_data(&failure);
                    run.fail_stage(stage, failure)?;
                    self.persist(&run).await?;
                    self.emit(with_payload(
                        PipelineEvent::for_stage(EventKind::StageFailed, run.id(), stage),
                        data,
                    ))
                    .await;
                }
            }
        }

        info!(state = %run.state(), halted_stage = ?run.halted_stage(), "Pipeline run completed");
        self.emit(
            PipelineEvent::new(EventKind::RunCompleted, run.id()).with_data(serde_json::json!({
                "state": run.state(),
                "halted_stage": run.halted_stage(),
            })),
        )
        .await;
        Ok(run)
    }

    async fn execute_stage(
        &self,
        stage: StageName,
        run: &PipelineRun,
    ) -> Result<StageResult, CanaryflowError> {
        let result = match stage {
            StageName::Source => self
                .collaborators
                .source
                .fetch(run.trigger())
                .await
                .map(Artifact::SourceSnapshot)
                .map_err(|e| StageFailure::source_fetch(format!("{e:#}"))),
            StageName::Build => {
                let source = run
                    .source_snapshot()
                    .ok_or_else(|| missing_input(run, stage, "source snapshot"))?;
                self.collaborators
                    .builder
                    .build(source, &self.config.registry.repository_uri)
                    .await
                    .map(Artifact::Image)
                    .map_err(|e| StageFailure::build(format!("{e:#}")))
            }
            StageName::DeployCanary => {
                let image = required_image(run, stage)?;
                self.deploy(stage, &self.config.canary, image).await
            }
            StageName::Approval => {
                let image = required_image(run, stage)?;
                self.await_approval(run, image).await
            }
            StageName::DeployProduction => {
                let image = required_image(run, stage)?;
                self.deploy(stage, &self.config.production, image).await
            }
        };
        Ok(result)
    }

    async fn deploy(
        &self,
        stage: StageName,
        target: &ServiceTarget,
        image: &ImageReference,
    ) -> StageResult {
        let request = DeployRequest::new(stage, target, image);
        info!(service = %target.service, image = %image, "Updating service");

        let record = self
            .collaborators
            .deployer
            .update_service(&request)
            .await
            .map_err(|e| StageFailure::deployment(&target.service, format!("{e:#}")))?;

        if &record.image != image {
            return Err(StageFailure::deployment(
                &target.service,
                format!("deployer reported image {}, expected {image}", record.image),
            ));
        }
        Ok(Artifact::Deployment(record))
    }

    async fn await_approval(&self, run: &PipelineRun, image: &ImageReference) -> StageResult {
        let policy = &self.config.approval;
        let requested_at = run
            .execution(StageName::Approval)
            .started_at
            .unwrap_or_else(now_utc);

        // Measured from the original suspension so restarts do not extend it.
        let remaining = policy.timeout().map(|limit| {
            let elapsed = (now_utc() - requested_at).to_std().unwrap_or_default();
            limit.saturating_sub(elapsed)
        });

        let request = ApprovalRequest {
            run_id: run.id(),
            action_name: policy.action_name.clone(),
            image: image.uri(),
            requested_at,
        };
        self.emit(
            PipelineEvent::for_stage(EventKind::ApprovalRequested, run.id(), StageName::Approval)
                .with_data(serde_json::json!({
                    "action": request.action_name,
                    "image": request.image,
                    "timeout_secs": remaining.map(|d| d.as_secs()),
                })),
        )
        .await;

        let outcome = self.gate.wait(request, remaining).await;
        self.emit(
            PipelineEvent::for_stage(EventKind::ApprovalDecided, run.id(), StageName::Approval)
                .with_data(outcome_data(&outcome)),
        )
        .await;

        match outcome {
            ApprovalOutcome::Decided {
                decision: ApprovalDecision::Approve,
                actor,
            } => Ok(approval_artifact(actor)),
            ApprovalOutcome::Decided {
                decision: ApprovalDecision::Reject,
                actor,
            } => Err(StageFailure::ApprovalRejected { actor }),
            ApprovalOutcome::Aborted { reason } => Err(StageFailure::Aborted { reason }),
            ApprovalOutcome::TimedOut => match policy.on_timeout {
                TimeoutAction::Approve => {
                    warn!("Approval timed out, promoting per timeout policy");
                    Ok(approval_artifact(Some(TIMEOUT_POLICY_ACTOR.to_string())))
                }
                TimeoutAction::Reject => Err(StageFailure::ApprovalTimedOut {
                    timeout_secs: policy.timeout_secs.unwrap_or_default(),
                }),
            },
        }
    }

    /// Saves `run` on the blocking pool so file I/O stays off the runtime.
    async fn persist(&self, run: &PipelineRun) -> Result<(), StoreError> {
        let store = Arc::clone(&self.store);
        let run = run.clone();
        tokio::task::spawn_blocking(move || store.save(&run)).await?
    }

    async fn emit(&self, event: PipelineEvent) {
        self.events.emit(&event).await;
    }
}

impl std::fmt::Debug for PipelineCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineCoordinator")
            .field("pipeline", &self.config.pipeline_name)
            .field("active_runs", &self.active.len())
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

/// Marks a run as driven by this coordinator until dropped.
struct ActiveRun<'a> {
    active: &'a DashMap<Uuid, ()>,
    run_id: Uuid,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.run_id);
    }
}

fn required_image(run: &PipelineRun, stage: StageName) -> Result<&ImageReference, TransitionError> {
    run.image()
        .ok_or_else(|| missing_input(run, stage, "image reference"))
}

fn missing_input(run: &PipelineRun, stage: StageName, input: &str) -> TransitionError {
    TransitionError::new(run.id(), stage, run.state(), format!("missing input artifact: {input}"))
}

fn approval_artifact(actor: Option<String>) -> Artifact {
    Artifact::Approval(ApprovalRecord {
        decision: ApprovalDecision::Approve,
        actor,
        decided_at: now_utc(),
    })
}

/// Serializes an event payload, dropping it with a warning if that fails.
fn event_data<T: Serialize>(value: &T) -> Option<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| warn!(error = %e, "Dropping unserializable event payload"))
        .ok()
}

fn with_payload(event: PipelineEvent, data: Option<serde_json::Value>) -> PipelineEvent {
    match data {
        Some(data) => event.with_data(data),
        None => event,
    }
}

fn outcome_data(outcome: &ApprovalOutcome) -> serde_json::Value {
    match outcome {
        ApprovalOutcome::Decided { decision, actor } => {
            serde_json::json!({ "decision": decision, "actor": actor })
        }
        ApprovalOutcome::Aborted { reason } => {
            serde_json::json!({ "decision": "aborted", "reason": reason })
        }
        ApprovalOutcome::TimedOut => serde_json::json!({ "decision": "timed_out" }),
    }
}
