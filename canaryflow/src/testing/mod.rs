//! Scripted collaborators for exercising a coordinator without external
//! services.
//!
//! Every collaborator appends to a shared [`CallLog`], so tests can assert
//! on the exact order and arguments of the calls the coordinator made.

use crate::config::PipelineConfig;
use crate::core::{DeploymentRecord, ImageReference, SourceSnapshot, StageName, Trigger};
use crate::stages::{Collaborators, DeployRequest, ImageBuilder, ServiceDeployer, SourceProvider};
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Repository used by [`sample_config`].
pub const SAMPLE_REPOSITORY: &str = "canary-app";
/// Registry repository used by [`sample_config`].
pub const SAMPLE_REGISTRY: &str = "123456789012.dkr.ecr.us-east-1.amazonaws.com/canary-app";

/// A call made to a collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// [`SourceProvider::fetch`].
    Fetch {
        /// Commit requested.
        commit: String,
    },
    /// [`ImageBuilder::build`].
    Build {
        /// Commit of the snapshot being built.
        commit: String,
    },
    /// [`ServiceDeployer::update_service`].
    Deploy {
        /// Deploy stage issuing the call.
        stage: StageName,
        /// Service updated.
        service: String,
        /// Image requested.
        image: ImageReference,
    },
}

/// Shared, ordered record of collaborator calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a call.
    pub fn record(&self, call: Call) {
        self.0.lock().push(call);
    }

    /// All calls in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().clone()
    }

    /// The stage each call served, in order.
    #[must_use]
    pub fn stages(&self) -> Vec<StageName> {
        self.0
            .lock()
            .iter()
            .map(|call| match call {
                Call::Fetch { .. } => StageName::Source,
                Call::Build { .. } => StageName::Build,
                Call::Deploy { stage, .. } => *stage,
            })
            .collect()
    }

    /// Images requested by deploy calls for `stage`.
    #[must_use]
    pub fn deployed_images(&self, stage: StageName) -> Vec<ImageReference> {
        self.0
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Deploy { stage: s, image, .. } if *s == stage => Some(image.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Source provider that returns a snapshot for any trigger.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    log: CallLog,
    failure: Option<String>,
}

impl StaticSource {
    /// Creates a source that always succeeds.
    #[must_use]
    pub fn new(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            failure: None,
        }
    }

    /// Makes every fetch fail with `message`.
    #[must_use]
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }
}

#[async_trait]
impl SourceProvider for StaticSource {
    async fn fetch(&self, trigger: &Trigger) -> anyhow::Result<SourceSnapshot> {
        self.log.record(Call::Fetch {
            commit: trigger.commit.clone(),
        });
        if let Some(message) = &self.failure {
            bail!("{message}");
        }
        Ok(SourceSnapshot {
            repository: trigger.repository.clone(),
            branch: trigger.branch.clone(),
            commit: trigger.commit.clone(),
            location: format!("memory://{}/{}", trigger.repository, trigger.commit),
        })
    }
}

/// Image builder tagging images with the source commit.
#[derive(Debug, Clone, Default)]
pub struct StaticBuilder {
    log: CallLog,
    failure: Option<String>,
}

impl StaticBuilder {
    /// Creates a builder that always succeeds.
    #[must_use]
    pub fn new(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            failure: None,
        }
    }

    /// Makes every build fail with `message`.
    #[must_use]
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }
}

#[async_trait]
impl ImageBuilder for StaticBuilder {
    async fn build(
        &self,
        source: &SourceSnapshot,
        repository_uri: &str,
    ) -> anyhow::Result<ImageReference> {
        self.log.record(Call::Build {
            commit: source.commit.clone(),
        });
        if let Some(message) = &self.failure {
            bail!("{message}");
        }
        Ok(ImageReference::new(repository_uri, &source.commit)?)
    }
}

/// Deployer that records updates and can fail selected services.
#[derive(Debug, Default)]
pub struct RecordingDeployer {
    log: CallLog,
    failing_services: HashSet<String>,
    deployments: AtomicUsize,
}

impl RecordingDeployer {
    /// Creates a deployer that accepts every update.
    #[must_use]
    pub fn new(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            ..Self::default()
        }
    }

    /// Makes updates to `service` fail.
    #[must_use]
    pub fn failing_service(mut self, service: impl Into<String>) -> Self {
        self.failing_services.insert(service.into());
        self
    }
}

#[async_trait]
impl ServiceDeployer for RecordingDeployer {
    async fn update_service(&self, request: &DeployRequest) -> anyhow::Result<DeploymentRecord> {
        self.log.record(Call::Deploy {
            stage: request.stage,
            service: request.target.service.clone(),
            image: request.image.clone(),
        });
        if self.failing_services.contains(&request.target.service) {
            return Err(anyhow!(
                "service {} failed to reach steady state",
                request.target.service
            ));
        }

        let n = self.deployments.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(DeploymentRecord {
            cluster: request.target.cluster.clone(),
            service: request.target.service.clone(),
            image: request.image.clone(),
            deployment_id: format!("ecs-svc/{n:04}"),
            desired_count: request.target.desired_count,
        })
    }
}

/// A valid config with the default canary/production layout.
#[must_use]
pub fn sample_config() -> PipelineConfig {
    PipelineConfig::new(SAMPLE_REPOSITORY, SAMPLE_REGISTRY)
}

/// A push of `commit` to the sample repository's `main` branch.
#[must_use]
pub fn sample_trigger(commit: &str) -> Trigger {
    Trigger::push(SAMPLE_REPOSITORY, "main", commit)
}

/// Collaborators that all succeed and log to `log`.
#[must_use]
pub fn collaborators(log: &CallLog) -> Collaborators {
    Collaborators::new(
        Arc::new(StaticSource::new(log)),
        Arc::new(StaticBuilder::new(log)),
        Arc::new(RecordingDeployer::new(log)),
    )
}
