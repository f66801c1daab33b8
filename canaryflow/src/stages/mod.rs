//! External collaborators that perform the actual stage work.
//!
//! The coordinator never fetches sources, builds images or manages containers
//! itself. Each of those side effects sits behind one of the traits below and
//! is supplied by the embedding application (a source-control client, a build
//! service client, a container orchestration client).

use crate::config::ServiceTarget;
use crate::core::{
    DeploymentRecord, ImageDefinitions, ImageReference, SourceSnapshot, StageName, Trigger,
};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Fetches a source snapshot for a push.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Fetches the sources at the trigger's commit.
    async fn fetch(&self, trigger: &Trigger) -> anyhow::Result<SourceSnapshot>;
}

/// Builds and pushes a container image.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Builds `source` and pushes the image to `repository_uri`.
    async fn build(
        &self,
        source: &SourceSnapshot,
        repository_uri: &str,
    ) -> anyhow::Result<ImageReference>;
}

/// Everything a deployer needs to roll a service onto a new image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    /// The deploy stage issuing the request.
    pub stage: StageName,
    /// The service to update.
    pub target: ServiceTarget,
    /// The image to roll out.
    pub image: ImageReference,
    /// Manifest mapping the target's container to the image.
    pub image_definitions: ImageDefinitions,
}

impl DeployRequest {
    /// Creates a request for `target`, rendering its image-definitions manifest.
    #[must_use]
    pub fn new(stage: StageName, target: &ServiceTarget, image: &ImageReference) -> Self {
        Self {
            stage,
            target: target.clone(),
            image: image.clone(),
            image_definitions: ImageDefinitions::for_container(&target.container_name, image),
        }
    }
}

/// Updates a container service to run a given image.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ServiceDeployer: Send + Sync {
    /// Updates the service and returns the resulting deployment.
    ///
    /// Must be idempotent for the same service and image: a run resumed after
    /// a restart may repeat the update it was performing.
    async fn update_service(&self, request: &DeployRequest) -> anyhow::Result<DeploymentRecord>;
}

/// The set of collaborators a coordinator drives.
#[derive(Clone)]
pub struct Collaborators {
    /// Source provider.
    pub source: Arc<dyn SourceProvider>,
    /// Image builder.
    pub builder: Arc<dyn ImageBuilder>,
    /// Service deployer, used by both deploy stages.
    pub deployer: Arc<dyn ServiceDeployer>,
}

impl Collaborators {
    /// Bundles the three collaborators.
    pub fn new(
        source: Arc<dyn SourceProvider>,
        builder: Arc<dyn ImageBuilder>,
        deployer: Arc<dyn ServiceDeployer>,
    ) -> Self {
        Self {
            source,
            builder,
            deployer,
        }
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_request_renders_manifest() {
        let target = ServiceTarget::new("CanaryService", 1).with_container_name("web");
        let image = ImageReference::new("repo/app", "abc123").unwrap();

        let request = DeployRequest::new(StageName::DeployCanary, &target, &image);

        assert_eq!(request.image_definitions.image_for("web"), Some("repo/app:abc123"));
        assert_eq!(request.target.service, "CanaryService");
    }

    #[tokio::test]
    async fn test_mock_deployer_receives_request() {
        let mut deployer = MockServiceDeployer::new();
        deployer
            .expect_update_service()
            .withf(|req| req.target.service == "CanaryService" && req.image.tag == "abc123")
            .times(1)
            .returning(|req| {
                Ok(DeploymentRecord {
                    cluster: req.target.cluster.clone(),
                    service: req.target.service.clone(),
                    image: req.image.clone(),
                    deployment_id: "ecs-svc/1".to_string(),
                    desired_count: req.target.desired_count,
                })
            });

        let target = ServiceTarget::new("CanaryService", 1);
        let image = ImageReference::new("repo/app", "abc123").unwrap();
        let record = deployer
            .update_service(&DeployRequest::new(StageName::DeployCanary, &target, &image))
            .await
            .unwrap();

        assert_eq!(record.deployment_id, "ecs-svc/1");
    }
}
