//! Pipeline configuration.
//!
//! A [`PipelineConfig`] is built once at startup (from a JSON file or with the
//! builder methods), validated, and shared with the coordinator by `Arc`.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default pipeline name.
pub const DEFAULT_PIPELINE_NAME: &str = "canary-deployment-pipeline";

/// Source repository settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Repository watched for pushes.
    pub repository: String,
    /// Only pushes to this branch start a run.
    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_branch() -> String {
    "main".to_string()
}

/// Container registry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Repository URI images are pushed to.
    pub repository_uri: String,
}

/// A container service a deploy stage updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTarget {
    /// Cluster hosting the service.
    pub cluster: String,
    /// Service name.
    pub service: String,
    /// Container whose image is replaced.
    #[serde(default = "default_container_name")]
    pub container_name: String,
    /// Number of tasks the service runs.
    pub desired_count: u32,
}

fn default_container_name() -> String {
    "CanaryContainer".to_string()
}

impl ServiceTarget {
    /// Creates a service target in the default cluster.
    #[must_use]
    pub fn new(service: impl Into<String>, desired_count: u32) -> Self {
        Self {
            cluster: "CanaryCluster".to_string(),
            service: service.into(),
            container_name: default_container_name(),
            desired_count,
        }
    }

    /// Sets the cluster.
    #[must_use]
    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = cluster.into();
        self
    }

    /// Sets the container name.
    #[must_use]
    pub fn with_container_name(mut self, container_name: impl Into<String>) -> Self {
        self.container_name = container_name.into();
        self
    }

    fn validate(&self, prefix: &str) -> Result<(), ConfigError> {
        require_non_empty(&format!("{prefix}.cluster"), &self.cluster)?;
        require_non_empty(&format!("{prefix}.service"), &self.service)?;
        require_non_empty(&format!("{prefix}.container_name"), &self.container_name)?;
        if self.desired_count == 0 {
            return Err(ConfigError::invalid(
                format!("{prefix}.desired_count"),
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// What happens when the approval timeout elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutAction {
    /// Treat the timeout as a rejection.
    #[default]
    Reject,
    /// Promote the canary without a human decision.
    Approve,
}

/// Manual approval gate settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalPolicy {
    /// Name of the approval action shown to approvers.
    #[serde(default = "default_action_name")]
    pub action_name: String,
    /// How long to wait for a decision. `None` waits indefinitely.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Outcome applied when the timeout elapses.
    #[serde(default)]
    pub on_timeout: TimeoutAction,
}

fn default_action_name() -> String {
    "ApproveDeployment".to_string()
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            action_name: default_action_name(),
            timeout_secs: None,
            on_timeout: TimeoutAction::default(),
        }
    }
}

impl ApprovalPolicy {
    /// Sets a timeout and the action applied when it elapses.
    #[must_use]
    pub fn with_timeout(mut self, secs: u64, action: TimeoutAction) -> Self {
        self.timeout_secs = Some(secs);
        self.on_timeout = action;
        self
    }

    /// The timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// The full definition of a canary pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name.
    #[serde(default = "default_pipeline_name")]
    pub pipeline_name: String,
    /// Source repository.
    pub source: SourceConfig,
    /// Image registry.
    pub registry: RegistryConfig,
    /// Canary service.
    pub canary: ServiceTarget,
    /// Production service.
    pub production: ServiceTarget,
    /// Approval gate.
    #[serde(default)]
    pub approval: ApprovalPolicy,
    /// Directory run state is persisted to. `None` keeps runs in memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

fn default_pipeline_name() -> String {
    DEFAULT_PIPELINE_NAME.to_string()
}

impl PipelineConfig {
    /// Creates a config with the default service layout: one canary task and
    /// three production tasks in `CanaryCluster`, watching `main`.
    #[must_use]
    pub fn new(repository: impl Into<String>, repository_uri: impl Into<String>) -> Self {
        Self {
            pipeline_name: default_pipeline_name(),
            source: SourceConfig {
                repository: repository.into(),
                branch: default_branch(),
            },
            registry: RegistryConfig {
                repository_uri: repository_uri.into(),
            },
            canary: ServiceTarget::new("CanaryService", 1),
            production: ServiceTarget::new("ProductionService", 3),
            approval: ApprovalPolicy::default(),
            state_dir: None,
        }
    }

    /// Loads and validates a config from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Parses and validates a config from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the pipeline name.
    #[must_use]
    pub fn with_pipeline_name(mut self, name: impl Into<String>) -> Self {
        self.pipeline_name = name.into();
        self
    }

    /// Sets the branch that triggers runs.
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.source.branch = branch.into();
        self
    }

    /// Sets the canary service.
    #[must_use]
    pub fn with_canary(mut self, target: ServiceTarget) -> Self {
        self.canary = target;
        self
    }

    /// Sets the production service.
    #[must_use]
    pub fn with_production(mut self, target: ServiceTarget) -> Self {
        self.production = target;
        self
    }

    /// Sets the approval policy.
    #[must_use]
    pub fn with_approval(mut self, approval: ApprovalPolicy) -> Self {
        self.approval = approval;
        self
    }

    /// Sets the state directory.
    #[must_use]
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("pipeline_name", &self.pipeline_name)?;
        require_non_empty("source.repository", &self.source.repository)?;
        require_non_empty("source.branch", &self.source.branch)?;
        require_non_empty("registry.repository_uri", &self.registry.repository_uri)?;
        require_non_empty("approval.action_name", &self.approval.action_name)?;
        self.canary.validate("canary")?;
        self.production.validate("production")?;

        if self.canary.cluster == self.production.cluster
            && self.canary.service == self.production.service
        {
            return Err(ConfigError::invalid(
                "canary.service",
                "canary and production must be different services",
            ));
        }
        if self.canary.desired_count >= self.production.desired_count {
            return Err(ConfigError::invalid(
                "canary.desired_count",
                format!(
                    "canary capacity ({}) must be smaller than production capacity ({})",
                    self.canary.desired_count, self.production.desired_count
                ),
            ));
        }
        if self.approval.timeout_secs == Some(0) {
            return Err(ConfigError::invalid(
                "approval.timeout_secs",
                "must be greater than zero when set",
            ));
        }
        Ok(())
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::invalid(field, "must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PipelineConfig {
        PipelineConfig::new("app", "123456789012.dkr.ecr.us-east-1.amazonaws.com/app")
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = config();
        config.validate().unwrap();

        assert_eq!(config.pipeline_name, DEFAULT_PIPELINE_NAME);
        assert_eq!(config.source.branch, "main");
        assert_eq!(config.canary.desired_count, 1);
        assert_eq!(config.production.desired_count, 3);
        assert_eq!(config.approval.timeout(), None);
        assert_eq!(config.approval.on_timeout, TimeoutAction::Reject);
    }

    #[test]
    fn test_from_json_applies_defaults() {
        let json = r#"{
            "source": { "repository": "app" },
            "registry": { "repository_uri": "registry.example.com/app" },
            "canary": { "cluster": "c", "service": "app-canary", "desired_count": 1 },
            "production": { "cluster": "c", "service": "app", "desired_count": 4 },
            "approval": { "timeout_secs": 3600 }
        }"#;

        let config = PipelineConfig::from_json(json).unwrap();
        assert_eq!(config.pipeline_name, DEFAULT_PIPELINE_NAME);
        assert_eq!(config.source.branch, "main");
        assert_eq!(config.canary.container_name, "CanaryContainer");
        assert_eq!(config.approval.action_name, "ApproveDeployment");
        assert_eq!(config.approval.timeout(), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(&path, serde_json::to_string(&config()).unwrap()).unwrap();

        let loaded = PipelineConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config());
    }

    #[test]
    fn test_from_file_missing() {
        let err = PipelineConfig::from_file("/nonexistent/pipeline.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_rejects_same_service_for_both_stages() {
        let config = config().with_production(ServiceTarget::new("CanaryService", 3));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("different services"));
    }

    #[test]
    fn test_rejects_canary_not_smaller_than_production() {
        let config = config().with_canary(ServiceTarget::new("CanaryService", 3));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_fields() {
        assert!(config().with_pipeline_name(" ").validate().is_err());
        assert!(config().with_branch("").validate().is_err());
        assert!(config()
            .with_canary(ServiceTarget::new("CanaryService", 0))
            .validate()
            .is_err());
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let config =
            config().with_approval(ApprovalPolicy::default().with_timeout(0, TimeoutAction::Reject));
        assert!(config.validate().is_err());
    }
}
