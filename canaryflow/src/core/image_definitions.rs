//! The `imagedefinitions.json` manifest read by container deploy actions.

use super::ImageReference;
use serde::{Deserialize, Serialize};

/// File name deploy actions expect the manifest under.
pub const IMAGE_DEFINITIONS_FILE: &str = "imagedefinitions.json";

/// One container → image mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDefinition {
    /// Container name in the task definition.
    pub name: String,
    /// Image the container should run.
    #[serde(rename = "imageUri")]
    pub image_uri: String,
}

/// The full manifest: a JSON array of [`ImageDefinition`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageDefinitions(Vec<ImageDefinition>);

impl ImageDefinitions {
    /// Manifest pointing a single container at `image`.
    #[must_use]
    pub fn for_container(container: impl Into<String>, image: &ImageReference) -> Self {
        Self(vec![ImageDefinition {
            name: container.into(),
            image_uri: image.uri(),
        }])
    }

    /// All definitions.
    #[must_use]
    pub fn definitions(&self) -> &[ImageDefinition] {
        &self.0
    }

    /// Image URI configured for a container, if any.
    #[must_use]
    pub fn image_for(&self, container: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|d| d.name == container)
            .map(|d| d.image_uri.as_str())
    }

    /// Renders the manifest as JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parses a manifest.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_wire_format() {
        let image = ImageReference::new("repo/app", "abc123").unwrap();
        let manifest = ImageDefinitions::for_container("CanaryContainer", &image);

        assert_eq!(
            manifest.to_json().unwrap(),
            r#"[{"name":"CanaryContainer","imageUri":"repo/app:abc123"}]"#
        );
    }

    #[test]
    fn test_image_for() {
        let manifest = ImageDefinitions::from_json(
            r#"[{"name":"web","imageUri":"repo/web:1"},{"name":"sidecar","imageUri":"repo/envoy:2"}]"#,
        )
        .unwrap();

        assert_eq!(manifest.definitions().len(), 2);
        assert_eq!(manifest.image_for("sidecar"), Some("repo/envoy:2"));
        assert_eq!(manifest.image_for("missing"), None);
    }
}
