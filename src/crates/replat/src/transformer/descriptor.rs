use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::artifact::ArtifactType;
use crate::error::EngineError;
use crate::selector::LabelSelector;
use crate::types::{ObjectMeta, read_typed_yaml};

/// `kind` value of transformer descriptor documents.
pub const TRANSFORMER_KIND: &str = "Transformer";

/// Label automatically set to the transformer's own name.
pub const NAME_LABEL: &str = "name";

/// A transformer descriptor file, decoded strictly.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransformerDescriptor {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: TransformerSpec,
    #[serde(skip)]
    pub file_path: PathBuf,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransformerSpec {
    /// Name of the registered class realising this transformer.
    pub class: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumes: Vec<ArtifactType>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub produces: BTreeMap<ArtifactType, ProducedArtifact>,
    /// Transformers whose labels match this selector are shadowed.
    #[serde(default, rename = "override", skip_serializing_if = "Option::is_none")]
    pub override_selector: Option<LabelSelector>,
    /// Orders this transformer after co-applicable ones matching the selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub invoked_by_default: bool,
    /// Class-specific configuration, decoded by the class itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProducedArtifact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_type_to: Option<ArtifactType>,
}

impl TransformerDescriptor {
    /// Loads and validates a descriptor file, assigning the self-label and
    /// remembering where it came from.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let mut descriptor: TransformerDescriptor = read_typed_yaml(path, TRANSFORMER_KIND)?;
        if descriptor.metadata.name.is_empty() {
            return Err(EngineError::Descriptor(format!(
                "{} has no metadata.name",
                path.display()
            )));
        }
        descriptor.file_path = path.to_path_buf();
        descriptor
            .metadata
            .labels
            .insert(NAME_LABEL.to_string(), descriptor.metadata.name.clone());
        Ok(descriptor)
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.metadata.labels
    }

    /// The directory holding the descriptor; scripts, templates and
    /// resources are resolved relative to it.
    pub fn context_dir(&self) -> &Path {
        self.file_path.parent().unwrap_or(Path::new("."))
    }

    /// Applies the produces table: artifacts of a type with a
    /// `changeTypeTo` entry are rewritten to the target type.
    pub fn rewrite_type(&self, artifact_type: &ArtifactType) -> ArtifactType {
        self.spec
            .produces
            .get(artifact_type)
            .and_then(|p| p.change_type_to.clone())
            .unwrap_or_else(|| artifact_type.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const DESCRIPTOR: &str = "\
apiVersion: replat.dev/v1alpha1
kind: Transformer
metadata:
  name: dockerfile-detector
  labels:
    tier: default
spec:
  class: Script
  consumes: [Service]
  produces:
    Dockerfile:
      changeTypeTo: ContainerBuild
  invokedByDefault: true
  config:
    scriptFile: detect.rhai
";

    #[test]
    fn load_assigns_self_label_and_context_dir() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("transformer.yaml");
        fs::write(&path, DESCRIPTOR).unwrap();

        let descriptor = TransformerDescriptor::load(&path).unwrap();
        assert_eq!(descriptor.name(), "dockerfile-detector");
        assert_eq!(
            descriptor.labels().get(NAME_LABEL).map(String::as_str),
            Some("dockerfile-detector")
        );
        assert_eq!(descriptor.labels().get("tier").map(String::as_str), Some("default"));
        assert_eq!(descriptor.context_dir(), dir.path());
        assert!(descriptor.spec.invoked_by_default);
    }

    #[test]
    fn rewrite_type_follows_the_produces_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("transformer.yaml");
        fs::write(&path, DESCRIPTOR).unwrap();
        let descriptor = TransformerDescriptor::load(&path).unwrap();

        assert_eq!(
            descriptor.rewrite_type(&ArtifactType::from("Dockerfile")),
            ArtifactType::from("ContainerBuild")
        );
        assert_eq!(
            descriptor.rewrite_type(&ArtifactType::from("Service")),
            ArtifactType::from("Service")
        );
    }

    #[test]
    fn unknown_fields_reject() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("transformer.yaml");
        fs::write(
            &path,
            "apiVersion: replat.dev/v1alpha1\nkind: Transformer\nmetadata:\n  name: x\nspec:\n  class: Script\n  mystery: true\n",
        )
        .unwrap();
        let err = TransformerDescriptor::load(&path).unwrap_err();
        assert!(matches!(err, EngineError::Descriptor(_)));
    }

    #[test]
    fn wrong_kind_rejects() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("other.yaml");
        fs::write(
            &path,
            "apiVersion: replat.dev/v1alpha1\nkind: Plan\nmetadata:\n  name: x\nspec:\n  class: Script\n",
        )
        .unwrap();
        assert!(TransformerDescriptor::load(&path).is_err());
    }
}
