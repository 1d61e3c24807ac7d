use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;
use crate::error::EngineError;
use crate::selector::LabelSelector;
use crate::types::{ObjectMeta, group_version, read_typed_yaml, write_yaml};

/// `kind` value of plan documents.
pub const PLAN_KIND: &str = "Plan";

/// Default plan file name.
pub const DEFAULT_PLAN_FILE: &str = "replat.plan";

/// Bucket for services that still need a name from the user.
pub const UNNAMED_SERVICE: &str = "";

/// The result of the planning phase; read-only during transformation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Plan {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PlanSpec,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlanSpec {
    #[serde(default)]
    pub source_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customizations_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "LabelSelector::is_empty")]
    pub transformer_selector: LabelSelector,
    /// Descriptors dropped during selection, name to descriptor path.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub disabled_transformers: BTreeMap<String, PathBuf>,
    /// Selected transformers, name to descriptor path.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub transformers: BTreeMap<String, PathBuf>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invoked_by_default_transformers: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, Vec<PlanArtifact>>,
}

/// An artifact in the plan, prefixed with the transformer that produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanArtifact {
    pub transformer_name: String,
    #[serde(flatten)]
    pub artifact: Artifact,
}

impl Plan {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            api_version: group_version(),
            kind: PLAN_KIND.to_string(),
            metadata: ObjectMeta {
                name: project_name.into(),
                labels: BTreeMap::new(),
            },
            spec: PlanSpec::default(),
        }
    }

    pub fn project_name(&self) -> &str {
        &self.metadata.name
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        read_typed_yaml(path, PLAN_KIND)
            .map_err(|e| e.context(format!("failed to load the plan at {}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        write_yaml(path, self)
            .map_err(|e| e.context(format!("failed to write the plan to {}", path.display())))
    }

    /// Named services, excluding the unnamed bucket.
    pub fn named_service_count(&self) -> usize {
        self.spec
            .services
            .keys()
            .filter(|name| *name != UNNAMED_SERVICE)
            .count()
    }

    /// Drops plan artifacts whose producing transformer is not in the
    /// selected set any more, pruning services left empty.
    pub fn retain_transformers(&mut self, is_selected: impl Fn(&str) -> bool) {
        for artifacts in self.spec.services.values_mut() {
            artifacts.retain(|pa| {
                let keep = is_selected(&pa.transformer_name);
                if !keep {
                    tracing::debug!(
                        transformer = %pa.transformer_name,
                        artifact = %pa.artifact.name,
                        "dropping plan artifact from a deselected transformer"
                    );
                }
                keep
            });
        }
        self.spec.services.retain(|_, artifacts| !artifacts.is_empty());
    }
}
