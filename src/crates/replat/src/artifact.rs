use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::configs::TypedConfig;
use crate::selector::LabelSelector;

macro_rules! kind_string {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

kind_string! {
    /// The type of an artifact, e.g. `Service` or `ContainerImage`.
    ArtifactType
}

kind_string! {
    /// Names the meaning of a path list on an artifact (source path,
    /// destination path, template path, ...). Unknown kinds round-trip
    /// untouched.
    PathKind
}

kind_string! {
    /// Keys the `configs` map of an artifact. Kinds with a typed schema
    /// merge through it; everything else deep-merges generically.
    ConfigKind
}

/// A typed unit of work produced by a transformer and potentially consumed
/// by another.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub paths: BTreeMap<PathKind, Vec<PathBuf>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub configs: BTreeMap<ConfigKind, Value>,
    /// Routing hint: when present, only transformers whose labels satisfy
    /// this selector may consume the artifact.
    #[serde(
        default,
        rename = "processWith",
        skip_serializing_if = "Option::is_none"
    )]
    pub process_with: Option<LabelSelector>,
}

impl Artifact {
    pub fn new(name: impl Into<String>, artifact_type: impl Into<ArtifactType>) -> Self {
        Self {
            name: name.into(),
            artifact_type: artifact_type.into(),
            ..Self::default()
        }
    }

    pub fn with_path(mut self, kind: impl Into<PathKind>, path: impl Into<PathBuf>) -> Self {
        self.paths.entry(kind.into()).or_default().push(path.into());
        self
    }

    pub fn with_config(mut self, kind: impl Into<ConfigKind>, value: Value) -> Self {
        self.configs.insert(kind.into(), value);
        self
    }

    /// Decodes a typed config by kind, when both the kind is known and the
    /// stored value matches its schema.
    pub fn typed_config(&self, kind: &ConfigKind) -> Option<TypedConfig> {
        let value = self.configs.get(kind)?;
        TypedConfig::decode(kind, value)
    }
}

/// Merges `b` into `a` when both have the same `(type, name)` identity.
///
/// Paths union key-wise preserving first-seen order; configs merge per key,
/// typed schemas first. A typed-config refusal aborts the whole merge and
/// returns `None` so callers keep the artifacts separate.
pub fn merge(a: &Artifact, b: &Artifact) -> Option<Artifact> {
    if a.artifact_type != b.artifact_type || a.name != b.name {
        return None;
    }
    let configs = merge_configs(&a.configs, &b.configs)?;
    Some(Artifact {
        name: a.name.clone(),
        artifact_type: a.artifact_type.clone(),
        paths: merge_path_maps(&a.paths, &b.paths),
        configs,
        process_with: a.process_with.clone().or_else(|| b.process_with.clone()),
    })
}

/// Pairwise-merges a list, keeping at most one artifact per `(type, name)`.
/// Order follows first appearance in the input.
pub fn merge_list(artifacts: Vec<Artifact>) -> Vec<Artifact> {
    let mut merged: Vec<Artifact> = Vec::new();
    for artifact in artifacts {
        let mut absorbed = false;
        for existing in merged.iter_mut() {
            if let Some(combined) = merge(existing, &artifact) {
                *existing = combined;
                absorbed = true;
                break;
            }
        }
        if !absorbed {
            merged.push(artifact);
        }
    }
    merged
}

/// Merges each new artifact with the first matching already-seen artifact,
/// then deduplicates the new list itself. The seen list is not modified.
pub fn update_against_seen(mut new_artifacts: Vec<Artifact>, seen: &[Artifact]) -> Vec<Artifact> {
    for artifact in new_artifacts.iter_mut() {
        for seen_artifact in seen {
            if let Some(combined) = merge(artifact, seen_artifact) {
                *artifact = combined;
                break;
            }
        }
    }
    merge_list(new_artifacts)
}

fn merge_path_maps(
    a: &BTreeMap<PathKind, Vec<PathBuf>>,
    b: &BTreeMap<PathKind, Vec<PathBuf>>,
) -> BTreeMap<PathKind, Vec<PathBuf>> {
    let mut merged = a.clone();
    for (kind, paths) in b {
        let entry = merged.entry(kind.clone()).or_default();
        for path in paths {
            if !entry.contains(path) {
                entry.push(path.clone());
            }
        }
    }
    merged
}

fn merge_configs(
    a: &BTreeMap<ConfigKind, Value>,
    b: &BTreeMap<ConfigKind, Value>,
) -> Option<BTreeMap<ConfigKind, Value>> {
    let mut merged = a.clone();
    for (kind, right) in b {
        let Some(left) = merged.get(kind) else {
            merged.insert(kind.clone(), right.clone());
            continue;
        };
        if let (Some(left_typed), Some(right_typed)) = (
            TypedConfig::decode(kind, left),
            TypedConfig::decode(kind, right),
        ) {
            let combined = left_typed.merge(right_typed)?;
            merged.insert(kind.clone(), combined.into_value());
            continue;
        }
        let combined = deep_merge(left.clone(), right.clone());
        merged.insert(kind.clone(), combined);
    }
    Some(merged)
}

/// Generic deep merge for untyped config values: mappings union recursively,
/// sequences concatenate with deduplication, scalars take the right side.
/// Keys present only on one side survive untouched.
pub fn deep_merge(left: Value, right: Value) -> Value {
    match (left, right) {
        (Value::Mapping(mut a), Value::Mapping(b)) => {
            for (key, right_value) in b {
                match a.remove(&key) {
                    Some(left_value) => {
                        a.insert(key, deep_merge(left_value, right_value));
                    }
                    None => {
                        a.insert(key, right_value);
                    }
                }
            }
            Value::Mapping(a)
        }
        (Value::Sequence(mut a), Value::Sequence(b)) => {
            for item in b {
                if !a.contains(&item) {
                    a.push(item);
                }
            }
            Value::Sequence(a)
        }
        (_, right) => right,
    }
}
