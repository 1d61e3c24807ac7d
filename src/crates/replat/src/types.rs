use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// API group every replat document belongs to.
pub const API_GROUP: &str = "replat.dev";
/// Current schema version.
pub const API_VERSION: &str = "v1alpha1";

/// `apiVersion` value stamped on documents written by this build.
pub fn group_version() -> String {
    format!("{API_GROUP}/{API_VERSION}")
}

/// The leading identity fields shared by every replat YAML document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMeta {
    pub api_version: String,
    pub kind: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub labels: std::collections::BTreeMap<String, String>,
}

/// Reads a replat document strictly: the group must match, the kind must be
/// the expected one, and unknown fields reject. A version drift inside the
/// right group only warns.
pub fn read_typed_yaml<T: DeserializeOwned>(path: &Path, kind: &str) -> Result<T, EngineError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| EngineError::Descriptor(format!("failed to read {}: {e}", path.display())))?;
    let preamble: TypeMeta = serde_yaml::from_str(&text).map_err(|e| {
        EngineError::Descriptor(format!(
            "missing apiVersion/kind in {}: {e}",
            path.display()
        ))
    })?;

    let (group, version) = preamble
        .api_version
        .split_once('/')
        .ok_or_else(|| {
            EngineError::Descriptor(format!(
                "malformed apiVersion {:?} in {}",
                preamble.api_version,
                path.display()
            ))
        })?;
    if group != API_GROUP {
        return Err(EngineError::Descriptor(format!(
            "{} has group {group:?}, expected {API_GROUP:?}",
            path.display()
        )));
    }
    if version != API_VERSION {
        tracing::warn!(
            path = %path.display(),
            found = version,
            expected = API_VERSION,
            "document was written by a different schema version"
        );
    }
    if preamble.kind != kind {
        return Err(EngineError::Descriptor(format!(
            "{} has kind {:?}, expected {kind:?}",
            path.display(),
            preamble.kind
        )));
    }

    serde_yaml::from_str(&text).map_err(|e| {
        EngineError::Descriptor(format!("failed to decode {}: {e}", path.display()))
    })
}

/// Writes a value as two-space-indented YAML.
pub fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<(), EngineError> {
    let text = serde_yaml::to_string(value)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    #[allow(dead_code)]
    struct Doc {
        #[serde(rename = "apiVersion")]
        api_version: String,
        kind: String,
        value: i32,
    }

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn read_typed_yaml_accepts_matching_group_and_kind() {
        let file = write_temp("apiVersion: replat.dev/v1alpha1\nkind: Doc\nvalue: 7\n");
        let doc: Doc = read_typed_yaml(file.path(), "Doc").unwrap();
        assert_eq!(doc.value, 7);
    }

    #[test]
    fn read_typed_yaml_rejects_foreign_group() {
        let file = write_temp("apiVersion: other.dev/v1\nkind: Doc\nvalue: 7\n");
        let err = read_typed_yaml::<Doc>(file.path(), "Doc").unwrap_err();
        assert!(matches!(err, EngineError::Descriptor(_)));
    }

    #[test]
    fn read_typed_yaml_rejects_wrong_kind() {
        let file = write_temp("apiVersion: replat.dev/v1alpha1\nkind: Other\nvalue: 7\n");
        let err = read_typed_yaml::<Doc>(file.path(), "Doc").unwrap_err();
        assert!(err.to_string().contains("kind"));
    }
}
