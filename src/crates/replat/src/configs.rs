use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::artifact::ConfigKind;

/// Config kind carrying per-service settings.
pub const SERVICE_CONFIG_KIND: &str = "service";
/// Config kind listing container image names built for a service.
pub const IMAGES_CONFIG_KIND: &str = "images";

/// Per-service configuration attached to artifacts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
}

/// Image names produced for a service.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagesConfig {
    #[serde(default)]
    pub image_names: Vec<String>,
}

/// Closed set of config kinds with typed merge semantics. Kinds outside
/// this set fall back to the generic deep merge.
#[derive(Clone, Debug, PartialEq)]
pub enum TypedConfig {
    Service(ServiceConfig),
    Images(ImagesConfig),
}

impl TypedConfig {
    /// Decodes a known kind from its stored value. Returns `None` for
    /// unknown kinds or values that do not fit the schema; those merge
    /// generically instead.
    pub fn decode(kind: &ConfigKind, value: &Value) -> Option<TypedConfig> {
        match kind.as_str() {
            SERVICE_CONFIG_KIND => serde_yaml::from_value(value.clone())
                .ok()
                .map(TypedConfig::Service),
            IMAGES_CONFIG_KIND => serde_yaml::from_value(value.clone())
                .ok()
                .map(TypedConfig::Images),
            _ => None,
        }
    }

    /// Merges two configs of the same kind. `None` signals a semantic
    /// refusal: the values are incompatible and the owning artifacts must
    /// stay separate.
    pub fn merge(self, other: TypedConfig) -> Option<TypedConfig> {
        match (self, other) {
            (TypedConfig::Service(a), TypedConfig::Service(b)) => {
                if a.service_name != b.service_name {
                    return None;
                }
                let mut ports = a.ports;
                for port in b.ports {
                    if !ports.contains(&port) {
                        ports.push(port);
                    }
                }
                Some(TypedConfig::Service(ServiceConfig {
                    service_name: a.service_name,
                    ports,
                    container_name: a.container_name.or(b.container_name),
                }))
            }
            (TypedConfig::Images(a), TypedConfig::Images(b)) => {
                let mut image_names = a.image_names;
                for name in b.image_names {
                    if !image_names.contains(&name) {
                        image_names.push(name);
                    }
                }
                Some(TypedConfig::Images(ImagesConfig { image_names }))
            }
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        let result = match self {
            TypedConfig::Service(c) => serde_yaml::to_value(c),
            TypedConfig::Images(c) => serde_yaml::to_value(c),
        };
        // Serializing plain structs of scalars cannot fail.
        result.unwrap_or(Value::Null)
    }
}
