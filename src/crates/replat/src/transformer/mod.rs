//! Transformer capability and class registry.
//!
//! A transformer is a named, labelled processor with declared consumed and
//! produced artifact types. Native and scripted transformers differ only in
//! how the capability's methods are realised.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;
use crate::env::TransformEnv;
use crate::error::EngineError;
use crate::pathmapping::PathMapping;
use crate::qa::SharedQaEngine;

pub mod descriptor;
pub mod registry;

pub use descriptor::{NAME_LABEL, ProducedArtifact, TRANSFORMER_KIND, TransformerDescriptor};
pub use registry::{InitOptions, TransformerRegistry};

/// Services detected in a directory: service name to the artifacts that
/// make it up. The empty name collects not-yet-named services.
pub type DetectedServices = BTreeMap<String, Vec<Artifact>>;

/// Result of one transform invocation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TransformOutput {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path_mappings: Vec<PathMapping>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created_artifacts: Vec<Artifact>,
}

/// The transformer capability. Instances are initialised once per run and
/// live for the process.
pub trait Transformer {
    fn descriptor(&self) -> &TransformerDescriptor;

    fn env(&self) -> &TransformEnv;

    /// Inspects one directory and reports the services found there.
    fn directory_detect(&mut self, dir: &Path) -> Result<DetectedServices, EngineError>;

    /// Processes newly queued artifacts against the already-seen set.
    fn transform(
        &mut self,
        new_artifacts: &[Artifact],
        seen: &[Artifact],
    ) -> Result<TransformOutput, EngineError>;
}

/// Everything a class constructor needs besides the descriptor.
pub struct TransformerCtx {
    pub env: TransformEnv,
    pub qa: SharedQaEngine,
}

/// Builds a transformer instance from its descriptor.
pub type TransformerCtor =
    Box<dyn Fn(TransformerDescriptor, TransformerCtx) -> Result<Box<dyn Transformer>, EngineError>>;

/// Maps descriptor `spec.class` names to constructors. Descriptors whose
/// class is absent here are dropped during selection.
pub struct ClassRegistry {
    ctors: BTreeMap<String, TransformerCtor>,
}

impl ClassRegistry {
    pub fn empty() -> Self {
        Self {
            ctors: BTreeMap::new(),
        }
    }

    /// Registry with the built-in classes. `Script` hosts externally
    /// scripted transformers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(
            crate::script::SCRIPT_CLASS,
            Box::new(|descriptor, ctx| {
                Ok(Box::new(crate::script::ScriptTransformer::new(
                    descriptor, ctx.env, ctx.qa,
                )?))
            }),
        );
        registry
    }

    pub fn register(&mut self, class: impl Into<String>, ctor: TransformerCtor) {
        self.ctors.insert(class.into(), ctor);
    }

    pub fn contains(&self, class: &str) -> bool {
        self.ctors.contains_key(class)
    }

    pub fn construct(
        &self,
        descriptor: TransformerDescriptor,
        ctx: TransformerCtx,
    ) -> Result<Box<dyn Transformer>, EngineError> {
        let class = descriptor.spec.class.clone();
        let ctor = self.ctors.get(&class).ok_or_else(|| {
            EngineError::Descriptor(format!(
                "class {class:?} of transformer {:?} is not registered",
                descriptor.name()
            ))
        })?;
        ctor(descriptor, ctx)
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
