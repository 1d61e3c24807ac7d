use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::artifact::Artifact;
use crate::env::TransformEnv;
use crate::error::EngineError;
use crate::qa::SharedQaEngine;
use crate::selector::LabelSelector;
use crate::transformer::{ClassRegistry, Transformer, TransformerCtx, TransformerDescriptor};
use crate::utils::files_with_extensions;

/// Inputs for registry initialisation.
pub struct InitOptions {
    /// Directories searched recursively for descriptor files; typically the
    /// assets directory followed by the customizations directory.
    pub descriptor_dirs: Vec<PathBuf>,
    /// User-supplied transformer selector.
    pub selector: LabelSelector,
    pub project_name: String,
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Parent for the per-transformer temp directories.
    pub temp_root: PathBuf,
}

/// The set of initialised transformers for one run, plus the descriptors
/// dropped during selection.
pub struct TransformerRegistry {
    transformers: Vec<Box<dyn Transformer>>,
    disabled: BTreeMap<String, PathBuf>,
}

impl TransformerRegistry {
    /// Loads descriptors, applies the selection pipeline and initialises
    /// the survivors.
    ///
    /// Selection order: strict decode, label filter against the user
    /// selector, class-registration filter, then override shadowing.
    /// Dropped descriptors are reported via [`TransformerRegistry::disabled`].
    pub fn init(
        classes: &ClassRegistry,
        options: InitOptions,
        qa: SharedQaEngine,
    ) -> Result<Self, EngineError> {
        let mut bag: Vec<TransformerDescriptor> = Vec::new();
        for dir in &options.descriptor_dirs {
            if !dir.is_dir() {
                tracing::debug!(dir = %dir.display(), "descriptor directory missing, skipping");
                continue;
            }
            for path in files_with_extensions(dir, &["yaml", "yml"])? {
                let descriptor = match TransformerDescriptor::load(&path) {
                    Ok(descriptor) => descriptor,
                    Err(err) => {
                        tracing::debug!(
                            path = %path.display(),
                            error = %err,
                            "not a loadable transformer descriptor"
                        );
                        continue;
                    }
                };
                if let Some(existing) = bag.iter().find(|d| d.name() == descriptor.name()) {
                    tracing::warn!(
                        name = %descriptor.name(),
                        kept = %existing.file_path.display(),
                        ignored = %descriptor.file_path.display(),
                        "duplicate transformer name, keeping the first"
                    );
                    continue;
                }
                bag.push(descriptor);
            }
        }

        let mut disabled: BTreeMap<String, PathBuf> = BTreeMap::new();
        let mut survivors: Vec<TransformerDescriptor> = Vec::new();
        for descriptor in bag {
            if !options.selector.matches(descriptor.labels()) {
                tracing::debug!(name = %descriptor.name(), "dropped by the transformer selector");
                disabled.insert(descriptor.name().to_string(), descriptor.file_path.clone());
                continue;
            }
            if !classes.contains(&descriptor.spec.class) {
                tracing::error!(
                    name = %descriptor.name(),
                    class = %descriptor.spec.class,
                    "dropping transformer with unregistered class"
                );
                disabled.insert(descriptor.name().to_string(), descriptor.file_path.clone());
                continue;
            }
            survivors.push(descriptor);
        }

        let override_selectors: Vec<LabelSelector> = survivors
            .iter()
            .filter_map(|d| d.spec.override_selector.clone())
            .filter(|s| !s.is_empty())
            .collect();
        let (kept, shadowed): (Vec<_>, Vec<_>) = survivors.into_iter().partition(|descriptor| {
            !override_selectors
                .iter()
                .any(|selector| selector.matches(descriptor.labels()))
        });
        for descriptor in shadowed {
            tracing::debug!(name = %descriptor.name(), "shadowed by an override selector");
            disabled.insert(descriptor.name().to_string(), descriptor.file_path.clone());
        }

        let mut transformers: Vec<Box<dyn Transformer>> = Vec::new();
        for descriptor in kept {
            if transformers
                .iter()
                .any(|t| t.descriptor().name() == descriptor.name())
            {
                return Err(EngineError::Descriptor(format!(
                    "duplicate transformer name {:?} in the selected set",
                    descriptor.name()
                )));
            }
            let env = TransformEnv::new(
                options.project_name.clone(),
                options.source_dir.clone(),
                descriptor.context_dir(),
                options.output_dir.clone(),
                &options.temp_root,
            )?;
            let name = descriptor.name().to_string();
            let ctx = TransformerCtx {
                env,
                qa: qa.clone(),
            };
            match classes.construct(descriptor, ctx) {
                Ok(transformer) => transformers.push(transformer),
                Err(err) => {
                    tracing::error!(name = %name, error = %err, "failed to initialise transformer, dropping it");
                }
            }
        }

        tracing::info!(
            selected = transformers.len(),
            disabled = disabled.len(),
            "transformer selection done"
        );
        Ok(Self {
            transformers,
            disabled,
        })
    }

    /// Descriptors dropped during selection, name to descriptor path.
    pub fn disabled(&self) -> &BTreeMap<String, PathBuf> {
        &self.disabled
    }

    pub fn is_empty(&self) -> bool {
        self.transformers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.transformers.len()
    }

    pub fn names(&self) -> Vec<String> {
        self.transformers
            .iter()
            .map(|t| t.descriptor().name().to_string())
            .collect()
    }

    /// Name to descriptor path for every selected transformer.
    pub fn descriptor_paths(&self) -> BTreeMap<String, PathBuf> {
        self.transformers
            .iter()
            .map(|t| {
                (
                    t.descriptor().name().to_string(),
                    t.descriptor().file_path.clone(),
                )
            })
            .collect()
    }

    /// Names of transformers marked `invokedByDefault`.
    pub fn invoked_by_default(&self) -> Vec<String> {
        self.transformers
            .iter()
            .filter(|t| t.descriptor().spec.invoked_by_default)
            .map(|t| t.descriptor().name().to_string())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.transformers
            .iter()
            .any(|t| t.descriptor().name() == name)
    }

    pub fn descriptor_and_env(
        &self,
        name: &str,
    ) -> Option<(&TransformerDescriptor, &crate::env::TransformEnv)> {
        self.transformers
            .iter()
            .find(|t| t.descriptor().name() == name)
            .map(|t| (t.descriptor(), t.env()))
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Box<dyn Transformer>> {
        self.transformers
            .iter_mut()
            .find(|t| t.descriptor().name() == name)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Transformer>> {
        self.transformers.iter_mut()
    }

    /// Transformers able to consume the artifact: their `consumes` set
    /// holds the artifact's type and the artifact's routing hint (if any)
    /// matches their labels. Returned in dependency order: a candidate
    /// whose dependency selector matches another candidate's labels runs
    /// after it.
    pub fn candidates(&self, artifact: &Artifact) -> Vec<String> {
        let matching: Vec<&TransformerDescriptor> = self
            .transformers
            .iter()
            .map(|t| t.descriptor())
            .filter(|d| d.spec.consumes.contains(&artifact.artifact_type))
            .filter(|d| {
                artifact
                    .process_with
                    .as_ref()
                    .map_or(true, |selector| selector.matches(d.labels()))
            })
            .collect();

        let (independent, dependent): (Vec<_>, Vec<_>) = matching.iter().partition(|d| {
            !d.spec
                .dependency
                .as_ref()
                .filter(|s| !s.is_empty())
                .is_some_and(|selector| {
                    matching
                        .iter()
                        .any(|other| other.name() != d.name() && selector.matches(other.labels()))
                })
        });
        independent
            .into_iter()
            .chain(dependent)
            .map(|d: &&TransformerDescriptor| d.name().to_string())
            .collect()
    }
}
