use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::cancel::CancelToken;
use crate::error::EngineError;
use crate::plan::{Plan, PlanArtifact};
use crate::qa::SharedQaEngine;
use crate::selector::LabelSelector;
use crate::transformer::{ClassRegistry, InitOptions, TransformerRegistry};
use crate::utils::files_with_name;

/// Per-directory ignore file honoured by the planner.
pub const IGNORE_FILENAME: &str = ".replatignore";

/// Inputs for a planning run.
pub struct PlanOptions {
    pub project_name: String,
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Directories searched for transformer descriptors, e.g. the assets
    /// directory.
    pub transformer_dirs: Vec<PathBuf>,
    pub customizations_dir: Option<PathBuf>,
    pub selector: LabelSelector,
    /// Parent for per-transformer temp directories.
    pub temp_root: PathBuf,
}

/// Creates the plan: initialises the registry, walks the input tree calling
/// every selected transformer's directory-detect, and aggregates the
/// services found.
pub fn create_plan(
    cancel: &CancelToken,
    classes: &ClassRegistry,
    qa: SharedQaEngine,
    options: PlanOptions,
) -> Result<(Plan, TransformerRegistry), EngineError> {
    cancel.check()?;

    let mut descriptor_dirs = options.transformer_dirs.clone();
    if let Some(customizations) = &options.customizations_dir {
        descriptor_dirs.push(customizations.clone());
    }

    let mut registry = TransformerRegistry::init(
        classes,
        InitOptions {
            descriptor_dirs,
            selector: options.selector.clone(),
            project_name: options.project_name.clone(),
            source_dir: options.source_dir.clone(),
            output_dir: options.output_dir.clone(),
            temp_root: options.temp_root.clone(),
        },
        qa,
    )?;
    tracing::info!("configuration loading done, starting planning");

    let mut plan = Plan::new(options.project_name);
    plan.spec.source_dir = options.source_dir.clone();
    plan.spec.customizations_dir = options.customizations_dir.clone();
    plan.spec.transformer_selector = options.selector;
    plan.spec.transformers = registry.descriptor_paths();
    plan.spec.invoked_by_default_transformers = registry.invoked_by_default();
    plan.spec.disabled_transformers = registry.disabled().clone();

    if options.source_dir.is_dir() {
        let ignores = IgnoreRules::collect(&options.source_dir)?;
        let mut services: BTreeMap<String, Vec<PlanArtifact>> = BTreeMap::new();
        walk_for_services(
            cancel,
            &options.source_dir,
            &ignores,
            &mut registry,
            &mut services,
        )?;
        plan.spec.services = services;
    }

    plan.retain_transformers(|name| registry.contains(name));
    tracing::info!(
        services = plan.named_service_count(),
        "planning done"
    );
    Ok((plan, registry))
}

/// Parsed `.replatignore` rules: directories skipped entirely, and
/// directories whose contents are skipped while the directory itself is
/// still detected against.
struct IgnoreRules {
    directories: BTreeSet<PathBuf>,
    contents: BTreeSet<PathBuf>,
}

impl IgnoreRules {
    fn collect(source_dir: &Path) -> Result<Self, EngineError> {
        let mut directories = BTreeSet::new();
        let mut contents = BTreeSet::new();
        for ignore_file in files_with_name(source_dir, IGNORE_FILENAME)? {
            let Some(base) = ignore_file.parent() else {
                continue;
            };
            let text = match std::fs::read_to_string(&ignore_file) {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(
                        path = %ignore_file.display(),
                        error = %err,
                        "failed to read ignore file"
                    );
                    continue;
                }
            };
            for line in text.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Some(dir) = line.strip_suffix('*') {
                    contents.insert(base.join(dir));
                } else {
                    directories.insert(base.join(line));
                }
            }
        }
        Ok(Self {
            directories,
            contents,
        })
    }
}

fn walk_for_services(
    cancel: &CancelToken,
    dir: &Path,
    ignores: &IgnoreRules,
    registry: &mut TransformerRegistry,
    services: &mut BTreeMap<String, Vec<PlanArtifact>>,
) -> Result<(), EngineError> {
    cancel.check()?;
    if ignores.directories.contains(dir) {
        tracing::debug!(dir = %dir.display(), "skipping ignored directory");
        return Ok(());
    }

    for transformer in registry.iter_mut() {
        let name = transformer.descriptor().name().to_string();
        match transformer.directory_detect(dir) {
            Ok(detected) => {
                for (service, artifacts) in detected {
                    services.entry(service).or_default().extend(
                        artifacts.into_iter().map(|artifact| PlanArtifact {
                            transformer_name: name.clone(),
                            artifact,
                        }),
                    );
                }
            }
            Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
            Err(err) => {
                tracing::error!(
                    transformer = %name,
                    dir = %dir.display(),
                    error = %err,
                    "directory detect failed, continuing"
                );
            }
        }
    }

    if ignores.contents.contains(dir) {
        tracing::debug!(dir = %dir.display(), "not descending into content-ignored directory");
        return Ok(());
    }

    let mut subdirs: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|entry| entry.path())
        .collect();
    subdirs.sort();
    for subdir in subdirs {
        walk_for_services(cancel, &subdir, ignores, registry, services)?;
    }
    Ok(())
}
