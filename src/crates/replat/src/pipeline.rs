use std::collections::VecDeque;
use std::path::Path;

use crate::artifact::{Artifact, merge};
use crate::cancel::CancelToken;
use crate::error::EngineError;
use crate::pathmapping::{QueuedMapping, process_path_mappings};
use crate::plan::Plan;
use crate::selector::LabelSelector;
use crate::transformer::{NAME_LABEL, TransformOutput, TransformerRegistry};

/// Outcome counters for one transform run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransformSummary {
    pub artifacts_processed: usize,
    pub invocations: usize,
    pub failed_invocations: usize,
    pub path_mappings: usize,
}

/// Drives the plan through the selected transformers until the artifact
/// queue drains, then materialises the collected path mappings into the
/// output directory.
///
/// One artifact is processed at a time; transformer errors discard that
/// invocation's outputs and the run continues.
pub fn transform(
    cancel: &CancelToken,
    plan: &Plan,
    registry: &mut TransformerRegistry,
    output_dir: &Path,
) -> Result<TransformSummary, EngineError> {
    let mut summary = TransformSummary::default();
    let mut seen: Vec<Artifact> = Vec::new();
    let mut queue: VecDeque<Artifact> = VecDeque::new();
    let mut mappings: Vec<QueuedMapping> = Vec::new();

    for (service, artifacts) in &plan.spec.services {
        for plan_artifact in artifacts {
            if !registry.contains(&plan_artifact.transformer_name) {
                tracing::debug!(
                    transformer = %plan_artifact.transformer_name,
                    "skipping plan artifact from a deselected transformer"
                );
                continue;
            }
            let mut artifact = plan_artifact.artifact.clone();
            if artifact.name.is_empty() {
                artifact.name = service.clone();
            }
            // Route the seeded artifact back to its producing transformer
            // through the self-label.
            artifact.process_with = Some(LabelSelector::for_label(
                NAME_LABEL,
                &plan_artifact.transformer_name,
            ));
            queue.push_back(artifact);
        }
    }

    // Default transformers run once up front with an empty input so they
    // can seed artifacts of their own.
    for name in &plan.spec.invoked_by_default_transformers {
        cancel.check()?;
        let Some(transformer) = registry.get_mut(name) else {
            continue;
        };
        summary.invocations += 1;
        match transformer.transform(&[], &seen) {
            Ok(output) => {
                absorb_output(registry, name, output, &mut seen, &mut queue, &mut mappings);
            }
            Err(err) => {
                summary.failed_invocations += 1;
                tracing::error!(transformer = %name, error = %err, "default invocation failed");
            }
        }
    }

    while let Some(artifact) = queue.pop_front() {
        cancel.check()?;
        summary.artifacts_processed += 1;

        let candidates = registry.candidates(&artifact);
        if candidates.is_empty() {
            tracing::debug!(
                artifact = %artifact.name,
                artifact_type = %artifact.artifact_type,
                "no transformer consumes this artifact"
            );
        }
        for name in candidates {
            cancel.check()?;
            let Some(transformer) = registry.get_mut(&name) else {
                continue;
            };
            tracing::debug!(
                transformer = %name,
                artifact = %artifact.name,
                artifact_type = %artifact.artifact_type,
                "transforming"
            );
            summary.invocations += 1;
            match transformer.transform(std::slice::from_ref(&artifact), &seen) {
                Ok(output) => {
                    absorb_output(registry, &name, output, &mut seen, &mut queue, &mut mappings);
                }
                Err(err) => {
                    summary.failed_invocations += 1;
                    tracing::error!(
                        transformer = %name,
                        artifact = %artifact.name,
                        artifact_type = %artifact.artifact_type,
                        error = %err,
                        "transformer failed, discarding its outputs"
                    );
                }
            }
        }

        mark_seen(&mut seen, artifact);
    }

    summary.path_mappings = mappings.len();
    process_path_mappings(output_dir, &mappings)?;
    tracing::info!(
        artifacts = summary.artifacts_processed,
        invocations = summary.invocations,
        failures = summary.failed_invocations,
        path_mappings = summary.path_mappings,
        "transformation done"
    );
    Ok(summary)
}

/// Folds one invocation's outputs into the run state: rewrites produced
/// types, tags path mappings with the emitting transformer's directories,
/// and routes created artifacts into `seen` or the queue.
fn absorb_output(
    registry: &TransformerRegistry,
    transformer_name: &str,
    output: TransformOutput,
    seen: &mut Vec<Artifact>,
    queue: &mut VecDeque<Artifact>,
    mappings: &mut Vec<QueuedMapping>,
) {
    let Some((descriptor, env)) = registry.descriptor_and_env(transformer_name) else {
        return;
    };

    for mapping in output.path_mappings {
        mappings.push(QueuedMapping {
            mapping,
            context_dir: env.context_dir.clone(),
            source_dir: env.source_dir.clone(),
        });
    }

    for mut artifact in output.created_artifacts {
        artifact.artifact_type = descriptor.rewrite_type(&artifact.artifact_type);
        if artifact.artifact_type.is_empty() {
            tracing::warn!(
                transformer = %transformer_name,
                artifact = %artifact.name,
                "dropping created artifact with an empty type"
            );
            continue;
        }

        // An artifact matching one already seen merges in place instead of
        // being re-enqueued; this is what keeps the pipeline terminating.
        if let Some(pos) = seen.iter().position(|s| {
            s.artifact_type == artifact.artifact_type && s.name == artifact.name
        }) {
            match merge(&seen[pos], &artifact) {
                Some(combined) => {
                    seen[pos] = combined;
                    continue;
                }
                None => {
                    tracing::warn!(
                        artifact = %artifact.name,
                        artifact_type = %artifact.artifact_type,
                        "configs refused to merge, keeping the artifacts separate"
                    );
                }
            }
        }

        if let Some(pending) = queue.iter_mut().find(|p| {
            p.artifact_type == artifact.artifact_type && p.name == artifact.name
        }) {
            if let Some(combined) = merge(pending, &artifact) {
                *pending = combined;
                continue;
            }
        }

        queue.push_back(artifact);
    }
}

fn mark_seen(seen: &mut Vec<Artifact>, artifact: Artifact) {
    if let Some(pos) = seen.iter().position(|s| {
        s.artifact_type == artifact.artifact_type && s.name == artifact.name
    }) {
        if let Some(combined) = merge(&seen[pos], &artifact) {
            seen[pos] = combined;
            return;
        }
    }
    seen.push(artifact);
}
