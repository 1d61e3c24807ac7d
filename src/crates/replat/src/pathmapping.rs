use std::path::{Path, PathBuf};

use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::env::TEMPLATES_RELDIR;
use crate::error::EngineError;
use crate::utils::{copy_recursively, is_parent, lexical_clean};

/// What to do with the source path when materialising.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathMappingKind {
    /// Copy from the transformer's context directory.
    #[default]
    Default,
    /// Copy from the source tree.
    Source,
    /// Render each file through the template engine.
    Template,
    /// Remove the destination.
    Delete,
}

/// An instruction to materialise files in the output directory.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathMapping {
    #[serde(rename = "type", default)]
    pub kind: PathMappingKind,
    #[serde(default)]
    pub src_path: PathBuf,
    #[serde(default)]
    pub dest_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_config: Option<Value>,
}

/// A path mapping plus the directories it resolves against. The pipeline
/// tags every mapping with the context of the transformer that emitted it.
#[derive(Clone, Debug)]
pub struct QueuedMapping {
    pub mapping: PathMapping,
    pub context_dir: PathBuf,
    pub source_dir: PathBuf,
}

/// Materialises the collected mappings into `output_dir`, in order.
/// Destinations are confined to the output directory; a mapping trying to
/// escape it fails the whole materialisation.
pub fn process_path_mappings(
    output_dir: &Path,
    mappings: &[QueuedMapping],
) -> Result<(), EngineError> {
    let mut templates = Handlebars::new();
    templates.register_escape_fn(handlebars::no_escape);

    for queued in mappings {
        let mapping = &queued.mapping;
        let dest = resolve_destination(output_dir, &mapping.dest_path)?;
        match mapping.kind {
            PathMappingKind::Default => {
                let src = resolve_source(&queued.context_dir, &mapping.src_path);
                copy_recursively(&src, &dest)?;
            }
            PathMappingKind::Source => {
                let src = resolve_source(&queued.source_dir, &mapping.src_path);
                copy_recursively(&src, &dest)?;
            }
            PathMappingKind::Template => {
                let src = if mapping.src_path.is_absolute() {
                    mapping.src_path.clone()
                } else {
                    queued
                        .context_dir
                        .join(TEMPLATES_RELDIR)
                        .join(&mapping.src_path)
                };
                let config = mapping.template_config.clone().unwrap_or(Value::Null);
                render_tree(&templates, &src, &dest, &config)?;
            }
            PathMappingKind::Delete => {
                if dest.is_dir() {
                    std::fs::remove_dir_all(&dest)?;
                } else if dest.exists() {
                    std::fs::remove_file(&dest)?;
                }
            }
        }
    }
    Ok(())
}

fn resolve_source(base: &Path, src: &Path) -> PathBuf {
    if src.is_absolute() {
        src.to_path_buf()
    } else {
        base.join(src)
    }
}

fn resolve_destination(output_dir: &Path, dest: &Path) -> Result<PathBuf, EngineError> {
    let resolved = if dest.is_absolute() {
        dest.to_path_buf()
    } else {
        output_dir.join(dest)
    };
    let cleaned = lexical_clean(&resolved);
    if !is_parent(&cleaned, output_dir) {
        return Err(EngineError::InvalidPath(format!(
            "destination {} escapes the output directory",
            dest.display()
        )));
    }
    Ok(cleaned)
}

/// Renders a template file, or every file under a template directory,
/// into the destination preserving relative structure.
fn render_tree(
    templates: &Handlebars<'_>,
    src: &Path,
    dest: &Path,
    config: &Value,
) -> Result<(), EngineError> {
    if src.is_dir() {
        for entry in std::fs::read_dir(src)? {
            let entry = entry?;
            render_tree(templates, &entry.path(), &dest.join(entry.file_name()), config)?;
        }
        return Ok(());
    }
    let raw = std::fs::read_to_string(src).map_err(|e| {
        EngineError::Plan(format!("failed to read template {}: {e}", src.display()))
    })?;
    let rendered = templates
        .render_template(&raw, config)
        .map_err(|e| EngineError::Plan(format!("failed to render {}: {e}", src.display())))?;
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(dest, rendered)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn queued(mapping: PathMapping, context: &Path, source: &Path) -> QueuedMapping {
        QueuedMapping {
            mapping,
            context_dir: context.to_path_buf(),
            source_dir: source.to_path_buf(),
        }
    }

    #[test]
    fn template_mappings_render_into_the_output_tree() {
        let dir = tempdir().unwrap();
        let context = dir.path().join("ctx");
        let source = dir.path().join("src");
        let output = dir.path().join("out");
        fs::create_dir_all(context.join("templates/app")).unwrap();
        fs::create_dir_all(&source).unwrap();
        fs::create_dir_all(&output).unwrap();
        fs::write(
            context.join("templates/app/Dockerfile"),
            "FROM {{baseImage}}\nEXPOSE {{port}}\n",
        )
        .unwrap();

        let mapping = PathMapping {
            kind: PathMappingKind::Template,
            src_path: PathBuf::from("app"),
            dest_path: PathBuf::from("web"),
            template_config: Some(
                serde_yaml::from_str("baseImage: rust:1.79\nport: 8080").unwrap(),
            ),
        };
        process_path_mappings(&output, &[queued(mapping, &context, &source)]).unwrap();

        let rendered = fs::read_to_string(output.join("web/Dockerfile")).unwrap();
        assert_eq!(rendered, "FROM rust:1.79\nEXPOSE 8080\n");
    }

    #[test]
    fn source_mappings_copy_from_the_source_tree() {
        let dir = tempdir().unwrap();
        let context = dir.path().join("ctx");
        let source = dir.path().join("src");
        let output = dir.path().join("out");
        fs::create_dir_all(&context).unwrap();
        fs::create_dir_all(source.join("app")).unwrap();
        fs::create_dir_all(&output).unwrap();
        fs::write(source.join("app/main.py"), "print('hi')").unwrap();

        let mapping = PathMapping {
            kind: PathMappingKind::Source,
            src_path: PathBuf::from("app"),
            dest_path: PathBuf::from("web/app"),
            template_config: None,
        };
        process_path_mappings(&output, &[queued(mapping, &context, &source)]).unwrap();
        assert!(output.join("web/app/main.py").is_file());
    }

    #[test]
    fn destinations_may_not_escape_the_output_directory() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("out");
        fs::create_dir_all(&output).unwrap();

        let mapping = PathMapping {
            kind: PathMappingKind::Default,
            src_path: PathBuf::from("x"),
            dest_path: PathBuf::from("../escape"),
            template_config: None,
        };
        let err =
            process_path_mappings(&output, &[queued(mapping, dir.path(), dir.path())]).unwrap_err();
        assert!(matches!(err, EngineError::InvalidPath(_)));
    }
}
