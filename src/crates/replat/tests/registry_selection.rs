mod common;

use std::path::Path;

use common::{TestTransformer, descriptor_yaml, write_descriptor};
use replat::{
    ClassRegistry, InitOptions, LabelSelector, QaEngine, TransformOutput, TransformerRegistry,
};
use tempfile::TempDir;

fn noop_classes(names: &[&str]) -> ClassRegistry {
    let mut classes = ClassRegistry::empty();
    for name in names {
        classes.register(
            name.to_string(),
            Box::new(|descriptor, ctx| {
                Ok(Box::new(TestTransformer {
                    descriptor,
                    env: ctx.env,
                    detect: None,
                    on_transform: Box::new(|_, _| Ok(TransformOutput::default())),
                }))
            }),
        );
    }
    classes
}

fn init(root: &Path, classes: &ClassRegistry, selector: LabelSelector) -> TransformerRegistry {
    let source = root.join("src");
    let output = root.join("out");
    let temp_root = root.join("tmp");
    std::fs::create_dir_all(&source).unwrap();
    TransformerRegistry::init(
        classes,
        InitOptions {
            descriptor_dirs: vec![root.join("assets")],
            selector,
            project_name: "shop".into(),
            source_dir: source,
            output_dir: output,
            temp_root,
        },
        QaEngine::skipping().into_shared(),
    )
    .unwrap()
}

#[test]
fn override_selector_shadows_matching_transformers() {
    let temp = TempDir::new().unwrap();
    let assets = temp.path().join("assets");
    write_descriptor(
        &assets,
        "custom",
        &descriptor_yaml(
            "custom-builder",
            "spec:\n  class: Noop\n  override:\n    matchLabels:\n      tier: default\n",
        ),
    );
    write_descriptor(
        &assets,
        "stock",
        &descriptor_yaml(
            "stock-builder",
            "  labels:\n    tier: default\nspec:\n  class: Noop\n",
        ),
    );

    let registry = init(
        temp.path(),
        &noop_classes(&["Noop"]),
        LabelSelector::everything(),
    );

    assert_eq!(registry.names(), vec!["custom-builder".to_string()]);
    assert!(registry.disabled().contains_key("stock-builder"));
}

#[test]
fn selector_mismatches_are_reported_as_disabled() {
    let temp = TempDir::new().unwrap();
    let assets = temp.path().join("assets");
    write_descriptor(
        &assets,
        "legacy",
        &descriptor_yaml(
            "legacy-builder",
            "  labels:\n    tier: legacy\nspec:\n  class: Noop\n",
        ),
    );
    write_descriptor(
        &assets,
        "modern",
        &descriptor_yaml(
            "modern-builder",
            "  labels:\n    tier: default\nspec:\n  class: Noop\n",
        ),
    );

    let registry = init(
        temp.path(),
        &noop_classes(&["Noop"]),
        LabelSelector::parse("tier=default").unwrap(),
    );

    assert_eq!(registry.names(), vec!["modern-builder".to_string()]);
    assert!(registry.disabled().contains_key("legacy-builder"));
}

#[test]
fn unregistered_classes_are_dropped() {
    let temp = TempDir::new().unwrap();
    let assets = temp.path().join("assets");
    write_descriptor(
        &assets,
        "exotic",
        &descriptor_yaml("exotic-builder", "spec:\n  class: Mystery\n"),
    );

    let registry = init(
        temp.path(),
        &noop_classes(&["Noop"]),
        LabelSelector::everything(),
    );

    assert!(registry.is_empty());
    assert!(registry.disabled().contains_key("exotic-builder"));
}

#[test]
fn duplicate_names_keep_the_first_descriptor() {
    let temp = TempDir::new().unwrap();
    let assets = temp.path().join("assets");
    write_descriptor(
        &assets,
        "a-first",
        &descriptor_yaml("twin", "spec:\n  class: Noop\n"),
    );
    write_descriptor(
        &assets,
        "b-second",
        &descriptor_yaml("twin", "spec:\n  class: Noop\n"),
    );

    let registry = init(
        temp.path(),
        &noop_classes(&["Noop"]),
        LabelSelector::everything(),
    );

    assert_eq!(registry.len(), 1);
    let paths = registry.descriptor_paths();
    assert!(paths["twin"].to_string_lossy().contains("a-first"));
}

#[test]
fn dependent_candidates_are_ordered_last() {
    use replat::Artifact;

    let temp = TempDir::new().unwrap();
    let assets = temp.path().join("assets");
    // File order puts the dependent transformer first; the dependency
    // selector must still push it behind the one it depends on.
    write_descriptor(
        &assets,
        "a-finisher",
        &descriptor_yaml(
            "finisher",
            "spec:\n  class: Noop\n  consumes: [Service]\n  dependency:\n    matchLabels:\n      role: primer\n",
        ),
    );
    write_descriptor(
        &assets,
        "b-primer",
        &descriptor_yaml(
            "primer",
            "  labels:\n    role: primer\nspec:\n  class: Noop\n  consumes: [Service]\n",
        ),
    );

    let registry = init(
        temp.path(),
        &noop_classes(&["Noop"]),
        LabelSelector::everything(),
    );

    let candidates = registry.candidates(&Artifact::new("web", "Service"));
    assert_eq!(candidates, vec!["primer".to_string(), "finisher".to_string()]);
}

#[test]
fn malformed_descriptors_are_skipped_not_fatal() {
    let temp = TempDir::new().unwrap();
    let assets = temp.path().join("assets");
    write_descriptor(
        &assets,
        "good",
        &descriptor_yaml("good-builder", "spec:\n  class: Noop\n"),
    );
    write_descriptor(
        &assets,
        "bad",
        "apiVersion: replat.dev/v1alpha1\nkind: Transformer\nmetadata:\n  name: bad\nspec:\n  class: Noop\n  surprise: true\n",
    );

    let registry = init(
        temp.path(),
        &noop_classes(&["Noop"]),
        LabelSelector::everything(),
    );
    assert_eq!(registry.names(), vec!["good-builder".to_string()]);
}
