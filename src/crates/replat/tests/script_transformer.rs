use std::fs;
use std::path::{Path, PathBuf};

use replat::{
    Artifact, PathMappingKind, QaEngine, QaOptions, ScriptTransformer, TransformEnv,
    TransformerDescriptor,
};
use tempfile::TempDir;

const DESCRIPTOR: &str = "\
apiVersion: replat.dev/v1alpha1
kind: Transformer
metadata:
  name: python-detector
  labels:
    tier: default
spec:
  class: Script
  consumes: [Service]
  produces:
    Dockerfile: {}
  config:
    scriptFile: detect.rhai
";

const SCRIPT: &str = r#"
fn directory_detect(dir) {
    if fs::exists(fs::path_join(dir, "requirements.txt")) {
        #{ "app": [ #{ "name": "", "type": "Service", "paths": #{ "SourcePath": [dir] } } ] }
    } else {
        #{}
    }
}

fn check_port(answer) {
    if answer == "8080" { "" } else { "only port 8080 is supported" }
}

fn transform(new_artifacts, seen) {
    let mappings = [];
    let created = [];
    for a in new_artifacts {
        let port = query(#{
            "id": "services." + a.name + ".port",
            "description": "Which port does the service listen on?",
            "default": "8080"
        }, "check_port");
        created.push(#{
            "name": a.name,
            "type": "Dockerfile",
            "configs": #{ "port": #{ "value": port } }
        });
        mappings.push(#{ "type": "source", "srcPath": ".", "destPath": a.name });
    }
    #{ "pathMappings": mappings, "createdArtifacts": created }
}
"#;

struct Setup {
    _temp: TempDir,
    source_dir: PathBuf,
    transformer: ScriptTransformer,
}

fn setup(script: &str, overrides: Vec<&str>) -> Setup {
    let temp = TempDir::new().unwrap();
    let source_dir = temp.path().join("src");
    let context_dir = temp.path().join("ctx");
    let output_dir = temp.path().join("out");
    let temp_root = temp.path().join("tmp");
    for dir in [&source_dir, &context_dir, &output_dir, &temp_root] {
        fs::create_dir_all(dir).unwrap();
    }
    fs::write(context_dir.join("transformer.yaml"), DESCRIPTOR).unwrap();
    fs::write(context_dir.join("detect.rhai"), script).unwrap();

    let descriptor = TransformerDescriptor::load(&context_dir.join("transformer.yaml")).unwrap();
    let env = TransformEnv::new("shop", &source_dir, &context_dir, &output_dir, &temp_root).unwrap();
    let qa = QaEngine::new(QaOptions {
        overrides: overrides.into_iter().map(String::from).collect(),
        skip: true,
        disable_console: true,
        ..QaOptions::default()
    })
    .unwrap()
    .into_shared();

    let transformer = ScriptTransformer::new(descriptor, env, qa).unwrap();
    Setup {
        _temp: temp,
        source_dir,
        transformer,
    }
}

fn source_artifact(setup: &Setup) -> Artifact {
    Artifact::new("app", "Service").with_path("SourcePath", &setup.source_dir)
}

#[test]
fn directory_detect_marshals_services_across_the_boundary() {
    use replat::Transformer;
    let mut setup = setup(SCRIPT, vec![]);
    fs::write(setup.source_dir.join("requirements.txt"), "flask\n").unwrap();

    let services = setup.transformer.directory_detect(&setup.source_dir).unwrap();
    assert_eq!(services.len(), 1);
    let artifacts = &services["app"];
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].artifact_type, "Service".into());
    assert_eq!(
        artifacts[0].paths[&"SourcePath".into()],
        vec![setup.source_dir.clone()]
    );
}

#[test]
fn directory_detect_reports_nothing_on_a_miss() {
    use replat::Transformer;
    let mut setup = setup(SCRIPT, vec![]);
    let services = setup.transformer.directory_detect(&setup.source_dir).unwrap();
    assert!(services.is_empty());
}

#[test]
fn transform_round_trips_artifacts_mappings_and_answers() {
    use replat::Transformer;
    let mut setup = setup(SCRIPT, vec![]);
    let artifact = source_artifact(&setup);

    let output = setup.transformer.transform(&[artifact], &[]).unwrap();

    assert_eq!(output.created_artifacts.len(), 1);
    let created = &output.created_artifacts[0];
    assert_eq!(created.name, "app");
    assert_eq!(created.artifact_type, "Dockerfile".into());
    let port: serde_yaml::Value = created.configs[&"port".into()].clone();
    assert_eq!(
        port,
        serde_yaml::from_str::<serde_yaml::Value>("value: '8080'").unwrap()
    );

    assert_eq!(output.path_mappings.len(), 1);
    assert_eq!(output.path_mappings[0].kind, PathMappingKind::Source);
    assert_eq!(output.path_mappings[0].dest_path, PathBuf::from("app"));
}

#[test]
fn script_validation_functions_gate_configured_answers() {
    use replat::Transformer;
    let mut setup = setup(SCRIPT, vec!["replat.services.app.port=9090"]);
    let artifact = source_artifact(&setup);

    let err = setup.transformer.transform(&[artifact], &[]).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("only port 8080 is supported"), "{message}");
}

#[test]
fn missing_validation_function_is_an_invocation_error() {
    use replat::Transformer;
    let script = SCRIPT.replace("\"check_port\"", "\"no_such_check\"");
    let mut setup = setup(&script, vec![]);
    let artifact = source_artifact(&setup);

    let err = setup.transformer.transform(&[artifact], &[]).unwrap_err();
    assert!(
        err.to_string().contains("validation function not found"),
        "{err}"
    );
}

#[test]
fn sandbox_rejects_reads_outside_the_allow_set() {
    use replat::Transformer;
    let script = r#"
fn transform(new_artifacts, seen) {
    fs::read("/etc/passwd");
    #{}
}
"#;
    let mut setup = setup(script, vec![]);
    let artifact = source_artifact(&setup);

    let err = setup.transformer.transform(&[artifact], &[]).unwrap_err();
    assert!(err.to_string().contains("invalid path"), "{err}");
}

#[test]
fn transform_function_is_mandatory_with_arity_two() {
    let temp = TempDir::new().unwrap();
    let context_dir = temp.path().join("ctx");
    fs::create_dir_all(&context_dir).unwrap();
    fs::write(context_dir.join("transformer.yaml"), DESCRIPTOR).unwrap();
    fs::write(
        context_dir.join("detect.rhai"),
        "fn transform(only_one) { #{} }\n",
    )
    .unwrap();

    let descriptor = TransformerDescriptor::load(&context_dir.join("transformer.yaml")).unwrap();
    let env = TransformEnv::new(
        "shop",
        temp.path(),
        &context_dir,
        temp.path().join("out"),
        &temp.path().join("tmp"),
    )
    .unwrap();
    let qa = QaEngine::skipping().into_shared();

    let err = ScriptTransformer::new(descriptor, env, qa).unwrap_err();
    assert!(err.to_string().contains("2 parameters"), "{err}");
}

#[test]
fn library_modules_are_available_to_scripts() {
    use replat::Transformer;
    let script = r#"
fn transform(new_artifacts, seen) {
    let parsed = json::loads("{\"a\": 1}");
    let doubled = yaml::loads(yaml::dumps(parsed));
    let digest = hash::sha256("abc");
    let found = re::find_all("[0-9]+", "p80 p443");
    let rows = csv::parse("x,y\n1,2");
    let root = math::sqrt(16.0);
    let items = html::select("<ul><li>a</li><li>b</li></ul>", "li");
    #{ "createdArtifacts": [ #{
        "name": digest.sub_string(0, 8),
        "type": "Probe",
        "configs": #{ "probe": #{
            "a": doubled.a,
            "ports": found,
            "cells": rows[1],
            "root": root,
            "items": items
        } }
    } ] }
}
"#;
    let mut setup = setup(script, vec![]);
    let artifact = source_artifact(&setup);

    let output = setup.transformer.transform(&[artifact], &[]).unwrap();
    let created = &output.created_artifacts[0];
    // Leading hex of sha256("abc").
    assert_eq!(created.name, "ba7816bf");
    let probe = &created.configs[&"probe".into()];
    let expected: serde_yaml::Value = serde_yaml::from_str(
        "a: 1\nports: ['80', '443']\ncells: ['1', '2']\nroot: 4.0\nitems: [a, b]",
    )
    .unwrap();
    assert_eq!(probe, &expected);
}

#[test]
fn scripts_can_probe_xml_files_through_the_sandbox() {
    use replat::Transformer;
    let script = r#"
fn transform(new_artifacts, seen) {
    let found = fs::find_xml_path(fs::path_join(source_dir, "pom.xml"), "/project/version");
    #{ "createdArtifacts": [ #{ "name": found[0], "type": "XmlProbe" } ] }
}
"#;
    let mut setup = setup(script, vec![]);
    fs::write(
        setup.source_dir.join("pom.xml"),
        "<project><version>1.2.3</version></project>",
    )
    .unwrap();
    let artifact = source_artifact(&setup);

    let output = setup.transformer.transform(&[artifact], &[]).unwrap();
    assert_eq!(output.created_artifacts[0].name, "1.2.3");
}

#[test]
fn xml_probes_outside_the_allow_set_are_rejected() {
    use replat::Transformer;
    let script = r#"
fn transform(new_artifacts, seen) {
    fs::find_xml_path("/etc/fstab", "/any");
    #{}
}
"#;
    let mut setup = setup(script, vec![]);
    let artifact = source_artifact(&setup);

    let err = setup.transformer.transform(&[artifact], &[]).unwrap_err();
    assert!(err.to_string().contains("invalid path"), "{err}");
}

#[test]
fn zip_module_reads_entries_from_byte_blobs() {
    use base64::Engine as _;
    use replat::Transformer;
    use std::io::Write as _;

    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    writer
        .start_file("inner/hello.txt", zip::write::SimpleFileOptions::default())
        .unwrap();
    writer.write_all(b"zipped").unwrap();
    let bytes = writer.finish().unwrap().into_inner();
    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);

    let script = r#"
fn transform(new_artifacts, seen) {
    let data = b64::decode("__DATA__");
    let names = zip::entries(data);
    let body = zip::read(data, names[0]);
    #{ "createdArtifacts": [ #{
        "name": names[0],
        "type": "ZipProbe",
        "configs": #{ "zip": #{ "size": body.len() } }
    } ] }
}
"#
    .replace("__DATA__", &encoded);

    let mut setup = setup(&script, vec![]);
    let artifact = source_artifact(&setup);

    let output = setup.transformer.transform(&[artifact], &[]).unwrap();
    let created = &output.created_artifacts[0];
    assert_eq!(created.name, "inner/hello.txt");
    assert_eq!(
        created.configs[&"zip".into()],
        serde_yaml::from_str::<serde_yaml::Value>("size: 6").unwrap()
    );
}

#[test]
fn scripts_see_the_injected_globals() {
    use replat::Transformer;
    let script = r#"
fn transform(new_artifacts, seen) {
    #{ "createdArtifacts": [ #{
        "name": project,
        "type": "Globals",
        "configs": #{ "dirs": #{
            "context": context_dir,
            "source": source_dir,
            "templates": templates_reldir
        } }
    } ] }
}
"#;
    let mut setup = setup(script, vec![]);
    let artifact = source_artifact(&setup);

    let output = setup.transformer.transform(&[artifact], &[]).unwrap();
    let created = &output.created_artifacts[0];
    assert_eq!(created.name, "shop");
    let dirs = created.configs[&"dirs".into()].clone();
    let dirs: std::collections::BTreeMap<String, String> = serde_yaml::from_value(dirs).unwrap();
    assert!(Path::new(&dirs["context"]).is_dir());
    assert!(Path::new(&dirs["source"]).is_dir());
    assert_eq!(dirs["templates"], "templates");
}
