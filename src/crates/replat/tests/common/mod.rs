use std::path::{Path, PathBuf};

use replat::{
    Artifact, DetectedServices, EngineError, TransformEnv, TransformOutput, Transformer,
    TransformerDescriptor,
};

pub type DetectFn = Box<dyn FnMut(&Path) -> DetectedServices>;
pub type TransformFn =
    Box<dyn FnMut(&[Artifact], &[Artifact]) -> Result<TransformOutput, EngineError>>;

/// Native transformer with pluggable behaviour, standing in for catalogue
/// classes in registry and pipeline tests.
pub struct TestTransformer {
    pub descriptor: TransformerDescriptor,
    pub env: TransformEnv,
    pub detect: Option<DetectFn>,
    pub on_transform: TransformFn,
}

impl Transformer for TestTransformer {
    fn descriptor(&self) -> &TransformerDescriptor {
        &self.descriptor
    }

    fn env(&self) -> &TransformEnv {
        &self.env
    }

    fn directory_detect(&mut self, dir: &Path) -> Result<DetectedServices, EngineError> {
        Ok(match &mut self.detect {
            Some(detect) => detect(dir),
            None => DetectedServices::new(),
        })
    }

    fn transform(
        &mut self,
        new_artifacts: &[Artifact],
        seen: &[Artifact],
    ) -> Result<TransformOutput, EngineError> {
        (self.on_transform)(new_artifacts, seen)
    }
}

/// Writes a descriptor file into its own context directory under `root`.
pub fn write_descriptor(root: &Path, file_stem: &str, body: &str) -> PathBuf {
    let context = root.join(file_stem);
    std::fs::create_dir_all(&context).unwrap();
    let path = context.join("transformer.yaml");
    std::fs::write(&path, body).unwrap();
    path
}

/// Descriptor YAML with the common preamble filled in.
pub fn descriptor_yaml(name: &str, spec: &str) -> String {
    format!(
        "apiVersion: replat.dev/v1alpha1\nkind: Transformer\nmetadata:\n  name: {name}\n{spec}"
    )
}
