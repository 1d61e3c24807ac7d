use std::path::{Path, PathBuf};

use crate::error::EngineError;
use crate::utils::{is_parent, lexical_clean};

/// Relative directory under a transformer's context holding its templates.
pub const TEMPLATES_RELDIR: &str = "templates";
/// Relative directory under a transformer's context holding its resources.
pub const RESOURCES_RELDIR: &str = "resources";

/// Per-transformer execution environment: the directories a transformer may
/// touch, fixed at init. The allow-set backs every sandbox path check.
#[derive(Clone, Debug)]
pub struct TransformEnv {
    pub project_name: String,
    pub source_dir: PathBuf,
    pub context_dir: PathBuf,
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    allowed_roots: Vec<PathBuf>,
}

impl TransformEnv {
    /// Builds the environment for one transformer. `context_dir` is the
    /// directory holding the transformer's descriptor; a fresh temp
    /// directory is created per transformer.
    pub fn new(
        project_name: impl Into<String>,
        source_dir: impl Into<PathBuf>,
        context_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        temp_root: &Path,
    ) -> Result<Self, EngineError> {
        let source_dir = absolutize(&source_dir.into())?;
        let context_dir = absolutize(&context_dir.into())?;
        let output_dir = absolutize(&output_dir.into())?;
        let temp_dir = temp_root.join(
            context_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "transformer".to_string()),
        );
        std::fs::create_dir_all(&temp_dir)?;
        let temp_dir = absolutize(&temp_dir)?;

        let allowed_roots = vec![
            source_dir.clone(),
            context_dir.clone(),
            output_dir.clone(),
            temp_dir.clone(),
        ];

        Ok(Self {
            project_name: project_name.into(),
            source_dir,
            context_dir,
            output_dir,
            temp_dir,
            allowed_roots,
        })
    }

    pub fn resources_dir(&self) -> PathBuf {
        self.context_dir.join(RESOURCES_RELDIR)
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.context_dir.join(TEMPLATES_RELDIR)
    }

    /// True when the path resolves under one of the allowed roots.
    ///
    /// The check is lexical first (rejecting `..` escapes and foreign
    /// prefixes) and, when the path exists, repeated on the symlink-resolved
    /// absolute path so links cannot smuggle access outside the set.
    pub fn is_path_valid(&self, path: &Path) -> bool {
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.context_dir.join(path)
        };
        let cleaned = lexical_clean(&absolute);
        if !self
            .allowed_roots
            .iter()
            .any(|root| is_parent(&cleaned, root))
        {
            return false;
        }
        if let Ok(resolved) = std::fs::canonicalize(&cleaned) {
            return self
                .allowed_roots
                .iter()
                .any(|root| is_parent(&resolved, root));
        }
        true
    }

    /// Errors with the sandbox-violation message used across the host API.
    pub fn validate_path(&self, path: &Path) -> Result<(), EngineError> {
        if self.is_path_valid(path) {
            Ok(())
        } else {
            Err(EngineError::InvalidPath(path.display().to_string()))
        }
    }
}

fn absolutize(path: &Path) -> Result<PathBuf, EngineError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    // Resolve symlinks in the roots themselves where possible so later
    // prefix checks compare like with like.
    Ok(std::fs::canonicalize(&absolute).unwrap_or_else(|_| lexical_clean(&absolute)))
}
