use std::fmt;

use thiserror::Error;

/// High-level error type shared across the engine components.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("descriptor error: {0}")]
    Descriptor(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("script error: {0}")]
    Script(String),
    #[error("question error: {0}")]
    Qa(String),
    #[error("merge conflict: {0}")]
    MergeConflict(String),
    #[error("plan error: {0}")]
    Plan(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("the run was cancelled")]
    Cancelled,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl EngineError {
    pub fn context<T: fmt::Display>(self, ctx: T) -> Self {
        match self {
            EngineError::Descriptor(msg) => EngineError::Descriptor(format!("{ctx}: {msg}")),
            EngineError::InvalidPath(msg) => EngineError::InvalidPath(format!("{ctx}: {msg}")),
            EngineError::Script(msg) => EngineError::Script(format!("{ctx}: {msg}")),
            EngineError::Qa(msg) => EngineError::Qa(format!("{ctx}: {msg}")),
            EngineError::MergeConflict(msg) => EngineError::MergeConflict(format!("{ctx}: {msg}")),
            EngineError::Plan(msg) => EngineError::Plan(format!("{ctx}: {msg}")),
            EngineError::Serialization(msg) => EngineError::Serialization(format!("{ctx}: {msg}")),
            EngineError::Cancelled => EngineError::Cancelled,
            EngineError::Io(err) => EngineError::Io(err),
        }
    }
}
