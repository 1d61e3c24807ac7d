pub mod artifact;
pub mod cancel;
pub mod configs;
pub mod env;
pub mod error;
pub mod pathmapping;
pub mod pipeline;
pub mod plan;
pub mod planner;
pub mod qa;
pub mod script;
pub mod selector;
pub mod transformer;
pub mod types;
pub mod utils;

pub use artifact::{
    Artifact, ArtifactType, ConfigKind, PathKind, deep_merge, merge, merge_list,
    update_against_seen,
};
pub use cancel::CancelToken;
pub use configs::{ImagesConfig, ServiceConfig, TypedConfig};
pub use env::TransformEnv;
pub use error::EngineError;
pub use pathmapping::{PathMapping, PathMappingKind, QueuedMapping, process_path_mappings};
pub use pipeline::{TransformSummary, transform};
pub use plan::{DEFAULT_PLAN_FILE, Plan, PlanArtifact, PlanSpec, UNNAMED_SERVICE};
pub use planner::{IGNORE_FILENAME, PlanOptions, create_plan};
pub use qa::{Problem, ProblemKind, QaEngine, QaOptions, SharedQaEngine, Validator};
pub use script::{SCRIPT_CLASS, ScriptTransformer};
pub use selector::{LabelSelector, LabelSelectorRequirement, SelectorOperator};
pub use transformer::{
    ClassRegistry, DetectedServices, InitOptions, TransformOutput, Transformer, TransformerCtor,
    TransformerCtx, TransformerDescriptor, TransformerRegistry,
};
pub use types::{API_GROUP, API_VERSION, ObjectMeta, TypeMeta, group_version};
