//! Sandboxed scripting host for externally scripted transformers.
//!
//! Each scripted transformer gets its own restricted `rhai` interpreter:
//! no I/O or network built-ins, bounded recursion and operation count, and
//! a curated API surface (`fs`, `crypto`, `archive`, the library modules
//! and the QA bridge `query`). Values cross the host/guest boundary through
//! the serde bridge in both directions.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::rc::Rc;

use rhai::serde::{from_dynamic, to_dynamic};
use rhai::{AST, CallFnOptions, Dynamic, Engine, EvalAltResult, NativeCallContext, Position, Scope};
use serde::Deserialize;
use serde_yaml::Value;

use crate::artifact::Artifact;
use crate::env::{TEMPLATES_RELDIR, TransformEnv};
use crate::error::EngineError;
use crate::qa::{Problem, SharedQaEngine};
use crate::transformer::{DetectedServices, TransformOutput, Transformer, TransformerDescriptor};

mod archive;
mod crypto;
mod modules;
mod sandbox;

/// Class name scripted transformers declare in their descriptors.
pub const SCRIPT_CLASS: &str = "Script";

const DETECT_FN: &str = "directory_detect";
const TRANSFORM_FN: &str = "transform";

const MAX_CALL_LEVELS: usize = 64;
const MAX_OPERATIONS: u64 = 50_000_000;
const MAX_EXPR_DEPTH: usize = 128;

/// Converts a host error into a guest-visible runtime error.
pub(crate) fn script_err(msg: impl Into<String>) -> Box<EvalAltResult> {
    Box::new(EvalAltResult::ErrorRuntime(
        Dynamic::from(msg.into()),
        Position::NONE,
    ))
}

/// The `spec.config` of a scripted transformer.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ScriptConfig {
    script_file: String,
}

/// A transformer realised by a user script.
#[derive(Debug)]
pub struct ScriptTransformer {
    descriptor: TransformerDescriptor,
    env: Rc<TransformEnv>,
    engine: Engine,
    ast: AST,
    scope: Scope<'static>,
    has_detect: bool,
}

impl ScriptTransformer {
    pub fn new(
        descriptor: TransformerDescriptor,
        env: TransformEnv,
        qa: SharedQaEngine,
    ) -> Result<Self, EngineError> {
        let name = descriptor.name().to_string();
        let config: ScriptConfig = descriptor
            .spec
            .config
            .clone()
            .ok_or_else(|| EngineError::Descriptor(format!("{name}: no script file specified")))
            .and_then(|value| {
                serde_yaml::from_value(value).map_err(|e| {
                    EngineError::Descriptor(format!("{name}: bad script configuration: {e}"))
                })
            })?;
        if config.script_file.is_empty() {
            return Err(EngineError::Descriptor(format!(
                "{name}: no script file specified"
            )));
        }

        let env = Rc::new(env);
        let script_path = env.context_dir.join(&config.script_file);
        env.validate_path(&script_path)?;
        let script = std::fs::read_to_string(&script_path).map_err(|e| {
            EngineError::Descriptor(format!(
                "{name}: failed to read script {}: {e}",
                script_path.display()
            ))
        })?;

        let functions = Rc::new(RefCell::new(BTreeSet::new()));
        let globals = build_globals(&descriptor, &env)?;
        let engine = build_engine(&env, &qa, &functions, globals);

        let ast = engine
            .compile(&script)
            .map_err(|e| EngineError::Script(format!("{name}: failed to compile script: {e}")))?;
        {
            let mut known = functions.borrow_mut();
            for f in ast.iter_functions() {
                known.insert((f.name.to_string(), f.params.len()));
            }
        }

        let has_detect = {
            let known = functions.borrow();
            if known.contains(&(TRANSFORM_FN.to_string(), 2)) {
                // ok
            } else if known.iter().any(|(n, _)| n == TRANSFORM_FN) {
                return Err(EngineError::Descriptor(format!(
                    "{name}: {TRANSFORM_FN} must take exactly 2 parameters"
                )));
            } else {
                return Err(EngineError::Descriptor(format!(
                    "{name}: no {TRANSFORM_FN} function found"
                )));
            }
            if known.contains(&(DETECT_FN.to_string(), 1)) {
                true
            } else if known.iter().any(|(n, _)| n == DETECT_FN) {
                return Err(EngineError::Descriptor(format!(
                    "{name}: {DETECT_FN} must take exactly 1 parameter"
                )));
            } else {
                false
            }
        };

        let mut scope = Scope::new();
        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|e| EngineError::Script(format!("{name}: script failed to load: {e}")))?;

        Ok(Self {
            descriptor,
            env,
            engine,
            ast,
            scope,
            has_detect,
        })
    }

    fn call<T: serde::de::DeserializeOwned>(
        &mut self,
        function: &str,
        args: impl rhai::FuncArgs,
        empty: impl FnOnce() -> T,
    ) -> Result<T, EngineError> {
        let name = self.descriptor.name();
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        let result: Dynamic = self
            .engine
            .call_fn_with_options(options, &mut self.scope, &self.ast, function, args)
            .map_err(|e| EngineError::Script(format!("{name}: {function} failed: {e}")))?;
        if result.is_unit() {
            return Ok(empty());
        }
        from_dynamic(&result).map_err(|e| {
            EngineError::Script(format!(
                "{name}: could not decode the result of {function}: {e}"
            ))
        })
    }
}

impl Transformer for ScriptTransformer {
    fn descriptor(&self) -> &TransformerDescriptor {
        &self.descriptor
    }

    fn env(&self) -> &TransformEnv {
        &self.env
    }

    fn directory_detect(&mut self, dir: &Path) -> Result<DetectedServices, EngineError> {
        if !self.has_detect {
            return Ok(DetectedServices::new());
        }
        let dir_dyn = to_dynamic(dir.to_string_lossy().as_ref())
            .map_err(|e| EngineError::Script(e.to_string()))?;
        self.call(DETECT_FN, (dir_dyn,), DetectedServices::new)
    }

    fn transform(
        &mut self,
        new_artifacts: &[Artifact],
        seen: &[Artifact],
    ) -> Result<TransformOutput, EngineError> {
        let name = self.descriptor.name();
        let new_dyn = to_dynamic(new_artifacts).map_err(|e| {
            EngineError::Script(format!("{name}: unmarshallable new artifacts: {e}"))
        })?;
        let seen_dyn = to_dynamic(seen).map_err(|e| {
            EngineError::Script(format!("{name}: unmarshallable seen artifacts: {e}"))
        })?;
        self.call(TRANSFORM_FN, (new_dyn, seen_dyn), TransformOutput::default)
    }
}

fn build_engine(
    env: &Rc<TransformEnv>,
    qa: &SharedQaEngine,
    functions: &Rc<RefCell<BTreeSet<(String, usize)>>>,
    globals: BTreeMap<String, Dynamic>,
) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_call_levels(MAX_CALL_LEVELS);
    engine.set_max_operations(MAX_OPERATIONS);
    engine.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_EXPR_DEPTH);

    // The read-only environment globals. A variable resolver makes them
    // visible inside script functions as well, which plain scope entries
    // are not.
    let globals = Rc::new(globals);
    engine.on_var(move |name, _, _| Ok(globals.get(name).cloned()));

    modules::register(&mut engine);
    engine.register_static_module("fs", sandbox::fs_module(env.clone()).into());
    engine.register_static_module("crypto", crypto::module().into());
    engine.register_static_module("archive", archive::module(env.clone()).into());

    let qa_handle = qa.clone();
    engine.register_fn(
        "query",
        move |problem: rhai::Map| -> Result<Dynamic, Box<EvalAltResult>> {
            run_query(&qa_handle, problem, None)
        },
    );
    let qa_handle = qa.clone();
    let known = functions.clone();
    engine.register_fn(
        "query",
        move |ctx: NativeCallContext,
              problem: rhai::Map,
              validation: &str|
              -> Result<Dynamic, Box<EvalAltResult>> {
            if validation.is_empty() {
                return run_query(&qa_handle, problem, None);
            }
            if !known.borrow().contains(&(validation.to_string(), 1)) {
                return Err(script_err(format!(
                    "provided validation function not found: {validation}"
                )));
            }
            let validator = |answer: &Value| -> Result<(), String> {
                let answer_dyn = to_dynamic(answer).map_err(|e| e.to_string())?;
                let verdict: Dynamic = ctx
                    .call_fn(validation, (answer_dyn,))
                    .map_err(|e| format!("unable to execute the validation function: {e}"))?;
                let message = verdict
                    .into_immutable_string()
                    .map_err(|t| format!("validation function returned {t}, expected a string"))?;
                if message.is_empty() {
                    Ok(())
                } else {
                    Err(message.to_string())
                }
            };
            run_query(&qa_handle, problem, Some(&validator))
        },
    );

    engine
}

fn run_query(
    qa: &SharedQaEngine,
    problem: rhai::Map,
    validator: Option<&dyn Fn(&Value) -> Result<(), String>>,
) -> Result<Dynamic, Box<EvalAltResult>> {
    let problem_value: Value = from_dynamic(&Dynamic::from(problem))
        .map_err(|e| script_err(format!("failed to unmarshal the question: {e}")))?;
    let problem: Problem = serde_yaml::from_value(problem_value)
        .map_err(|e| script_err(format!("malformed question: {e}")))?;
    if problem.id.is_empty() {
        return Err(script_err("the key 'id' is missing from the question"));
    }

    let resolved = qa
        .borrow_mut()
        .fetch_answer_with(problem, validator)
        .map_err(|e| script_err(e.to_string()))?;
    let answer = resolved.answer.unwrap_or(Value::Null);
    to_dynamic(&answer).map_err(|e| script_err(format!("unmarshallable answer: {e}")))
}

fn build_globals(
    descriptor: &TransformerDescriptor,
    env: &TransformEnv,
) -> Result<BTreeMap<String, Dynamic>, EngineError> {
    let name = descriptor.name();
    let descriptor_value = serde_yaml::to_value(descriptor)?;
    let config_dyn = to_dynamic(&descriptor_value)
        .map_err(|e| EngineError::Script(format!("{name}: unmarshallable descriptor: {e}")))?;

    let mut globals = BTreeMap::new();
    globals.insert("project".to_string(), Dynamic::from(env.project_name.clone()));
    globals.insert("config".to_string(), config_dyn);
    globals.insert(
        "context_dir".to_string(),
        Dynamic::from(path_string(&env.context_dir)),
    );
    globals.insert(
        "source_dir".to_string(),
        Dynamic::from(path_string(&env.source_dir)),
    );
    globals.insert(
        "output_dir".to_string(),
        Dynamic::from(path_string(&env.output_dir)),
    );
    globals.insert(
        "temp_dir".to_string(),
        Dynamic::from(path_string(&env.temp_dir)),
    );
    globals.insert(
        "templates_reldir".to_string(),
        Dynamic::from(TEMPLATES_RELDIR.to_string()),
    );
    globals.insert(
        "resources_dir".to_string(),
        Dynamic::from(path_string(&env.resources_dir())),
    );
    Ok(globals)
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
