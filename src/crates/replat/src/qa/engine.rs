use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::rc::Rc;

use serde_yaml::{Mapping, Value};

use crate::artifact::deep_merge;
use crate::error::EngineError;
use crate::qa::console::ConsolePrompt;
use crate::qa::remote::RemotePrompt;
use crate::qa::{Problem, ProblemKind, split_key};

/// Answer source that can ask the user.
pub trait Prompt {
    fn ask(&mut self, problem: &Problem) -> Result<Value, EngineError>;
}

/// Configuration surfaces for the QA engine, mirroring the CLI flags.
#[derive(Default)]
pub struct QaOptions {
    /// Config YAML files, merged in order (later files win).
    pub config_files: Vec<PathBuf>,
    /// `key=value` overrides.
    pub overrides: Vec<String>,
    /// Preset names, resolved against `preset_dirs` as `<name>.yaml`.
    pub presets: Vec<String>,
    /// Directories searched for preset bundles.
    pub preset_dirs: Vec<PathBuf>,
    /// Answer every question from its default instead of prompting.
    pub skip: bool,
    /// Persist password answers to the cache and config outputs.
    pub persist_passwords: bool,
    /// Disable the console prompt.
    pub disable_console: bool,
    /// Serve the remote prompt endpoint on this port.
    pub port: Option<u16>,
    /// Write-through cache output path.
    pub cache_out: Option<PathBuf>,
    /// Resolved config output path.
    pub config_out: Option<PathBuf>,
}

/// Handle shared between the pipeline and every transformer. The engine is
/// single-threaded; interior mutability keeps borrows short-lived.
pub type SharedQaEngine = Rc<RefCell<QaEngine>>;

/// Resolves problems against the configured answer sources.
///
/// Source order: in-memory cache, presets, overrides, config files,
/// interactive prompt, problem default (skip mode only). The first source
/// holding an answer wins; a miss at the end is fatal for the run.
pub struct QaEngine {
    cache: BTreeMap<String, Value>,
    preset_store: Value,
    override_store: Value,
    config_store: Value,
    prompt: Option<Box<dyn Prompt>>,
    skip: bool,
    persist_passwords: bool,
    password_ids: BTreeSet<String>,
    resolved: Value,
    cache_out: Option<PathBuf>,
    config_out: Option<PathBuf>,
}

impl QaEngine {
    pub fn new(options: QaOptions) -> Result<Self, EngineError> {
        let mut config_store = Value::Mapping(Mapping::new());
        for path in &options.config_files {
            let text = std::fs::read_to_string(path).map_err(|e| {
                EngineError::Qa(format!("failed to read config file {}: {e}", path.display()))
            })?;
            let value: Value = serde_yaml::from_str(&text).map_err(|e| {
                EngineError::Qa(format!("failed to parse config file {}: {e}", path.display()))
            })?;
            config_store = deep_merge(config_store, value);
        }

        let mut override_store = Value::Mapping(Mapping::new());
        for entry in &options.overrides {
            let Some((key, raw)) = entry.split_once('=') else {
                return Err(EngineError::Qa(format!(
                    "malformed override {entry:?}, expected key=value"
                )));
            };
            let value: Value =
                serde_yaml::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            set_path(&mut override_store, &split_key(key), value);
        }

        let mut preset_store = Value::Mapping(Mapping::new());
        for name in &options.presets {
            let path = options
                .preset_dirs
                .iter()
                .map(|dir| dir.join(format!("{name}.yaml")))
                .find(|p| p.is_file())
                .ok_or_else(|| EngineError::Qa(format!("unknown preset {name:?}")))?;
            let text = std::fs::read_to_string(&path)?;
            let value: Value = serde_yaml::from_str(&text).map_err(|e| {
                EngineError::Qa(format!("failed to parse preset {}: {e}", path.display()))
            })?;
            preset_store = deep_merge(preset_store, value);
        }

        let prompt: Option<Box<dyn Prompt>> = if let Some(port) = options.port {
            Some(Box::new(RemotePrompt::serve(port)?))
        } else if !options.disable_console && !options.skip {
            Some(Box::new(ConsolePrompt))
        } else {
            None
        };

        Ok(Self {
            cache: BTreeMap::new(),
            preset_store,
            override_store,
            config_store,
            prompt,
            skip: options.skip,
            persist_passwords: options.persist_passwords,
            password_ids: BTreeSet::new(),
            resolved: Value::Mapping(Mapping::new()),
            cache_out: options.cache_out,
            config_out: options.config_out,
        })
    }

    /// Engine with no answer sources beyond defaults; used by tests and by
    /// planning runs that must never block.
    pub fn skipping() -> Self {
        Self::new(QaOptions {
            skip: true,
            disable_console: true,
            ..QaOptions::default()
        })
        .expect("an engine without config surfaces cannot fail to build")
    }

    pub fn into_shared(self) -> SharedQaEngine {
        Rc::new(RefCell::new(self))
    }

    /// Resolves the problem, filling `answer`. The id is normalised first;
    /// a cached answer is returned as-is regardless of prompt mode.
    pub fn fetch_answer(&mut self, problem: Problem) -> Result<Problem, EngineError> {
        self.fetch_answer_with(problem, None)
    }

    /// Like [`QaEngine::fetch_answer`] with an additional validator that
    /// cannot outlive the call, e.g. one backed by a script function.
    pub fn fetch_answer_with(
        &mut self,
        mut problem: Problem,
        extra_validator: Option<&dyn Fn(&Value) -> Result<(), String>>,
    ) -> Result<Problem, EngineError> {
        problem.id = crate::qa::normalize_key(&problem.id);
        if problem.id.is_empty() {
            return Err(EngineError::Qa("problem id must not be empty".into()));
        }
        if problem.kind == ProblemKind::Password {
            self.password_ids.insert(problem.id.clone());
        }

        if let Some(cached) = self.cache.get(&problem.id) {
            tracing::debug!(id = %problem.id, "answered from cache");
            problem.answer = Some(cached.clone());
            return Ok(problem);
        }

        let mut configured: Option<(&'static str, Value)> = None;
        for (source, store) in [
            ("preset", &self.preset_store),
            ("override", &self.override_store),
            ("config", &self.config_store),
        ] {
            if let Some(found) = lookup_path(store, &split_key(&problem.id)) {
                configured = Some((source, found.clone()));
                break;
            }
        }
        if let Some((source, raw)) = configured {
            let answer = coerce_answer(&problem, raw)?;
            if let Err(msg) = run_validators(&problem, extra_validator, &answer) {
                return Err(EngineError::Qa(format!(
                    "the {source} answer for {} failed validation: {msg}",
                    problem.id
                )));
            }
            tracing::debug!(id = %problem.id, source, "answered from configuration");
            return self.record(problem, answer);
        }

        if !self.skip && self.prompt.is_some() {
            loop {
                let raw = match self.prompt.as_mut() {
                    Some(prompt) => prompt.ask(&problem)?,
                    None => break,
                };
                let answer = match coerce_answer(&problem, raw) {
                    Ok(answer) => answer,
                    Err(err) => {
                        tracing::error!(id = %problem.id, error = %err, "invalid answer, asking again");
                        continue;
                    }
                };
                if let Err(msg) = run_validators(&problem, extra_validator, &answer) {
                    tracing::error!(id = %problem.id, "validation failed: {msg}");
                    continue;
                }
                return self.record(problem, answer);
            }
        }

        if self.skip {
            if let Some(default) = problem.default.clone() {
                let answer = coerce_answer(&problem, default)?;
                if let Err(msg) = run_validators(&problem, extra_validator, &answer) {
                    return Err(EngineError::Qa(format!(
                        "the default answer for {} failed validation: {msg}",
                        problem.id
                    )));
                }
                return self.record(problem, answer);
            }
            return Err(EngineError::Qa(format!(
                "no default available for {} in skip mode",
                problem.id
            )));
        }

        Err(EngineError::Qa(format!(
            "no answer source left for {}",
            problem.id
        )))
    }

    fn record(&mut self, mut problem: Problem, answer: Value) -> Result<Problem, EngineError> {
        if problem.kind == ProblemKind::Password {
            tracing::info!(id = %problem.id, "answered [redacted]");
        } else {
            tracing::info!(id = %problem.id, answer = ?answer, "answered");
        }

        self.cache.insert(problem.id.clone(), answer.clone());
        let persist = problem.kind != ProblemKind::Password || self.persist_passwords;
        if persist {
            set_path(&mut self.resolved, &split_key(&problem.id), answer.clone());
        }
        self.write_outputs()?;

        problem.answer = Some(answer);
        Ok(problem)
    }

    /// Write-through persistence of the cache and resolved config.
    fn write_outputs(&self) -> Result<(), EngineError> {
        if let Some(path) = &self.cache_out {
            let mut persisted = Value::Mapping(Mapping::new());
            for (id, answer) in &self.cache {
                if self.password_ids.contains(id) && !self.persist_passwords {
                    continue;
                }
                set_path(&mut persisted, &split_key(id), answer.clone());
            }
            crate::types::write_yaml(path, &persisted)?;
        }
        if let Some(path) = &self.config_out {
            crate::types::write_yaml(path, &self.resolved)?;
        }
        Ok(())
    }
}

fn run_validators(
    problem: &Problem,
    extra: Option<&dyn Fn(&Value) -> Result<(), String>>,
    answer: &Value,
) -> Result<(), String> {
    if let Some(validator) = &problem.validator {
        validator.validate(answer)?;
    }
    if let Some(validator) = extra {
        validator(answer)?;
    }
    Ok(())
}

/// Descends a YAML mapping along key segments.
fn lookup_path<'a>(store: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut current = store;
    for segment in segments {
        current = current
            .as_mapping()?
            .get(Value::String(segment.clone()))?;
    }
    Some(current)
}

/// Sets a nested key, creating intermediate mappings.
fn set_path(store: &mut Value, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *store = value;
        return;
    };
    if !matches!(store, Value::Mapping(_)) {
        *store = Value::Mapping(Mapping::new());
    }
    let mapping = store.as_mapping_mut().expect("just ensured a mapping");
    let key = Value::String(head.clone());
    if !mapping.contains_key(&key) {
        mapping.insert(key.clone(), Value::Mapping(Mapping::new()));
    }
    let child = mapping.get_mut(&key).expect("just inserted");
    set_path(child, rest, value);
}

/// Normalises a raw answer to the problem's expected shape and checks
/// option membership.
fn coerce_answer(problem: &Problem, raw: Value) -> Result<Value, EngineError> {
    match problem.kind {
        ProblemKind::Confirm => match raw {
            Value::Bool(_) => Ok(raw),
            Value::String(s) => s.parse::<bool>().map(Value::Bool).map_err(|_| {
                EngineError::Qa(format!(
                    "expected a boolean answer for {}, got {s:?}",
                    problem.id
                ))
            }),
            other => Err(EngineError::Qa(format!(
                "expected a boolean answer for {}, got {other:?}",
                problem.id
            ))),
        },
        ProblemKind::MultiSelect => {
            let items = match raw {
                Value::Sequence(items) => items,
                Value::String(s) => vec![Value::String(s)],
                other => {
                    return Err(EngineError::Qa(format!(
                        "expected a list answer for {}, got {other:?}",
                        problem.id
                    )));
                }
            };
            let mut answers = Vec::with_capacity(items.len());
            for item in items {
                let s = scalar_to_string(&item).ok_or_else(|| {
                    EngineError::Qa(format!("non-scalar entry in answer for {}", problem.id))
                })?;
                check_option(problem, &s)?;
                answers.push(Value::String(s));
            }
            Ok(Value::Sequence(answers))
        }
        ProblemKind::Select => {
            let s = scalar_to_string(&raw).ok_or_else(|| {
                EngineError::Qa(format!("expected a scalar answer for {}", problem.id))
            })?;
            check_option(problem, &s)?;
            Ok(Value::String(s))
        }
        ProblemKind::Input | ProblemKind::Password | ProblemKind::Multiline => {
            let s = scalar_to_string(&raw).ok_or_else(|| {
                EngineError::Qa(format!("expected a scalar answer for {}", problem.id))
            })?;
            Ok(Value::String(s))
        }
    }
}

fn check_option(problem: &Problem, answer: &str) -> Result<(), EngineError> {
    if !problem.options.is_empty() && !problem.options.iter().any(|o| o == answer) {
        return Err(EngineError::Qa(format!(
            "answer {answer:?} for {} is not one of the options {:?}",
            problem.id, problem.options
        )));
    }
    Ok(())
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qa::Validator;

    fn skipping_with(overrides: Vec<&str>) -> QaEngine {
        QaEngine::new(QaOptions {
            overrides: overrides.into_iter().map(String::from).collect(),
            skip: true,
            disable_console: true,
            ..QaOptions::default()
        })
        .unwrap()
    }

    #[test]
    fn skip_mode_answers_from_default() {
        let mut engine = QaEngine::skipping();
        let problem = Problem::new("svc.port", ProblemKind::Input)
            .with_default(Value::String("8080".into()));
        let resolved = engine.fetch_answer(problem).unwrap();
        assert_eq!(resolved.answer, Some(Value::String("8080".into())));
    }

    #[test]
    fn skip_mode_without_default_is_fatal() {
        let mut engine = QaEngine::skipping();
        let err = engine
            .fetch_answer(Problem::new("svc.port", ProblemKind::Input))
            .unwrap_err();
        assert!(matches!(err, EngineError::Qa(_)));
    }

    #[test]
    fn overrides_win_over_defaults() {
        let mut engine = skipping_with(vec!["replat.svc.port=9090"]);
        let problem = Problem::new("svc.port", ProblemKind::Input)
            .with_default(Value::String("8080".into()));
        let resolved = engine.fetch_answer(problem).unwrap();
        assert_eq!(resolved.answer, Some(Value::String("9090".into())));
    }

    #[test]
    fn cache_hit_returns_previous_answer_for_normalised_id() {
        let mut engine = skipping_with(vec!["replat.flag=true"]);
        let first = engine
            .fetch_answer(Problem::new("replat.flag", ProblemKind::Confirm))
            .unwrap();
        assert_eq!(first.answer, Some(Value::Bool(true)));

        // Same id without the root prefix resolves from the cache, even
        // though no prompt source is configured any more.
        let second = engine
            .fetch_answer(Problem::new("flag", ProblemKind::Confirm))
            .unwrap();
        assert_eq!(second.answer, Some(Value::Bool(true)));
    }

    #[test]
    fn select_answers_must_be_a_listed_option() {
        let mut engine = skipping_with(vec!["replat.tier=gold"]);
        let problem = Problem::new("tier", ProblemKind::Select)
            .with_options(vec!["bronze".into(), "silver".into()]);
        let err = engine.fetch_answer(problem).unwrap_err();
        assert!(err.to_string().contains("not one of the options"));
    }

    #[test]
    fn multiselect_round_trips_string_lists() {
        let mut engine = skipping_with(vec![]);
        let problem = Problem::new("ports", ProblemKind::MultiSelect)
            .with_options(vec!["80".into(), "443".into(), "8080".into()])
            .with_default(serde_yaml::from_str("[80, 443]").unwrap());
        let resolved = engine.fetch_answer(problem).unwrap();
        assert_eq!(
            resolved.answer,
            Some(Value::Sequence(vec![
                Value::String("80".into()),
                Value::String("443".into())
            ]))
        );
    }

    #[test]
    fn failing_validator_is_fatal_in_skip_mode() {
        let mut engine = QaEngine::skipping();
        let problem = Problem::new("name", ProblemKind::Input)
            .with_default(Value::String("UPPER".into()))
            .with_validator(Validator::new(|v| match v {
                Value::String(s) if s.chars().all(|c| c.is_lowercase()) => Ok(()),
                _ => Err("must be lowercase".into()),
            }));
        let err = engine.fetch_answer(problem).unwrap_err();
        assert!(err.to_string().contains("must be lowercase"));
    }

    #[test]
    fn passwords_are_left_out_of_persisted_cache_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let cache_out = dir.path().join("cache.yaml");
        let mut engine = QaEngine::new(QaOptions {
            overrides: vec!["replat.secret=hunter2".into(), "replat.user=adm".into()],
            skip: true,
            disable_console: true,
            cache_out: Some(cache_out.clone()),
            ..QaOptions::default()
        })
        .unwrap();

        engine
            .fetch_answer(Problem::new("secret", ProblemKind::Password))
            .unwrap();
        engine
            .fetch_answer(Problem::new("user", ProblemKind::Input))
            .unwrap();

        let persisted = std::fs::read_to_string(&cache_out).unwrap();
        assert!(persisted.contains("user"));
        assert!(!persisted.contains("hunter2"));
    }
}
