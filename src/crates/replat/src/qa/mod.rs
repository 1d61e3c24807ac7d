//! Question-and-answer engine.
//!
//! Transformers raise [`Problem`]s; the engine resolves them against the
//! cache, preset bundles, command-line overrides, config files, and finally
//! an interactive prompt (console or remote). Every resolution is written
//! through to the cache, making answers stable for the rest of the run.

use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

pub mod console;
pub mod engine;
pub mod remote;

pub use engine::{QaEngine, QaOptions, SharedQaEngine};

/// Root key every problem id is normalised under.
pub const BASE_KEY: &str = "replat";

/// Delimiter between problem id segments.
pub const KEY_DELIMITER: char = '.';

/// Joins id segments with the key delimiter.
pub fn join_keys(segments: &[&str]) -> String {
    segments.join(&KEY_DELIMITER.to_string())
}

/// Rewrites an id not rooted at [`BASE_KEY`] to `replat.<id>`.
pub fn normalize_key(id: &str) -> String {
    if id == BASE_KEY || id.starts_with(&format!("{BASE_KEY}{KEY_DELIMITER}")) {
        id.to_string()
    } else {
        format!("{BASE_KEY}{KEY_DELIMITER}{id}")
    }
}

/// Splits a dot-delimited key, keeping quoted segments intact and stripping
/// one layer of quotes. `a."b.c".d` yields `["a", "b.c", "d"]`.
pub fn split_key(id: &str) -> Vec<String> {
    use std::sync::OnceLock;
    static SEGMENT_REGEX: OnceLock<regex::Regex> = OnceLock::new();
    let re = SEGMENT_REGEX.get_or_init(|| {
        regex::Regex::new(r#"[^."']+|"[^"]*"|'[^']*'"#).expect("segment regex is valid")
    });
    re.find_iter(id)
        .map(|m| {
            let s = m.as_str();
            if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
                || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
            {
                s[1..s.len() - 1].to_string()
            } else {
                s.to_string()
            }
        })
        .collect()
}

/// The shape of the expected answer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProblemKind {
    #[default]
    Input,
    Select,
    MultiSelect,
    Confirm,
    Password,
    Multiline,
}

/// Host-side answer predicate. Never serialised; wrapped so [`Problem`]
/// stays `Clone` and `Debug`.
#[derive(Clone)]
pub struct Validator(Rc<dyn Fn(&Value) -> Result<(), String>>);

impl Validator {
    pub fn new(check: impl Fn(&Value) -> Result<(), String> + 'static) -> Self {
        Self(Rc::new(check))
    }

    pub fn validate(&self, answer: &Value) -> Result<(), String> {
        (self.0)(answer)
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Validator(..)")
    }
}

/// A question issued to the QA engine.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: ProblemKind,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<Value>,
    #[serde(skip)]
    pub validator: Option<Validator>,
}

impl Problem {
    pub fn new(id: impl Into<String>, kind: ProblemKind) -> Self {
        Self {
            id: normalize_key(&id.into()),
            kind,
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// The description shown to the user, falling back to the id.
    pub fn prompt_text(&self) -> &str {
        if self.description.is_empty() {
            &self.id
        } else {
            &self.description
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_key_prefixes_unrooted_ids() {
        assert_eq!(normalize_key("b"), "replat.b");
        assert_eq!(normalize_key("replat.b"), "replat.b");
        assert_eq!(normalize_key("replat"), "replat");
        assert_eq!(normalize_key("replatform.b"), "replat.replatform.b");
    }

    #[test]
    fn split_key_honours_quoted_segments() {
        assert_eq!(split_key("a.b.c"), vec!["a", "b", "c"]);
        assert_eq!(
            split_key(r#"a."b.c".d"#),
            vec!["a".to_string(), "b.c".to_string(), "d".to_string()]
        );
        assert_eq!(split_key("a.'x.y'"), vec!["a".to_string(), "x.y".to_string()]);
    }

    #[test]
    fn problem_kind_serde_names_are_lowercase() {
        let kind: ProblemKind = serde_yaml::from_str("multiselect").unwrap();
        assert_eq!(kind, ProblemKind::MultiSelect);
        assert_eq!(serde_yaml::to_string(&ProblemKind::Confirm).unwrap().trim(), "confirm");
    }

    #[test]
    fn problem_new_normalises_its_id() {
        let problem = Problem::new("services.web.port", ProblemKind::Input);
        assert_eq!(problem.id, "replat.services.web.port");
    }
}
