use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Kubernetes-style label selector used to pick transformers.
///
/// An empty selector matches every label set. `match_labels` entries are
/// exact-equality requirements; `match_expressions` cover the set-based
/// operators.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LabelSelector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: SelectorOperator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl LabelSelector {
    /// Selector that matches everything.
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    /// Equality requirement on a single label.
    pub fn for_label(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut match_labels = BTreeMap::new();
        match_labels.insert(key.into(), value.into());
        Self {
            match_labels,
            match_expressions: Vec::new(),
        }
    }

    /// Parses the requirement syntax accepted on the command line:
    /// a comma-separated list of `k=v`, `k==v`, `k!=v`, `k` (exists) and
    /// `!k` (does not exist) terms. An empty string yields the
    /// match-everything selector.
    pub fn parse(selector: &str) -> Result<Self, EngineError> {
        let mut parsed = Self::default();
        for term in selector.split(',') {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            if let Some((key, value)) = term.split_once("!=") {
                parsed.match_expressions.push(LabelSelectorRequirement {
                    key: key.trim().to_string(),
                    operator: SelectorOperator::NotIn,
                    values: vec![value.trim().to_string()],
                });
            } else if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
                parsed
                    .match_labels
                    .insert(key.trim().to_string(), value.trim().to_string());
            } else if let Some(key) = term.strip_prefix('!') {
                parsed.match_expressions.push(LabelSelectorRequirement {
                    key: key.trim().to_string(),
                    operator: SelectorOperator::DoesNotExist,
                    values: Vec::new(),
                });
            } else {
                parsed.match_expressions.push(LabelSelectorRequirement {
                    key: term.to_string(),
                    operator: SelectorOperator::Exists,
                    values: Vec::new(),
                });
            }
        }
        for req in &parsed.match_expressions {
            if req.key.is_empty() {
                return Err(EngineError::Descriptor(format!(
                    "invalid selector term in {selector:?}: empty label key"
                )));
            }
        }
        Ok(parsed)
    }

    /// Returns true when the label set satisfies every requirement.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        for (key, value) in &self.match_labels {
            if labels.get(key) != Some(value) {
                return false;
            }
        }
        for req in &self.match_expressions {
            let found = labels.get(&req.key);
            let ok = match req.operator {
                SelectorOperator::In => found.is_some_and(|v| req.values.contains(v)),
                SelectorOperator::NotIn => !found.is_some_and(|v| req.values.contains(v)),
                SelectorOperator::Exists => found.is_some(),
                SelectorOperator::DoesNotExist => found.is_none(),
            };
            if !ok {
                return false;
            }
        }
        true
    }
}
