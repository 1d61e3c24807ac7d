use serde_yaml::Value;

use crate::error::EngineError;
use crate::qa::engine::Prompt;
use crate::qa::{Problem, ProblemKind};

/// Interactive console prompt backed by `dialoguer`.
pub struct ConsolePrompt;

impl ConsolePrompt {
    fn default_string(problem: &Problem) -> Option<String> {
        match problem.default.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn default_list(problem: &Problem) -> Vec<String> {
        match problem.default.as_ref() {
            Some(Value::Sequence(items)) => items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl Prompt for ConsolePrompt {
    fn ask(&mut self, problem: &Problem) -> Result<Value, EngineError> {
        for hint in &problem.hints {
            eprintln!("hint: {hint}");
        }
        let text = problem.prompt_text().to_string();

        let answer = match problem.kind {
            ProblemKind::Input => {
                let mut input = dialoguer::Input::<String>::new().with_prompt(text);
                if let Some(default) = Self::default_string(problem) {
                    input = input.default(default);
                }
                Value::String(input.interact_text().map_err(prompt_err)?)
            }
            ProblemKind::Select => {
                let default_index = Self::default_string(problem)
                    .and_then(|d| problem.options.iter().position(|o| *o == d))
                    .unwrap_or(0);
                let index = dialoguer::Select::new()
                    .with_prompt(text)
                    .items(&problem.options)
                    .default(default_index)
                    .interact()
                    .map_err(prompt_err)?;
                Value::String(problem.options[index].clone())
            }
            ProblemKind::MultiSelect => {
                let defaults = Self::default_list(problem);
                let checked: Vec<bool> = problem
                    .options
                    .iter()
                    .map(|o| defaults.contains(o))
                    .collect();
                let indices = dialoguer::MultiSelect::new()
                    .with_prompt(text)
                    .items(&problem.options)
                    .defaults(&checked)
                    .interact()
                    .map_err(prompt_err)?;
                Value::Sequence(
                    indices
                        .into_iter()
                        .map(|i| Value::String(problem.options[i].clone()))
                        .collect(),
                )
            }
            ProblemKind::Confirm => {
                let default = matches!(problem.default, Some(Value::Bool(true)));
                let confirmed = dialoguer::Confirm::new()
                    .with_prompt(text)
                    .default(default)
                    .interact()
                    .map_err(prompt_err)?;
                Value::Bool(confirmed)
            }
            ProblemKind::Password => {
                let secret = dialoguer::Password::new()
                    .with_prompt(text)
                    .interact()
                    .map_err(prompt_err)?;
                Value::String(secret)
            }
            ProblemKind::Multiline => {
                let initial = Self::default_string(problem).unwrap_or_default();
                let edited = dialoguer::Editor::new()
                    .edit(&initial)
                    .map_err(prompt_err)?
                    .unwrap_or(initial);
                Value::String(edited)
            }
        };
        Ok(answer)
    }
}

fn prompt_err(err: dialoguer::Error) -> EngineError {
    EngineError::Qa(format!("failed to read the answer: {err}"))
}
