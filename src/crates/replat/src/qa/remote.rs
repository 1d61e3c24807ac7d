use std::sync::Arc;
use std::sync::mpsc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::EngineError;
use crate::qa::engine::Prompt;
use crate::qa::{Problem, ProblemKind};

/// Serializable projection of a problem for out-of-process UIs. Validators
/// stay host-side and answers are echoed back through the engine.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProblemView {
    id: String,
    #[serde(rename = "type")]
    kind: ProblemKind,
    description: String,
    hints: Vec<String>,
    options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    default: Option<serde_json::Value>,
}

impl ProblemView {
    fn from_problem(problem: &Problem) -> Self {
        Self {
            id: problem.id.clone(),
            kind: problem.kind,
            description: problem.description.clone(),
            hints: problem.hints.clone(),
            options: problem.options.clone(),
            default: problem
                .default
                .as_ref()
                .and_then(|v| serde_json::to_value(v).ok()),
        }
    }
}

struct RemoteState {
    current: Mutex<Option<ProblemView>>,
    answer_tx: Mutex<mpsc::SyncSender<serde_json::Value>>,
}

/// Prompt served over HTTP for out-of-process UIs.
///
/// `GET /problems/current` returns the pending problem (204 when idle);
/// `POST /problems/current/solution` with `{"answer": ...}` resolves it.
/// The engine asks one question at a time, so at most one problem is ever
/// outstanding.
pub struct RemotePrompt {
    state: Arc<RemoteState>,
    answers: mpsc::Receiver<serde_json::Value>,
}

impl RemotePrompt {
    /// Binds `127.0.0.1:<port>` and serves the endpoint from a dedicated
    /// thread with its own single-threaded runtime.
    pub fn serve(port: u16) -> Result<Self, EngineError> {
        let (answer_tx, answers) = mpsc::sync_channel(1);
        let state = Arc::new(RemoteState {
            current: Mutex::new(None),
            answer_tx: Mutex::new(answer_tx),
        });

        let listener = std::net::TcpListener::bind(("127.0.0.1", port)).map_err(|e| {
            EngineError::Qa(format!("failed to bind the QA endpoint on port {port}: {e}"))
        })?;
        listener.set_nonblocking(true)?;

        let served = state.clone();
        std::thread::Builder::new()
            .name("replat-qa-http".into())
            .spawn(move || serve_blocking(listener, served))?;

        Ok(Self { state, answers })
    }
}

fn serve_blocking(listener: std::net::TcpListener, state: Arc<RemoteState>) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            tracing::error!(error = %err, "failed to start the QA endpoint runtime");
            return;
        }
    };
    runtime.block_on(async move {
        let app = axum::Router::new()
            .route("/problems/current", get(current_problem))
            .route("/problems/current/solution", post(post_solution))
            .with_state(state);
        let listener = match tokio::net::TcpListener::from_std(listener) {
            Ok(l) => l,
            Err(err) => {
                tracing::error!(error = %err, "failed to adopt the QA endpoint listener");
                return;
            }
        };
        if let Err(err) = axum::serve(listener, app).await {
            tracing::error!(error = %err, "the QA endpoint stopped serving");
        }
    });
}

async fn current_problem(State(state): State<Arc<RemoteState>>) -> Response {
    match state.current.lock().clone() {
        Some(problem) => Json(problem).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

#[derive(Deserialize)]
struct Solution {
    answer: serde_json::Value,
}

async fn post_solution(
    State(state): State<Arc<RemoteState>>,
    Json(solution): Json<Solution>,
) -> Response {
    let mut current = state.current.lock();
    if current.is_none() {
        return (StatusCode::NOT_FOUND, "no question is outstanding").into_response();
    }
    *current = None;
    let tx = state.answer_tx.lock().clone();
    if tx.send(solution.answer).is_err() {
        return (StatusCode::GONE, "the engine is no longer listening").into_response();
    }
    StatusCode::NO_CONTENT.into_response()
}

impl Prompt for RemotePrompt {
    fn ask(&mut self, problem: &Problem) -> Result<Value, EngineError> {
        *self.state.current.lock() = Some(ProblemView::from_problem(problem));
        tracing::info!(id = %problem.id, "waiting for an answer on the QA endpoint");

        let raw = self.answers.recv().map_err(|_| {
            EngineError::Qa(format!(
                "the QA endpoint closed before {} was answered",
                problem.id
            ))
        })?;
        // Answers can race a re-published question; always clear.
        *self.state.current.lock() = None;
        serde_yaml::to_value(raw)
            .map_err(|e| EngineError::Qa(format!("unrepresentable remote answer: {e}")))
    }
}
