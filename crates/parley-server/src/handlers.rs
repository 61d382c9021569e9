use std::convert::Infallible;
use std::path::PathBuf;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::Level;

use parley_core::ids::ChatId;
use parley_engine::commands::{
    parse_command_id, CommandRequest, CommandSnapshot, SendInput, StatusQuery,
};

use crate::error::ApiError;
use crate::replies::{ReplyAccepted, ReplyParams};
use crate::server::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "active_replies": state.replies.active_count(),
        "commands": state.commands.len(),
    }))
}

pub async fn list_commands(State(state): State<AppState>) -> Json<Vec<CommandSnapshot>> {
    Json(state.commands.list())
}

#[derive(Debug, Deserialize)]
pub struct StartCommandBody {
    pub command: String,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub wait_ms: Option<u64>,
}

pub async fn start_command(
    State(state): State<AppState>,
    Json(body): Json<StartCommandBody>,
) -> Result<(StatusCode, Json<CommandSnapshot>), ApiError> {
    let cwd = body.cwd.unwrap_or_else(|| state.working_directory.clone());
    let mut request = CommandRequest::new(body.command, cwd);
    if let Some(name) = body.name {
        request = request.with_name(name);
    }
    if let Some(ms) = body.wait_ms {
        request = request.with_grace(Duration::from_millis(ms));
    }
    let snapshot = state.commands.start(request).await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusParams {
    /// Seconds to wait for new output or exit.
    pub wait: Option<f64>,
    /// Characters of trailing output to return.
    pub chars: Option<i64>,
}

pub async fn command_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<StatusParams>,
) -> Result<Json<CommandSnapshot>, ApiError> {
    let snapshot = state
        .commands
        .status_snapshot(StatusQuery {
            command_id: id,
            wait_duration_seconds: params.wait,
            output_character_count: params.chars,
        })
        .await?;
    Ok(Json(snapshot))
}

#[derive(Debug, Default, Deserialize)]
pub struct InputBody {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub terminate: bool,
    #[serde(default)]
    pub wait_ms: Option<u64>,
}

pub async fn command_input(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<InputBody>,
) -> Result<Json<CommandSnapshot>, ApiError> {
    let id = parse_command_id(&id)?;
    let snapshot = state
        .commands
        .send_input(
            &id,
            SendInput {
                text: body.text,
                terminate: body.terminate,
                wait: body.wait_ms.map(Duration::from_millis),
            },
        )
        .await?;
    Ok(Json(snapshot))
}

pub async fn submit_reply(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    Json(params): Json<ReplyParams>,
) -> Result<(StatusCode, Json<ReplyAccepted>), ApiError> {
    let chat_id = parse_chat_id(&chat_id)?;
    let accepted = state.replies.submit(chat_id, params);
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

pub async fn stop_replies(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let chat_id = parse_chat_id(&chat_id)?;
    let stopped = state.replies.stop(&chat_id);
    Ok(Json(json!({ "stopped": stopped })))
}

#[derive(Debug, Default, Deserialize)]
pub struct EventParams {
    pub chat_id: Option<String>,
}

/// Server-sent reply events, optionally limited to one chat.
pub async fn events(
    State(state): State<AppState>,
    Query(params): Query<EventParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let chat_filter = params.chat_id.map(ChatId::from_raw);
    let stream = BroadcastStream::new(state.replies.subscribe()).filter_map(move |item| {
        let chat_filter = chat_filter.clone();
        async move {
            match item {
                Ok(event) => {
                    if chat_filter.as_ref().is_some_and(|c| c != event.chat_id()) {
                        return None;
                    }
                    match Event::default().event(event.kind()).json_data(&event) {
                        Ok(sse) => Some(Ok(sse)),
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to encode reply event");
                            None
                        }
                    }
                }
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                    None
                }
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
pub struct LogLevelBody {
    pub module: String,
    pub level: String,
}

pub async fn set_log_level(
    State(state): State<AppState>,
    Json(body): Json<LogLevelBody>,
) -> Result<Json<Value>, ApiError> {
    let telemetry = state
        .telemetry
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("telemetry not initialized".into()))?;
    let level: Level = body
        .level
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("unknown level: {}", body.level)))?;
    telemetry
        .set_module_level(&body.module, level)
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;

    let modules: Vec<Value> = telemetry
        .module_levels()
        .into_iter()
        .map(|(module, level)| json!({ "module": module, "level": level.to_string() }))
        .collect();
    Ok(Json(json!({ "modules": modules })))
}

fn parse_chat_id(raw: &str) -> Result<ChatId, ApiError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ApiError::BadRequest("chat id is required".into()));
    }
    Ok(ChatId::from_raw(raw))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Method, Request};
    use axum::Router;
    use tower::ServiceExt;

    use parley_engine::{
        CommandSessionManager, OrchestratorConfig, ToolRegistry, TurnOrchestrator,
    };
    use parley_llm::mock::{MockBackend, MockRound};

    use super::*;
    use crate::replies::{ReplyEvent, ReplyService};
    use crate::server::build_router;

    fn state(rounds: Vec<MockRound>) -> AppState {
        let orchestrator = TurnOrchestrator::new(
            Arc::new(MockBackend::new(rounds)),
            Arc::new(ToolRegistry::new()),
            OrchestratorConfig::default(),
        );
        AppState {
            commands: Arc::new(CommandSessionManager::default()),
            replies: Arc::new(ReplyService::new(Arc::new(orchestrator))),
            telemetry: None,
            working_directory: std::env::temp_dir(),
        }
    }

    async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// Long-poll until the session leaves running.
    async fn settle(router: &Router, id: &str) -> Value {
        for _ in 0..20 {
            let (status, snapshot) =
                send(router, Method::GET, &format!("/commands/{id}?wait=1&chars=100"), None).await;
            assert_eq!(status, StatusCode::OK);
            if snapshot["status"] != "running" {
                return snapshot;
            }
        }
        panic!("command {id} never finished");
    }

    #[tokio::test]
    async fn health_reports_counts() {
        let router = build_router(state(vec![]));
        let (status, body) = send(&router, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["commands"], 0);
    }

    #[tokio::test]
    async fn command_lifecycle_over_http() {
        let state = state(vec![]);
        let router = build_router(state.clone());

        let (status, started) = send(
            &router,
            Method::POST,
            "/commands",
            Some(json!({"command": "sleep 1 && echo done", "name": "napper", "wait_ms": 100})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(started["status"], "running");
        let id = started["id"].as_str().unwrap().to_string();

        let finished = settle(&router, &id).await;
        assert_eq!(finished["status"], "completed");
        assert_eq!(finished["output"], "done\n");

        let (status, listed) = send(&router, Method::GET, "/commands", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);
        assert_eq!(listed[0]["name"], "napper");
    }

    #[tokio::test]
    async fn status_errors_map_to_http() {
        let router = build_router(state(vec![]));

        let (status, body) = send(&router, Method::GET, "/commands/cmd_missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("cmd_missing"));

        let (status, _) = send(&router, Method::GET, "/commands/cmd_missing?wait=-1", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&router, Method::GET, "/commands/bad%20id", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn input_reaches_the_process() {
        let router = build_router(state(vec![]));
        let (_, started) = send(
            &router,
            Method::POST,
            "/commands",
            Some(json!({"command": "read line; echo got $line", "wait_ms": 50})),
        )
        .await;
        let id = started["id"].as_str().unwrap().to_string();

        let (status, _) = send(
            &router,
            Method::POST,
            &format!("/commands/{id}/input"),
            Some(json!({"text": "hello\n", "wait_ms": 2000})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let finished = settle(&router, &id).await;
        assert_eq!(finished["status"], "completed");
        assert_eq!(finished["output"], "got hello\n");
    }

    #[tokio::test]
    async fn reply_is_accepted_and_completes() {
        let state = state(vec![MockRound::text_chunks(&["Hello", " world"])]);
        let mut rx = state.replies.subscribe();
        let router = build_router(state);

        let (status, accepted) = send(
            &router,
            Method::POST,
            "/chats/chat_1/reply",
            Some(json!({"text": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(accepted["chat_id"], "chat_1");

        let outcome = loop {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Ok(ReplyEvent::Complete { outcome, .. })) => break outcome,
                Ok(Ok(_)) => continue,
                other => panic!("no completion: {other:?}"),
            }
        };
        assert_eq!(outcome.text, "Hello world");

        let (status, body) = send(&router, Method::POST, "/chats/chat_1/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stopped"], 0);
    }

    #[tokio::test]
    async fn log_level_needs_telemetry() {
        let router = build_router(state(vec![]));
        let (status, _) = send(
            &router,
            Method::POST,
            "/admin/log-level",
            Some(json!({"module": "parley_engine", "level": "debug"})),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
