use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use parley_engine::CommandSessionManager;
use parley_telemetry::TelemetryGuard;

use crate::handlers;
use crate::replies::ReplyService;

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 9091,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub commands: Arc<CommandSessionManager>,
    pub replies: Arc<ReplyService>,
    pub telemetry: Option<Arc<TelemetryGuard>>,
    /// Default cwd for commands started over HTTP.
    pub working_directory: PathBuf,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/commands",
            get(handlers::list_commands).post(handlers::start_command),
        )
        .route("/commands/{id}", get(handlers::command_status))
        .route("/commands/{id}/input", post(handlers::command_input))
        .route("/chats/{chat_id}/reply", post(handlers::submit_reply))
        .route("/chats/{chat_id}/stop", post(handlers::stop_replies))
        .route("/events", get(handlers::events))
        .route("/admin/log-level", post(handlers::set_log_level))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve. Returns once the listener is up.
pub async fn start(config: ServerConfig, state: AppState) -> Result<ServerHandle, std::io::Error> {
    let replies = Arc::clone(&state.replies);
    let router = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "parley server started");

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await;
        if let Err(e) = served {
            tracing::error!(error = %e, "server terminated");
        }
    });

    Ok(ServerHandle {
        addr: local_addr,
        shutdown,
        replies,
        server,
    })
}

/// Handle returned by `start()`; keeps the serve task alive.
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: CancellationToken,
    replies: Arc<ReplyService>,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stop accepting requests, cancel running replies and wait for the
    /// serve task to finish.
    pub async fn shutdown(self) {
        let aborted = self.replies.abort_all();
        if aborted > 0 {
            tracing::info!(aborted, "cancelled running replies");
        }
        self.shutdown.cancel();
        if let Err(e) = self.server.await {
            tracing::warn!(error = %e, "server task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_engine::{OrchestratorConfig, ToolRegistry, TurnOrchestrator};
    use parley_llm::mock::MockBackend;

    fn state() -> AppState {
        let orchestrator = TurnOrchestrator::new(
            Arc::new(MockBackend::new(vec![])),
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

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };
        let handle = start(config, state()).await.unwrap();
        assert!(handle.port() > 0);

        let url = format!("http://{}/health", handle.addr);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");

        handle.shutdown().await;
        assert!(reqwest::get(&url).await.is_err());
    }
}
