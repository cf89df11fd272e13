use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{HeaderName, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use anyhow::Context;
use serde::Deserialize;
use std::sync::Arc;

use tower_http::catch_panic::CatchPanicLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use tracing::info;

use crate::AppState;
use crate::config::AppConfig;
use crate::error::{self, ChatError};
use crate::history::HistoryRegistry;
use crate::llm::{ChatCompletionsDriver, CompletionClient, LlmSettings, Orchestrator};
use crate::store::{HistoryEntry, MessageStore, SqliteMessageStore};
use crate::ui;

/// Directory served under `/static`.
pub const STATIC_DIR: &str = "static";

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Build the application router over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/chat", post(chat))
        .route("/history", get(history))
        .nest_service("/static", ServeDir::new(STATIC_DIR))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CatchPanicLayer::custom(error::handle_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>, settings: LlmSettings) -> anyhow::Result<()> {
    info!(
        name: "llm.config.loaded",
        base_url = %settings.base_url,
        model = %settings.model,
        provider = ?settings.provider,
        "LLM configuration loaded"
    );

    let store = Arc::new(
        SqliteMessageStore::new(&config.database.url, config.database.max_connections)
            .await
            .with_context(|| format!("failed to open message store at {}", config.database.url))?,
    );
    info!(
        name: "store.opened",
        url = %config.database.url,
        max_connections = config.database.max_connections,
        "Message store opened"
    );

    let histories = HistoryRegistry::new();
    let client: Arc<dyn CompletionClient> = Arc::new(ChatCompletionsDriver::new(settings));
    let message_store: Arc<dyn MessageStore> = Arc::clone(&store) as Arc<dyn MessageStore>;

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&message_store),
        histories.clone(),
        client,
        config.chat_options(),
    ));

    let app = router(AppState::new(orchestrator, message_store));

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let sessions = histories.teardown();
    store.close().await;

    info!(
        name: "server.stopped",
        sessions,
        "Server stopped"
    );
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for the chat endpoint.
#[derive(Debug, Deserialize)]
struct ChatRequest {
    /// User message content.
    message: String,
    /// Optional session ID (falls back to the configured default).
    #[serde(default)]
    session_id: Option<String>,
}

/// GET / - The chat page.
async fn index() -> Html<String> {
    Html(ui::chat_page())
}

/// POST /chat - Stream the assistant's reply as plain text.
///
/// The body closes once the reply has been stored.
async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ChatError> {
    let session_id = state
        .orchestrator
        .resolve_session_id(req.session_id.as_deref());

    tracing::debug!(
        session_id = %session_id,
        message_length = req.message.len(),
        "Received chat request"
    );

    let reply = state.orchestrator.handle_chat(req.message, &session_id).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        Body::from_stream(reply),
    )
        .into_response())
}

/// GET /history - Every stored turn, oldest first.
async fn history(State(state): State<AppState>) -> Result<Json<Vec<HistoryEntry>>, ChatError> {
    let turns = state.store.list_all().await?;
    Ok(Json(turns.into_iter().map(HistoryEntry::from).collect()))
}
