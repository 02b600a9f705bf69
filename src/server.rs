//! HTTP server.
//!
//! Exposes ingestion, the file ledger, and the conversational pipeline as a
//! JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/upload` | Ingest a multipart `file` field |
//! | `GET`  | `/files` | Ledger rows, most recent upload first |
//! | `DELETE` | `/files/{fingerprint}` | Remove a file's entries and ledger row |
//! | `POST` | `/chat` | One chat turn; answer plus ordered sources |
//! | `POST` | `/chat/stream` | One chat turn as server-sent events |
//! | `GET`  | `/sessions` | Ids of sessions with history held by this process |
//! | `DELETE` | `/sessions/{session_id}` | Forget a session's history |
//!
//! # Error Contract
//!
//! Every error response has the same shape:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Codes and statuses come from [`RagError::kind`] and [`RagError::status`].
//! A failed chat turn never returns a 200 with a partial answer.
//!
//! # Streaming
//!
//! `/chat/stream` emits a `sources` event (JSON array), then one `token`
//! event per text fragment, then `done`. A failure after the stream has
//! started is sent as an `error` event carrying the same JSON error body.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! front ends.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::app::App;
use crate::config::Config;
use crate::error::RagError;
use crate::ingest::IngestReport;
use crate::models::{FileRecord, SourceRef};
use crate::pipeline::PipelineError;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    app: Arc<App>,
}

/// Starts the HTTP server on `[server].bind` and runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let app = Arc::new(App::open(config).await?);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(addr = %config.server.bind, "server listening");
    serve(listener, app).await
}

/// Serve `app` on an already-bound listener.
pub async fn serve(listener: tokio::net::TcpListener, app: Arc<App>) -> anyhow::Result<()> {
    axum::serve(listener, router(app)).await?;
    Ok(())
}

/// Build the route table.
pub fn router(app: Arc<App>) -> Router {
    let upload_limit = app.config.server.max_upload_bytes;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/upload", post(handle_upload))
        .route("/files", get(handle_list_files))
        .route("/files/{fingerprint}", delete(handle_delete_file))
        .route("/chat", post(handle_chat))
        .route("/chat/stream", post(handle_chat_stream))
        .route("/sessions", get(handle_list_sessions))
        .route("/sessions/{session_id}", delete(handle_clear_session))
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { app })
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl AppError {
    fn body(&self) -> ErrorBody {
        ErrorBody {
            error: ErrorDetail {
                code: self.code.clone(),
                message: self.message.clone(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body())).into_response()
    }
}

impl From<RagError> for AppError {
    fn from(e: RagError) -> Self {
        AppError {
            status: e.status(),
            code: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(e: PipelineError) -> Self {
        AppError {
            status: e.source.status(),
            code: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    RagError::InvalidInput(message.into()).into()
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /upload ============

/// Reads the `file` field and ingests it on a separate task, so the work
/// completes even if the client disconnects.
async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestReport>, AppError> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(|s| s.to_string())
            .ok_or_else(|| bad_request("file field has no file name"))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("failed to read upload: {}", e)))?;
        upload = Some((file_name, bytes.to_vec()));
        break;
    }
    let (file_name, bytes) = upload.ok_or_else(|| bad_request("missing multipart field 'file'"))?;

    tracing::info!(file = %file_name, bytes = bytes.len(), "upload received");
    let ingestor = state.app.ingestor.clone();
    let report = tokio::spawn(async move { ingestor.ingest_bytes(bytes, &file_name).await })
        .await
        .map_err(|e| RagError::IndexWrite(format!("ingestion task failed: {}", e)))??;

    Ok(Json(report))
}

// ============ /files ============

async fn handle_list_files(State(state): State<AppState>) -> Result<Json<Vec<FileRecord>>, AppError> {
    Ok(Json(state.app.index.list_files().await?))
}

#[derive(Serialize)]
struct DeleteResponse {
    status: &'static str,
    fingerprint: String,
}

async fn handle_delete_file(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    if !state.app.index.delete(&fingerprint).await? {
        return Err(RagError::NotFound(format!("no file with fingerprint {}", fingerprint)).into());
    }
    Ok(Json(DeleteResponse {
        status: "deleted",
        fingerprint,
    }))
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    query: String,
    #[serde(default = "default_session_id")]
    session_id: String,
}

fn default_session_id() -> String {
    "default_session".to_string()
}

#[derive(Serialize)]
struct ChatResponse {
    answer: String,
    status: &'static str,
    standalone_question: String,
    sources: Vec<SourceRef>,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let limit = Duration::from_secs(state.app.config.server.chat_timeout_secs);
    let answer = state
        .app
        .pipeline
        .chat_with_timeout(&req.session_id, &req.query, limit)
        .await?;

    Ok(Json(ChatResponse {
        answer: answer.answer,
        status: "success",
        standalone_question: answer.standalone_question,
        sources: answer.sources,
    }))
}

// ============ POST /chat/stream ============

async fn handle_chat_stream(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let limit = Duration::from_secs(state.app.config.server.chat_timeout_secs);
    let started = tokio::time::timeout(
        limit,
        state.app.pipeline.chat_stream(&req.session_id, &req.query),
    )
    .await
    .map_err(|_| AppError::from(RagError::Timeout(limit.as_secs())))??;

    let sources = serde_json::to_string(&started.sources).unwrap_or_else(|_| "[]".to_string());
    let mut tokens = started.tokens;

    let events = async_stream::stream! {
        yield Ok::<_, Infallible>(Event::default().event("sources").data(sources));
        while let Some(item) = tokens.next().await {
            match item {
                Ok(token) => yield Ok(Event::default().event("token").data(token)),
                Err(e) => {
                    tracing::error!(error = %e, "stream failed");
                    let payload = serde_json::to_string(&AppError::from(e).body()).unwrap_or_default();
                    yield Ok(Event::default().event("error").data(payload));
                    return;
                }
            }
        }
        yield Ok(Event::default().event("done").data("[DONE]"));
    };

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

// ============ /sessions ============

#[derive(Serialize)]
struct SessionsResponse {
    sessions: Vec<String>,
}

async fn handle_list_sessions(State(state): State<AppState>) -> Json<SessionsResponse> {
    Json(SessionsResponse {
        sessions: state.app.memory.sessions(),
    })
}

#[derive(Serialize)]
struct ClearResponse {
    status: &'static str,
    session_id: String,
    existed: bool,
}

async fn handle_clear_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<ClearResponse> {
    let existed = state.app.memory.clear(&session_id);
    Json(ClearResponse {
        status: "cleared",
        session_id,
        existed,
    })
}
