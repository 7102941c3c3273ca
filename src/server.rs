//! HTTP server for indexing, retrieval, and generation.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/documents` | Batch-index JSON documents |
//! | `POST` | `/search` | Search the index |
//! | `POST` | `/generate` | Run a course workflow to completion |
//! | `POST` | `/generate/stream` | Run a course workflow as server-sent events |
//! | `GET`  | `/threads` | List workflow thread ids |
//! | `GET`  | `/threads/{id}` | Workflow state snapshot |
//! | `DELETE` | `/threads/{id}` | Cancel a workflow |
//! | `GET`  | `/threads/{id}/export?format=csv` | Completed course as json, csv, markdown, or html |
//! | `POST` | `/strategy` | Synthesize a strategy proposal |
//! | `GET`  | `/health` | Index stats, thread count, providers |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "title must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `cancelled` (409),
//! `upstream_error` (502), `providers_exhausted` (503), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use coursewright_core::models::{
    BatchReport, Course, GenerationParameters, Metadata, NewDocument, SearchOptions, SearchResult,
    WorkflowState,
};
use coursewright_core::Error;

use crate::app::App;
use crate::export::{render_course, ExportFormat};
use crate::stats::{collect_stats, Stats};
use crate::strategy::{StrategyOutcome, StrategyParameters};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Start the server on `[server] bind` and run until the process exits.
pub async fn run_server(app: Arc<App>) -> anyhow::Result<()> {
    let bind_addr = app.config.server.bind.clone();
    let _sweeper = app.engine.spawn_sweeper(SWEEP_INTERVAL);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "server listening");
    println!("Coursewright server listening on http://{}", bind_addr);

    axum::serve(listener, router(app)).await?;
    Ok(())
}

/// All routes with CORS applied.
pub fn router(app: Arc<App>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/documents", post(handle_index_documents))
        .route("/search", post(handle_search))
        .route("/generate", post(handle_generate))
        .route("/generate/stream", post(handle_generate_stream))
        .route("/threads", get(handle_list_threads))
        .route(
            "/threads/{id}",
            get(handle_thread_status).delete(handle_cancel_thread),
        )
        .route("/threads/{id}/export", get(handle_export_thread))
        .route("/strategy", post(handle_strategy))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(app)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
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
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err {
            Error::Validation(_) => AppError::new(StatusCode::BAD_REQUEST, "bad_request", message),
            Error::NotFound(_) => AppError::new(StatusCode::NOT_FOUND, "not_found", message),
            Error::Cancelled(_) => AppError::new(StatusCode::CONFLICT, "cancelled", message),
            Error::Transport { .. } | Error::Parse { .. } => {
                AppError::new(StatusCode::BAD_GATEWAY, "upstream_error", message)
            }
            Error::Exhausted { .. } => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, "providers_exhausted", message)
            }
            Error::Store(_) | Error::Config(_) => {
                error!(error = %message, "internal error");
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        error!(error = %err, "internal error");
        AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", err.to_string())
    }
}

type AppResult<T> = Result<Json<T>, AppError>;

// ============ POST /documents ============

#[derive(Deserialize)]
struct IndexRequest {
    documents: Vec<NewDocument>,
}

async fn handle_index_documents(
    State(app): State<Arc<App>>,
    Json(req): Json<IndexRequest>,
) -> AppResult<BatchReport> {
    Ok(Json(app.index.batch_index(req.documents).await))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    threshold: Option<f64>,
    #[serde(default)]
    filter: Metadata,
}

fn default_limit() -> usize {
    5
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

async fn handle_search(
    State(app): State<Arc<App>>,
    Json(req): Json<SearchRequest>,
) -> AppResult<SearchResponse> {
    let options = SearchOptions {
        threshold: req.threshold,
        filter: req.filter,
    };
    let results = app.index.search(&req.query, req.limit, &options).await?;
    Ok(Json(SearchResponse { results }))
}

// ============ POST /generate, /generate/stream ============

#[derive(Deserialize)]
struct GenerateRequest {
    #[serde(flatten)]
    parameters: GenerationParameters,
    #[serde(default)]
    thread_id: Option<String>,
}

async fn handle_generate(
    State(app): State<Arc<App>>,
    Json(req): Json<GenerateRequest>,
) -> AppResult<Course> {
    let course = app.engine.run(req.parameters, req.thread_id).await?;
    Ok(Json(course))
}

async fn handle_generate_stream(
    State(app): State<Arc<App>>,
    Json(req): Json<GenerateRequest>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let events = app.engine.stream(req.parameters, req.thread_id).map(|ev| {
        let name = if ev.is_error() { "error" } else { ev.step.as_str() };
        Event::default().event(name).json_data(&ev)
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

// ============ /threads ============

async fn handle_list_threads(State(app): State<Arc<App>>) -> AppResult<Value> {
    Ok(Json(json!({ "threads": app.engine.list()? })))
}

async fn handle_thread_status(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
) -> AppResult<WorkflowState> {
    Ok(Json(app.engine.status(&id)?))
}

async fn handle_cancel_thread(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
) -> AppResult<Value> {
    let cancelled = app.engine.cancel(&id)?;
    Ok(Json(json!({ "thread_id": id, "cancelled": cancelled })))
}

#[derive(Deserialize)]
struct ExportQuery {
    #[serde(default)]
    format: ExportFormat,
}

async fn handle_export_thread(
    State(app): State<Arc<App>>,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, AppError> {
    let state = app.engine.status(&id)?;
    let course = match (&state.content_output, state.is_completed()) {
        (Some(course), true) => course,
        _ => return Err(Error::validation(format!("thread {id} has not completed")).into()),
    };
    let body = render_course(course, query.format)?;
    Ok(([(header::CONTENT_TYPE, query.format.content_type())], body).into_response())
}

// ============ POST /strategy ============

async fn handle_strategy(
    State(app): State<Arc<App>>,
    Json(params): Json<StrategyParameters>,
) -> AppResult<StrategyOutcome> {
    Ok(Json(app.strategy.synthesize(&params).await?))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    #[serde(flatten)]
    stats: Stats,
}

async fn handle_health(State(app): State<Arc<App>>) -> AppResult<HealthResponse> {
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        stats: collect_stats(&app).await?,
    }))
}
