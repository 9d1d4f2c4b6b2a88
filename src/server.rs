//! HTTP API over the engine.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/ai/query` | Answer a query, return the full response |
//! | `POST` | `/api/ai/query/stream` | Answer a query as server-sent events |
//! | `POST` | `/api/ai/deepsearch` | Structured research report |
//! | `POST` | `/api/ai/deepsearch/stream` | Report as server-sent events |
//! | `GET`  | `/api/ai/modes` | Mode catalogue |
//! | `GET`  | `/api/ai/models` | Registered models |
//! | `POST` | `/api/ai/models/{id}/health` | Probe a model's provider |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Each SSE message is named after the event type and carries the event's
//! JSON as data. Closing the connection cancels the request.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "invalid request: query text is empty" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request` | 400 |
//! | `not_found` | 404 |
//! | `timeout` | 408 |
//! | `search_failed`, `fetch_failed`, `llm_error` | 502 |
//! | `no_provider`, `no_model` | 503 |
//! | anything else | 500 |

use std::convert::Infallible;

use answer_engine_core::models::{
    DeepSearchResponse, ModeInfo, Query, Response as AnswerResponse,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::engine::Engine;
use crate::error::EngineError;
use crate::events::StreamEvent;
use crate::registry::ModelInfo;

#[derive(Clone)]
struct AppState {
    engine: Engine,
}

pub fn router(engine: Engine) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/ai/query", post(handle_query))
        .route("/api/ai/query/stream", post(handle_query_stream))
        .route("/api/ai/deepsearch", post(handle_deepsearch))
        .route("/api/ai/deepsearch/stream", post(handle_deepsearch_stream))
        .route("/api/ai/modes", get(handle_modes))
        .route("/api/ai/models", get(handle_models))
        .route("/api/ai/models/{id}/health", post(handle_model_health))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { engine })
}

/// Serve until the process is terminated.
pub async fn run_server(engine: Engine) -> anyhow::Result<()> {
    let bind_addr = engine.config().server.bind.clone();
    let app = router(engine);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(bind = %bind_addr, "server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
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

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            EngineError::UnknownModel(_) => StatusCode::NOT_FOUND,
            EngineError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            EngineError::SearchFailed(_)
            | EngineError::FetchFailed { .. }
            | EngineError::Llm(_) => StatusCode::BAD_GATEWAY,
            EngineError::NoProviderAvailable { .. } | EngineError::NoModelAvailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Treat an empty session id as absent.
fn normalize(mut query: Query) -> Query {
    query.session_id = query.session_id.filter(|s| !s.trim().is_empty());
    query.model_id = query.model_id.filter(|s| !s.trim().is_empty());
    query
}

fn sse<S>(events: S) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = StreamEvent> + Send + 'static,
{
    let stream = events.map(|ev| {
        let data = match serde_json::to_string(&ev) {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode stream event");
                "{}".to_string()
            }
        };
        Ok::<_, Infallible>(Event::default().event(ev.name()).data(data))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
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

// ============ Queries ============

async fn handle_query(
    State(state): State<AppState>,
    Json(query): Json<Query>,
) -> Result<Json<AnswerResponse>, AppError> {
    let response = state.engine.process(normalize(query)).await?;
    Ok(Json(response))
}

async fn handle_query_stream(
    State(state): State<AppState>,
    Json(query): Json<Query>,
) -> Result<impl IntoResponse, AppError> {
    let events = state.engine.process_stream(normalize(query))?;
    Ok(sse(events))
}

async fn handle_deepsearch(
    State(state): State<AppState>,
    Json(query): Json<Query>,
) -> Result<Json<DeepSearchResponse>, AppError> {
    let response = state.engine.process_deep_search(normalize(query)).await?;
    Ok(Json(response))
}

async fn handle_deepsearch_stream(
    State(state): State<AppState>,
    Json(query): Json<Query>,
) -> Result<impl IntoResponse, AppError> {
    let events = state.engine.process_deep_search_stream(normalize(query))?;
    Ok(sse(events))
}

// ============ Catalogue ============

#[derive(Serialize)]
struct ModesResponse {
    modes: Vec<ModeInfo>,
}

async fn handle_modes(State(state): State<AppState>) -> Json<ModesResponse> {
    Json(ModesResponse {
        modes: state.engine.list_modes(),
    })
}

#[derive(Serialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

async fn handle_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: state.engine.registry().list_models(),
    })
}

#[derive(Serialize)]
struct HealthCheckResponse {
    id: String,
    healthy: bool,
}

async fn handle_model_health(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<HealthCheckResponse>, AppError> {
    let healthy = state.engine.registry().check_health(&id).await?;
    Ok(Json(HealthCheckResponse { id, healthy }))
}
