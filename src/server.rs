//! HTTP surface: LINE webhook, artifact fetch, and the JSON chat/search API.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::relay::line::{SIGNATURE_HEADER, verify_signature};
use crate::relay::{ArtifactCache, ChatCompletion, Dispatcher, Turn, Upstream, UpstreamError, WebhookBatch};

/// Shared state for all handlers.
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub upstream: Arc<dyn Upstream>,
    pub artifacts: ArtifactCache,
    pub channel_secret: String,
    pub default_location: String,
}

#[derive(Debug)]
pub enum ApiError {
    /// Bad signature or malformed request.
    Validation(String),
    Upstream(UpstreamError),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Validation(msg) => write!(f, "Bad request: {msg}"),
            ApiError::Upstream(e) => write!(f, "Upstream error: {e}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::Validation(msg) => {
                warn!("Bad request: {}", msg);
                (StatusCode::BAD_REQUEST, "BadRequest", msg)
            }
            ApiError::Upstream(e) => {
                error!("Upstream error: {}", e);
                (StatusCode::BAD_GATEWAY, "UpstreamError", e.to_string())
            }
        };

        let body = Json(ErrorResponse {
            error: error_type,
            message,
        });

        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ApiResponse {
    response: String,
}

#[derive(Deserialize)]
struct SearchRequest {
    content: String,
    location: Option<String>,
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let api = Router::new()
        .route("/api/grok", post(grok_chat))
        .route("/api/gemini", post(gemini_search))
        .layer(cors);

    Router::new()
        .route("/callback", post(callback))
        .route("/img/{key}", get(fetch_image))
        .route("/health", get(|| async { "ok" }))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Validation("missing signature".into()))?;

    if !verify_signature(&state.channel_secret, &body, signature) {
        return Err(ApiError::Validation("invalid signature".into()));
    }

    let batch: WebhookBatch = serde_json::from_slice(&body)
        .map_err(|e| ApiError::Validation(format!("invalid payload: {e}")))?;

    info!("📨 Webhook with {} event(s)", batch.events.len());
    debug!("Webhook body: {}", String::from_utf8_lossy(&body));

    state.dispatcher.handle_batch(&batch).await;
    Ok(StatusCode::OK)
}

async fn fetch_image(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> Response {
    match state.artifacts.get(&key) {
        Some(artifact) => (
            [(header::CONTENT_TYPE, artifact.content_type)],
            artifact.data.as_ref().clone(),
        )
            .into_response(),
        None => {
            debug!("Artifact {} not found", key);
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// Stateless chat: the turns go to Grok unchanged and the completion comes back whole.
async fn grok_chat(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Json<ChatCompletion>, ApiError> {
    let turns: Vec<Turn> =
        serde_json::from_slice(&body).map_err(|e| ApiError::Validation(format!("invalid JSON: {e}")))?;

    debug!("Chat API request with {} turn(s)", turns.len());

    let completion = state
        .upstream
        .chat_completion(&turns)
        .await
        .map_err(ApiError::Upstream)?;

    Ok(Json(completion))
}

async fn gemini_search(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<ApiResponse>, ApiError> {
    let location = request
        .location
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .unwrap_or(&state.default_location);

    let response = state
        .upstream
        .search(&request.content, location)
        .await
        .map_err(ApiError::Upstream)?;

    Ok(Json(ApiResponse { response }))
}
