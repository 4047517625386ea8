//! HTTP API endpoints

use axum::{
    extract::{Form, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_core::storage::{Engine, EngineStats};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

/// Application state
pub type AppState = Arc<Engine>;

/// Create the API router
pub fn create_router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/write", get(write).post(write))
        .route("/stats", get(stats))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct WriteParams {
    name: Option<String>,
    value: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: strata_core::VERSION.to_string(),
    })
}

/// Accepts `name` and `value` from the query string or a form body
async fn write(
    State(engine): State<AppState>,
    Query(query): Query<WriteParams>,
    form: Option<Form<WriteParams>>,
) -> Result<StatusCode, ApiError> {
    let form = form.map(|Form(f)| f).unwrap_or_default();
    let name = form.name.or(query.name).unwrap_or_default();
    let value = form.value.or(query.value).unwrap_or_default();

    let (name, value) = validate_write(name, value)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;

    let result = tokio::task::spawn_blocking(move || engine.write(&name, &value))
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    match result {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(e) => {
            error!("Write failed: {}", e);
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

async fn stats(State(engine): State<AppState>) -> Json<EngineStats> {
    Json(engine.stats())
}

/// Reject an empty name or a value that is not a float.
///
/// The value is stored as the text the client sent.
fn validate_write(name: String, value: String) -> Result<(String, String), String> {
    if name.is_empty() {
        return Err("missing metric name".to_string());
    }
    value
        .parse::<f64>()
        .map_err(|_| format!("invalid value for {}: {:?}", name, value))?;
    Ok((name, value))
}
