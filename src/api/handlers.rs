use axum::{body::Bytes, extract::State};
use utoipa::OpenApi;

use crate::{handler::Handler, reading::SensorReading};

// ---------------------------------------------------------------------------
// Push endpoint
// ---------------------------------------------------------------------------

/// Receive one Pub/Sub push delivery.
///
/// The body is read raw so that malformed envelopes reach the handler's own
/// error path instead of an extractor rejection. Always answers `200 OK`.
#[utoipa::path(
    post,
    path = "/",
    request_body(
        content = String,
        description = "Pub/Sub push envelope; `message.data` is base64 of a JSON sensor payload",
        content_type = "application/json"
    ),
    responses(
        (status = 200, description = "Event acknowledged", body = String, content_type = "text/plain"),
    ),
    tag = "ingest"
)]
pub async fn receive_push(State(handler): State<Handler>, body: Bytes) -> &'static str {
    handler.handle(&body).await
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
    tag = "system"
)]
pub async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// OpenAPI spec
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(receive_push, health),
    components(schemas(SensorReading)),
    tags(
        (name = "ingest", description = "Sensor event ingestion"),
        (name = "system", description = "System endpoints"),
    ),
    info(
        title = "Soil Sensor Ingest",
        version = "0.1.0",
        description = "Pub/Sub push receiver that streams soil sensor readings into BigQuery"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
