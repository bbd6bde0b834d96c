//! HTTP server for provider webhooks and queue batches.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

use crate::consumer::Consumer;
use crate::producer::Producer;
use crate::queue::{BatchEvent, BatchResponse};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub producer: Producer,
    pub consumer: Consumer,
}

/// Build the HTTP router for the bridge.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Provider webhooks
        .route("/webhooks", post(webhook_handler))
        // Batch delivery from an external queue poller
        .route("/queue/batch", post(batch_handler))
        // Health check
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(
            ServiceBuilder::new().layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_response(DefaultOnResponse::new().level(Level::INFO)),
            ),
        )
        .with_state(state)
}

/// Authenticate a webhook and enqueue it.
async fn webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.producer.accept(&headers, &body).await {
        Ok(message_id) => Ok(Json(json!({
            "status": "accepted",
            "message_id": message_id,
        }))),
        Err(e) => Err((
            e.status_code(),
            Json(json!({ "status": "rejected", "error": e.to_string() })),
        )),
    }
}

/// Process a batch and report failed message ids.
async fn batch_handler(
    State(state): State<AppState>,
    Json(batch): Json<BatchEvent>,
) -> Json<BatchResponse> {
    let total = batch.records.len();
    let response = state.consumer.handle_batch(batch).await;
    info!(
        total,
        failed = response.batch_item_failures.len(),
        "Batch processed"
    );
    Json(response)
}

/// Health check endpoint.
async fn health_check() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

/// Readiness check endpoint. State only exists after cold start succeeded.
async fn readiness_check() -> Json<Value> {
    Json(json!({ "status": "ready" }))
}
