// ============================================================================
// HEALTH + PROMETHEUS ENDPOINTS
// ============================================================================

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;

use crate::state::AppState;

/// `/metrics` en formato texto de Prometheus
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response).into_response()
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

/// `/health`: verifica la base de datos a través del store
pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.summary().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "ok": true,
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        ),
        Err(e) => {
            tracing::error!("❌ Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "ok": false, "status": "unhealthy", "error": e.to_string() })),
            )
        }
    }
}
