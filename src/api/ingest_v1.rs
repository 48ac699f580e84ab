use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};

use crate::api::error_handling::ApiError;
use crate::domains::billing::TicketWrite;
use crate::state::AppState;

// Los cuerpos se reciben como JSON libre: la validación fila por fila
// vive en el dominio de ingesta.

/// POST /api/ingest/ticket
pub async fn ingest_ticket(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = payload?;
    let write = state.ingestion_service.ingest_ticket(&body).await?;
    Ok(Json(json!({
        "ok": true,
        "inserted": write == TicketWrite::Inserted,
        "updated": write == TicketWrite::Updated,
    })))
}

/// POST /api/ingest/payment
pub async fn ingest_payment(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = payload?;
    state.ingestion_service.ingest_payment(&body).await?;
    Ok(Json(json!({ "ok": true, "inserted": true })))
}

/// POST /api/ingest/bulk
pub async fn ingest_bulk(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = payload?;
    let report = state.ingestion_service.ingest_bulk(&body).await?;
    Ok(Json(json!({ "ok": true, "result": report })))
}

/// POST /api/ingest/sync - Lote con ventana `from`/`to`
pub async fn ingest_sync(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = payload?;
    let report = state.ingestion_service.sync_window(&body).await?;
    Ok(Json(json!({ "ok": true, "result": report })))
}

pub fn create_ingest_v1_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ticket", post(ingest_ticket))
        .route("/payment", post(ingest_payment))
        .route("/bulk", post(ingest_bulk))
        .route("/sync", post(ingest_sync))
}
