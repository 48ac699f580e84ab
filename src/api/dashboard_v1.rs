use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;

use crate::api::error_handling::ApiError;
use crate::state::AppState;

/// GET /api/tickets/eligible - Tickets cerrados sin factura viva, con su total
pub async fn eligible_tickets(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let tickets = state.store.eligible_tickets().await?;
    Ok(Json(json!({
        "ok": true,
        "count": tickets.len(),
        "tickets": tickets,
    })))
}

/// GET /api/dashboard/summary
pub async fn summary(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let summary = state.store.summary().await?;
    Ok(Json(json!({ "ok": true, "summary": summary })))
}

pub fn create_dashboard_v1_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tickets/eligible", get(eligible_tickets))
        .route("/dashboard/summary", get(summary))
}
