use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::post, Json, Router};
use serde_json::json;
use tracing::info;

use crate::api::error_handling::ApiError;
use crate::domains::billing::InvoiceStatus;
use crate::state::AppState;

/// POST /api/invoice/tickets - Factura todos los tickets cerrados elegibles.
/// El resultado es por ticket; un fallo no detiene a los demás.
pub async fn invoice_closed_tickets(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let invoices = state.invoice_service.invoice_closed_tickets().await?;

    let certified = invoices.iter().filter(|r| r.status == InvoiceStatus::Ok).count();
    info!("🧾 Batch invoicing finished: {}/{} certified", certified, invoices.len());

    Ok(Json(json!({
        "ok": true,
        "count": invoices.len(),
        "invoices": invoices,
    })))
}

pub fn create_invoicing_v1_router() -> Router<Arc<AppState>> {
    Router::new().route("/tickets", post(invoice_closed_tickets))
}
