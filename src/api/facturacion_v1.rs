use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use chrono_tz::America::Guatemala;
use serde_json::json;
use tracing::info;

use crate::api::error_handling::ApiError;
use crate::domains::reports::{issued_invoices, render_csv, ReportQuery};
use crate::state::AppState;

/// GET /api/facturacion/emitidas - Facturas por rango de fecha efectiva del ticket.
/// Con `format=csv` devuelve las mismas filas como adjunto.
pub async fn list_issued(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ReportQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let (filter, rows) = issued_invoices(state.store.as_ref(), &query).await?;
    info!("📊 Issued invoices report: {} rows (csv={})", rows.len(), query.wants_csv());

    if query.wants_csv() {
        let filename = format!(
            "facturas_emitidas_{}.csv",
            Utc::now().with_timezone(&Guatemala).format("%Y%m%d_%H%M%S")
        );
        return Ok((
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", filename)),
            ],
            render_csv(&rows),
        )
            .into_response());
    }

    Ok(Json(json!({
        "ok": true,
        "rows": rows,
        "filters": {
            "from": filter.from,
            "to": filter.to,
            "status": filter.status,
            "nit": filter.nit,
            "uuid": filter.uuid,
            "limit": filter.limit,
        },
    }))
    .into_response())
}

pub fn create_facturacion_v1_router() -> Router<Arc<AppState>> {
    Router::new().route("/emitidas", get(list_issued))
}
