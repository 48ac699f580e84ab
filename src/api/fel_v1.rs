use std::sync::Arc;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use validator::Validate;

use crate::api::error_handling::ApiError;
use crate::domains::billing::InvoiceStatus;
use crate::domains::fel::DocumentFormat;
use crate::domains::invoicing::InvoiceRequest;
use crate::state::AppState;

// ============================================================================
// POST /api/fel/invoice
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct InvoiceBody {
    #[validate(length(min = 1, max = 64, message = "ticket_no es requerido"))]
    pub ticket_no: String,
    #[validate(length(max = 20, message = "NIT demasiado largo"))]
    pub receptor_nit: Option<String>,
    pub serie: Option<String>,
    pub numero: Option<String>,
}

pub async fn create_invoice(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<InvoiceBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = payload?;
    body.validate()?;
    info!("🧾 Invoice requested for ticket {}", body.ticket_no);

    let outcome = state
        .invoice_service
        .invoice_one(InvoiceRequest {
            ticket_no: body.ticket_no,
            receptor_nit: body.receptor_nit,
            serie: body.serie,
            numero: body.numero,
        })
        .await?;

    Ok(Json(json!({
        "ok": true,
        "invoice_id": outcome.invoice_id,
        "ticket_no": outcome.ticket_no,
        "uuid": outcome.uuid,
        "status": outcome.status,
        "total": outcome.total,
        "response": outcome.response,
    })))
}

// ============================================================================
// GET /api/fel/pdf, /api/fel/xml
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DocumentQuery {
    pub uuid: Option<String>,
}

async fn stream_document(
    state: &AppState,
    query: DocumentQuery,
    format: DocumentFormat,
) -> Result<Response, ApiError> {
    let uuid = query
        .uuid
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::BadRequest("uuid es requerido".to_string()))?;

    // Solo documentos certificados por este servicio
    let invoice = state.store.find_invoice_by_uuid(uuid).await?;
    if !matches!(invoice, Some(ref inv) if inv.status == InvoiceStatus::Ok) {
        warn!("📄 {} requested for unknown uuid {}", format.as_str(), uuid);
        return Err(ApiError::NotFound(format!("no hay factura certificada con uuid {}", uuid)));
    }

    let bytes = state.provider.fetch_document(uuid, format).await?;
    info!("📄 {} {} ({} bytes)", format.as_str(), uuid, bytes.len());

    let disposition = format!(
        "inline; filename=\"{}.{}\"",
        uuid,
        format.as_str().to_ascii_lowercase()
    );
    let mut response = bytes.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(format.content_type()));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

pub async fn get_pdf(
    State(state): State<Arc<AppState>>,
    query: Result<Query<DocumentQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    stream_document(&state, query, DocumentFormat::Pdf).await
}

pub async fn get_xml(
    State(state): State<Arc<AppState>>,
    query: Result<Query<DocumentQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    stream_document(&state, query, DocumentFormat::Xml).await
}

// ============================================================================
// GET /api/fel/nit
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct NitQuery {
    pub nit: Option<String>,
}

/// Consulta informativa: nunca bloquea la facturación
pub async fn lookup_nit(
    State(state): State<Arc<AppState>>,
    query: Result<Query<NitQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let nit = query
        .nit
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::BadRequest("nit es requerido".to_string()))?;

    let lookup = state.provider.lookup_tax_id(nit).await;
    Ok(Json(json!({
        "ok": true,
        "found": lookup.found,
        "nit": lookup.nit,
        "name": lookup.name,
        "address": lookup.address,
        "source": lookup.source,
        "error": lookup.error,
    })))
}

pub fn create_fel_v1_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/invoice", post(create_invoice))
        .route("/pdf", get(get_pdf))
        .route("/xml", get(get_xml))
        .route("/nit", get(lookup_nit))
}
