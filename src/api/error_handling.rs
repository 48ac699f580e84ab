use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::error;

use crate::domains::billing::StoreError;
use crate::domains::fel::FelError;
use crate::domains::ingestion::IngestionError;
use crate::domains::invoicing::InvoicingError;
use crate::domains::reports::ReportError;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Error de la capa HTTP. Todas las respuestas de error son `{ ok:false, error, ... }`.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Conflict { message: String, uuid: Option<String> },

    /// Falla del certificador al facturar; `response` es lo que quedó en la factura
    #[error("{message}")]
    Certification { message: String, response: Value },

    #[error("{0}")]
    Provider(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::Certification { .. } | ApiError::Provider(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

// ============================================================================
// HTTP RESPONSE CONVERSION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("❌ {} -> {}", status, self);
        }

        let body = match self {
            ApiError::Conflict { message, uuid } => json!({
                "ok": false,
                "error": message,
                "uuid": uuid,
            }),
            ApiError::Certification { message, response } => json!({
                "ok": false,
                "error": message,
                "response": response,
            }),
            other => json!({
                "ok": false,
                "error": other.to_string(),
            }),
        };

        (status, Json(body)).into_response()
    }
}

// ============================================================================
// DOMAIN CONVERSIONS
// ============================================================================

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(format!("cuerpo JSON inválido: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(format!("parámetros inválidos: {}", rejection.body_text()))
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<String> = errors
            .field_errors()
            .iter()
            .map(|(field, errors)| {
                let message = errors
                    .first()
                    .and_then(|e| e.message.as_ref())
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "valor inválido".to_string());
                format!("{}: {}", field, message)
            })
            .collect();
        fields.sort();
        ApiError::BadRequest(fields.join(", "))
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<FelError> for ApiError {
    fn from(err: FelError) -> Self {
        ApiError::Provider(err.to_string())
    }
}

impl From<InvoicingError> for ApiError {
    fn from(err: InvoicingError) -> Self {
        match err {
            InvoicingError::Validation(message) => ApiError::BadRequest(message),
            InvoicingError::TicketNotFound(ticket_no) => {
                ApiError::BadRequest(format!("ticket {} no existe", ticket_no))
            }
            InvoicingError::Conflict {
                ticket_no,
                status,
                uuid,
            } => ApiError::Conflict {
                message: format!("el ticket {} ya tiene una factura {}", ticket_no, status.as_str()),
                uuid,
            },
            InvoicingError::Certification { source, response } => ApiError::Certification {
                message: source.to_string(),
                response,
            },
            InvoicingError::Store(e) => e.into(),
        }
    }
}

impl From<IngestionError> for ApiError {
    fn from(err: IngestionError) -> Self {
        match err {
            IngestionError::Validation(message) => ApiError::BadRequest(message),
            too_large @ IngestionError::BatchTooLarge { .. } => ApiError::BadRequest(too_large.to_string()),
            IngestionError::Store(e) => e.into(),
        }
    }
}

impl From<ReportError> for ApiError {
    fn from(err: ReportError) -> Self {
        match err {
            ReportError::InvalidFilter(message) => ApiError::BadRequest(message),
            ReportError::Store(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::billing::InvoiceStatus;

    #[test]
    fn test_invoicing_errors_map_to_status_codes() {
        let conflict: ApiError = InvoicingError::Conflict {
            ticket_no: "T-1".to_string(),
            status: InvoiceStatus::Ok,
            uuid: Some("ABC".to_string()),
        }
        .into();
        assert_eq!(conflict.status_code(), StatusCode::CONFLICT);

        let missing: ApiError = InvoicingError::TicketNotFound("T-2".to_string()).into();
        assert_eq!(missing.status_code(), StatusCode::BAD_REQUEST);

        let failed: ApiError = InvoicingError::Certification {
            source: FelError::provider("NIT receptor inválido", None),
            response: json!({"error": "NIT receptor inválido"}),
        }
        .into();
        assert_eq!(failed.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_oversized_batch_is_a_client_error() {
        let err: ApiError = IngestionError::BatchTooLarge { rows: 10, max: 5 }.into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().contains("max 5"));
    }
}
