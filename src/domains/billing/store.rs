use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use super::models::{
    BatchCounts, DashboardSummary, EligibleTicket, Invoice, InvoiceFilter, IssuedInvoiceRow,
    NewPayment, NewTicket, PendingClaim, Ticket, TicketWrite,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {message}")]
    DatabaseError { message: String },

    #[error("Corrupt row in {table}: {message}")]
    CorruptRow { table: &'static str, message: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::DatabaseError {
            message: format!("Database error: {}", err),
        }
    }
}

/// Acceso a `tickets`, `payments` e `invoices`.
///
/// La máquina de estados de facturación, la ingesta y los reportes solo
/// dependen de este trait; `PgBillingStore` es la implementación de
/// producción y `MemoryBillingStore` la usada en pruebas.
#[async_trait]
pub trait BillingStore: Send + Sync {
    // --- tickets / pagos ---------------------------------------------------

    async fn find_ticket(&self, ticket_no: &str) -> Result<Option<Ticket>, StoreError>;

    /// `COALESCE(SUM(payments.amount), tickets.amount, 0)`; `None` si el ticket no existe.
    async fn billable_total(&self, ticket_no: &str) -> Result<Option<Decimal>, StoreError>;

    async fn upsert_ticket(&self, ticket: &NewTicket) -> Result<TicketWrite, StoreError>;

    /// Inserta un pago. Con `dedupe` no inserta si ya existe un pago idéntico
    /// (ticket_no, amount, paid_at) y devuelve `false`.
    async fn insert_payment(&self, payment: &NewPayment, dedupe: bool) -> Result<bool, StoreError>;

    /// Escribe todo el lote en una sola transacción (todo o nada).
    async fn ingest_batch(
        &self,
        tickets: &[NewTicket],
        payments: &[NewPayment],
        dedupe_payments: bool,
    ) -> Result<BatchCounts, StoreError>;

    // --- facturas ------------------------------------------------------------

    /// Factura PENDING u OK del ticket, si existe
    async fn find_live_invoice(&self, ticket_no: &str) -> Result<Option<Invoice>, StoreError>;

    async fn find_invoice_by_uuid(&self, uuid: &str) -> Result<Option<Invoice>, StoreError>;

    /// Reclama el marcador PENDING de forma atómica: crea la fila, o reinicia
    /// una fila en ERROR. Si la fila existente está PENDING u OK no cambia nada.
    async fn claim_pending(
        &self,
        ticket_no: &str,
        total: Decimal,
        receptor_nit: &str,
        request_json: &serde_json::Value,
    ) -> Result<PendingClaim, StoreError>;

    /// PENDING → OK, y marca el ticket como facturado.
    async fn mark_certified(
        &self,
        invoice_id: i64,
        ticket_no: &str,
        uuid: &str,
        response_json: &serde_json::Value,
    ) -> Result<(), StoreError>;

    /// PENDING → ERROR.
    async fn mark_failed(
        &self,
        invoice_id: i64,
        ticket_no: &str,
        response_json: &serde_json::Value,
    ) -> Result<(), StoreError>;

    async fn eligible_tickets(&self) -> Result<Vec<EligibleTicket>, StoreError>;

    // --- reportes ------------------------------------------------------------

    async fn issued_invoices(&self, filter: &InvoiceFilter) -> Result<Vec<IssuedInvoiceRow>, StoreError>;

    async fn summary(&self) -> Result<DashboardSummary, StoreError>;
}
