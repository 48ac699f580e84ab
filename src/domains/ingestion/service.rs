use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use super::validation::{
    parse_window_bound, validate_batch, validate_payment, validate_ticket, SkippedRow, SyncWindow,
};
use crate::domains::billing::{BatchCounts, BillingStore, StoreError, TicketWrite};
use crate::observability::metrics::record_ingested;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Batch too large: {rows} rows (max {max})")]
    BatchTooLarge { rows: usize, max: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    #[serde(flatten)]
    pub counts: BatchCounts,
    pub skipped: Vec<SkippedRow>,
}

/// Ingesta de tickets y pagos: registros sueltos, lotes y sincronización por ventana.
pub struct IngestionService {
    store: Arc<dyn BillingStore>,
    max_rows: usize,
}

impl IngestionService {
    pub fn new(store: Arc<dyn BillingStore>, max_rows: usize) -> Self {
        Self { store, max_rows }
    }

    pub async fn ingest_ticket(&self, record: &Value) -> Result<TicketWrite, IngestionError> {
        let ticket = validate_ticket(record).map_err(IngestionError::Validation)?;
        let write = self.store.upsert_ticket(&ticket).await?;
        record_ingested(
            "ticket",
            match write {
                TicketWrite::Inserted => "inserted",
                TicketWrite::Updated => "updated",
            },
            1,
        );
        info!("🎫 Ticket {} {:?}", ticket.ticket_no, write);
        Ok(write)
    }

    /// Los pagos sueltos no se deduplican
    pub async fn ingest_payment(&self, record: &Value) -> Result<(), IngestionError> {
        let payment = validate_payment(record).map_err(IngestionError::Validation)?;
        self.store.insert_payment(&payment, false).await?;
        record_ingested("payment", "inserted", 1);
        info!("💳 Payment {} for ticket {}", payment.amount, payment.ticket_no);
        Ok(())
    }

    /// `{tickets: [...], payments: [...]}` en una sola transacción
    pub async fn ingest_bulk(&self, body: &Value) -> Result<IngestReport, IngestionError> {
        let (tickets, payments) = self.batch_arrays(body)?;
        self.write_batch(tickets, payments, None).await
    }

    /// Igual que `ingest_bulk` más la ventana `[from, to]`
    pub async fn sync_window(&self, body: &Value) -> Result<IngestReport, IngestionError> {
        let (tickets, payments) = self.batch_arrays(body)?;

        let bound = |field: &str, end_of_day: bool| -> Result<_, IngestionError> {
            let raw = body
                .get(field)
                .and_then(Value::as_str)
                .ok_or_else(|| IngestionError::Validation(format!("{} es requerido", field)))?;
            parse_window_bound(raw, end_of_day)
                .map_err(|e| IngestionError::Validation(format!("{}: {}", field, e)))
        };
        let window = SyncWindow {
            from: bound("from", false)?,
            to: bound("to", true)?,
        };
        if window.from > window.to {
            return Err(IngestionError::Validation("from debe ser anterior a to".to_string()));
        }

        self.write_batch(tickets, payments, Some(window)).await
    }

    fn batch_arrays<'a>(&self, body: &'a Value) -> Result<(&'a [Value], &'a [Value]), IngestionError> {
        let object = body
            .as_object()
            .ok_or_else(|| IngestionError::Validation("el cuerpo debe ser un objeto JSON".to_string()))?;

        let array = move |field: &str| -> Result<&'a [Value], IngestionError> {
            match object.get(field) {
                None | Some(Value::Null) => Ok(&[]),
                Some(Value::Array(rows)) => Ok(rows.as_slice()),
                Some(_) => Err(IngestionError::Validation(format!("{} debe ser un arreglo", field))),
            }
        };
        let tickets = array("tickets")?;
        let payments = array("payments")?;

        let rows = tickets.len() + payments.len();
        if rows > self.max_rows {
            warn!("🚫 Batch rejected: {} rows (max {})", rows, self.max_rows);
            return Err(IngestionError::BatchTooLarge {
                rows,
                max: self.max_rows,
            });
        }
        Ok((tickets, payments))
    }

    async fn write_batch(
        &self,
        tickets: &[Value],
        payments: &[Value],
        window: Option<SyncWindow>,
    ) -> Result<IngestReport, IngestionError> {
        let batch = validate_batch(tickets, payments, window);
        for skipped in &batch.skipped {
            warn!(
                "⚠️ Skipping {} row {} ({:?}): {}",
                skipped.kind, skipped.index, skipped.ticket_no, skipped.reason
            );
        }

        // Bulk y sync deduplican pagos
        let counts = self
            .store
            .ingest_batch(&batch.tickets, &batch.payments, true)
            .await
            .map_err(|e| {
                error!("❌ Batch rolled back: {}", e);
                e
            })?;

        let skipped_tickets = batch.skipped.iter().filter(|s| s.kind == "ticket").count();
        record_ingested("ticket", "inserted", counts.tickets_inserted);
        record_ingested("ticket", "updated", counts.tickets_updated);
        record_ingested("ticket", "skipped", skipped_tickets);
        record_ingested("payment", "inserted", counts.payments_inserted);
        record_ingested("payment", "duplicate", counts.payments_duplicated);
        record_ingested("payment", "skipped", batch.skipped.len() - skipped_tickets);

        info!(
            "📥 Batch committed: tickets +{} ~{}, payments +{} (dup {}), skipped {}",
            counts.tickets_inserted,
            counts.tickets_updated,
            counts.payments_inserted,
            counts.payments_duplicated,
            batch.skipped.len()
        );

        Ok(IngestReport {
            counts,
            skipped: batch.skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::billing::{MemoryBillingStore, TicketStatus};
    use serde_json::json;

    fn service(store: &MemoryBillingStore, max_rows: usize) -> IngestionService {
        IngestionService::new(Arc::new(store.clone()), max_rows)
    }

    #[tokio::test]
    async fn test_bulk_skips_ticket_without_number() {
        let store = MemoryBillingStore::new();
        let body = json!({
            "tickets": [
                {"ticket_no": "T-1", "status": "CLOSED"},
                {"ticket_no": "T-2"},
                {"plate": "P-000"}
            ],
            "payments": [
                {"ticket_no": "T-1", "amount": "10.00"},
                {"ticket_no": "T-2", "amount": 5}
            ]
        });

        let report = service(&store, 100).ingest_bulk(&body).await.unwrap();
        assert_eq!(report.counts.tickets_inserted, 2);
        assert_eq!(report.counts.payments_inserted, 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(store.ticket_count(), 2);
    }

    #[tokio::test]
    async fn test_bulk_rejects_bad_shapes_and_oversized_batches() {
        let store = MemoryBillingStore::new();
        let svc = service(&store, 2);

        let not_object = svc.ingest_bulk(&json!([1, 2])).await.unwrap_err();
        assert!(matches!(not_object, IngestionError::Validation(_)));

        let not_array = svc.ingest_bulk(&json!({"tickets": {"ticket_no": "T"}})).await.unwrap_err();
        assert!(matches!(not_array, IngestionError::Validation(_)));

        let too_big = svc
            .ingest_bulk(&json!({"tickets": [{"ticket_no": "A"}, {"ticket_no": "B"}, {"ticket_no": "C"}]}))
            .await
            .unwrap_err();
        assert!(matches!(too_big, IngestionError::BatchTooLarge { rows: 3, max: 2 }));
        assert_eq!(store.ticket_count(), 0);
    }

    #[tokio::test]
    async fn test_sync_suppresses_duplicate_payments() {
        let store = MemoryBillingStore::new();
        let svc = service(&store, 100);
        let body = json!({
            "from": "2025-01-01",
            "to": "2025-01-31",
            "payments": [
                {"ticket_no": "T-9", "amount": 20, "paid_at": "2025-01-15 10:00:00"},
                {"ticket_no": "T-9", "amount": 20, "paid_at": "2025-01-15 10:00:00"}
            ]
        });

        let first = svc.sync_window(&body).await.unwrap();
        assert_eq!(first.counts.payments_inserted, 1);
        assert_eq!(first.counts.payments_duplicated, 1);

        let again = svc.sync_window(&body).await.unwrap();
        assert_eq!(again.counts.payments_inserted, 0);
        assert_eq!(store.payments_for("T-9").len(), 1);
    }

    #[tokio::test]
    async fn test_sync_rejects_inverted_window() {
        let store = MemoryBillingStore::new();
        let err = service(&store, 100)
            .sync_window(&json!({"from": "2025-02-01", "to": "2025-01-01"}))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestionError::Validation(_)));
    }

    #[tokio::test]
    async fn test_single_ticket_update_never_reopens() {
        let store = MemoryBillingStore::new();
        let svc = service(&store, 100);

        let first = svc
            .ingest_ticket(&json!({"ticket_no": "T-5", "exit_at": "2025-01-10 10:00:00"}))
            .await
            .unwrap();
        assert_eq!(first, TicketWrite::Inserted);

        let second = svc
            .ingest_ticket(&json!({"ticket_no": "T-5", "status": "OPEN", "plate": "P-1"}))
            .await
            .unwrap();
        assert_eq!(second, TicketWrite::Updated);

        let ticket = store.find_ticket("T-5").await.unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::Closed);
        assert_eq!(ticket.plate.as_deref(), Some("P-1"));
        assert!(ticket.exit_at.is_some());
    }

    #[tokio::test]
    async fn test_single_payment_is_not_deduplicated() {
        let store = MemoryBillingStore::new();
        let svc = service(&store, 100);
        let record = json!({"ticket_no": "T-7", "amount": 3, "paid_at": "2025-01-10 10:00:00"});

        svc.ingest_payment(&record).await.unwrap();
        svc.ingest_payment(&record).await.unwrap();
        assert_eq!(store.payments_for("T-7").len(), 2);

        let err = svc.ingest_payment(&json!({"ticket_no": "T-7", "amount": 0})).await.unwrap_err();
        assert!(matches!(err, IngestionError::Validation(_)));
    }
}
