use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::warn;

use super::models::{
    BatchCounts, DashboardSummary, EligibleTicket, Invoice, InvoiceFilter, InvoiceStatus,
    IssuedInvoiceRow, NewPayment, NewTicket, Payment, PendingClaim, Ticket, TicketStatus,
    TicketWrite,
};
use super::store::{BillingStore, StoreError};

/// Store en memoria con la misma semántica que `PgBillingStore`.
/// Se usa en pruebas y demos locales.
#[derive(Clone, Default)]
pub struct MemoryBillingStore {
    inner: Arc<Mutex<Tables>>,
}

#[derive(Clone, Default)]
struct Tables {
    tickets: BTreeMap<String, Ticket>,
    payments: Vec<Payment>,
    invoices: BTreeMap<i64, Invoice>,
    next_payment_id: i64,
    next_invoice_id: i64,
}

impl Tables {
    fn upsert_ticket(&mut self, new: &NewTicket) -> TicketWrite {
        match self.tickets.get_mut(&new.ticket_no) {
            Some(existing) => {
                if existing.status != TicketStatus::Closed {
                    if let Some(status) = new.status {
                        existing.status = status;
                    }
                }
                if new.plate.is_some() {
                    existing.plate = new.plate.clone();
                }
                existing.entry_at = new.entry_at.or(existing.entry_at);
                existing.exit_at = new.exit_at.or(existing.exit_at);
                existing.duration_min = new.duration_min.or(existing.duration_min);
                existing.amount = new.amount.or(existing.amount);
                if new.receptor_nit.is_some() {
                    existing.receptor_nit = new.receptor_nit.clone();
                }
                TicketWrite::Updated
            }
            None => {
                self.tickets.insert(
                    new.ticket_no.clone(),
                    Ticket {
                        ticket_no: new.ticket_no.clone(),
                        plate: new.plate.clone(),
                        status: new.status.unwrap_or(TicketStatus::Open),
                        entry_at: new.entry_at,
                        exit_at: new.exit_at,
                        duration_min: new.duration_min,
                        amount: new.amount,
                        receptor_nit: new.receptor_nit.clone(),
                        invoiced_at: None,
                        invoice_status: None,
                    },
                );
                TicketWrite::Inserted
            }
        }
    }

    fn insert_payment(&mut self, new: &NewPayment, dedupe: bool) -> bool {
        if dedupe && self.payments.iter().any(|p| new.same_as(p)) {
            return false;
        }
        self.next_payment_id += 1;
        self.payments.push(Payment {
            id: self.next_payment_id,
            ticket_no: new.ticket_no.clone(),
            amount: new.amount,
            method: new.method.clone(),
            paid_at: new.paid_at,
        });
        true
    }

    fn billable_total(&self, ticket: &Ticket) -> Decimal {
        let mut paid = self
            .payments
            .iter()
            .filter(|p| p.ticket_no == ticket.ticket_no)
            .map(|p| p.amount)
            .peekable();

        if paid.peek().is_some() {
            paid.sum()
        } else {
            ticket.amount.unwrap_or(Decimal::ZERO)
        }
    }

    fn invoice_for_ticket(&self, ticket_no: &str) -> Option<&Invoice> {
        self.invoices.values().find(|i| i.ticket_no == ticket_no)
    }

    fn has_payment(&self, ticket_no: &str) -> bool {
        self.payments.iter().any(|p| p.ticket_no == ticket_no)
    }

    fn is_eligible(&self, ticket: &Ticket) -> bool {
        ticket.status == TicketStatus::Closed
            && self.has_payment(&ticket.ticket_no)
            && !self
                .invoice_for_ticket(&ticket.ticket_no)
                .map(|i| i.status.is_live())
                .unwrap_or(false)
    }

    fn finish_invoice(
        &mut self,
        invoice_id: i64,
        status: InvoiceStatus,
        uuid: Option<&str>,
        response_json: &serde_json::Value,
    ) -> Option<String> {
        let invoice = self.invoices.get_mut(&invoice_id)?;
        if invoice.status != InvoiceStatus::Pending {
            return None;
        }
        invoice.status = status;
        if let Some(uuid) = uuid {
            invoice.uuid = Some(uuid.to_string());
        }
        invoice.response_json = Some(response_json.clone());
        invoice.updated_at = Utc::now();
        Some(invoice.ticket_no.clone())
    }
}

impl MemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Todas las facturas del ticket (para verificar invariantes en pruebas)
    pub fn invoices_for(&self, ticket_no: &str) -> Vec<Invoice> {
        self.inner
            .lock()
            .invoices
            .values()
            .filter(|i| i.ticket_no == ticket_no)
            .cloned()
            .collect()
    }

    pub fn payments_for(&self, ticket_no: &str) -> Vec<Payment> {
        self.inner
            .lock()
            .payments
            .iter()
            .filter(|p| p.ticket_no == ticket_no)
            .cloned()
            .collect()
    }

    pub fn ticket_count(&self) -> usize {
        self.inner.lock().tickets.len()
    }
}

#[async_trait]
impl BillingStore for MemoryBillingStore {
    async fn find_ticket(&self, ticket_no: &str) -> Result<Option<Ticket>, StoreError> {
        Ok(self.inner.lock().tickets.get(ticket_no).cloned())
    }

    async fn billable_total(&self, ticket_no: &str) -> Result<Option<Decimal>, StoreError> {
        let tables = self.inner.lock();
        Ok(tables
            .tickets
            .get(ticket_no)
            .map(|ticket| tables.billable_total(ticket)))
    }

    async fn upsert_ticket(&self, ticket: &NewTicket) -> Result<TicketWrite, StoreError> {
        Ok(self.inner.lock().upsert_ticket(ticket))
    }

    async fn insert_payment(&self, payment: &NewPayment, dedupe: bool) -> Result<bool, StoreError> {
        Ok(self.inner.lock().insert_payment(payment, dedupe))
    }

    async fn ingest_batch(
        &self,
        tickets: &[NewTicket],
        payments: &[NewPayment],
        dedupe_payments: bool,
    ) -> Result<BatchCounts, StoreError> {
        let mut guard = self.inner.lock();
        // Se trabaja sobre una copia y se publica al final: todo o nada
        let mut staged = guard.clone();
        let mut counts = BatchCounts::default();

        for ticket in tickets {
            match staged.upsert_ticket(ticket) {
                TicketWrite::Inserted => counts.tickets_inserted += 1,
                TicketWrite::Updated => counts.tickets_updated += 1,
            }
        }
        for payment in payments {
            if staged.insert_payment(payment, dedupe_payments) {
                counts.payments_inserted += 1;
            } else {
                counts.payments_duplicated += 1;
            }
        }

        *guard = staged;
        Ok(counts)
    }

    async fn find_live_invoice(&self, ticket_no: &str) -> Result<Option<Invoice>, StoreError> {
        Ok(self
            .inner
            .lock()
            .invoice_for_ticket(ticket_no)
            .filter(|i| i.status.is_live())
            .cloned())
    }

    async fn find_invoice_by_uuid(&self, uuid: &str) -> Result<Option<Invoice>, StoreError> {
        Ok(self
            .inner
            .lock()
            .invoices
            .values()
            .find(|i| i.uuid.as_deref() == Some(uuid))
            .cloned())
    }

    async fn claim_pending(
        &self,
        ticket_no: &str,
        total: Decimal,
        receptor_nit: &str,
        request_json: &serde_json::Value,
    ) -> Result<PendingClaim, StoreError> {
        let mut tables = self.inner.lock();
        let now = Utc::now();

        let existing_id = tables.invoice_for_ticket(ticket_no).map(|i| i.id);
        let invoice_id = match existing_id {
            Some(id) => {
                let invoice = tables
                    .invoices
                    .get_mut(&id)
                    .ok_or_else(|| StoreError::CorruptRow {
                        table: "invoices",
                        message: format!("invoice {} vanished", id),
                    })?;
                if invoice.status.is_live() {
                    return Ok(PendingClaim::Conflict {
                        status: invoice.status,
                        uuid: invoice.uuid.clone(),
                    });
                }
                invoice.total = total;
                invoice.status = InvoiceStatus::Pending;
                invoice.uuid = None;
                invoice.request_json = Some(request_json.clone());
                invoice.response_json = None;
                invoice.updated_at = now;
                id
            }
            None => {
                tables.next_invoice_id += 1;
                let id = tables.next_invoice_id;
                tables.invoices.insert(
                    id,
                    Invoice {
                        id,
                        ticket_no: ticket_no.to_string(),
                        total,
                        uuid: None,
                        status: InvoiceStatus::Pending,
                        request_json: Some(request_json.clone()),
                        response_json: None,
                        created_at: now,
                        updated_at: now,
                    },
                );
                id
            }
        };

        if let Some(ticket) = tables.tickets.get_mut(ticket_no) {
            ticket.invoice_status = Some(InvoiceStatus::Pending.as_str().to_string());
            ticket.receptor_nit = Some(receptor_nit.to_string());
        }

        Ok(PendingClaim::Claimed { invoice_id })
    }

    async fn mark_certified(
        &self,
        invoice_id: i64,
        ticket_no: &str,
        uuid: &str,
        response_json: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut tables = self.inner.lock();
        if tables
            .finish_invoice(invoice_id, InvoiceStatus::Ok, Some(uuid), response_json)
            .is_none()
        {
            warn!("⚠️ Invoice {} is no longer PENDING, ticket {} left as is", invoice_id, ticket_no);
            return Ok(());
        }
        if let Some(ticket) = tables.tickets.get_mut(ticket_no) {
            ticket.invoiced_at = Some(Utc::now());
            ticket.invoice_status = Some(InvoiceStatus::Ok.as_str().to_string());
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        invoice_id: i64,
        ticket_no: &str,
        response_json: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut tables = self.inner.lock();
        if tables
            .finish_invoice(invoice_id, InvoiceStatus::Error, None, response_json)
            .is_none()
        {
            warn!("⚠️ Invoice {} is no longer PENDING, ticket {} left as is", invoice_id, ticket_no);
            return Ok(());
        }
        if let Some(ticket) = tables.tickets.get_mut(ticket_no) {
            ticket.invoice_status = Some(InvoiceStatus::Error.as_str().to_string());
        }
        Ok(())
    }

    async fn eligible_tickets(&self) -> Result<Vec<EligibleTicket>, StoreError> {
        let tables = self.inner.lock();
        let mut eligible: Vec<EligibleTicket> = tables
            .tickets
            .values()
            .filter(|t| tables.is_eligible(t))
            .map(|t| EligibleTicket {
                ticket_no: t.ticket_no.clone(),
                plate: t.plate.clone(),
                receptor_nit: t.receptor_nit.clone(),
                exit_at: t.exit_at,
                total: tables.billable_total(t),
            })
            .collect();

        eligible.sort_by(|a, b| match (a.exit_at, b.exit_at) {
            (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.ticket_no.cmp(&b.ticket_no)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.ticket_no.cmp(&b.ticket_no),
        });
        Ok(eligible)
    }

    async fn issued_invoices(&self, filter: &InvoiceFilter) -> Result<Vec<IssuedInvoiceRow>, StoreError> {
        let tables = self.inner.lock();
        let mut rows: Vec<IssuedInvoiceRow> = tables
            .invoices
            .values()
            .map(|invoice| {
                let ticket = tables.tickets.get(&invoice.ticket_no);
                IssuedInvoiceRow {
                    id: invoice.id,
                    ticket_no: invoice.ticket_no.clone(),
                    plate: ticket.and_then(|t| t.plate.clone()),
                    total: invoice.total,
                    uuid: invoice.uuid.clone(),
                    status: invoice.status,
                    receptor_nit: ticket.and_then(|t| t.receptor_nit.clone()),
                    effective_at: ticket.and_then(|t| t.effective_at()),
                    created_at: invoice.created_at,
                }
            })
            .filter(|row| filter.matches(row))
            .collect();

        rows.sort_by(|a, b| b.effective_at.cmp(&a.effective_at).then_with(|| b.id.cmp(&a.id)));
        rows.truncate(filter.limit.max(0) as usize);
        Ok(rows)
    }

    async fn summary(&self) -> Result<DashboardSummary, StoreError> {
        let tables = self.inner.lock();
        let mut summary = DashboardSummary::default();

        for ticket in tables.tickets.values() {
            match ticket.status {
                TicketStatus::Open => summary.tickets_open += 1,
                TicketStatus::Closed => summary.tickets_closed += 1,
            }
            if tables.is_eligible(ticket) {
                summary.tickets_eligible += 1;
            }
        }
        for invoice in tables.invoices.values() {
            match invoice.status {
                InvoiceStatus::Pending => summary.invoices_pending += 1,
                InvoiceStatus::Ok => {
                    summary.invoices_ok += 1;
                    summary.certified_total += invoice.total;
                }
                InvoiceStatus::Error => summary.invoices_error += 1,
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ticket(no: &str, status: Option<TicketStatus>) -> NewTicket {
        NewTicket {
            ticket_no: no.to_string(),
            plate: Some("P-123ABC".to_string()),
            status,
            entry_at: Some(Utc.with_ymd_and_hms(2025, 1, 10, 14, 0, 0).unwrap()),
            exit_at: None,
            duration_min: None,
            amount: Some(Decimal::new(2000, 2)),
            receptor_nit: None,
        }
    }

    fn payment(no: &str, cents: i64) -> NewPayment {
        NewPayment {
            ticket_no: no.to_string(),
            amount: Decimal::new(cents, 2),
            method: Some("EFECTIVO".to_string()),
            paid_at: Some(Utc.with_ymd_and_hms(2025, 1, 10, 16, 0, 0).unwrap()),
        }
    }

    #[tokio::test]
    async fn test_closed_ticket_is_never_reopened() {
        let store = MemoryBillingStore::new();
        store.upsert_ticket(&ticket("T-1", Some(TicketStatus::Closed))).await.unwrap();
        let write = store.upsert_ticket(&ticket("T-1", Some(TicketStatus::Open))).await.unwrap();

        assert_eq!(write, TicketWrite::Updated);
        let stored = store.find_ticket("T-1").await.unwrap().unwrap();
        assert_eq!(stored.status, TicketStatus::Closed);
    }

    #[tokio::test]
    async fn test_billable_total_prefers_payments_over_ticket_amount() {
        let store = MemoryBillingStore::new();
        store.upsert_ticket(&ticket("T-1", None)).await.unwrap();
        assert_eq!(store.billable_total("T-1").await.unwrap(), Some(Decimal::new(2000, 2)));

        store.insert_payment(&payment("T-1", 10000), false).await.unwrap();
        store.insert_payment(&payment("T-1", 5000), false).await.unwrap();
        assert_eq!(store.billable_total("T-1").await.unwrap(), Some(Decimal::new(15000, 2)));
        assert_eq!(store.billable_total("NOPE").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dedupe_payment() {
        let store = MemoryBillingStore::new();
        assert!(store.insert_payment(&payment("T-1", 500), true).await.unwrap());
        assert!(!store.insert_payment(&payment("T-1", 500), true).await.unwrap());
        assert!(store.insert_payment(&payment("T-1", 500), false).await.unwrap());
        assert_eq!(store.payments_for("T-1").len(), 2);
    }

    #[tokio::test]
    async fn test_claim_pending_blocks_live_and_resets_error() {
        let store = MemoryBillingStore::new();
        store.upsert_ticket(&ticket("T-1", Some(TicketStatus::Closed))).await.unwrap();
        let request = serde_json::json!({"ticket_no": "T-1"});

        let PendingClaim::Claimed { invoice_id } =
            store.claim_pending("T-1", Decimal::TEN, "CF", &request).await.unwrap()
        else {
            panic!("first claim must succeed");
        };

        let second = store.claim_pending("T-1", Decimal::TEN, "CF", &request).await.unwrap();
        assert_eq!(
            second,
            PendingClaim::Conflict { status: InvoiceStatus::Pending, uuid: None }
        );

        store
            .mark_failed(invoice_id, "T-1", &serde_json::json!({"error": "boom"}))
            .await
            .unwrap();
        let retry = store.claim_pending("T-1", Decimal::TEN, "CF", &request).await.unwrap();
        assert_eq!(retry, PendingClaim::Claimed { invoice_id });
        assert_eq!(store.invoices_for("T-1").len(), 1);
    }

    #[tokio::test]
    async fn test_certified_invoice_is_immutable() {
        let store = MemoryBillingStore::new();
        store.upsert_ticket(&ticket("T-1", Some(TicketStatus::Closed))).await.unwrap();
        let request = serde_json::json!({});
        let PendingClaim::Claimed { invoice_id } =
            store.claim_pending("T-1", Decimal::TEN, "CF", &request).await.unwrap()
        else {
            panic!("claim must succeed");
        };

        store.mark_certified(invoice_id, "T-1", "ABC-123", &request).await.unwrap();
        store.mark_failed(invoice_id, "T-1", &request).await.unwrap();

        let invoice = store.find_invoice_by_uuid("ABC-123").await.unwrap().unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Ok);
        let ticket = store.find_ticket("T-1").await.unwrap().unwrap();
        assert_eq!(ticket.invoice_status.as_deref(), Some("OK"));
    }

    #[tokio::test]
    async fn test_finishing_unknown_invoice_leaves_ticket_alone() {
        let store = MemoryBillingStore::new();
        store.upsert_ticket(&ticket("T-1", Some(TicketStatus::Closed))).await.unwrap();

        store.mark_certified(999, "T-1", "GHOST", &serde_json::json!({})).await.unwrap();
        store.mark_failed(999, "T-1", &serde_json::json!({})).await.unwrap();

        let ticket = store.find_ticket("T-1").await.unwrap().unwrap();
        assert_eq!(ticket.invoice_status, None);
        assert!(ticket.invoiced_at.is_none());
        assert!(store.find_invoice_by_uuid("GHOST").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eligible_requires_closed_and_paid() {
        let store = MemoryBillingStore::new();
        store.upsert_ticket(&ticket("OPEN-1", Some(TicketStatus::Open))).await.unwrap();
        store.upsert_ticket(&ticket("UNPAID-1", Some(TicketStatus::Closed))).await.unwrap();
        store.upsert_ticket(&ticket("PAID-1", Some(TicketStatus::Closed))).await.unwrap();
        store.insert_payment(&payment("OPEN-1", 100), false).await.unwrap();
        store.insert_payment(&payment("PAID-1", 100), false).await.unwrap();

        let eligible = store.eligible_tickets().await.unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].ticket_no, "PAID-1");

        let summary = store.summary().await.unwrap();
        assert_eq!(summary.tickets_open, 1);
        assert_eq!(summary.tickets_closed, 2);
        assert_eq!(summary.tickets_eligible, 1);
    }
}
