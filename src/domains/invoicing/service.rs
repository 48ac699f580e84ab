use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::EmitterConfig;
use crate::domains::billing::{BillingStore, InvoiceStatus, PendingClaim, StoreError};
use crate::domains::fel::document::CONSUMIDOR_FINAL;
use crate::domains::fel::{
    build_document, normalize_nit, CertificationProvider, DteItem, DteRequest, FelError, Receptor,
};
use crate::domains::ingestion::MAX_AMOUNT;
use crate::observability::metrics::record_certification;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Error, Debug)]
pub enum InvoicingError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Ticket not found: {0}")]
    TicketNotFound(String),

    #[error("Ticket {ticket_no} already has a {status} invoice")]
    Conflict {
        ticket_no: String,
        status: InvoiceStatus,
        uuid: Option<String>,
    },

    /// La factura quedó en ERROR; `response` es lo guardado en `response_json`
    #[error("Certification failed: {source}")]
    Certification { source: FelError, response: Value },

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// REQUEST / RESULT TYPES
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct InvoiceRequest {
    pub ticket_no: String,
    pub receptor_nit: Option<String>,
    pub serie: Option<String>,
    pub numero: Option<String>,
}

impl InvoiceRequest {
    pub fn for_ticket(ticket_no: impl Into<String>) -> Self {
        Self {
            ticket_no: ticket_no.into(),
            ..Default::default()
        }
    }

    /// Referencia del documento: `serie-numero` si vienen ambos, si no el ticket
    pub fn reference(&self) -> String {
        match (non_blank(&self.serie), non_blank(&self.numero)) {
            (Some(serie), Some(numero)) => format!("{}-{}", serie, numero),
            _ => self.ticket_no.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceOutcome {
    pub invoice_id: i64,
    pub ticket_no: String,
    pub uuid: String,
    pub status: InvoiceStatus,
    pub total: Decimal,
    pub response: Value,
}

/// Una fila del resultado de `invoice_closed_tickets`
#[derive(Debug, Clone, Serialize)]
pub struct BatchInvoiceResult {
    pub ticket_no: String,
    pub total: Option<Decimal>,
    pub status: InvoiceStatus,
    pub uuid: Option<String>,
    pub error: Option<String>,
}

// ============================================================================
// SERVICE
// ============================================================================

/// Máquina de estados de facturación:
/// sin factura → PENDING → OK | ERROR, con una sola llamada al certificador por intento.
pub struct InvoiceService {
    store: Arc<dyn BillingStore>,
    provider: Arc<dyn CertificationProvider>,
    emitter: EmitterConfig,
}

impl InvoiceService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        provider: Arc<dyn CertificationProvider>,
        emitter: EmitterConfig,
    ) -> Self {
        Self {
            store,
            provider,
            emitter,
        }
    }

    pub async fn invoice_one(&self, req: InvoiceRequest) -> Result<InvoiceOutcome, InvoicingError> {
        let ticket_no = req.ticket_no.trim().to_string();
        if ticket_no.is_empty() {
            return Err(InvoicingError::Validation("ticket_no es requerido".to_string()));
        }

        // PASO 1: ticket y factura existente
        let ticket = self
            .store
            .find_ticket(&ticket_no)
            .await?
            .ok_or_else(|| InvoicingError::TicketNotFound(ticket_no.clone()))?;

        if let Some(existing) = self.store.find_live_invoice(&ticket_no).await? {
            info!("⏭️ Ticket {} already has a {} invoice", ticket_no, existing.status);
            record_certification("conflict");
            return Err(InvoicingError::Conflict {
                ticket_no,
                status: existing.status,
                uuid: existing.uuid,
            });
        }

        // PASO 2: total facturable
        let total = self
            .store
            .billable_total(&ticket_no)
            .await?
            .unwrap_or(Decimal::ZERO)
            .round_dp(2);
        if total <= Decimal::ZERO {
            record_certification("rejected");
            return Err(InvoicingError::Validation(format!(
                "el ticket {} no tiene monto facturable (total {})",
                ticket_no, total
            )));
        }
        if total >= MAX_AMOUNT {
            record_certification("rejected");
            return Err(InvoicingError::Validation(format!(
                "el total del ticket {} excede el máximo facturable ({})",
                ticket_no, total
            )));
        }

        // PASO 3: receptor
        let nit = normalize_nit(
            non_blank(&req.receptor_nit)
                .or_else(|| non_blank(&ticket.receptor_nit))
                .unwrap_or(CONSUMIDOR_FINAL),
        );
        let receptor = self.resolve_receptor(&nit).await;

        // PASO 4: documento y marcador PENDING
        let reference = req.reference();
        let dte = DteRequest {
            emitter: self.emitter.clone(),
            receptor: receptor.clone(),
            issued_at: Utc::now(),
            items: vec![DteItem {
                descripcion: format!("{} TICKET {}", self.emitter.item_descripcion, ticket_no),
                cantidad: Decimal::ONE,
                precio_unitario: total,
            }],
            reference: reference.clone(),
        };
        let document_xml = build_document(&dte);

        let request_json = json!({
            "ticket_no": ticket_no,
            "total": total,
            "receptor": { "nit": receptor.nit, "nombre": receptor.nombre },
            "serie": req.serie,
            "numero": req.numero,
            "reference": reference,
            "document_xml": document_xml,
        });

        let invoice_id = match self
            .store
            .claim_pending(&ticket_no, total, &receptor.nit, &request_json)
            .await?
        {
            PendingClaim::Claimed { invoice_id } => invoice_id,
            PendingClaim::Conflict { status, uuid } => {
                info!("⏭️ Lost PENDING claim for ticket {} ({})", ticket_no, status);
                record_certification("conflict");
                return Err(InvoicingError::Conflict {
                    ticket_no,
                    status,
                    uuid,
                });
            }
        };
        info!("📝 Invoice {} for ticket {} is PENDING (total {})", invoice_id, ticket_no, total);

        // PASO 5: una sola llamada al certificador
        match self.provider.submit(&document_xml, &reference).await {
            Ok(certification) => {
                let response = json!({
                    "uuid": certification.uuid,
                    "transport": certification.transport,
                    "http_status": certification.http_status,
                    "extractor": certification.extractor,
                    "raw_response": certification.raw_response,
                });
                self.store
                    .mark_certified(invoice_id, &ticket_no, &certification.uuid, &response)
                    .await?;
                record_certification("ok");
                info!("✅ Ticket {} certified with uuid {}", ticket_no, certification.uuid);

                Ok(InvoiceOutcome {
                    invoice_id,
                    ticket_no,
                    uuid: certification.uuid,
                    status: InvoiceStatus::Ok,
                    total,
                    response,
                })
            }
            Err(fel_error) => {
                let response = fel_error.to_audit_json();
                if let Err(store_error) = self.store.mark_failed(invoice_id, &ticket_no, &response).await {
                    error!(
                        "❌ Could not mark invoice {} as ERROR after provider failure: {}",
                        invoice_id, store_error
                    );
                }
                record_certification("error");
                error!("❌ Certification failed for ticket {}: {}", ticket_no, fel_error);

                Err(InvoicingError::Certification {
                    source: fel_error,
                    response,
                })
            }
        }
    }

    /// Factura todos los tickets elegibles. Cada ticket es independiente.
    pub async fn invoice_closed_tickets(&self) -> Result<Vec<BatchInvoiceResult>, InvoicingError> {
        let eligible = self.store.eligible_tickets().await?;
        info!("🧾 Invoicing {} eligible tickets", eligible.len());

        let mut results = Vec::with_capacity(eligible.len());
        for ticket in eligible {
            let outcome = self.invoice_one(InvoiceRequest::for_ticket(ticket.ticket_no.clone())).await;
            let result = match outcome {
                Ok(done) => BatchInvoiceResult {
                    ticket_no: done.ticket_no,
                    total: Some(done.total),
                    status: InvoiceStatus::Ok,
                    uuid: Some(done.uuid),
                    error: None,
                },
                Err(InvoicingError::Conflict { status, uuid, .. }) => BatchInvoiceResult {
                    ticket_no: ticket.ticket_no,
                    total: Some(ticket.total),
                    status,
                    uuid,
                    error: Some("el ticket ya tiene factura".to_string()),
                },
                Err(e) => {
                    warn!("⚠️ Ticket {} not invoiced: {}", ticket.ticket_no, e);
                    BatchInvoiceResult {
                        ticket_no: ticket.ticket_no,
                        total: Some(ticket.total),
                        status: InvoiceStatus::Error,
                        uuid: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            results.push(result);
        }
        Ok(results)
    }

    /// Consulta informativa; cualquier falla deja al receptor como CONSUMIDOR FINAL
    async fn resolve_receptor(&self, nit: &str) -> Receptor {
        if nit == CONSUMIDOR_FINAL {
            return Receptor::consumidor_final();
        }

        let lookup = self.provider.lookup_tax_id(nit).await;
        match lookup.name {
            Some(name) if lookup.found => Receptor {
                nit: nit.to_string(),
                nombre: name,
                direccion: lookup.address,
            },
            _ => {
                warn!("⚠️ NIT {} not resolved ({:?}), using CONSUMIDOR FINAL name", nit, lookup.error);
                Receptor {
                    nit: nit.to_string(),
                    ..Receptor::consumidor_final()
                }
            }
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::domains::billing::{MemoryBillingStore, NewPayment, NewTicket, TicketStatus};
    use crate::domains::fel::{Certification, DocumentFormat, TaxIdLookup};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Certificador falso: responde según el guion y cuenta las llamadas
    struct ScriptedProvider {
        outcome: Result<String, FelError>,
        submitted: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn ok(uuid: &str) -> Arc<Self> {
            Arc::new(Self {
                outcome: Ok(uuid.to_string()),
                submitted: Mutex::new(Vec::new()),
            })
        }

        fn failing(err: FelError) -> Arc<Self> {
            Arc::new(Self {
                outcome: Err(err),
                submitted: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CertificationProvider for ScriptedProvider {
        async fn submit(&self, document_xml: &str, _reference: &str) -> Result<Certification, FelError> {
            self.submitted.lock().push(document_xml.to_string());
            self.outcome.clone().map(|uuid| Certification {
                uuid,
                raw_response: "<Response/>".to_string(),
                transport: "soap11".to_string(),
                http_status: 200,
                extractor: "xpath_uuid",
            })
        }

        async fn lookup_tax_id(&self, nit: &str) -> TaxIdLookup {
            TaxIdLookup {
                found: true,
                nit: nit.to_string(),
                name: Some("EMPRESA RECEPTORA".to_string()),
                address: None,
                source: Some("soap11".to_string()),
                error: None,
            }
        }

        async fn fetch_document(&self, _uuid: &str, _format: DocumentFormat) -> Result<Vec<u8>, FelError> {
            Ok(Vec::new())
        }
    }

    async fn closed_ticket(store: &MemoryBillingStore, no: &str, paid_cents: Option<i64>) {
        store
            .upsert_ticket(&NewTicket {
                ticket_no: no.to_string(),
                plate: Some("P-555XYZ".to_string()),
                status: Some(TicketStatus::Closed),
                entry_at: None,
                exit_at: Some(Utc::now()),
                duration_min: Some(90),
                amount: None,
                receptor_nit: None,
            })
            .await
            .unwrap();
        if let Some(cents) = paid_cents {
            store
                .insert_payment(
                    &NewPayment {
                        ticket_no: no.to_string(),
                        amount: Decimal::new(cents, 2),
                        method: Some("TARJETA".to_string()),
                        paid_at: Some(Utc::now()),
                    },
                    false,
                )
                .await
                .unwrap();
        }
    }

    fn service(store: &MemoryBillingStore, provider: Arc<ScriptedProvider>) -> InvoiceService {
        InvoiceService::new(Arc::new(store.clone()), provider, test_config().emitter)
    }

    #[tokio::test]
    async fn test_invoice_one_certifies_and_marks_ticket() {
        let store = MemoryBillingStore::new();
        closed_ticket(&store, "T-100", Some(15000)).await;
        let provider = ScriptedProvider::ok("ABC-123");

        let outcome = service(&store, provider.clone())
            .invoice_one(InvoiceRequest::for_ticket("T-100"))
            .await
            .unwrap();

        assert_eq!(outcome.status, InvoiceStatus::Ok);
        assert_eq!(outcome.uuid, "ABC-123");
        assert_eq!(outcome.total, Decimal::new(15000, 2));
        assert_eq!(provider.submitted.lock().len(), 1);

        let ticket = store.find_ticket("T-100").await.unwrap().unwrap();
        assert_eq!(ticket.invoice_status.as_deref(), Some("OK"));
        assert!(ticket.invoiced_at.is_some());
    }

    #[tokio::test]
    async fn test_zero_total_is_rejected_without_row() {
        let store = MemoryBillingStore::new();
        closed_ticket(&store, "T-0", None).await;

        let err = service(&store, ScriptedProvider::ok("X"))
            .invoice_one(InvoiceRequest::for_ticket("T-0"))
            .await
            .unwrap_err();

        assert!(matches!(err, InvoicingError::Validation(_)));
        assert!(store.invoices_for("T-0").is_empty());
    }

    #[tokio::test]
    async fn test_blank_and_unknown_tickets() {
        let store = MemoryBillingStore::new();
        let svc = service(&store, ScriptedProvider::ok("X"));

        let blank = svc.invoice_one(InvoiceRequest::for_ticket("   ")).await.unwrap_err();
        assert!(matches!(blank, InvoicingError::Validation(_)));

        let unknown = svc.invoice_one(InvoiceRequest::for_ticket("NOPE")).await.unwrap_err();
        assert!(matches!(unknown, InvoicingError::TicketNotFound(_)));
    }

    #[tokio::test]
    async fn test_certified_ticket_conflicts_and_row_is_unchanged() {
        let store = MemoryBillingStore::new();
        closed_ticket(&store, "T-1", Some(1000)).await;
        let provider = ScriptedProvider::ok("UUID-1");
        let svc = service(&store, provider.clone());

        svc.invoice_one(InvoiceRequest::for_ticket("T-1")).await.unwrap();
        let err = svc.invoice_one(InvoiceRequest::for_ticket("T-1")).await.unwrap_err();

        match err {
            InvoicingError::Conflict { status, uuid, .. } => {
                assert_eq!(status, InvoiceStatus::Ok);
                assert_eq!(uuid.as_deref(), Some("UUID-1"));
            }
            other => panic!("expected conflict, got {:?}", other),
        }
        assert_eq!(provider.submitted.lock().len(), 1);
        let rows = store.invoices_for("T-1");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, InvoiceStatus::Ok);
    }

    #[tokio::test]
    async fn test_provider_failure_records_error_and_allows_retry() {
        let store = MemoryBillingStore::new();
        closed_ticket(&store, "T-2", Some(2500)).await;

        let failing = ScriptedProvider::failing(FelError::provider(
            "NIT receptor inválido",
            Some("<Response><Result>false</Result></Response>".to_string()),
        ));
        let err = service(&store, failing)
            .invoice_one(InvoiceRequest::for_ticket("T-2"))
            .await
            .unwrap_err();
        assert!(matches!(err, InvoicingError::Certification { .. }));

        let rows = store.invoices_for("T-2");
        assert_eq!(rows[0].status, InvoiceStatus::Error);
        let response = rows[0].response_json.clone().unwrap();
        assert_eq!(response["kind"], "provider");
        let ticket = store.find_ticket("T-2").await.unwrap().unwrap();
        assert_eq!(ticket.invoice_status.as_deref(), Some("ERROR"));

        // Reintento manual sobre la fila en ERROR
        let outcome = service(&store, ScriptedProvider::ok("RETRY-1"))
            .invoice_one(InvoiceRequest::for_ticket("T-2"))
            .await
            .unwrap();
        assert_eq!(outcome.invoice_id, rows[0].id);
        assert_eq!(store.invoices_for("T-2")[0].status, InvoiceStatus::Ok);
    }

    #[tokio::test]
    async fn test_receptor_and_reference_in_request_json() {
        let store = MemoryBillingStore::new();
        closed_ticket(&store, "T-3", Some(5000)).await;
        let provider = ScriptedProvider::ok("U-3");

        service(&store, provider.clone())
            .invoice_one(InvoiceRequest {
                ticket_no: "T-3".to_string(),
                receptor_nit: Some(" 123456-7 ".to_string()),
                serie: Some("A".to_string()),
                numero: Some("77".to_string()),
            })
            .await
            .unwrap();

        let request = store.invoices_for("T-3")[0].request_json.clone().unwrap();
        assert_eq!(request["receptor"]["nit"], "1234567");
        assert_eq!(request["receptor"]["nombre"], "EMPRESA RECEPTORA");
        assert_eq!(request["reference"], "A-77");
        assert!(provider.submitted.lock()[0].contains("IDReceptor=\"1234567\""));
    }

    /// Ambas llamadas pasan la verificación de factura viva antes de reclamar
    struct RacingProvider {
        gate: tokio::sync::Barrier,
        submits: Mutex<usize>,
    }

    #[async_trait]
    impl CertificationProvider for RacingProvider {
        async fn submit(&self, _document_xml: &str, _reference: &str) -> Result<Certification, FelError> {
            *self.submits.lock() += 1;
            tokio::task::yield_now().await;
            Ok(Certification {
                uuid: "RACE-1".to_string(),
                raw_response: "<Response/>".to_string(),
                transport: "soap11".to_string(),
                http_status: 200,
                extractor: "xpath_uuid",
            })
        }

        async fn lookup_tax_id(&self, nit: &str) -> TaxIdLookup {
            self.gate.wait().await;
            TaxIdLookup {
                found: true,
                nit: nit.to_string(),
                name: Some("EMPRESA RECEPTORA".to_string()),
                ..Default::default()
            }
        }

        async fn fetch_document(&self, _uuid: &str, _format: DocumentFormat) -> Result<Vec<u8>, FelError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_concurrent_invoices_for_one_ticket_submit_once() {
        let store = MemoryBillingStore::new();
        closed_ticket(&store, "T-RACE", Some(4000)).await;
        let provider = Arc::new(RacingProvider {
            gate: tokio::sync::Barrier::new(2),
            submits: Mutex::new(0),
        });
        let svc = InvoiceService::new(Arc::new(store.clone()), provider.clone(), test_config().emitter);

        let request = InvoiceRequest {
            receptor_nit: Some("1234567".to_string()),
            ..InvoiceRequest::for_ticket("T-RACE")
        };
        let (a, b) = tokio::join!(svc.invoice_one(request.clone()), svc.invoice_one(request.clone()));

        let (won, lost) = match (a, b) {
            (Ok(won), Err(lost)) | (Err(lost), Ok(won)) => (won, lost),
            other => panic!("expected one success and one conflict, got {:?}", other),
        };
        assert_eq!(won.uuid, "RACE-1");
        match lost {
            InvoicingError::Conflict { status, .. } => {
                assert!(matches!(status, InvoiceStatus::Pending | InvoiceStatus::Ok))
            }
            other => panic!("expected conflict, got {:?}", other),
        }

        assert_eq!(*provider.submits.lock(), 1);
        let rows = store.invoices_for("T-RACE");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, InvoiceStatus::Ok);
    }

    #[tokio::test]
    async fn test_total_above_column_range_is_rejected() {
        let store = MemoryBillingStore::new();
        closed_ticket(&store, "T-BIG", Some(600_000_000_000)).await;
        store
            .insert_payment(
                &NewPayment {
                    ticket_no: "T-BIG".to_string(),
                    amount: Decimal::new(600_000_000_000, 2),
                    method: None,
                    paid_at: Some(Utc::now()),
                },
                false,
            )
            .await
            .unwrap();
        let provider = ScriptedProvider::ok("X");

        let err = service(&store, provider.clone())
            .invoice_one(InvoiceRequest::for_ticket("T-BIG"))
            .await
            .unwrap_err();

        assert!(matches!(err, InvoicingError::Validation(_)));
        assert!(provider.submitted.lock().is_empty());
        assert!(store.invoices_for("T-BIG").is_empty());
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let store = MemoryBillingStore::new();
        closed_ticket(&store, "B-1", Some(1000)).await;
        closed_ticket(&store, "B-2", Some(2000)).await;

        let failing = ScriptedProvider::failing(FelError::transport("timeout"));
        let results = service(&store, failing).invoice_closed_tickets().await.unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.status == InvoiceStatus::Error));
        assert!(results.iter().all(|r| r.error.is_some()));
        assert_eq!(store.invoices_for("B-1").len(), 1);
        assert_eq!(store.invoices_for("B-2").len(), 1);
    }
}
