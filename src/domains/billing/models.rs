use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// STATUS ENUMS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TicketStatus {
    Open,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "OPEN",
            TicketStatus::Closed => "CLOSED",
        }
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OPEN" => Ok(TicketStatus::Open),
            "CLOSED" => Ok(TicketStatus::Closed),
            other => Err(format!("estado de ticket inválido: '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InvoiceStatus {
    Pending,
    Ok,
    Error,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "PENDING",
            InvoiceStatus::Ok => "OK",
            InvoiceStatus::Error => "ERROR",
        }
    }

    /// PENDING y OK bloquean un nuevo intento de certificación
    pub fn is_live(&self) -> bool {
        matches!(self, InvoiceStatus::Pending | InvoiceStatus::Ok)
    }
}

impl FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(InvoiceStatus::Pending),
            "OK" => Ok(InvoiceStatus::Ok),
            "ERROR" => Ok(InvoiceStatus::Error),
            other => Err(format!("estado de factura inválido: '{}'", other)),
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// TABLE MODELS (tickets, payments, invoices)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket_no: String,
    pub plate: Option<String>,
    pub status: TicketStatus,
    pub entry_at: Option<DateTime<Utc>>,
    pub exit_at: Option<DateTime<Utc>>,
    pub duration_min: Option<i32>,
    pub amount: Option<Decimal>,
    pub receptor_nit: Option<String>,
    pub invoiced_at: Option<DateTime<Utc>>,
    pub invoice_status: Option<String>,
}

impl Ticket {
    /// Fecha usada por los reportes: salida, o entrada si aún no hay salida
    pub fn effective_at(&self) -> Option<DateTime<Utc>> {
        self.exit_at.or(self.entry_at)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub ticket_no: String,
    pub amount: Decimal,
    pub method: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: i64,
    pub ticket_no: String,
    pub total: Decimal,
    pub uuid: Option<String>,
    pub status: InvoiceStatus,
    pub request_json: Option<serde_json::Value>,
    pub response_json: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// WRITE MODELS (ya validados por la capa de ingesta)
// ============================================================================

/// Ticket listo para upsert. Los campos `None` conservan el valor guardado.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTicket {
    pub ticket_no: String,
    pub plate: Option<String>,
    pub status: Option<TicketStatus>,
    pub entry_at: Option<DateTime<Utc>>,
    pub exit_at: Option<DateTime<Utc>>,
    pub duration_min: Option<i32>,
    pub amount: Option<Decimal>,
    pub receptor_nit: Option<String>,
}

impl NewTicket {
    pub fn event_at(&self) -> Option<DateTime<Utc>> {
        self.exit_at.or(self.entry_at)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub ticket_no: String,
    pub amount: Decimal,
    pub method: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl NewPayment {
    /// Duplicado exacto: mismo ticket, monto y fecha de pago
    pub fn same_as(&self, other: &Payment) -> bool {
        self.ticket_no == other.ticket_no
            && self.amount == other.amount
            && self.paid_at == other.paid_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketWrite {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchCounts {
    pub tickets_inserted: usize,
    pub tickets_updated: usize,
    pub payments_inserted: usize,
    pub payments_duplicated: usize,
}

// ============================================================================
// STATE MACHINE SUPPORT
// ============================================================================

/// Ticket cerrado, pagado y sin factura viva
#[derive(Debug, Clone, Serialize)]
pub struct EligibleTicket {
    pub ticket_no: String,
    pub plate: Option<String>,
    pub receptor_nit: Option<String>,
    pub exit_at: Option<DateTime<Utc>>,
    pub total: Decimal,
}

/// Resultado de reclamar el marcador PENDING
#[derive(Debug, Clone, PartialEq)]
pub enum PendingClaim {
    Claimed { invoice_id: i64 },
    /// Ya existe una factura PENDING u OK para el ticket
    Conflict { status: InvoiceStatus, uuid: Option<String> },
}

// ============================================================================
// REPORTING
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct InvoiceFilter {
    pub from: Option<DateTime<Utc>>,
    /// Exclusivo
    pub to: Option<DateTime<Utc>>,
    pub status: Option<InvoiceStatus>,
    pub nit: Option<String>,
    pub uuid: Option<String>,
    pub limit: i64,
}

impl InvoiceFilter {
    /// Misma semántica que el WHERE de `PgBillingStore::issued_invoices`
    pub fn matches(&self, row: &IssuedInvoiceRow) -> bool {
        if let Some(from) = self.from {
            match row.effective_at {
                Some(at) if at >= from => {}
                _ => return false,
            }
        }
        if let Some(to) = self.to {
            match row.effective_at {
                Some(at) if at < to => {}
                _ => return false,
            }
        }
        if let Some(status) = self.status {
            if row.status != status {
                return false;
            }
        }
        if let Some(ref nit) = self.nit {
            if row.receptor_nit.as_deref() != Some(nit.as_str()) {
                return false;
            }
        }
        if let Some(ref uuid) = self.uuid {
            let needle = uuid.to_ascii_lowercase();
            match row.uuid {
                Some(ref u) if u.to_ascii_lowercase().contains(&needle) => {}
                _ => return false,
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedInvoiceRow {
    pub id: i64,
    pub ticket_no: String,
    pub plate: Option<String>,
    pub total: Decimal,
    pub uuid: Option<String>,
    pub status: InvoiceStatus,
    pub receptor_nit: Option<String>,
    pub effective_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DashboardSummary {
    pub tickets_open: i64,
    pub tickets_closed: i64,
    pub tickets_eligible: i64,
    pub invoices_pending: i64,
    pub invoices_ok: i64,
    pub invoices_error: i64,
    pub certified_total: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(status: InvoiceStatus, day: u32) -> IssuedInvoiceRow {
        IssuedInvoiceRow {
            id: 1,
            ticket_no: "T-1".to_string(),
            plate: None,
            total: Decimal::new(1500, 2),
            uuid: Some("ABC-123".to_string()),
            status,
            receptor_nit: Some("CF".to_string()),
            effective_at: Some(Utc.with_ymd_and_hms(2025, 1, day, 12, 0, 0).unwrap()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("closed".parse::<TicketStatus>(), Ok(TicketStatus::Closed));
        assert_eq!(" ok ".parse::<InvoiceStatus>(), Ok(InvoiceStatus::Ok));
        assert!("PAID".parse::<InvoiceStatus>().is_err());
        assert!(InvoiceStatus::Pending.is_live());
        assert!(!InvoiceStatus::Error.is_live());
    }

    #[test]
    fn test_filter_matches_status_and_range() {
        let filter = InvoiceFilter {
            from: Some(Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap()),
            to: Some(Utc.with_ymd_and_hms(2025, 1, 20, 0, 0, 0).unwrap()),
            status: Some(InvoiceStatus::Error),
            ..Default::default()
        };

        assert!(filter.matches(&row(InvoiceStatus::Error, 15)));
        assert!(!filter.matches(&row(InvoiceStatus::Ok, 15)));
        assert!(!filter.matches(&row(InvoiceStatus::Error, 5)));
        assert!(!filter.matches(&row(InvoiceStatus::Error, 20)));
    }

    #[test]
    fn test_filter_uuid_is_case_insensitive_substring() {
        let filter = InvoiceFilter {
            uuid: Some("abc".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&row(InvoiceStatus::Ok, 1)));

        let filter = InvoiceFilter {
            nit: Some("1234567K".to_string()),
            ..Default::default()
        };
        assert!(!filter.matches(&row(InvoiceStatus::Ok, 1)));
    }
}
