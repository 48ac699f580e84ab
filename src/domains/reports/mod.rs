//! Consultas de facturas emitidas, exportación CSV y resumen del tablero.
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::America::Guatemala;
use serde::Deserialize;
use thiserror::Error;

use crate::domains::billing::{BillingStore, InvoiceFilter, InvoiceStatus, IssuedInvoiceRow, StoreError};
use crate::domains::fel::normalize_nit;
use crate::domains::ingestion::validation::{local_to_utc, parse_timestamp};

pub const DEFAULT_LIMIT: i64 = 500;
pub const MAX_LIMIT: i64 = 5000;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Query string de `/api/facturacion/emitidas`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub status: Option<String>,
    pub nit: Option<String>,
    pub uuid: Option<String>,
    pub limit: Option<i64>,
    pub format: Option<String>,
}

impl ReportQuery {
    pub fn wants_csv(&self) -> bool {
        self.format
            .as_deref()
            .map(|f| f.eq_ignore_ascii_case("csv"))
            .unwrap_or(false)
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Fecha sola = día local completo (inicio incluido, `to` hasta el día siguiente exclusivo).
/// Con hora se usa el instante tal cual.
fn bound(raw: &str, upper: bool) -> Result<DateTime<Utc>, ReportError> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let day = if upper { date + Duration::days(1) } else { date };
        return day
            .and_hms_opt(0, 0, 0)
            .and_then(local_to_utc)
            .ok_or_else(|| ReportError::InvalidFilter(format!("fecha inválida: {}", raw)));
    }
    parse_timestamp(raw).map_err(ReportError::InvalidFilter)
}

pub fn parse_filter(query: &ReportQuery) -> Result<InvoiceFilter, ReportError> {
    let from = present(&query.from).map(|raw| bound(raw, false)).transpose()?;
    let to = present(&query.to).map(|raw| bound(raw, true)).transpose()?;
    if let (Some(from), Some(to)) = (from, to) {
        if from >= to {
            return Err(ReportError::InvalidFilter("from debe ser anterior a to".to_string()));
        }
    }

    let status = present(&query.status)
        .map(|raw| raw.parse::<InvoiceStatus>())
        .transpose()
        .map_err(ReportError::InvalidFilter)?;

    let limit = match query.limit {
        Some(limit) if limit > 0 => limit.min(MAX_LIMIT),
        _ => DEFAULT_LIMIT,
    };

    Ok(InvoiceFilter {
        from,
        to,
        status,
        nit: present(&query.nit).map(normalize_nit),
        uuid: present(&query.uuid).map(str::to_string),
        limit,
    })
}

pub async fn issued_invoices(
    store: &dyn BillingStore,
    query: &ReportQuery,
) -> Result<(InvoiceFilter, Vec<IssuedInvoiceRow>), ReportError> {
    let filter = parse_filter(query)?;
    let rows = store.issued_invoices(&filter).await?;
    Ok((filter, rows))
}

// ============================================================================
// CSV
// ============================================================================

const CSV_HEADER: &str = "id,ticket_no,plate,receptor_nit,total,status,uuid,fecha,created_at";

fn csv_field(value: &str) -> String {
    if value.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn local_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.with_timezone(&Guatemala).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

pub fn render_csv(rows: &[IssuedInvoiceRow]) -> String {
    let mut out = String::with_capacity(64 * (rows.len() + 1));
    out.push_str(CSV_HEADER);
    out.push_str("\r\n");

    for row in rows {
        let fields = [
            row.id.to_string(),
            row.ticket_no.clone(),
            row.plate.clone().unwrap_or_default(),
            row.receptor_nit.clone().unwrap_or_default(),
            format!("{:.2}", row.total),
            row.status.as_str().to_string(),
            row.uuid.clone().unwrap_or_default(),
            local_time(row.effective_at),
            local_time(Some(row.created_at)),
        ];
        let line: Vec<String> = fields.iter().map(|f| csv_field(f)).collect();
        out.push_str(&line.join(","));
        out.push_str("\r\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    #[test]
    fn test_parse_filter_month_of_january() {
        let filter = parse_filter(&ReportQuery {
            from: Some("2025-01-01".to_string()),
            to: Some("2025-01-31".to_string()),
            status: Some("error".to_string()),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(filter.from, Some(Utc.with_ymd_and_hms(2025, 1, 1, 6, 0, 0).unwrap()));
        assert_eq!(filter.to, Some(Utc.with_ymd_and_hms(2025, 2, 1, 6, 0, 0).unwrap()));
        assert_eq!(filter.status, Some(InvoiceStatus::Error));
        assert_eq!(filter.limit, DEFAULT_LIMIT);
    }

    #[test]
    fn test_parse_filter_rejects_garbage() {
        let bad_status = ReportQuery {
            status: Some("PAGADA".to_string()),
            ..Default::default()
        };
        assert!(parse_filter(&bad_status).is_err());

        let inverted = ReportQuery {
            from: Some("2025-02-01".to_string()),
            to: Some("2025-01-01".to_string()),
            ..Default::default()
        };
        assert!(parse_filter(&inverted).is_err());

        let capped = ReportQuery {
            limit: Some(1_000_000),
            nit: Some("123-4".to_string()),
            ..Default::default()
        };
        let filter = parse_filter(&capped).unwrap();
        assert_eq!(filter.limit, MAX_LIMIT);
        assert_eq!(filter.nit.as_deref(), Some("1234"));
    }

    #[test]
    fn test_render_csv_quotes_fields() {
        let rows = vec![IssuedInvoiceRow {
            id: 7,
            ticket_no: "T-1".to_string(),
            plate: Some("P,1".to_string()),
            total: Decimal::new(15000, 2),
            uuid: Some("ABC-123".to_string()),
            status: InvoiceStatus::Ok,
            receptor_nit: Some("CF".to_string()),
            effective_at: Some(Utc.with_ymd_and_hms(2025, 1, 10, 18, 0, 0).unwrap()),
            created_at: Utc.with_ymd_and_hms(2025, 1, 10, 18, 5, 0).unwrap(),
        }];

        let csv = render_csv(&rows);
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER));
        assert_eq!(
            lines.next(),
            Some("7,T-1,\"P,1\",CF,150.00,OK,ABC-123,2025-01-10 12:00:00,2025-01-10 12:05:00")
        );
    }
}
