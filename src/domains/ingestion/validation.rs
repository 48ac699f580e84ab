use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::America::Guatemala;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domains::billing::{NewPayment, NewTicket, TicketStatus};
use crate::domains::fel::normalize_nit;

const LOCAL_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Cota exclusiva de las columnas `NUMERIC(12,2)`
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(1_410_065_408, 2, 0, false, 0);

/// Fila descartada de un lote
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRow {
    pub kind: &'static str,
    pub index: usize,
    pub ticket_no: Option<String>,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ValidatedBatch {
    pub tickets: Vec<NewTicket>,
    pub payments: Vec<NewPayment>,
    pub skipped: Vec<SkippedRow>,
}

/// Ventana `[from, to]` de la sincronización
#[derive(Debug, Clone, Copy)]
pub struct SyncWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl SyncWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.from && at <= self.to
    }
}

// ============================================================================
// RAW ROWS (tal como llegan de ZKTeco o del cliente push)
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawTicket {
    #[serde(default, alias = "ticketNo", alias = "ticket")]
    ticket_no: Option<Value>,
    #[serde(default, alias = "placa")]
    plate: Option<Value>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, alias = "entry_time")]
    entry_at: Option<String>,
    #[serde(default, alias = "exit_time")]
    exit_at: Option<String>,
    #[serde(default)]
    duration_min: Option<i32>,
    #[serde(default)]
    amount: Option<Value>,
    #[serde(default, alias = "nit")]
    receptor_nit: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawPayment {
    #[serde(default, alias = "ticketNo", alias = "ticket")]
    ticket_no: Option<Value>,
    #[serde(default)]
    amount: Option<Value>,
    #[serde(default, alias = "payment_method")]
    method: Option<String>,
    #[serde(default, alias = "paid_time")]
    paid_at: Option<String>,
}

// ============================================================================
// FIELD PARSERS
// ============================================================================

/// RFC 3339, o `YYYY-MM-DD HH:MM:SS` en hora local de Guatemala
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in LOCAL_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return local_to_utc(naive).ok_or_else(|| format!("hora local inexistente: '{}'", raw));
        }
    }
    Err(format!("fecha inválida: '{}'", raw))
}

/// Acepta además una fecha sola (`YYYY-MM-DD`); `end_of_day` la lleva a 23:59:59 local
pub fn parse_window_bound(raw: &str, end_of_day: bool) -> Result<DateTime<Utc>, String> {
    if let Ok(date) = NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
        let time = if end_of_day {
            date.and_hms_opt(23, 59, 59)
        } else {
            date.and_hms_opt(0, 0, 0)
        };
        return time
            .and_then(local_to_utc)
            .ok_or_else(|| format!("fecha inválida: '{}'", raw));
    }
    parse_timestamp(raw)
}

pub fn local_to_utc(naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    Guatemala
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

fn optional_timestamp(field: &str, raw: &Option<String>) -> Result<Option<DateTime<Utc>>, String> {
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_timestamp(value)
            .map(Some)
            .map_err(|e| format!("{}: {}", field, e)),
    }
}

fn parse_amount(value: &Value) -> Result<Decimal, String> {
    let parsed = match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string())),
        Value::String(s) => Decimal::from_str(s.trim()),
        other => return Err(format!("amount no numérico: {}", other)),
    };
    let amount = parsed
        .map(|d| d.round_dp(2))
        .map_err(|_| format!("amount no numérico: {}", value))?;
    if amount >= MAX_AMOUNT {
        return Err(format!("amount fuera de rango: {}", amount));
    }
    Ok(amount)
}

fn text_value(value: &Option<Value>) -> Option<String> {
    let text = match value.as_ref()? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

// ============================================================================
// ROW VALIDATION
// ============================================================================

pub fn validate_ticket(row: &Value) -> Result<NewTicket, String> {
    if !row.is_object() {
        return Err("la fila no es un objeto JSON".to_string());
    }
    let raw: RawTicket =
        serde_json::from_value(row.clone()).map_err(|e| format!("fila inválida: {}", e))?;

    let ticket_no = text_value(&raw.ticket_no).ok_or_else(|| "ticket_no requerido".to_string())?;
    let entry_at = optional_timestamp("entry_at", &raw.entry_at)?;
    let exit_at = optional_timestamp("exit_at", &raw.exit_at)?;

    if let (Some(entry), Some(exit)) = (entry_at, exit_at) {
        if exit < entry {
            return Err("exit_at es anterior a entry_at".to_string());
        }
    }

    let status = match raw.status.as_deref().map(str::trim) {
        None | Some("") => exit_at.map(|_| TicketStatus::Closed),
        Some(s) => Some(TicketStatus::from_str(s)?),
    };

    let amount = match raw.amount {
        None | Some(Value::Null) => None,
        Some(ref value) => {
            let amount = parse_amount(value)?;
            if amount < Decimal::ZERO {
                return Err(format!("amount negativo: {}", amount));
            }
            Some(amount)
        }
    };

    if let Some(minutes) = raw.duration_min {
        if minutes < 0 {
            return Err(format!("duration_min negativo: {}", minutes));
        }
    }
    let duration_min = raw.duration_min.or_else(|| match (entry_at, exit_at) {
        (Some(entry), Some(exit)) => i32::try_from((exit - entry).num_minutes()).ok(),
        _ => None,
    });

    Ok(NewTicket {
        ticket_no,
        plate: text_value(&raw.plate),
        status,
        entry_at,
        exit_at,
        duration_min,
        amount,
        receptor_nit: text_value(&raw.receptor_nit).map(|nit| normalize_nit(&nit)),
    })
}

pub fn validate_payment(row: &Value) -> Result<NewPayment, String> {
    if !row.is_object() {
        return Err("la fila no es un objeto JSON".to_string());
    }
    let raw: RawPayment =
        serde_json::from_value(row.clone()).map_err(|e| format!("fila inválida: {}", e))?;

    let ticket_no = text_value(&raw.ticket_no).ok_or_else(|| "ticket_no requerido".to_string())?;
    let amount = match raw.amount {
        None | Some(Value::Null) => return Err("amount requerido".to_string()),
        Some(ref value) => parse_amount(value)?,
    };
    if amount <= Decimal::ZERO {
        return Err(format!("amount debe ser mayor a cero: {}", amount));
    }

    Ok(NewPayment {
        ticket_no,
        amount,
        method: raw.method.map(|m| m.trim().to_string()).filter(|m| !m.is_empty()),
        paid_at: optional_timestamp("paid_at", &raw.paid_at)?,
    })
}

fn row_ticket_no(row: &Value) -> Option<String> {
    row.get("ticket_no").and_then(|v| text_value(&Some(v.clone())))
}

/// Valida un lote fila por fila. Las filas inválidas (o fuera de la ventana) se reportan y se omiten.
pub fn validate_batch(tickets: &[Value], payments: &[Value], window: Option<SyncWindow>) -> ValidatedBatch {
    let mut batch = ValidatedBatch::default();

    for (index, row) in tickets.iter().enumerate() {
        let checked = validate_ticket(row).and_then(|ticket| match window {
            Some(w) => match ticket.event_at() {
                Some(at) if w.contains(at) => Ok(ticket),
                Some(_) => Err("fuera de la ventana de sincronización".to_string()),
                None => Err("sin fecha para la ventana de sincronización".to_string()),
            },
            None => Ok(ticket),
        });
        match checked {
            Ok(ticket) => batch.tickets.push(ticket),
            Err(reason) => batch.skipped.push(SkippedRow {
                kind: "ticket",
                index,
                ticket_no: row_ticket_no(row),
                reason,
            }),
        }
    }

    for (index, row) in payments.iter().enumerate() {
        let checked = validate_payment(row).and_then(|payment| match window {
            Some(w) => match payment.paid_at {
                Some(at) if w.contains(at) => Ok(payment),
                Some(_) => Err("fuera de la ventana de sincronización".to_string()),
                None => Err("sin paid_at para la ventana de sincronización".to_string()),
            },
            None => Ok(payment),
        });
        match checked {
            Ok(payment) => batch.payments.push(payment),
            Err(reason) => batch.skipped.push(SkippedRow {
                kind: "payment",
                index,
                ticket_no: row_ticket_no(row),
                reason,
            }),
        }
    }

    batch
}
