// ============================================================================
// PROMETHEUS METRICS
// ============================================================================
// Métricas HTTP, de base de datos y del flujo FEL (certificación, G4S, ingesta)
// ============================================================================

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};

lazy_static! {
    // ========================================================================
    // HTTP REQUEST METRICS
    // ========================================================================

    /// Total de requests HTTP por método, endpoint y status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "endpoint", "status"]
    )
    .unwrap();

    /// Duración de requests HTTP en segundos
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "endpoint"],
        vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .unwrap();

    // ========================================================================
    // DATABASE METRICS
    // ========================================================================

    /// Conexiones activas del pool
    pub static ref DB_CONNECTIONS_ACTIVE: IntGaugeVec = register_int_gauge_vec!(
        "db_connections_active",
        "Number of active database connections",
        &["pool"]
    )
    .unwrap();

    /// Conexiones idle del pool
    pub static ref DB_CONNECTIONS_IDLE: IntGaugeVec = register_int_gauge_vec!(
        "db_connections_idle",
        "Number of idle database connections",
        &["pool"]
    )
    .unwrap();

    // ========================================================================
    // FEL METRICS
    // ========================================================================

    /// Intentos de certificación por resultado (ok, error, conflict, rejected)
    pub static ref FEL_CERTIFICATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "fel_certifications_total",
        "Invoice certification attempts by outcome",
        &["status"]
    )
    .unwrap();

    /// Latencia de llamadas a G4S
    pub static ref FEL_PROVIDER_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "fel_provider_duration_seconds",
        "G4S call duration in seconds",
        &["operation"],
        vec![0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]
    )
    .unwrap();

    /// Filas recibidas por ingesta (kind = ticket|payment, outcome = inserted|updated|duplicate|skipped)
    pub static ref INGESTED_ROWS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "ingested_rows_total",
        "Rows received by the ingestion gateway",
        &["kind", "outcome"]
    )
    .unwrap();

    // ========================================================================
    // AUTHENTICATION METRICS
    // ========================================================================

    pub static ref AUTH_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "auth_attempts_total",
        "Total authentication attempts",
        &["auth_type", "status"]
    )
    .unwrap();
}

/// Helper para registrar una request HTTP
pub fn record_http_request(method: &str, endpoint: &str, status: u16, duration_secs: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, endpoint, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, endpoint])
        .observe(duration_secs);
}

pub fn record_certification(status: &str) {
    FEL_CERTIFICATIONS_TOTAL.with_label_values(&[status]).inc();
}

pub fn record_ingested(kind: &str, outcome: &str, count: usize) {
    if count > 0 {
        INGESTED_ROWS_TOTAL
            .with_label_values(&[kind, outcome])
            .inc_by(count as u64);
    }
}

pub fn record_pool_state(pool: &str, size: u32, idle: usize) {
    DB_CONNECTIONS_ACTIVE
        .with_label_values(&[pool])
        .set(i64::from(size) - idle as i64);
    DB_CONNECTIONS_IDLE.with_label_values(&[pool]).set(idle as i64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_certification_increments() {
        let before = FEL_CERTIFICATIONS_TOTAL.with_label_values(&["ok"]).get();
        record_certification("ok");
        assert!(FEL_CERTIFICATIONS_TOTAL.with_label_values(&["ok"]).get() > before);
    }

    #[test]
    fn test_record_ingested_skips_zero() {
        let before = INGESTED_ROWS_TOTAL.with_label_values(&["ticket", "skipped"]).get();
        record_ingested("ticket", "skipped", 0);
        record_ingested("ticket", "skipped", 2);
        assert!(INGESTED_ROWS_TOTAL.with_label_values(&["ticket", "skipped"]).get() >= before + 2);
    }
}
