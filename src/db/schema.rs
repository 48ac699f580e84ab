use sqlx::PgPool;
use tracing::info;

// `tickets.ticket_no` es PRIMARY KEY: las consultas agrupan por él
const SCHEMA_STATEMENTS: [&str; 5] = [
    r#"
    CREATE TABLE IF NOT EXISTS tickets (
        ticket_no       TEXT PRIMARY KEY,
        plate           TEXT,
        status          TEXT NOT NULL DEFAULT 'OPEN' CHECK (status IN ('OPEN', 'CLOSED')),
        entry_at        TIMESTAMPTZ,
        exit_at         TIMESTAMPTZ,
        duration_min    INTEGER,
        amount          NUMERIC(12,2),
        receptor_nit    TEXT,
        invoiced_at     TIMESTAMPTZ,
        invoice_status  TEXT,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at      TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS payments (
        id          BIGSERIAL PRIMARY KEY,
        ticket_no   TEXT NOT NULL,
        amount      NUMERIC(12,2) NOT NULL CHECK (amount > 0),
        method      TEXT,
        paid_at     TIMESTAMPTZ,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS invoices (
        id              BIGSERIAL PRIMARY KEY,
        ticket_no       TEXT NOT NULL UNIQUE,
        total           NUMERIC(12,2) NOT NULL,
        uuid            TEXT,
        status          TEXT NOT NULL CHECK (status IN ('PENDING', 'OK', 'ERROR')),
        request_json    JSONB,
        response_json   JSONB,
        created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at      TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_payments_ticket_no ON payments (ticket_no)",
    "CREATE INDEX IF NOT EXISTS idx_invoices_uuid ON invoices (uuid)",
];

/// Crea las tablas e índices si no existen
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for statement in SCHEMA_STATEMENTS {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    tx.commit().await?;
    info!("🗄️ Schema ready (tickets, payments, invoices)");
    Ok(())
}
