// Pool de conexiones PostgreSQL con perfiles por entorno
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::info;

use crate::observability::metrics::record_pool_state;

/// Database connection pool tuning
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl DatabaseConfig {
    /// Un solo servicio atendiendo caseta y oficina: pocas conexiones, fallar rápido
    pub fn production() -> Self {
        Self {
            max_connections: 15,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
            max_lifetime: Duration::from_secs(3600),
        }
    }

    pub fn development() -> Self {
        Self {
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(300),
            max_lifetime: Duration::from_secs(1800),
        }
    }

    /// `DB_PROFILE`: `development` o cualquier otro valor → producción
    pub fn for_profile(profile: &str) -> Self {
        match profile.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Self::development(),
            _ => Self::production(),
        }
    }
}

/// Create tuned database pool
pub async fn create_optimized_db_pool(
    database_url: &str,
    config: DatabaseConfig,
) -> Result<PgPool, sqlx::Error> {
    info!("🔧 Creating database pool with {} max connections", config.max_connections);

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .test_before_acquire(true)
        .connect(database_url)
        .await?;

    record_pool_state("main", pool.size(), pool.num_idle());
    info!("✅ Database pool created successfully");
    Ok(pool)
}
