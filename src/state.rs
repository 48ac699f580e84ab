use std::sync::Arc;

use tracing::info;

use crate::config::AppConfig;
use crate::db::ensure_schema;
use crate::domains::billing::{BillingStore, PgBillingStore};
use crate::domains::fel::{CertificationProvider, G4sClient};
use crate::domains::ingestion::IngestionService;
use crate::domains::invoicing::InvoiceService;
use crate::optimization::{create_optimized_db_pool, DatabaseConfig};

/// Estado compartido de la aplicación.
/// Los servicios reciben el store y el certificador por trait.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn BillingStore>,
    pub provider: Arc<dyn CertificationProvider>,
    pub invoice_service: Arc<InvoiceService>,
    pub ingestion_service: Arc<IngestionService>,
}

impl AppState {
    /// Pool de PostgreSQL, esquema y cliente G4S a partir de la configuración
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let db_config = DatabaseConfig::for_profile(&config.db_profile);
        let db_pool = create_optimized_db_pool(&config.database_url, db_config)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

        ensure_schema(&db_pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to prepare schema: {}", e))?;
        info!("🗄️ Database schema ready");

        let provider = G4sClient::new(config.fel.clone())
            .map_err(|e| anyhow::anyhow!("Failed to build G4S client: {}", e))?;
        info!(
            "🔌 G4S client ready ({} via {})",
            config.fel.endpoint, config.fel.submit_transport
        );

        Ok(Self::from_parts(
            config,
            Arc::new(PgBillingStore::new(db_pool)),
            Arc::new(provider),
        ))
    }

    /// Arma el estado con un store y un certificador ya construidos
    pub fn from_parts(
        config: AppConfig,
        store: Arc<dyn BillingStore>,
        provider: Arc<dyn CertificationProvider>,
    ) -> Self {
        let invoice_service = Arc::new(InvoiceService::new(
            store.clone(),
            provider.clone(),
            config.emitter.clone(),
        ));
        let ingestion_service = Arc::new(IngestionService::new(store.clone(), config.ingest_max_rows));

        Self {
            config: Arc::new(config),
            store,
            provider,
            invoice_service,
            ingestion_service,
        }
    }
}
