// Configuración del servicio: se construye una sola vez al arrancar y se
// pasa explícitamente a cada componente.
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use tracing::{info, warn};

use crate::domains::fel::transport::Transport;

/// Datos del emisor que van en cada DTE.
#[derive(Debug, Clone)]
pub struct EmitterConfig {
    pub nit: String,
    pub nombre: String,
    pub nombre_comercial: String,
    pub codigo_establecimiento: String,
    pub afiliacion_iva: String,
    pub direccion: String,
    pub codigo_postal: String,
    pub municipio: String,
    pub departamento: String,
    pub item_descripcion: String,
}

/// Conexión con el certificador G4S.
#[derive(Debug, Clone)]
pub struct FelConfig {
    pub endpoint: String,
    pub requestor: String,
    /// NIT del emisor registrado en G4S
    pub entity: String,
    pub user_name: String,
    pub country: String,
    pub timeout: Duration,
    pub submit_transport: Transport,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub session_secret: String,
    pub session_ttl_hours: i64,
    pub admin_user: String,
    pub admin_password_hash: String,
    /// Si está definido, los endpoints de ingesta aceptan `X-Api-Key`
    pub ingest_api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub db_profile: String,
    pub cors_origins: Vec<String>,
    pub ingest_max_rows: usize,
    pub auth: AuthConfig,
    pub fel: FelConfig,
    pub emitter: EmitterConfig,
}

impl AppConfig {
    /// Lee el entorno (después de `dotenvy::dotenv()`).
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = required("DATABASE_URL")?;
        let entity = required("FEL_ENTITY")?;

        let submit_transport = match env::var("FEL_SUBMIT_TRANSPORT") {
            Ok(raw) => raw
                .parse::<Transport>()
                .map_err(|e| anyhow::anyhow!("FEL_SUBMIT_TRANSPORT invalid: {}", e))?,
            Err(_) => Transport::Soap11,
        };

        let cors_origins = env::var("CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let config = AppConfig {
            port: try_load("PORT", "8000")?,
            database_url,
            db_profile: optional("DB_PROFILE", "production"),
            cors_origins,
            ingest_max_rows: try_load("INGEST_MAX_ROWS", "5000")?,
            auth: AuthConfig {
                session_secret: required("SESSION_SECRET")?,
                session_ttl_hours: try_load("SESSION_TTL_HOURS", "12")?,
                admin_user: optional("ADMIN_USER", "admin"),
                admin_password_hash: required("ADMIN_PASSWORD_HASH")?,
                ingest_api_key: env::var("INGEST_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            },
            fel: FelConfig {
                endpoint: optional(
                    "FEL_ENDPOINT",
                    "https://fel.g4sdocumenta.com/webservicefront/factwsfront.asmx",
                ),
                requestor: required("FEL_REQUESTOR")?,
                entity: entity.clone(),
                user_name: optional("FEL_USER_NAME", "ADMINISTRADOR"),
                country: optional("FEL_COUNTRY", "GT"),
                timeout: Duration::from_secs(try_load("FEL_TIMEOUT_SECS", "30")?),
                submit_transport,
            },
            emitter: EmitterConfig {
                nit: entity,
                nombre: required("FEL_EMISOR_NOMBRE")?,
                nombre_comercial: optional("FEL_NOMBRE_COMERCIAL", ""),
                codigo_establecimiento: optional("FEL_CODIGO_ESTABLECIMIENTO", "1"),
                afiliacion_iva: optional("FEL_AFILIACION_IVA", "GEN"),
                direccion: optional("FEL_DIRECCION", "CIUDAD"),
                codigo_postal: optional("FEL_CODIGO_POSTAL", "01001"),
                municipio: optional("FEL_MUNICIPIO", "GUATEMALA"),
                departamento: optional("FEL_DEPARTAMENTO", "GUATEMALA"),
                item_descripcion: optional("FEL_ITEM_DESCRIPCION", "SERVICIO DE PARQUEO"),
            },
        };

        info!(
            "⚙️ Config loaded: port={}, db_profile={}, fel_endpoint={}, submit_transport={}",
            config.port, config.db_profile, config.fel.endpoint, config.fel.submit_transport
        );

        Ok(config)
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|e| anyhow::anyhow!("{} must be set: {}", key, e))
}

fn optional(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn try_load<T: FromStr>(key: &str, default: &str) -> anyhow::Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse().map_err(|e| {
        warn!("Invalid {key} value: {e}");
        anyhow::anyhow!("Invalid {} value '{}': {}", key, raw, e)
    })
}

#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        port: 8000,
        database_url: "postgres://localhost/test".to_string(),
        db_profile: "development".to_string(),
        cors_origins: vec!["http://localhost:5173".to_string()],
        ingest_max_rows: 100,
        auth: AuthConfig {
            session_secret: "test-session-secret".to_string(),
            session_ttl_hours: 1,
            admin_user: "admin".to_string(),
            // bcrypt de "secreto123" con costo 4
            admin_password_hash: bcrypt::hash("secreto123", 4).unwrap_or_default(),
            ingest_api_key: Some("ingest-key".to_string()),
        },
        fel: FelConfig {
            endpoint: "http://127.0.0.1:9/fel.asmx".to_string(),
            requestor: "11111111-2222-3333-4444-555555555555".to_string(),
            entity: "1234567K".to_string(),
            user_name: "ADMINISTRADOR".to_string(),
            country: "GT".to_string(),
            timeout: Duration::from_secs(5),
            submit_transport: Transport::Soap11,
        },
        emitter: EmitterConfig {
            nit: "1234567K".to_string(),
            nombre: "PARQUEOS DE PRUEBA, S.A.".to_string(),
            nombre_comercial: "PARQUEO CENTRAL".to_string(),
            codigo_establecimiento: "1".to_string(),
            afiliacion_iva: "GEN".to_string(),
            direccion: "6A AVENIDA 10-20 ZONA 1".to_string(),
            codigo_postal: "01001".to_string(),
            municipio: "GUATEMALA".to_string(),
            departamento: "GUATEMALA".to_string(),
            item_descripcion: "SERVICIO DE PARQUEO".to_string(),
        },
    }
}
