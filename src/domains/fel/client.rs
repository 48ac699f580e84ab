use std::time::Instant;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::document::{CONSUMIDOR_FINAL, CONSUMIDOR_FINAL_NOMBRE};
use super::error::FelError;
use super::extract::{
    decode_response_data, extract_description, extract_nit_fields, extract_result, extract_uuid,
};
use super::transport::{first_definitive, Attempt, RequestTransaction, Transport};
use crate::config::FelConfig;
use crate::observability::metrics::FEL_PROVIDER_DURATION_SECONDS;

// ============================================================================
// PROVIDER CONTRACT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Xml,
}

impl DocumentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "PDF",
            DocumentFormat::Xml => "XML",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "application/pdf",
            DocumentFormat::Xml => "application/xml",
        }
    }

    /// G4S devuelve el PDF en `ResponseData3` y el XML certificado en `ResponseData1`
    fn response_data_index(&self) -> u8 {
        match self {
            DocumentFormat::Pdf => 3,
            DocumentFormat::Xml => 1,
        }
    }
}

/// Documento certificado por G4S
#[derive(Debug, Clone, Serialize)]
pub struct Certification {
    pub uuid: String,
    pub raw_response: String,
    pub transport: String,
    pub http_status: u16,
    /// Extractor que encontró el UUID
    pub extractor: &'static str,
}

/// Resultado de la consulta de NIT. Solo informativo: nunca bloquea la facturación.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct TaxIdLookup {
    pub found: bool,
    pub nit: String,
    pub name: Option<String>,
    pub address: Option<String>,
    /// Transporte que dio la respuesta, `local` para CF
    pub source: Option<String>,
    pub error: Option<String>,
}

impl TaxIdLookup {
    pub fn not_found(nit: &str, error: Option<String>, source: Option<String>) -> Self {
        TaxIdLookup {
            found: false,
            nit: nit.to_string(),
            error,
            source,
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait CertificationProvider: Send + Sync {
    /// Una sola llamada de certificación con el transporte configurado
    async fn submit(&self, document_xml: &str, reference: &str) -> Result<Certification, FelError>;

    async fn lookup_tax_id(&self, nit: &str) -> TaxIdLookup;

    async fn fetch_document(&self, uuid: &str, format: DocumentFormat) -> Result<Vec<u8>, FelError>;
}

// ============================================================================
// G4S CLIENT
// ============================================================================

pub struct G4sClient {
    http: reqwest::Client,
    config: FelConfig,
}

impl G4sClient {
    pub fn new(config: FelConfig) -> Result<Self, FelError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &FelConfig {
        &self.config
    }

    fn transaction(&self, transaction: &str, data1: &str, data2: &str, data3: &str) -> RequestTransaction {
        RequestTransaction {
            requestor: self.config.requestor.clone(),
            transaction: transaction.to_string(),
            country: self.config.country.clone(),
            entity: self.config.entity.clone(),
            user: self.config.requestor.clone(),
            user_name: self.config.user_name.clone(),
            data1: data1.to_string(),
            data2: data2.to_string(),
            data3: data3.to_string(),
        }
    }

    /// Ejecuta la llamada HTTP. Errores de red, timeout o status no 2xx → `FelError::Transport`.
    async fn call(
        &self,
        operation: &str,
        transport: Transport,
        tx: &RequestTransaction,
    ) -> Result<(u16, String), FelError> {
        let started = Instant::now();
        let result: Result<(u16, String), FelError> = async {
            let response = transport.build(&self.http, &self.config.endpoint, tx).send().await?;
            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                return Err(FelError::http_status(
                    format!("provider answered HTTP {} via {}", status.as_u16(), transport),
                    body,
                ));
            }
            Ok((status.as_u16(), body))
        }
        .await;

        FEL_PROVIDER_DURATION_SECONDS
            .with_label_values(&[operation])
            .observe(started.elapsed().as_secs_f64());
        result
    }

    async fn lookup_attempt(&self, transport: Transport, nit: &str) -> Attempt<TaxIdLookup> {
        let tx = self.transaction("GET_NIT", nit, "", "");
        let body = match self.call("lookup_tax_id", transport, &tx).await {
            Ok((_, body)) => body,
            Err(e) => return Attempt::Inconclusive(e.to_string()),
        };

        let fields = extract_nit_fields(&body);
        if let Some(name) = fields.name {
            return Attempt::Definitive(TaxIdLookup {
                found: true,
                nit: nit.to_string(),
                name: Some(name),
                address: fields.address,
                source: Some(transport.to_string()),
                error: None,
            });
        }

        if fields.error.is_some() || extract_result(&body) == Some(false) {
            let message = fields
                .error
                .or_else(|| extract_description(&body))
                .unwrap_or_else(|| "NIT no encontrado".to_string());
            return Attempt::Definitive(TaxIdLookup::not_found(nit, Some(message), Some(transport.to_string())));
        }

        Attempt::Inconclusive("respuesta sin nombre ni error".to_string())
    }
}

#[async_trait]
impl CertificationProvider for G4sClient {
    async fn submit(&self, document_xml: &str, reference: &str) -> Result<Certification, FelError> {
        let encoded = general_purpose::STANDARD.encode(document_xml.as_bytes());
        let tx = self.transaction("SYSTEM_REQUEST", "POST_DOCUMENT_SAT", &encoded, reference);
        let transport = self.config.submit_transport;

        info!("📤 Submitting DTE {} to G4S via {}", reference, transport);
        let (http_status, body) = self.call("submit", transport, &tx).await.map_err(|e| {
            error!("❌ G4S submit {} failed: {}", reference, e);
            e
        })?;
        debug!("G4S response for {}: {}", reference, body);

        match extract_uuid(&body) {
            Some((extractor, uuid)) => {
                info!("✅ DTE {} certified: uuid={} (via {})", reference, uuid, extractor);
                Ok(Certification {
                    uuid,
                    raw_response: body,
                    transport: transport.to_string(),
                    http_status,
                    extractor,
                })
            }
            None => {
                let description = extract_description(&body)
                    .unwrap_or_else(|| "respuesta de G4S sin UUID".to_string());
                warn!("⚠️ G4S returned no UUID for {}: {}", reference, description);
                Err(FelError::provider(description, Some(body)))
            }
        }
    }

    async fn lookup_tax_id(&self, nit: &str) -> TaxIdLookup {
        if nit.eq_ignore_ascii_case(CONSUMIDOR_FINAL) {
            return TaxIdLookup {
                found: true,
                nit: CONSUMIDOR_FINAL.to_string(),
                name: Some(CONSUMIDOR_FINAL_NOMBRE.to_string()),
                address: None,
                source: Some("local".to_string()),
                error: None,
            };
        }

        let outcome = first_definitive(&Transport::LOOKUP_ORDER, |transport| {
            self.lookup_attempt(transport, nit)
        })
        .await;

        match outcome {
            Some((_, lookup)) => lookup,
            None => {
                warn!("⚠️ NIT lookup for {} inconclusive on every transport", nit);
                TaxIdLookup::not_found(nit, Some("consulta de NIT no disponible".to_string()), None)
            }
        }
    }

    async fn fetch_document(&self, uuid: &str, format: DocumentFormat) -> Result<Vec<u8>, FelError> {
        let tx = self.transaction("GET_DOCUMENT", uuid, format.as_str(), "");
        let (_, body) = self
            .call("fetch_document", self.config.submit_transport, &tx)
            .await?;

        decode_response_data(&body, format.response_data_index())
            .filter(|bytes| !bytes.is_empty())
            .ok_or_else(|| {
                let description = extract_description(&body)
                    .unwrap_or_else(|| format!("G4S no devolvió el {} del documento", format.as_str()));
                FelError::provider(description, Some(body))
            })
    }
}
