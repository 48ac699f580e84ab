use std::fmt;
use std::future::Future;
use std::str::FromStr;

use tracing::{debug, warn};

use super::document::xml_escape;

pub const SOAP_ACTION: &str = "http://www.fact.com.mx/schema/ws/RequestTransaction";
const WS_NAMESPACE: &str = "http://www.fact.com.mx/schema/ws";

/// Forma de llegar a `RequestTransaction` en el web service de G4S.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// `application/x-www-form-urlencoded` a `{endpoint}/RequestTransaction`
    FormPost,
    Soap11,
    Soap12,
}

impl Transport {
    /// Orden usado por la consulta de NIT
    pub const LOOKUP_ORDER: [Transport; 3] = [Transport::FormPost, Transport::Soap11, Transport::Soap12];

    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::FormPost => "form",
            Transport::Soap11 => "soap11",
            Transport::Soap12 => "soap12",
        }
    }

    /// Arma la petición HTTP para esta variante
    pub fn build(
        &self,
        client: &reqwest::Client,
        endpoint: &str,
        tx: &RequestTransaction,
    ) -> reqwest::RequestBuilder {
        match self {
            Transport::FormPost => {
                let url = format!("{}/RequestTransaction", endpoint.trim_end_matches('/'));
                client.post(url).form(&tx.fields())
            }
            Transport::Soap11 => client
                .post(endpoint)
                .header("Content-Type", "text/xml; charset=utf-8")
                .header("SOAPAction", format!("\"{}\"", SOAP_ACTION))
                .body(tx.soap11_envelope()),
            Transport::Soap12 => client
                .post(endpoint)
                .header(
                    "Content-Type",
                    format!("application/soap+xml; charset=utf-8; action=\"{}\"", SOAP_ACTION),
                )
                .body(tx.soap12_envelope()),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "form" | "post" => Ok(Transport::FormPost),
            "soap11" | "soap" => Ok(Transport::Soap11),
            "soap12" => Ok(Transport::Soap12),
            other => Err(format!("unknown transport '{}', expected form|soap11|soap12", other)),
        }
    }
}

// ============================================================================
// REQUEST TRANSACTION
// ============================================================================

/// Parámetros de `RequestTransaction` en el orden que espera G4S.
#[derive(Debug, Clone)]
pub struct RequestTransaction {
    pub requestor: String,
    pub transaction: String,
    pub country: String,
    pub entity: String,
    pub user: String,
    pub user_name: String,
    pub data1: String,
    pub data2: String,
    pub data3: String,
}

impl RequestTransaction {
    pub fn fields(&self) -> [(&'static str, &str); 9] {
        [
            ("Requestor", self.requestor.as_str()),
            ("Transaction", self.transaction.as_str()),
            ("Country", self.country.as_str()),
            ("Entity", self.entity.as_str()),
            ("User", self.user.as_str()),
            ("UserName", self.user_name.as_str()),
            ("Data1", self.data1.as_str()),
            ("Data2", self.data2.as_str()),
            ("Data3", self.data3.as_str()),
        ]
    }

    fn body_xml(&self) -> String {
        let mut xml = format!("<RequestTransaction xmlns=\"{}\">", WS_NAMESPACE);
        for (name, value) in self.fields() {
            xml.push_str(&format!("<{0}>{1}</{0}>", name, xml_escape(value)));
        }
        xml.push_str("</RequestTransaction>");
        xml
    }

    pub fn soap11_envelope(&self) -> String {
        format!(
            concat!(
                "<?xml version=\"1.0\" encoding=\"utf-8\"?>",
                "<soap:Envelope xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" ",
                "xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\" ",
                "xmlns:soap=\"http://schemas.xmlsoap.org/soap/envelope/\">",
                "<soap:Body>{}</soap:Body></soap:Envelope>"
            ),
            self.body_xml()
        )
    }

    pub fn soap12_envelope(&self) -> String {
        format!(
            concat!(
                "<?xml version=\"1.0\" encoding=\"utf-8\"?>",
                "<soap12:Envelope xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" ",
                "xmlns:xsd=\"http://www.w3.org/2001/XMLSchema\" ",
                "xmlns:soap12=\"http://www.w3.org/2003/05/soap-envelope\">",
                "<soap12:Body>{}</soap12:Body></soap12:Envelope>"
            ),
            self.body_xml()
        )
    }
}

// ============================================================================
// FALLBACK
// ============================================================================

/// Resultado de un intento con una variante de transporte.
#[derive(Debug)]
pub enum Attempt<T> {
    /// Respuesta con la que ya se puede decidir (encontrado, o error reportado por G4S)
    Definitive(T),
    /// No se conectó o no se pudo interpretar; se prueba la siguiente variante
    Inconclusive(String),
}

/// Evalúa las variantes en orden y devuelve la primera respuesta definitiva.
pub async fn first_definitive<T, F, Fut>(transports: &[Transport], mut attempt: F) -> Option<(Transport, T)>
where
    F: FnMut(Transport) -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    for &transport in transports {
        match attempt(transport).await {
            Attempt::Definitive(value) => {
                debug!("✅ Definitive answer via {}", transport);
                return Some((transport, value));
            }
            Attempt::Inconclusive(reason) => {
                warn!("⚠️ {} attempt inconclusive: {}", transport, reason);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx() -> RequestTransaction {
        RequestTransaction {
            requestor: "REQ".to_string(),
            transaction: "SYSTEM_REQUEST".to_string(),
            country: "GT".to_string(),
            entity: "1234567K".to_string(),
            user: "REQ".to_string(),
            user_name: "ADMINISTRADOR".to_string(),
            data1: "POST_DOCUMENT_SAT".to_string(),
            data2: "PGE+".to_string(),
            data3: "A&B".to_string(),
        }
    }

    #[test]
    fn test_transport_parse_and_display() {
        assert_eq!("SOAP12".parse::<Transport>(), Ok(Transport::Soap12));
        assert_eq!("form".parse::<Transport>(), Ok(Transport::FormPost));
        assert!("ftp".parse::<Transport>().is_err());
        assert_eq!(Transport::Soap11.to_string(), "soap11");
    }

    #[test]
    fn test_envelopes_escape_values_and_keep_order() {
        let soap11 = tx().soap11_envelope();
        assert!(soap11.contains("<soap:Body><RequestTransaction xmlns=\"http://www.fact.com.mx/schema/ws\">"));
        assert!(soap11.contains("<Data3>A&amp;B</Data3>"));
        let requestor = soap11.find("<Requestor>").unwrap();
        let data1 = soap11.find("<Data1>").unwrap();
        assert!(requestor < data1);

        let soap12 = tx().soap12_envelope();
        assert!(soap12.contains("http://www.w3.org/2003/05/soap-envelope"));
    }

    #[tokio::test]
    async fn test_first_definitive_stops_at_first_answer() {
        let mut tried = Vec::new();
        let result = first_definitive(&Transport::LOOKUP_ORDER, |t| {
            tried.push(t);
            async move {
                match t {
                    Transport::FormPost => Attempt::Inconclusive("connection refused".to_string()),
                    _ => Attempt::Definitive(t.as_str()),
                }
            }
        })
        .await;

        assert_eq!(result, Some((Transport::Soap11, "soap11")));
        assert_eq!(tried, vec![Transport::FormPost, Transport::Soap11]);
    }

    #[tokio::test]
    async fn test_first_definitive_none_when_all_inconclusive() {
        let result: Option<(Transport, ())> = first_definitive(&Transport::LOOKUP_ORDER, |_| async {
            Attempt::Inconclusive("down".to_string())
        })
        .await;
        assert!(result.is_none());
    }
}
