//! Lectura de respuestas de G4S. Las respuestas llegan con formas distintas
//! según el transporte (SOAP con o sin namespace, XML escapado dentro de
//! `ResponseData*`, documento certificado en base64), así que cada dato se
//! busca con una cadena ordenada de extractores.
use base64::{engine::general_purpose, Engine as _};
use lazy_static::lazy_static;
use regex::Regex;
use sxd_document::parser;
use sxd_xpath::{Context, Factory, Value};

pub type Extractor = fn(&str) -> Option<String>;

/// Orden de búsqueda del identificador del documento certificado
pub const UUID_EXTRACTORS: &[(&str, Extractor)] = &[
    ("xpath_uuid", xpath_uuid as Extractor),
    ("xpath_document_guid", xpath_document_guid as Extractor),
    ("regex_uuid", regex_uuid as Extractor),
    ("regex_document_guid", regex_document_guid as Extractor),
    ("unescaped_regex_uuid", unescaped_regex_uuid as Extractor),
    ("unescaped_regex_document_guid", unescaped_regex_document_guid as Extractor),
    ("base64_numero_autorizacion", base64_numero_autorizacion as Extractor),
];

lazy_static! {
    static ref UUID_TAG: Regex = Regex::new(r"<(?:\w+:)?UUID>\s*([^<\s]+)\s*</").unwrap();
    static ref DOCUMENT_GUID_TAG: Regex = Regex::new(r"<(?:\w+:)?DocumentGUID>\s*([^<\s]+)\s*</").unwrap();
    static ref NUMERO_AUTORIZACION: Regex =
        Regex::new(r"<(?:\w+:)?NumeroAutorizacion\b[^>]*>\s*([^<\s]+)\s*</").unwrap();
    static ref RESULT_TAG: Regex = Regex::new(r"(?i)<(?:\w+:)?Result>\s*([^<]*?)\s*</").unwrap();
    static ref DESCRIPTION_TAG: Regex = Regex::new(
        r"(?is)<(?:\w+:)?(?:ResultDescription|Description|faultstring|Text)\b[^>]*>\s*([^<]+?)\s*</"
    )
    .unwrap();
    static ref NIT_NAME_TAG: Regex =
        Regex::new(r"(?i)<(?:\w+:)?(?:nombre|name|NombreReceptor)>\s*([^<]+?)\s*</").unwrap();
    static ref NIT_ADDRESS_TAG: Regex = Regex::new(r"(?i)<(?:\w+:)?direccion>\s*([^<]+?)\s*</").unwrap();
    static ref NIT_ERROR_TAG: Regex = Regex::new(r"(?i)<(?:\w+:)?(?:error|mensaje)>\s*([^<]+?)\s*</").unwrap();
    static ref RESPONSE_DATA_TAGS: [Regex; 3] = [
        Regex::new(r"(?s)<(?:\w+:)?ResponseData1>\s*([^<]+?)\s*</").unwrap(),
        Regex::new(r"(?s)<(?:\w+:)?ResponseData2>\s*([^<]+?)\s*</").unwrap(),
        Regex::new(r"(?s)<(?:\w+:)?ResponseData3>\s*([^<]+?)\s*</").unwrap(),
    ];
}

/// Primer UUID no vacío según `UUID_EXTRACTORS`, con el nombre del extractor que lo encontró
pub fn extract_uuid(body: &str) -> Option<(&'static str, String)> {
    UUID_EXTRACTORS
        .iter()
        .find_map(|(name, extractor)| extractor(body).map(|uuid| (*name, uuid)))
}

// ============================================================================
// EXTRACTORES DE UUID
// ============================================================================

fn xpath_uuid(body: &str) -> Option<String> {
    xpath_text(body, "//*[local-name()='UUID']")
}

fn xpath_document_guid(body: &str) -> Option<String> {
    xpath_text(body, "//*[local-name()='DocumentGUID']")
}

fn regex_uuid(body: &str) -> Option<String> {
    capture(&UUID_TAG, body)
}

fn regex_document_guid(body: &str) -> Option<String> {
    capture(&DOCUMENT_GUID_TAG, body)
}

fn unescaped_regex_uuid(body: &str) -> Option<String> {
    capture(&UUID_TAG, &unescape_entities(body))
}

fn unescaped_regex_document_guid(body: &str) -> Option<String> {
    capture(&DOCUMENT_GUID_TAG, &unescape_entities(body))
}

fn base64_numero_autorizacion(body: &str) -> Option<String> {
    let document = decode_response_data(body, 1)?;
    let text = String::from_utf8(document).ok()?;
    capture(&NUMERO_AUTORIZACION, &text)
}

// ============================================================================
// OTROS CAMPOS
// ============================================================================

/// Valor de `<Result>` si viene: `true`/`false`
pub fn extract_result(body: &str) -> Option<bool> {
    let raw = RESULT_TAG.captures(body)?.get(1)?.as_str().to_ascii_lowercase();
    match raw.as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Descripción o falla reportada por el certificador
pub fn extract_description(body: &str) -> Option<String> {
    capture(&DESCRIPTION_TAG, body).or_else(|| capture(&DESCRIPTION_TAG, &unescape_entities(body)))
}

/// Texto de `<ResponseDataN>`, N entre 1 y 3
pub fn extract_response_data(body: &str, n: u8) -> Option<String> {
    let re = RESPONSE_DATA_TAGS.get(usize::from(n).checked_sub(1)?)?;
    xpath_text(body, &format!("//*[local-name()='ResponseData{}']", n)).or_else(|| capture(re, body))
}

/// Decodifica el base64 de `<ResponseDataN>`
pub fn decode_response_data(body: &str, n: u8) -> Option<Vec<u8>> {
    let raw = extract_response_data(body, n)?;
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    general_purpose::STANDARD.decode(compact).ok()
}

/// Datos encontrados en una respuesta de consulta de NIT
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NitFields {
    pub name: Option<String>,
    pub address: Option<String>,
    pub error: Option<String>,
}

pub fn extract_nit_fields(body: &str) -> NitFields {
    let text = unescape_entities(body);
    NitFields {
        name: capture(&NIT_NAME_TAG, &text),
        address: capture(&NIT_ADDRESS_TAG, &text),
        error: capture(&NIT_ERROR_TAG, &text),
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn xpath_text(body: &str, expression: &str) -> Option<String> {
    let package = parser::parse(body).ok()?;
    let document = package.as_document();
    let factory = Factory::new();
    let context = Context::new();

    let xpath = factory.build(expression).ok().flatten()?;
    if let Ok(Value::Nodeset(nodes)) = xpath.evaluate(&context, document.root()) {
        for node in nodes.document_order() {
            let text = node.string_value().trim().to_string();
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

fn capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn unescape_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#xD;", "")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOAP_UUID: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <RequestTransactionResponse xmlns="http://www.fact.com.mx/schema/ws">
      <RequestTransactionResult>
        <Response><Result>true</Result><Description>OK</Description><UUID>ABC-123</UUID></Response>
      </RequestTransactionResult>
    </RequestTransactionResponse>
  </soap:Body>
</soap:Envelope>"#;

    #[test]
    fn test_xpath_finds_namespaced_uuid() {
        assert_eq!(extract_uuid(SOAP_UUID), Some(("xpath_uuid", "ABC-123".to_string())));
        assert_eq!(extract_result(SOAP_UUID), Some(true));
    }

    #[test]
    fn test_document_guid_is_second_choice() {
        let body = "<Response><DocumentGUID> 9F1E-22 </DocumentGUID></Response>";
        assert_eq!(extract_uuid(body), Some(("xpath_document_guid", "9F1E-22".to_string())));
    }

    #[test]
    fn test_regex_used_when_body_is_not_xml() {
        let body = "garbage <UUID>XYZ-1</UUID> <unclosed>";
        assert_eq!(extract_uuid(body), Some(("regex_uuid", "XYZ-1".to_string())));
    }

    #[test]
    fn test_escaped_payload() {
        let body = "<string>&lt;Response&gt;&lt;UUID&gt;ESC-9&lt;/UUID&gt;&lt;/Response&gt;</string>";
        assert_eq!(extract_uuid(body), Some(("unescaped_regex_uuid", "ESC-9".to_string())));
    }

    #[test]
    fn test_numero_autorizacion_in_base64_document() {
        let certified = r#"<dte:GTDocumento><dte:NumeroAutorizacion Numero="1" Serie="A">B64-UUID-1</dte:NumeroAutorizacion></dte:GTDocumento>"#;
        let encoded = general_purpose::STANDARD.encode(certified);
        let body = format!("<Response><Result>true</Result><ResponseData1>{}</ResponseData1></Response>", encoded);
        assert_eq!(
            extract_uuid(&body),
            Some(("base64_numero_autorizacion", "B64-UUID-1".to_string()))
        );
    }

    #[test]
    fn test_no_uuid_and_description() {
        let body = "<Response><Result>false</Result><Description>NIT del receptor no válido</Description></Response>";
        assert_eq!(extract_uuid(body), None);
        assert_eq!(extract_result(body), Some(false));
        assert_eq!(extract_description(body).as_deref(), Some("NIT del receptor no válido"));
    }

    #[test]
    fn test_response_data_fallback_and_range() {
        let body = "garbage <ResponseData3>UERG</ResponseData3> <unclosed>";
        assert_eq!(extract_response_data(body, 3).as_deref(), Some("UERG"));
        assert_eq!(decode_response_data(body, 3), Some(b"PDF".to_vec()));
        assert_eq!(extract_response_data(body, 1), None);
        assert_eq!(extract_response_data(body, 0), None);
        assert_eq!(extract_response_data(body, 4), None);
    }

    #[test]
    fn test_xpath_text_reads_well_formed_document() {
        let body = "<Response><ResponseData1> AAA </ResponseData1></Response>";
        assert_eq!(xpath_text(body, "//*[local-name()='ResponseData1']").as_deref(), Some("AAA"));
        assert_eq!(xpath_text(body, "//*[local-name()='Missing']"), None);
    }

    #[test]
    fn test_nit_fields() {
        let body = "<RequestTransactionResult>&lt;NIT&gt;&lt;nombre&gt;PEREZ, JUAN&lt;/nombre&gt;&lt;direccion&gt;ZONA 1&lt;/direccion&gt;&lt;/NIT&gt;</RequestTransactionResult>";
        let fields = extract_nit_fields(body);
        assert_eq!(fields.name.as_deref(), Some("PEREZ, JUAN"));
        assert_eq!(fields.address.as_deref(), Some("ZONA 1"));
        assert_eq!(fields.error, None);
    }
}
