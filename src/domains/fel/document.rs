use chrono::{DateTime, Utc};
use chrono_tz::America::Guatemala;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use super::amount_words::amount_in_words;
use crate::config::EmitterConfig;

pub const DTE_NAMESPACE: &str = "http://www.sat.gob.gt/dte/fel/0.2.0";
pub const CONSUMIDOR_FINAL: &str = "CF";
pub const CONSUMIDOR_FINAL_NOMBRE: &str = "CONSUMIDOR FINAL";

/// NIT normalizado: sin espacios ni guiones, en mayúsculas. Vacío → `CF`.
pub fn normalize_nit(raw: &str) -> String {
    let nit: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect::<String>()
        .to_uppercase();
    if nit.is_empty() {
        CONSUMIDOR_FINAL.to_string()
    } else {
        nit
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Receptor {
    pub nit: String,
    pub nombre: String,
    pub direccion: Option<String>,
}

impl Receptor {
    pub fn consumidor_final() -> Self {
        Receptor {
            nit: CONSUMIDOR_FINAL.to_string(),
            nombre: CONSUMIDOR_FINAL_NOMBRE.to_string(),
            direccion: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DteItem {
    pub descripcion: String,
    pub cantidad: Decimal,
    pub precio_unitario: Decimal,
}

impl DteItem {
    pub fn total(&self) -> Decimal {
        (self.cantidad * self.precio_unitario).round_dp(2)
    }
}

#[derive(Debug, Clone)]
pub struct DteRequest {
    pub emitter: EmitterConfig,
    pub receptor: Receptor,
    pub issued_at: DateTime<Utc>,
    pub items: Vec<DteItem>,
    /// Serie-número o número de ticket, va en la adenda
    pub reference: String,
}

impl DteRequest {
    pub fn total(&self) -> Decimal {
        self.items.iter().map(DteItem::total).sum()
    }
}

/// Divide un total con IVA incluido: `(base, iva)`, ambos truncados hacia abajo a 2 decimales.
pub fn split_iva(total: Decimal) -> (Decimal, Decimal) {
    let base = (total / Decimal::new(112, 2)).round_dp_with_strategy(2, RoundingStrategy::ToNegativeInfinity);
    let iva = (total - base).round_dp_with_strategy(2, RoundingStrategy::ToNegativeInfinity);
    (base, iva)
}

pub fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn money(value: Decimal) -> String {
    format!("{:.2}", value)
}

/// Renderiza el DTE (FACT, GTQ). Función pura: la misma entrada produce el mismo XML.
pub fn build_document(req: &DteRequest) -> String {
    let e = &req.emitter;
    let r = &req.receptor;
    let fecha = req
        .issued_at
        .with_timezone(&Guatemala)
        .format("%Y-%m-%dT%H:%M:%S%:z")
        .to_string();

    let mut xml = String::with_capacity(4096);
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    xml.push_str(&format!(
        "<dte:GTDocumento xmlns:dte=\"{}\" xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\" Version=\"0.1\">",
        DTE_NAMESPACE
    ));
    xml.push_str("<dte:SAT ClaseDocumento=\"dte\"><dte:DTE ID=\"DatosCertificados\"><dte:DatosEmision ID=\"DatosEmision\">");
    xml.push_str(&format!(
        "<dte:DatosGenerales Tipo=\"FACT\" FechaHoraEmision=\"{}\" CodigoMoneda=\"GTQ\"/>",
        fecha
    ));

    // Emisor
    xml.push_str(&format!(
        "<dte:Emisor NITEmisor=\"{}\" NombreEmisor=\"{}\" CodigoEstablecimiento=\"{}\" NombreComercial=\"{}\" AfiliacionIVA=\"{}\">",
        xml_escape(&e.nit),
        xml_escape(&e.nombre),
        xml_escape(&e.codigo_establecimiento),
        xml_escape(&e.nombre_comercial),
        xml_escape(&e.afiliacion_iva),
    ));
    xml.push_str(&address("DireccionEmisor", &e.direccion, &e.codigo_postal, &e.municipio, &e.departamento));
    xml.push_str("</dte:Emisor>");

    // Receptor
    xml.push_str(&format!(
        "<dte:Receptor IDReceptor=\"{}\" NombreReceptor=\"{}\">",
        xml_escape(&r.nit),
        xml_escape(&r.nombre),
    ));
    xml.push_str(&address(
        "DireccionReceptor",
        r.direccion.as_deref().unwrap_or("CIUDAD"),
        "01001",
        "GUATEMALA",
        "GUATEMALA",
    ));
    xml.push_str("</dte:Receptor>");

    xml.push_str("<dte:Frases><dte:Frase TipoFrase=\"1\" CodigoEscenario=\"1\"/></dte:Frases>");

    // Items
    let mut total_iva = Decimal::ZERO;
    xml.push_str("<dte:Items>");
    for (i, item) in req.items.iter().enumerate() {
        let total = item.total();
        let (base, iva) = split_iva(total);
        total_iva += iva;
        xml.push_str(&format!(
            concat!(
                "<dte:Item NumeroLinea=\"{}\" BienOServicio=\"S\">",
                "<dte:Cantidad>{}</dte:Cantidad>",
                "<dte:UnidadMedida>UNI</dte:UnidadMedida>",
                "<dte:Descripcion>{}</dte:Descripcion>",
                "<dte:PrecioUnitario>{}</dte:PrecioUnitario>",
                "<dte:Precio>{}</dte:Precio>",
                "<dte:Descuento>0.00</dte:Descuento>",
                "<dte:Impuestos><dte:Impuesto>",
                "<dte:NombreCorto>IVA</dte:NombreCorto>",
                "<dte:CodigoUnidadGravable>1</dte:CodigoUnidadGravable>",
                "<dte:MontoGravable>{}</dte:MontoGravable>",
                "<dte:MontoImpuesto>{}</dte:MontoImpuesto>",
                "</dte:Impuesto></dte:Impuestos>",
                "<dte:Total>{}</dte:Total>",
                "</dte:Item>"
            ),
            i + 1,
            money(item.cantidad),
            xml_escape(&item.descripcion),
            money(item.precio_unitario),
            money(total),
            money(base),
            money(iva),
            money(total),
        ));
    }
    xml.push_str("</dte:Items>");

    let gran_total = req.total();
    xml.push_str(&format!(
        "<dte:Totales><dte:TotalImpuestos><dte:TotalImpuesto NombreCorto=\"IVA\" TotalMontoImpuesto=\"{}\"/></dte:TotalImpuestos><dte:GranTotal>{}</dte:GranTotal></dte:Totales>",
        money(total_iva),
        money(gran_total),
    ));
    xml.push_str("</dte:DatosEmision></dte:DTE>");

    xml.push_str(&format!(
        "<dte:Adenda><TotalEnLetras>{}</TotalEnLetras><Referencia>{}</Referencia></dte:Adenda>",
        xml_escape(&amount_in_words(gran_total)),
        xml_escape(&req.reference),
    ));
    xml.push_str("</dte:SAT></dte:GTDocumento>");
    xml
}

fn address(tag: &str, direccion: &str, codigo_postal: &str, municipio: &str, departamento: &str) -> String {
    format!(
        "<dte:{0}><dte:Direccion>{1}</dte:Direccion><dte:CodigoPostal>{2}</dte:CodigoPostal><dte:Municipio>{3}</dte:Municipio><dte:Departamento>{4}</dte:Departamento><dte:Pais>GT</dte:Pais></dte:{0}>",
        tag,
        xml_escape(direccion),
        xml_escape(codigo_postal),
        xml_escape(municipio),
        xml_escape(departamento),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use chrono::TimeZone;

    fn request(total: Decimal) -> DteRequest {
        DteRequest {
            emitter: test_config().emitter,
            receptor: Receptor {
                nit: "1234567K".to_string(),
                nombre: "JUAN & HIJOS".to_string(),
                direccion: None,
            },
            issued_at: Utc.with_ymd_and_hms(2025, 1, 10, 18, 30, 0).unwrap(),
            items: vec![DteItem {
                descripcion: "SERVICIO DE PARQUEO".to_string(),
                cantidad: Decimal::ONE,
                precio_unitario: total,
            }],
            reference: "T-100".to_string(),
        }
    }

    #[test]
    fn test_normalize_nit() {
        assert_eq!(normalize_nit(" 123456-7 "), "1234567");
        assert_eq!(normalize_nit("98 7654 k"), "987654K");
        assert_eq!(normalize_nit("  "), "CF");
        assert_eq!(normalize_nit("c-f"), "CF");
    }

    #[test]
    fn test_split_iva_floors_both_parts() {
        assert_eq!(split_iva(Decimal::new(15000, 2)), (Decimal::new(13392, 2), Decimal::new(1608, 2)));
        assert_eq!(split_iva(Decimal::new(1120, 2)), (Decimal::new(1000, 2), Decimal::new(120, 2)));
    }

    #[test]
    fn test_build_document_renders_fact_in_gtq() {
        let xml = build_document(&request(Decimal::new(15000, 2)));

        assert!(xml.contains("xmlns:dte=\"http://www.sat.gob.gt/dte/fel/0.2.0\""));
        assert!(xml.contains("Tipo=\"FACT\""));
        assert!(xml.contains("CodigoMoneda=\"GTQ\""));
        // 18:30 UTC = 12:30 en Guatemala
        assert!(xml.contains("FechaHoraEmision=\"2025-01-10T12:30:00-06:00\""));
        assert!(xml.contains("<dte:MontoGravable>133.92</dte:MontoGravable>"));
        assert!(xml.contains("<dte:MontoImpuesto>16.08</dte:MontoImpuesto>"));
        assert!(xml.contains("<dte:GranTotal>150.00</dte:GranTotal>"));
        assert!(xml.contains("<TotalEnLetras>CIENTO CINCUENTA QUETZALES CON 00/100</TotalEnLetras>"));
        assert!(xml.contains("NombreReceptor=\"JUAN &amp; HIJOS\""));
    }

    #[test]
    fn test_build_document_is_deterministic() {
        let req = request(Decimal::new(2575, 2));
        assert_eq!(build_document(&req), build_document(&req));
    }

    #[test]
    fn test_build_document_parses_as_xml() {
        let xml = build_document(&request(Decimal::new(500, 2)));
        assert!(sxd_document::parser::parse(&xml).is_ok());
    }
}
