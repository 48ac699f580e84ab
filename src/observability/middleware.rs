// ============================================================================
// MIDDLEWARE PARA MÉTRICAS AUTOMÁTICAS
// ============================================================================

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::observability::record_http_request;

/// Registra método, ruta normalizada, status y duración de cada request
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let normalized_path = normalize_path(req.uri().path());

    let response = next.run(req).await;

    record_http_request(
        &method,
        &normalized_path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

/// Agrupa segmentos variables (UUIDs de documentos, ids numéricos)
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            if seg.len() == 36 && seg.matches('-').count() == 4 {
                ":uuid"
            } else if !seg.is_empty() && seg.parse::<i64>().is_ok() {
                ":id"
            } else {
                seg
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/api/fel/invoice"), "/api/fel/invoice");
        assert_eq!(normalize_path("/api/items/42"), "/api/items/:id");
        assert_eq!(
            normalize_path("/doc/0A1B2C3D-1111-2222-3333-444455556666"),
            "/doc/:uuid"
        );
    }
}
