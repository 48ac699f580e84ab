pub mod auth_v1;
pub mod dashboard_v1;
pub mod error_handling;
pub mod facturacion_v1;
pub mod fel_v1;
pub mod ingest_v1;
pub mod invoicing_v1;

pub use error_handling::ApiError;

use std::sync::Arc;

use axum::{middleware::from_fn_with_state, Router};

use crate::middleware::auth::{require_ingest_key, require_session};
use crate::state::AppState;

/// Rutas `/api/*`.
/// Ingesta se autentica con API key (o sesión); el resto exige sesión.
pub fn create_api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let session_routes = Router::new()
        .nest("/fel", fel_v1::create_fel_v1_router())
        .nest("/invoice", invoicing_v1::create_invoicing_v1_router())
        .nest("/facturacion", facturacion_v1::create_facturacion_v1_router())
        .merge(dashboard_v1::create_dashboard_v1_router())
        .route_layer(from_fn_with_state(state.clone(), require_session));

    let ingest_routes = Router::new()
        .nest("/ingest", ingest_v1::create_ingest_v1_router())
        .route_layer(from_fn_with_state(state.clone(), require_ingest_key));

    let api = Router::new()
        .nest("/auth", auth_v1::create_auth_v1_router(state))
        .merge(session_routes)
        .merge(ingest_routes);

    Router::new().nest("/api", api)
}
