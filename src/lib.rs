use axum::{extract::DefaultBodyLimit, routing::get, Router};
use std::sync::Arc;
use tower_http::compression::{predicate::SizeAbove, CompressionLayer};
use tower_http::trace::TraceLayer;

pub mod api;
pub mod config;
pub mod db;
pub mod domains;
pub mod middleware;
pub mod observability;
pub mod optimization;
pub mod security;
pub mod state;

use api::create_api_router;
use observability::{health_handler, metrics_handler, metrics_middleware};
use security::{get_cors_layer, security_headers_middleware};
use state::AppState;

use axum::middleware as axum_middleware;

pub fn create_app_router(app_state: Arc<AppState>) -> Router {
    let api_router = create_api_router(app_state.clone());
    let cors = get_cors_layer(&app_state.config.cors_origins);

    Router::new()
        // Monitoreo sin autenticación
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(api_router)
        .with_state(app_state)
        .layer(axum_middleware::from_fn(metrics_middleware)) // 📊 métricas por request
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024)) // 📦 lotes de sincronización
        .layer(
            CompressionLayer::new()
                .gzip(true)
                .deflate(true)
                .compress_when(SizeAbove::new(1024)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(axum_middleware::from_fn(security_headers_middleware))
}
