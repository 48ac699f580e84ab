use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::header::SET_COOKIE,
    response::{AppendHeaders, IntoResponse},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use validator::Validate;

use crate::api::error_handling::ApiError;
use crate::middleware::auth::{issue_session, require_session, session_cookie, SessionUser};
use crate::observability::metrics::AUTH_ATTEMPTS_TOTAL;
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 64, message = "usuario requerido"))]
    pub username: String,
    #[validate(length(min = 1, max = 128, message = "contraseña requerida"))]
    pub password: String,
}

/// POST /api/auth/login - Verifica credenciales y abre la sesión (cookie + token)
pub async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    req.validate()?;
    let auth = &state.config.auth;

    info!(username = %req.username, "🔐 Processing login request");

    let hash = auth.admin_password_hash.clone();
    let password = req.password.clone();
    let password_ok = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash).unwrap_or(false))
        .await
        .map_err(|e| ApiError::Internal(format!("verificación interrumpida: {}", e)))?;

    if req.username != auth.admin_user || !password_ok {
        AUTH_ATTEMPTS_TOTAL.with_label_values(&["password", "failure"]).inc();
        warn!(username = %req.username, "❌ Invalid credentials");
        return Err(ApiError::Unauthorized("credenciales inválidas".to_string()));
    }

    let (token, claims) = issue_session(auth, &req.username)?;
    AUTH_ATTEMPTS_TOTAL.with_label_values(&["password", "success"]).inc();
    info!(username = %req.username, "✅ Session opened");

    let max_age = claims.exp - claims.iat;
    Ok((
        AppendHeaders([(SET_COOKIE, session_cookie(&token, max_age))]),
        Json(json!({
            "ok": true,
            "user": claims.sub,
            "token": token,
            "expires_at": claims.exp,
        })),
    ))
}

/// POST /api/auth/logout - Borra la cookie de sesión
pub async fn logout() -> impl IntoResponse {
    (
        AppendHeaders([(SET_COOKIE, session_cookie("", 0))]),
        Json(json!({ "ok": true })),
    )
}

/// GET /api/auth/session - Datos de la sesión actual
pub async fn current_session(Extension(user): Extension<SessionUser>) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "user": user.username,
        "expires_at": user.expires_at,
    }))
}

pub fn create_auth_v1_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    let protected = Router::new()
        .route("/session", get(current_session))
        .route_layer(axum::middleware::from_fn_with_state(state, require_session));

    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .merge(protected)
}
