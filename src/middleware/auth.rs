use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{
        header::{AUTHORIZATION, COOKIE},
        HeaderMap,
    },
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::error_handling::ApiError;
use crate::config::AuthConfig;
use crate::observability::metrics::AUTH_ATTEMPTS_TOTAL;
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "fel_session";
pub const API_KEY_HEADER: &str = "x-api-key";
pub const JWT_ALGORITHM: Algorithm = Algorithm::HS256;

/// Contenido del token de sesión
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionClaims {
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

/// Usuario autenticado, disponible en las extensiones del request
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub username: String,
    pub expires_at: i64,
}

/// Firma un token de sesión para `username` con el TTL configurado
pub fn issue_session(auth: &AuthConfig, username: &str) -> Result<(String, SessionClaims), ApiError> {
    let now = Utc::now();
    let claims = SessionClaims {
        sub: username.to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::hours(auth.session_ttl_hours)).timestamp(),
        jti: uuid::Uuid::new_v4().to_string(),
    };

    let token = encode(
        &Header::new(JWT_ALGORITHM),
        &claims,
        &EncodingKey::from_secret(auth.session_secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(format!("no se pudo firmar la sesión: {}", e)))?;

    Ok((token, claims))
}

pub fn verify_session(auth: &AuthConfig, token: &str) -> Result<SessionClaims, ApiError> {
    let decoding_key = DecodingKey::from_secret(auth.session_secret.as_bytes());
    decode::<SessionClaims>(token, &decoding_key, &Validation::new(JWT_ALGORITHM))
        .map(|data| data.claims)
        .map_err(|e| {
            debug!("Session validation failed: {}", e);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    ApiError::Unauthorized("sesión expirada".to_string())
                }
                _ => ApiError::Unauthorized("sesión inválida".to_string()),
            }
        })
}

/// Token de la cookie `fel_session` o, si no hay, de `Authorization: Bearer`
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty());

    from_cookie.or_else(|| {
        headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    })
}

/// Cookie `Set-Cookie` para el token (o para borrarla con `max_age = 0`)
pub fn session_cookie(token: &str, max_age_secs: i64) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE, token, max_age_secs
    )
}

fn authenticate(auth: &AuthConfig, headers: &HeaderMap) -> Result<SessionUser, ApiError> {
    let token = session_token(headers).ok_or_else(|| ApiError::Unauthorized("no autenticado".to_string()))?;
    let claims = verify_session(auth, &token)?;
    Ok(SessionUser {
        username: claims.sub,
        expires_at: claims.exp,
    })
}

/// Exige una sesión válida
pub async fn require_session(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    match authenticate(&state.config.auth, request.headers()) {
        Ok(user) => {
            request.extensions_mut().insert(user);
            Ok(next.run(request).await)
        }
        Err(e) => {
            AUTH_ATTEMPTS_TOTAL.with_label_values(&["session", "rejected"]).inc();
            warn!("🔒 Rejected {} {}: {}", request.method(), request.uri().path(), e);
            Err(e)
        }
    }
}

fn keys_match(expected: &str, given: &str) -> bool {
    expected.len() == given.len()
        && expected
            .bytes()
            .zip(given.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Ingesta: `X-Api-Key` cuando `INGEST_API_KEY` está configurada, si no una sesión
pub async fn require_ingest_key(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth = &state.config.auth;

    if let Some(expected) = auth.ingest_api_key.as_deref() {
        let given = request
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok());

        if let Some(given) = given {
            if keys_match(expected, given) {
                return Ok(next.run(request).await);
            }
            AUTH_ATTEMPTS_TOTAL.with_label_values(&["api_key", "rejected"]).inc();
            warn!("🔒 Invalid ingest API key for {}", request.uri().path());
            return Err(ApiError::Unauthorized("API key inválida".to_string()));
        }
    }

    match authenticate(auth, request.headers()) {
        Ok(user) => {
            request.extensions_mut().insert(user);
            Ok(next.run(request).await)
        }
        Err(e) => {
            AUTH_ATTEMPTS_TOTAL.with_label_values(&["api_key", "rejected"]).inc();
            warn!("🔒 Rejected ingest {}: {}", request.uri().path(), e);
            Err(e)
        }
    }
}
