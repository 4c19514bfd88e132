//! Authentication middleware: validates the bearer token issued by the
//! external auth/subscription collaborator (spec §1 — out of scope to
//! implement, but its contract — a JWT or `ck_`-prefixed API key resolving
//! to an owning user id — is honored here).

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: String,
    pub email: Option<String>,
    pub is_admin: bool,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    is_admin: bool,
}

/// Validates `Authorization: Bearer <token>`. Tokens starting with `ck_`
/// are looked up as API keys (SHA256 hash match); everything else is
/// validated as a JWT.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = request
        .headers()
        .get(AUTHORIZATION)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let auth_str = auth_header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;
    let token = auth_str.strip_prefix("Bearer ").ok_or(StatusCode::UNAUTHORIZED)?;

    let auth_context = if token.starts_with("ck_") {
        authenticate_api_key(&state, token).await?
    } else {
        authenticate_jwt(&state, token)?
    };

    request.extensions_mut().insert(auth_context);

    Ok(next.run(request).await)
}

fn authenticate_jwt(state: &AppState, token: &str) -> Result<AuthContext, StatusCode> {
    let data = decode::<Claims>(token, &state.jwt_decoding_key, &Validation::default()).map_err(
        |e| {
            tracing::debug!("JWT validation failed: {:?}", e);
            StatusCode::UNAUTHORIZED
        },
    )?;

    Ok(AuthContext {
        user_id: data.claims.sub,
        email: data.claims.email,
        is_admin: data.claims.is_admin,
    })
}

async fn authenticate_api_key(state: &AppState, api_key: &str) -> Result<AuthContext, StatusCode> {
    let key_hash = hex::encode(Sha256::digest(api_key.as_bytes()));

    let row: Option<(String, bool, Option<String>)> = sqlx::query_as(
        "SELECT user_id, is_admin, email FROM api_keys WHERE key_hash = $1",
    )
    .bind(&key_hash)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| {
        tracing::error!("API key lookup failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let (user_id, is_admin, email) = row.ok_or(StatusCode::UNAUTHORIZED)?;

    Ok(AuthContext { user_id, email, is_admin })
}

pub fn decoding_key_from_env() -> DecodingKey {
    match std::env::var("JWT_SECRET") {
        Ok(secret) => DecodingKey::from_secret(secret.as_bytes()),
        Err(_) => {
            tracing::warn!("JWT_SECRET not set - using an ephemeral key (all JWTs will fail validation)");
            DecodingKey::from_secret(b"")
        }
    }
}

pub use axum::extract::Extension;
