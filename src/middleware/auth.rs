//! Authentication middleware

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, DecodingKey, Validation};
use sha2::{Digest, Sha256};

use crate::handlers::auth::Claims;
use crate::models::{RevokedToken, User};
use crate::{AppError, AppState};

/// Authenticated caller, extracted from a valid, unrevoked JWT.
#[derive(Debug, Clone)]
pub struct UserContext {
    pub user: User,
    pub jti: String,
    pub expires_at: DateTime<Utc>,
}

impl UserContext {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }
}

/// Middleware: Require user JWT authentication
pub async fn require_user_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(&req)?;

    let token_data = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(state.config.jwt_secret.as_bytes()),
        &Validation::default(),
    )?;
    let claims = token_data.claims;

    if RevokedToken::is_revoked(&state.pool, &claims.jti).await? {
        tracing::debug!("Rejected revoked token {}", claims.jti);
        return Err(AppError::TokenInvalid);
    }

    let user = User::find_by_id(&state.pool, &claims.sub)
        .await?
        .filter(|u| u.is_active)
        .ok_or_else(|| AppError::AuthenticationFailed("User not found or inactive".to_string()))?;

    let expires_at = Utc
        .timestamp_opt(claims.exp as i64, 0)
        .single()
        .ok_or(AppError::TokenInvalid)?;

    req.extensions_mut().insert(UserContext {
        user,
        jti: claims.jti,
        expires_at,
    });

    Ok(next.run(req).await)
}

/// Extract bearer token from Authorization header
fn extract_bearer_token(req: &Request) -> Result<String, AppError> {
    let auth_header = req
        .headers()
        .get(AUTHORIZATION)
        .ok_or(AppError::Unauthorized)?
        .to_str()
        .map_err(|_| AppError::Unauthorized)?;

    auth_header
        .strip_prefix("Bearer ")
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or(AppError::Unauthorized)
}

/// Hex SHA-256 of a secret token, as stored in the database.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for UserContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<UserContext>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}
