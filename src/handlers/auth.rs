//! Authentication handlers

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum::extract::rejection::JsonRejection;
use axum::{extract::State, http::StatusCode, Json};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::middleware::auth::UserContext;
use crate::models::{
    ApiResponse, ForgotPasswordResponse, LoginRequest, LoginResponse, PasswordResetToken,
    RegisterRequest, RevokedToken, User, UserInfo,
};
use crate::notifier::NotifyError;
use crate::validation;
use crate::{AppError, AppResult, AppState};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // User ID
    pub jti: String, // Token ID, revoked on logout
    pub exp: usize,  // Expiration timestamp
    pub iat: usize,  // Issued at
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub password: String,
    /// Accepted for older clients; must match the token owner when present
    #[serde(default)]
    pub user_id: Option<String>,
}

const RESET_REQUESTED: &str =
    "If that email exists in our system, a password reset link has been sent.";

/// Argon2 hash on a blocking thread.
pub async fn hash_password(password: String) -> AppResult<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| AppError::InternalError(e.to_string()))
    })
    .await?
}

pub async fn verify_password(password: String, hash: String) -> AppResult<bool> {
    tokio::task::spawn_blocking(move || {
        let parsed_hash = PasswordHash::new(&hash)
            .map_err(|_| AppError::InternalError("Invalid password hash".to_string()))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    })
    .await?
}

/// Login endpoint
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<Json<ApiResponse<LoginResponse>>> {
    let Json(req) = payload?;
    let username_or_email = req.username_or_email.trim();
    if username_or_email.is_empty() || req.password.is_empty() {
        return Err(AppError::ValidationError(
            "Username/email and password are required".to_string(),
        ));
    }

    let user = User::find_by_login(&state.pool, username_or_email)
        .await?
        .ok_or_else(|| {
            AppError::AuthenticationFailed(
                "Account does not exist. Please check your username/email or register for a new account."
                    .to_string(),
            )
        })?;

    if !verify_password(req.password, user.password_hash.clone()).await? {
        return Err(AppError::AuthenticationFailed(
            "Incorrect password. Please try again.".to_string(),
        ));
    }

    if !user.is_active {
        return Err(AppError::AuthenticationFailed(
            "Account is deactivated".to_string(),
        ));
    }

    let token = generate_jwt(&user, &state.config.jwt_secret, state.config.jwt_expiration_hours)?;
    tracing::info!("User {} logged in", user.username);

    Ok(Json(ApiResponse::ok(LoginResponse {
        token,
        user: user.to_info(),
    })))
}

/// Register a new account and log it in
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<ApiResponse<LoginResponse>>)> {
    let Json(req) = payload?;
    let username = req.username.trim().to_string();
    let email = req.email.trim().to_lowercase();

    if username.is_empty() || email.is_empty() || req.password.is_empty() {
        return Err(AppError::ValidationError("All fields are required".to_string()));
    }
    validation::validate_registration(
        &username,
        &email,
        &req.password,
        req.confirm_password.as_deref(),
    )
    .map_err(AppError::ValidationError)?;

    if User::find_by_username(&state.pool, &username).await?.is_some() {
        return Err(AppError::AlreadyExists("Username already exists".to_string()));
    }
    if User::find_by_email(&state.pool, &email).await?.is_some() {
        return Err(AppError::AlreadyExists("Email already exists".to_string()));
    }

    let password_hash = hash_password(req.password).await?;
    let user = User::create(&state.pool, &username, &email, &password_hash).await?;
    let token = generate_jwt(&user, &state.config.jwt_secret, state.config.jwt_expiration_hours)?;

    tracing::info!("New user registered: {} ({})", user.username, user.id);

    Ok((
        StatusCode::CREATED,
        Json(
            ApiResponse::ok(LoginResponse {
                token,
                user: user.to_info(),
            })
            .with_message("Registration successful"),
        ),
    ))
}

/// Current user
pub async fn me(ctx: UserContext) -> Json<ApiResponse<UserInfo>> {
    Json(ApiResponse::ok(ctx.user.to_info()))
}

/// Revoke the presented token
pub async fn logout(
    State(state): State<AppState>,
    ctx: UserContext,
) -> AppResult<Json<ApiResponse<()>>> {
    RevokedToken::revoke(&state.pool, &ctx.jti, ctx.expires_at).await?;
    let purged = RevokedToken::purge_expired(&state.pool).await?;
    tracing::debug!("User {} logged out ({} stale revocations purged)", ctx.user.username, purged);

    Ok(Json(ApiResponse::message("Successfully logged out")))
}

/// Start a password reset. The answer never reveals whether the email exists.
pub async fn forgot_password(
    State(state): State<AppState>,
    payload: Result<Json<ForgotPasswordRequest>, JsonRejection>,
) -> AppResult<Json<ForgotPasswordResponse>> {
    let Json(req) = payload?;
    let email = req.email.trim().to_lowercase();
    if email.is_empty() {
        return Err(AppError::ValidationError("Email is required".to_string()));
    }
    validation::validate_email(&email).map_err(AppError::ValidationError)?;

    let generic = || ForgotPasswordResponse {
        success: true,
        message: RESET_REQUESTED.to_string(),
        reset_link: None,
        debug: None,
    };

    let Some(user) = User::find_by_email(&state.pool, &email).await? else {
        tracing::debug!("Password reset requested for unknown email");
        return Ok(Json(generic()));
    };

    let (token, _) =
        PasswordResetToken::issue(&state.pool, &user.id, state.config.reset_token_ttl_minutes)
            .await?;
    let reset_link = state.config.reset_link(&token);

    match state
        .notifier
        .send_password_reset(&user.email, &user.username, &reset_link)
        .await
    {
        Ok(()) => Ok(Json(generic())),
        Err(err) if !state.config.is_production() => {
            match err {
                NotifyError::NotConfigured => {
                    tracing::info!("No mail service configured, returning reset link in response")
                }
                other => tracing::warn!("Password reset email failed: {}", other),
            }
            Ok(Json(ForgotPasswordResponse {
                success: true,
                message: "Password reset link generated (Email service unavailable)".to_string(),
                reset_link: Some(reset_link),
                debug: Some(true),
            }))
        }
        Err(err) => {
            tracing::error!("Password reset email for user {} failed: {}", user.id, err);
            Ok(Json(generic()))
        }
    }
}

/// Complete a password reset with a single-use token
pub async fn reset_password(
    State(state): State<AppState>,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> AppResult<Json<ApiResponse<()>>> {
    let Json(req) = payload?;
    let token = req.token.trim();
    if token.is_empty() {
        return Err(AppError::ValidationError("Reset token is required".to_string()));
    }
    if req.password.is_empty() {
        return Err(AppError::ValidationError("New password is required".to_string()));
    }
    validation::validate_strong_password(&req.password).map_err(AppError::ValidationError)?;

    let invalid = || AppError::ValidationError("Invalid reset token".to_string());
    let reset = PasswordResetToken::find_by_token(&state.pool, token)
        .await?
        .ok_or_else(invalid)?;
    if let Some(user_id) = req.user_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        if user_id != reset.user_id {
            return Err(invalid());
        }
    }
    if !reset.is_usable() {
        return Err(AppError::ValidationError(
            "Reset token has expired or been used".to_string(),
        ));
    }

    let user = User::find_by_id(&state.pool, &reset.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    if !reset.consume(&state.pool).await? {
        return Err(AppError::ValidationError(
            "Reset token has expired or been used".to_string(),
        ));
    }
    let password_hash = hash_password(req.password).await?;
    User::update_password(&state.pool, &user.id, &password_hash).await?;

    tracing::info!("Password reset for user {}", user.id);
    Ok(Json(ApiResponse::message("Password has been reset successfully")))
}

/// Generate JWT token
pub fn generate_jwt(user: &User, secret: &str, expiration_hours: u64) -> AppResult<String> {
    let now = Utc::now();
    let exp = now + Duration::hours(expiration_hours as i64);

    let claims = Claims {
        sub: user.id.clone(),
        jti: Uuid::new_v4().to_string(),
        exp: exp.timestamp() as usize,
        iat: now.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::InternalError(e.to_string()))
}
