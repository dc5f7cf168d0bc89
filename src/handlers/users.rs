//! Account, history and profile handlers

use std::path::Path;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Multipart, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use uuid::Uuid;

use crate::handlers::auth::{hash_password, verify_password};
use crate::middleware::auth::UserContext;
use crate::models::{
    compute_stats, export_csv, ApiResponse, ChangePasswordRequest, PagedResponse, Pagination,
    Prediction, PredictionFeedback, PredictionQuery, PredictionResult, ProfileUpdate,
    RevokedToken, Theme, User, UserInfo, UserStats,
};
use crate::validation;
use crate::{AppError, AppResult, AppState};

/// Public URL prefix of stored profile images
pub const PROFILE_IMAGE_URL: &str = "/uploads/profile_images";
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif"];

/// Dashboard statistics over the caller's full history
pub async fn stats(
    State(state): State<AppState>,
    ctx: UserContext,
) -> AppResult<Json<ApiResponse<UserStats>>> {
    let predictions =
        Prediction::all_for_user(&state.pool, ctx.user_id(), &PredictionQuery::default()).await?;
    let real_time_accuracy = PredictionFeedback::real_time_accuracy(&state.pool).await?;

    Ok(Json(ApiResponse::ok(compute_stats(
        &predictions,
        state.detector.accuracy(),
        real_time_accuracy,
    ))))
}

/// Paginated history, newest first
pub async fn predictions(
    State(state): State<AppState>,
    ctx: UserContext,
    Query(query): Query<PredictionQuery>,
) -> AppResult<Json<PagedResponse<PredictionResult>>> {
    let (rows, total) = Prediction::list_for_user(&state.pool, ctx.user_id(), &query).await?;

    Ok(Json(PagedResponse {
        success: true,
        data: rows.iter().map(Prediction::to_result).collect(),
        pagination: Pagination::new(query.page(), query.per_page(), total),
    }))
}

/// CSV download of the filtered history
pub async fn export(
    State(state): State<AppState>,
    ctx: UserContext,
    Query(query): Query<PredictionQuery>,
) -> AppResult<impl IntoResponse> {
    let rows = Prediction::all_for_user(&state.pool, ctx.user_id(), &query).await?;
    let body = export_csv(&rows).map_err(|e| AppError::InternalError(e.to_string()))?;

    let disposition = format!(
        "attachment; filename=\"sms_guard_predictions_{}.csv\"",
        Utc::now().format("%Y%m%d_%H%M%S")
    );
    tracing::debug!("Exporting {} predictions for user {}", rows.len(), ctx.user_id());

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}

/// Profile changes, as JSON or as multipart form data with an optional
/// `profileImage` file.
pub async fn update_profile(
    State(state): State<AppState>,
    ctx: UserContext,
    req: Request,
) -> AppResult<Json<ApiResponse<UserInfo>>> {
    let is_multipart = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    let (update, image) = if is_multipart {
        let multipart = Multipart::from_request(req, &state)
            .await
            .map_err(|e| AppError::ValidationError(e.body_text()))?;
        read_profile_form(multipart).await?
    } else {
        let payload: Result<Json<ProfileUpdate>, JsonRejection> =
            Json::from_request(req, &state).await;
        let Json(update) = payload?;
        (update, None)
    };

    let mut user = ctx.user.clone();
    apply_profile_update(&state, &mut user, update).await?;

    // The old image is only removed once the new URL is saved.
    let old_image = user.profile_image.clone();
    let stored_image = match image {
        Some((file_name, bytes)) => {
            let url = store_profile_image(&state.config.upload_dir, &user.id, &file_name, &bytes)
                .await?;
            user.profile_image = Some(url.clone());
            Some(url)
        }
        None => None,
    };

    let saved = match user.save_profile(&state.pool).await {
        Ok(saved) => saved,
        Err(e) => {
            if let Some(url) = &stored_image {
                remove_profile_image(&state.config.upload_dir, url).await;
            }
            return Err(e.into());
        }
    };
    if let (Some(_), Some(old)) = (&stored_image, &old_image) {
        remove_profile_image(&state.config.upload_dir, old).await;
    }
    tracing::info!("Profile updated for user {}", saved.id);

    Ok(Json(
        ApiResponse::ok(saved.to_info()).with_message("Profile updated successfully"),
    ))
}

async fn apply_profile_update(
    state: &AppState,
    user: &mut User,
    update: ProfileUpdate,
) -> AppResult<()> {
    if let Some(username) = update.username.map(|u| u.trim().to_string()) {
        if username != user.username {
            if username.chars().count() < 3 {
                return Err(AppError::ValidationError(
                    "Username must be at least 3 characters long".to_string(),
                ));
            }
            if let Some(existing) = User::find_by_username(&state.pool, &username).await? {
                if existing.id != user.id {
                    return Err(AppError::AlreadyExists("Username already taken".to_string()));
                }
            }
            user.username = username;
        }
    }

    if let Some(email) = update.email.map(|e| e.trim().to_lowercase()) {
        if email != user.email {
            validation::validate_email(&email)
                .map_err(|_| AppError::ValidationError("Invalid email format".to_string()))?;
            if let Some(existing) = User::find_by_email(&state.pool, &email).await? {
                if existing.id != user.id {
                    return Err(AppError::AlreadyExists("Email already registered".to_string()));
                }
            }
            user.email = email;
        }
    }

    if let Some(bio) = update.bio {
        validation::validate_bio(&bio).map_err(AppError::ValidationError)?;
        let bio = bio.trim().to_string();
        user.bio = if bio.is_empty() { None } else { Some(bio) };
    }

    // Unknown themes are ignored
    if let Some(theme) = update.theme.as_deref().and_then(Theme::parse) {
        user.theme = theme.as_str().to_string();
    }
    Ok(())
}

type ImageUpload = (String, Vec<u8>);

async fn read_profile_form(
    mut multipart: Multipart,
) -> AppResult<(ProfileUpdate, Option<ImageUpload>)> {
    let field_error = |e: axum::extract::multipart::MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge
        } else {
            AppError::ValidationError(e.body_text())
        }
    };

    let mut update = ProfileUpdate::default();
    let mut image = None;
    while let Some(field) = multipart.next_field().await.map_err(field_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "profileImage" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(field_error)?;
                if !file_name.is_empty() && !bytes.is_empty() {
                    image = Some((file_name, bytes.to_vec()));
                }
            }
            "username" => update.username = Some(field.text().await.map_err(field_error)?),
            "email" => update.email = Some(field.text().await.map_err(field_error)?),
            "bio" => update.bio = Some(field.text().await.map_err(field_error)?),
            "theme" => update.theme = Some(field.text().await.map_err(field_error)?),
            other => tracing::debug!("Ignoring profile form field {}", other),
        }
    }
    Ok((update, image))
}

fn image_extension(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name).extension()?.to_str()?.to_ascii_lowercase();
    IMAGE_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// Write the image under a fresh name and return its public URL.
async fn store_profile_image(
    upload_dir: &Path,
    user_id: &str,
    file_name: &str,
    bytes: &[u8],
) -> AppResult<String> {
    let ext = image_extension(file_name).ok_or_else(|| {
        AppError::ValidationError("Invalid file type. Allowed: png, jpg, jpeg, gif".to_string())
    })?;
    let stored_name = format!("{}_{}.{}", user_id, Uuid::new_v4().simple(), ext);

    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(|e| AppError::InternalError(format!("Cannot create upload dir: {}", e)))?;
    tokio::fs::write(upload_dir.join(&stored_name), bytes)
        .await
        .map_err(|e| AppError::InternalError(format!("Cannot store profile image: {}", e)))?;

    Ok(format!("{}/{}", PROFILE_IMAGE_URL, stored_name))
}

async fn remove_profile_image(upload_dir: &Path, url: &str) {
    let Some(name) = url
        .strip_prefix(PROFILE_IMAGE_URL)
        .map(|n| n.trim_start_matches('/'))
        .filter(|n| !n.is_empty() && !n.contains(['/', '\\']) && *n != "..")
    else {
        return;
    };
    if let Err(e) = tokio::fs::remove_file(upload_dir.join(name)).await {
        tracing::warn!("Could not remove old profile image {}: {}", name, e);
    }
}

pub async fn change_password(
    State(state): State<AppState>,
    ctx: UserContext,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> AppResult<Json<ApiResponse<()>>> {
    let Json(req) = payload?;
    validation::validate_password_change(
        &req.current_password,
        &req.new_password,
        &req.confirm_new_password,
    )
    .map_err(AppError::ValidationError)?;

    if !verify_password(req.current_password, ctx.user.password_hash.clone()).await? {
        return Err(AppError::ValidationError(
            "Current password is incorrect".to_string(),
        ));
    }

    let password_hash = hash_password(req.new_password).await?;
    User::update_password(&state.pool, ctx.user_id(), &password_hash).await?;
    tracing::info!("Password changed for user {}", ctx.user_id());

    Ok(Json(ApiResponse::message("Password changed successfully")))
}

/// Delete the account with its history, and revoke the presented token
pub async fn delete_account(
    State(state): State<AppState>,
    ctx: UserContext,
) -> AppResult<Json<ApiResponse<()>>> {
    if !User::delete(&state.pool, ctx.user_id()).await? {
        return Err(AppError::NotFound("User not found".to_string()));
    }
    RevokedToken::revoke(&state.pool, &ctx.jti, ctx.expires_at).await?;
    state.chatbot.clear(ctx.user_id());
    if let Some(image) = &ctx.user.profile_image {
        remove_profile_image(&state.config.upload_dir, image).await;
    }

    tracing::info!("Account deleted: {} ({})", ctx.user.username, ctx.user_id());
    Ok(Json(ApiResponse::message("Account deleted successfully")))
}
