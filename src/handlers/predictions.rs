//! Classification, explanation and model handlers

use axum::extract::rejection::JsonRejection;
use axum::{extract::State, Json};
use serde::Deserialize;
use std::collections::BTreeMap;

use crate::classifier::ensemble::Label;
use crate::classifier::explain::{self, Method};
use crate::classifier::metrics::ModelMetrics;
use crate::classifier::{ExplanationReport, ModelInfo};
use crate::middleware::auth::UserContext;
use crate::models::{
    ApiResponse, EnsemblePredictionResult, FeedbackRequest, FeedbackResponse, Prediction,
    PredictionFeedback,
};
use crate::validation;
use crate::{AppError, AppResult, AppState};

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ExplainRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub num_features: Option<i64>,
    /// Defaults to [`Method::Combined`]
    #[serde(default)]
    pub method: Option<Method>,
}

/// Classify a message with every model and store the ensemble decision
pub async fn predict(
    State(state): State<AppState>,
    ctx: UserContext,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> AppResult<Json<ApiResponse<EnsemblePredictionResult>>> {
    let Json(req) = payload?;
    let message = validation::validate_message(&req.message).map_err(AppError::ValidationError)?;

    let classification = state.detector.classify(message);
    let stored = Prediction::create(&state.pool, ctx.user_id(), message, &classification).await?;

    tracing::debug!(
        user = %ctx.user.username,
        prediction = %stored.prediction,
        confidence = stored.confidence,
        "Message classified"
    );

    Ok(Json(ApiResponse::ok(stored.to_ensemble_result(&classification))))
}

/// Per-token explanation of the ensemble decision
pub async fn explain(
    State(state): State<AppState>,
    _ctx: UserContext,
    payload: Result<Json<ExplainRequest>, JsonRejection>,
) -> AppResult<Json<ApiResponse<ExplanationReport>>> {
    let Json(req) = payload?;
    let message = validation::validate_message(&req.message)
        .map_err(AppError::ValidationError)?
        .to_string();
    let num_features = explain::clamp_num_features(req.num_features);
    let method = req.method.unwrap_or(Method::Combined);

    let detector = state.detector.clone();
    let report =
        tokio::task::spawn_blocking(move || detector.explain(&message, num_features, method))
            .await?;

    Ok(Json(ApiResponse::ok(report)))
}

pub async fn model_info(
    State(state): State<AppState>,
    _ctx: UserContext,
) -> Json<ApiResponse<ModelInfo>> {
    Json(ApiResponse::ok(state.detector.info()))
}

pub async fn model_metrics(
    State(state): State<AppState>,
    _ctx: UserContext,
) -> Json<ApiResponse<BTreeMap<String, ModelMetrics>>> {
    Json(ApiResponse::ok(state.detector.metrics().clone()))
}

/// Record the true label of one of the caller's predictions
pub async fn feedback(
    State(state): State<AppState>,
    ctx: UserContext,
    payload: Result<Json<FeedbackRequest>, JsonRejection>,
) -> AppResult<Json<FeedbackResponse>> {
    let Json(req) = payload?;
    let prediction_id = req.prediction_id.trim();
    let actual_label = req.actual_label.trim().to_lowercase();
    if prediction_id.is_empty() || actual_label.is_empty() {
        return Err(AppError::ValidationError(
            "Prediction ID and actual label required".to_string(),
        ));
    }
    let label = Label::parse(&actual_label).ok_or_else(|| {
        AppError::ValidationError("Actual label must be spam or ham".to_string())
    })?;

    let prediction = Prediction::find_for_user(&state.pool, prediction_id, ctx.user_id())
        .await?
        .ok_or_else(|| AppError::NotFound("Prediction not found".to_string()))?;

    let already = || {
        AppError::AlreadyExists("Feedback already submitted for this prediction".to_string())
    };
    if PredictionFeedback::exists_for_prediction(&state.pool, &prediction.id).await? {
        return Err(already());
    }
    PredictionFeedback::create(&state.pool, &prediction.id, ctx.user_id(), label)
        .await
        .map_err(|e| {
            let duplicate = e
                .as_database_error()
                .is_some_and(|db| db.is_unique_violation());
            if duplicate {
                already()
            } else {
                AppError::from(e)
            }
        })?;

    let real_time_accuracy = PredictionFeedback::real_time_accuracy(&state.pool).await?;
    tracing::info!(
        prediction = %prediction.id,
        predicted = %prediction.prediction,
        actual = label.as_str(),
        "Feedback recorded"
    );

    Ok(Json(FeedbackResponse {
        success: true,
        message: "Feedback submitted successfully".to_string(),
        real_time_accuracy,
    }))
}
