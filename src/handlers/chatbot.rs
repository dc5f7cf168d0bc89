//! Chat assistant handlers

use std::collections::BTreeMap;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chatbot::{self, ChatTurn, ConversationSummary, MessageContext, ScenarioInfo, Verdict};
use crate::classifier::ensemble::Label;
use crate::classifier::explain::Method;
use crate::classifier::ExplanationReport;
use crate::middleware::auth::UserContext;
use crate::models::ApiResponse;
use crate::validation;
use crate::{AppError, AppResult, AppState};

const CHAT_FEATURES: usize = 5;
const QUICK_FEATURES: usize = 3;

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default = "default_true")]
    pub analyze_message: bool,
}

#[derive(Debug, Deserialize)]
pub struct QuickAnalyzeRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpamAnalysis {
    pub prediction: Label,
    pub confidence: f64,
    pub spam_probability: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub bot_response: String,
    pub user_message: String,
    pub timestamp: DateTime<Utc>,
    pub spam_analysis: Option<SpamAnalysis>,
    pub explanation: Option<ExplanationReport>,
    pub conversation_length: usize,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationView {
    pub conversation: Vec<ChatTurn>,
    pub summary: ConversationSummary,
    pub user_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickAnalysis {
    pub message: String,
    pub advice: String,
    pub context_analysis: MessageContext,
    pub spam_prediction: SpamAnalysis,
    pub explanation: ExplanationReport,
    pub user_name: String,
}

#[derive(Debug, Serialize)]
pub struct ScenarioList {
    pub scenarios: BTreeMap<&'static str, ScenarioInfo>,
    pub total_scenarios: usize,
}

fn chat_message(raw: &str) -> AppResult<String> {
    if raw.trim().is_empty() {
        return Err(AppError::ValidationError("Message cannot be empty".to_string()));
    }
    validation::validate_message(raw)
        .map(str::to_string)
        .map_err(AppError::ValidationError)
}

/// Classify and explain on a blocking thread.
async fn analyze(
    state: &AppState,
    message: String,
    num_features: usize,
    method: Method,
) -> AppResult<(SpamAnalysis, ExplanationReport)> {
    let detector = state.detector.clone();
    let result = tokio::task::spawn_blocking(move || {
        let classification = detector.classify(&message);
        let report = detector.explain(&message, num_features, method);
        (classification, report)
    })
    .await?;

    let (classification, report) = result;
    let outcome = classification.outcome;
    Ok((
        SpamAnalysis {
            prediction: outcome.majority,
            confidence: outcome.majority_confidence,
            spam_probability: outcome.weighted_spam_probability,
        },
        report,
    ))
}

/// One conversational turn, optionally classifying the message
pub async fn chat(
    State(state): State<AppState>,
    ctx: UserContext,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> AppResult<Json<ApiResponse<ChatReply>>> {
    let started = Instant::now();
    let Json(req) = payload?;
    let message = chat_message(&req.message)?;

    let history_len = state.chatbot.turn_count(ctx.user_id()) + 1;

    let (spam_analysis, explanation) = if req.analyze_message {
        let (analysis, report) =
            analyze(&state, message.clone(), CHAT_FEATURES, Method::Combined).await?;
        (Some(analysis), Some(report))
    } else {
        (None, None)
    };

    let verdict = spam_analysis.as_ref().map(|a| Verdict {
        prediction: a.prediction,
        confidence: a.confidence,
    });
    let features = explanation
        .as_ref()
        .map(|e| e.top_features.as_slice())
        .unwrap_or_default();
    let bot_response = chatbot::compose_response(
        &ctx.user.username,
        &message,
        verdict,
        features,
        history_len,
    );
    let conversation_length =
        state.chatbot.record_exchange(ctx.user_id(), &message, &bot_response);

    Ok(Json(ApiResponse::ok(ChatReply {
        bot_response,
        user_message: message,
        timestamp: Utc::now(),
        spam_analysis,
        explanation,
        conversation_length,
        processing_time_ms: started.elapsed().as_millis() as u64,
    })))
}

pub async fn conversation(
    State(state): State<AppState>,
    ctx: UserContext,
) -> Json<ApiResponse<ConversationView>> {
    Json(ApiResponse::ok(ConversationView {
        conversation: state.chatbot.conversation(ctx.user_id()),
        summary: state.chatbot.summary(ctx.user_id()),
        user_name: ctx.user.username.clone(),
    }))
}

pub async fn clear(State(state): State<AppState>, ctx: UserContext) -> Json<ApiResponse<()>> {
    state.chatbot.clear(ctx.user_id());
    Json(ApiResponse::message(format!(
        "Conversation cleared for {}",
        ctx.user.username
    )))
}

/// Stateless advice for a single message; conversation memory is untouched
pub async fn quick_analyze(
    State(state): State<AppState>,
    ctx: UserContext,
    payload: Result<Json<QuickAnalyzeRequest>, JsonRejection>,
) -> AppResult<Json<ApiResponse<QuickAnalysis>>> {
    let Json(req) = payload?;
    let message = chat_message(&req.message)?;

    let (analysis, explanation) =
        analyze(&state, message.clone(), QUICK_FEATURES, Method::Keyword).await?;
    let advice = chatbot::compose_response(
        &ctx.user.username,
        &message,
        Some(Verdict {
            prediction: analysis.prediction,
            confidence: analysis.confidence,
        }),
        &explanation.top_features,
        1,
    );

    Ok(Json(ApiResponse::ok(QuickAnalysis {
        context_analysis: chatbot::analyze_context(&message),
        message,
        advice,
        spam_prediction: analysis,
        explanation,
        user_name: ctx.user.username.clone(),
    })))
}

pub async fn scenarios(_ctx: UserContext) -> Json<ApiResponse<ScenarioList>> {
    let scenarios = chatbot::scenarios();
    Json(ApiResponse::ok(ScenarioList {
        total_scenarios: scenarios.len(),
        scenarios,
    }))
}
