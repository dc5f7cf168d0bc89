//! HTTP client for the SMS Guard REST API

use std::time::Duration;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ClientError, SessionStore};
use crate::classifier::ensemble::Label;
use crate::classifier::explain::DEFAULT_NUM_FEATURES;
use crate::classifier::ExplanationReport;
use crate::handlers::chatbot::{ChatReply, ConversationView, QuickAnalysis};
use crate::models::{
    ApiResponse, EnsemblePredictionResult, LoginResponse, Pagination, PredictionQuery,
    PredictionResult, ProfileUpdate, UserInfo, UserStats,
};
use crate::validation;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Error texts for one operation: `rejected` when the server answers
/// `success: false` without an error, `failed` for transport and HTTP errors.
struct Fallback {
    rejected: &'static str,
    failed: &'static str,
}

const NETWORK_ERROR: &str = "Network error. Please try again.";

const HEALTH: Fallback = Fallback {
    rejected: "Server unavailable",
    failed: NETWORK_ERROR,
};
const LOGIN: Fallback = Fallback {
    rejected: "Login failed",
    failed: "Login failed. Please try again.",
};
const REGISTER: Fallback = Fallback {
    rejected: "Registration failed",
    failed: NETWORK_ERROR,
};
const CURRENT_USER: Fallback = Fallback {
    rejected: "Not logged in",
    failed: NETWORK_ERROR,
};
const FORGOT_PASSWORD: Fallback = Fallback {
    rejected: "Failed to send reset link",
    failed: NETWORK_ERROR,
};
const RESET_PASSWORD: Fallback = Fallback {
    rejected: "Failed to reset password",
    failed: NETWORK_ERROR,
};
const PREDICT: Fallback = Fallback {
    rejected: "Prediction failed",
    failed: "Prediction failed. Please try again.",
};
const EXPLAIN: Fallback = Fallback {
    rejected: "Explanation failed",
    failed: "Unable to explain prediction. Please try again.",
};
const MODEL: Fallback = Fallback {
    rejected: "Failed to fetch model information",
    failed: "Failed to fetch model information.",
};
const FEEDBACK: Fallback = Fallback {
    rejected: "Failed to submit feedback",
    failed: "Failed to submit feedback.",
};
const STATS: Fallback = Fallback {
    rejected: "Failed to fetch user statistics",
    failed: "Failed to fetch user statistics.",
};
const PREDICTIONS: Fallback = Fallback {
    rejected: "Failed to fetch predictions",
    failed: "Failed to fetch predictions.",
};
const EXPORT: Fallback = Fallback {
    rejected: "Failed to export predictions",
    failed: "Failed to export predictions.",
};
const PROFILE: Fallback = Fallback {
    rejected: "Failed to update profile",
    failed: "Failed to update profile.",
};
const CHANGE_PASSWORD: Fallback = Fallback {
    rejected: "Failed to change password",
    failed: "Failed to change password.",
};
const DELETE_ACCOUNT: Fallback = Fallback {
    rejected: "Failed to delete account",
    failed: "Failed to delete account.",
};
const CHAT: Fallback = Fallback {
    rejected: "Chat request failed",
    failed: "Chat request failed. Please try again.",
};

/// Answer of `POST /auth/forgot-password`. `reset_link` is only present
/// when the server could not send mail outside production.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetLinkInfo {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub reset_link: Option<String>,
    #[serde(default)]
    pub debug: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionPage {
    pub items: Vec<PredictionResult>,
    pub pagination: Pagination,
}

/// Profile image to upload with a profile update
#[derive(Debug, Clone)]
pub struct ImageFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

pub struct SmsGuardClient {
    base_url: String,
    http: reqwest::Client,
    session: SessionStore,
}

fn message_of(body: &Value) -> Option<String> {
    body.get("message").and_then(Value::as_str).map(str::to_string)
}

/// Decode `data` from a successful body.
fn envelope<T: DeserializeOwned>(
    result: Result<Value, String>,
    fallback: &Fallback,
) -> ApiResponse<T> {
    let mut body = match result {
        Ok(body) => body,
        Err(error) => return ApiResponse::failure(error),
    };
    let message = message_of(&body);
    let data = body.get_mut("data").map(Value::take).unwrap_or(Value::Null);
    match serde_json::from_value::<T>(data) {
        Ok(data) => {
            let mut response = ApiResponse::ok(data);
            response.message = message;
            response
        }
        Err(e) => {
            tracing::warn!("Unexpected response payload: {}", e);
            ApiResponse::failure(fallback.failed)
        }
    }
}

fn query_pairs(query: &PredictionQuery) -> Vec<(&'static str, String)> {
    let mut pairs = vec![
        ("page", query.page().to_string()),
        ("per_page", query.per_page().to_string()),
        ("filter", query.filter.as_str().to_string()),
    ];
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        pairs.push(("search", search.to_string()));
    }
    pairs
}

impl SmsGuardClient {
    /// `base_url` is the server root, e.g. `http://localhost:5000`.
    pub fn new(base_url: impl Into<String>, session: SessionStore) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            session,
        })
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    fn token(&self) -> Option<String> {
        self.session.token().unwrap_or_else(|e| {
            tracing::warn!("Cannot read session: {}", e);
            None
        })
    }

    /// A 401 ends the session, except on the classification endpoints where
    /// a rejected token must not log the user out mid-analysis.
    fn handle_unauthorized(&self, path: &str) {
        if path.starts_with("/predict") || path.starts_with("/explain") {
            return;
        }
        tracing::info!("Session rejected by server, clearing local session");
        if let Err(e) = self.session.clear() {
            tracing::warn!("Cannot clear session: {}", e);
        }
    }

    /// Send with the stored token. Any non-2xx answer becomes
    /// `Err(body.error || fallback)`.
    async fn dispatch(
        &self,
        path: &str,
        request: RequestBuilder,
        fallback: &Fallback,
    ) -> Result<Response, String> {
        let request = match self.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await.map_err(|e| {
            tracing::warn!("Request to {} failed: {}", path, e);
            fallback.failed.to_string()
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED {
            self.handle_unauthorized(path);
        }
        let body: Value = response.json().await.unwrap_or(Value::Null);
        tracing::debug!("{} answered {}: {}", path, status, body);
        Err(body
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| fallback.failed.to_string()))
    }

    /// JSON body of a successful call whose `success` flag is true.
    async fn send(
        &self,
        path: &str,
        request: RequestBuilder,
        fallback: &Fallback,
    ) -> Result<Value, String> {
        let response = self.dispatch(path, request, fallback).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|_| fallback.failed.to_string())?;

        if body.get("success").and_then(Value::as_bool) == Some(true) {
            Ok(body)
        } else {
            Err(body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or(fallback.rejected)
                .to_string())
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, fallback: &Fallback) -> ApiResponse<T> {
        let request = self.http.get(self.url(path));
        envelope(self.send(path, request, fallback).await, fallback)
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &Value,
        fallback: &Fallback,
    ) -> ApiResponse<T> {
        let request = self.http.post(self.url(path)).json(body);
        envelope(self.send(path, request, fallback).await, fallback)
    }

    fn store_auth(&self, response: &ApiResponse<LoginResponse>) {
        if let Some(auth) = &response.data {
            if let Err(e) = self.session.set_auth(&auth.token, &auth.user) {
                tracing::warn!("Cannot save session: {}", e);
            }
        }
    }

    // Health

    /// The raw health document, `{success, message, version, timestamp}`.
    pub async fn health(&self) -> ApiResponse<Value> {
        match self.send("/health", self.http.get(self.url("/health")), &HEALTH).await {
            Ok(body) => ApiResponse::ok(body),
            Err(error) => ApiResponse::failure(error),
        }
    }

    // Authentication

    pub async fn login(&self, username_or_email: &str, password: &str) -> ApiResponse<LoginResponse> {
        if let Err(e) = validation::validate_login(username_or_email, password) {
            return ApiResponse::failure(e);
        }
        let body = json!({
            "usernameOrEmail": username_or_email.trim(),
            "password": password,
        });
        let response = self.post("/auth/login", &body, &LOGIN).await;
        self.store_auth(&response);
        response
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        confirm_password: &str,
    ) -> ApiResponse<LoginResponse> {
        let username = username.trim();
        let email = email.trim().to_lowercase();
        if let Err(e) =
            validation::validate_registration(username, &email, password, Some(confirm_password))
        {
            return ApiResponse::failure(e);
        }
        let body = json!({
            "username": username,
            "email": email,
            "password": password,
        });
        let response = self.post("/auth/register", &body, &REGISTER).await;
        self.store_auth(&response);
        response
    }

    /// Revoke the token on the server when possible; the local session is
    /// cleared regardless.
    pub async fn logout(&self) -> ApiResponse<()> {
        if self.is_authenticated() {
            let response: ApiResponse<()> = self.post("/auth/logout", &json!({}), &CURRENT_USER).await;
            if !response.success {
                tracing::debug!("Server logout failed: {:?}", response.error);
            }
        }
        if let Err(e) = self.session.clear() {
            tracing::warn!("Cannot clear session: {}", e);
        }
        ApiResponse::message("Successfully logged out")
    }

    /// Refresh the stored user. Only a 401 forgets the session.
    pub async fn current_user(&self) -> ApiResponse<UserInfo> {
        if !self.is_authenticated() {
            return ApiResponse::failure(CURRENT_USER.rejected);
        }
        let response: ApiResponse<UserInfo> = self.get("/auth/me", &CURRENT_USER).await;
        if let Some(user) = &response.data {
            if let Err(e) = self.session.set_user(user) {
                tracing::warn!("Cannot update session: {}", e);
            }
        }
        response
    }

    pub async fn forgot_password(&self, email: &str) -> ApiResponse<ResetLinkInfo> {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            return ApiResponse::failure("Email is required");
        }
        if let Err(e) = validation::validate_email(&email) {
            return ApiResponse::failure(e);
        }
        let request = self
            .http
            .post(self.url("/auth/forgot-password"))
            .json(&json!({ "email": email }));
        match self.send("/auth/forgot-password", request, &FORGOT_PASSWORD).await {
            Ok(body) => match serde_json::from_value::<ResetLinkInfo>(body) {
                Ok(info) => ApiResponse::ok(info),
                Err(_) => ApiResponse::failure(FORGOT_PASSWORD.failed),
            },
            Err(error) => ApiResponse::failure(error),
        }
    }

    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
        user_id: Option<&str>,
    ) -> ApiResponse<()> {
        if token.trim().is_empty() {
            return ApiResponse::failure("Reset token is required");
        }
        if let Err(e) = validation::validate_strong_password(new_password) {
            return ApiResponse::failure(e);
        }
        let mut body = json!({ "token": token.trim(), "password": new_password });
        if let Some(user_id) = user_id {
            body["user_id"] = json!(user_id);
        }
        let mut response: ApiResponse<()> =
            self.post("/auth/reset-password", &body, &RESET_PASSWORD).await;
        if response.success && response.message.is_none() {
            response.message = Some("Password reset successful".to_string());
        }
        response
    }

    // Classification

    /// Classify a message. Successful results are cached in the session.
    pub async fn predict(&self, message: &str) -> ApiResponse<EnsemblePredictionResult> {
        if message.trim().is_empty() {
            return ApiResponse::failure("Message cannot be empty");
        }
        let message = match validation::validate_message(message) {
            Ok(m) => m,
            Err(e) => return ApiResponse::failure(e),
        };
        let response: ApiResponse<EnsemblePredictionResult> =
            self.post("/predict", &json!({ "message": message }), &PREDICT).await;
        if let Some(result) = &response.data {
            if let Err(e) = self.session.push_prediction(&result.weighted_result) {
                tracing::warn!("Cannot cache prediction: {}", e);
            }
        }
        response
    }

    pub async fn explain(
        &self,
        message: &str,
        num_features: Option<usize>,
    ) -> ApiResponse<ExplanationReport> {
        let message = match validation::validate_message(message) {
            Ok(m) => m,
            Err(e) => return ApiResponse::failure(e),
        };
        let body = json!({
            "message": message,
            "num_features": num_features.unwrap_or(DEFAULT_NUM_FEATURES),
        });
        self.post("/explain", &body, &EXPLAIN).await
    }

    pub async fn model_info(&self) -> ApiResponse<Value> {
        self.get("/model/info", &MODEL).await
    }

    pub async fn model_metrics(&self) -> ApiResponse<Value> {
        self.get("/model/metrics", &MODEL).await
    }

    /// Report the true label of a prediction; `data` is the updated
    /// real-time accuracy, `None` when the server has none yet.
    pub async fn submit_feedback(
        &self,
        prediction_id: &str,
        actual_label: Label,
    ) -> ApiResponse<Option<f64>> {
        if prediction_id.trim().is_empty() {
            return ApiResponse::failure("Prediction ID and actual label required");
        }
        let request = self.http.post(self.url("/prediction/feedback")).json(&json!({
            "predictionId": prediction_id.trim(),
            "actualLabel": actual_label.as_str(),
        }));
        match self.send("/prediction/feedback", request, &FEEDBACK).await {
            Ok(body) => {
                let accuracy = body.get("realTimeAccuracy").and_then(Value::as_f64);
                let mut response = ApiResponse::ok(accuracy);
                response.message = message_of(&body);
                response
            }
            Err(error) => ApiResponse::failure(error),
        }
    }

    // Account

    pub async fn user_stats(&self) -> ApiResponse<UserStats> {
        self.get("/user/stats", &STATS).await
    }

    pub async fn predictions(&self, query: &PredictionQuery) -> ApiResponse<PredictionPage> {
        let path = "/user/predictions";
        let request = self.http.get(self.url(path)).query(&query_pairs(query));
        let mut body = match self.send(path, request, &PREDICTIONS).await {
            Ok(body) => body,
            Err(error) => return ApiResponse::failure(error),
        };
        let items = body.get_mut("data").map(Value::take).unwrap_or(Value::Null);
        let pagination = body.get_mut("pagination").map(Value::take).unwrap_or(Value::Null);
        match (serde_json::from_value(items), serde_json::from_value(pagination)) {
            (Ok(items), Ok(pagination)) => ApiResponse::ok(PredictionPage { items, pagination }),
            _ => ApiResponse::failure(PREDICTIONS.failed),
        }
    }

    /// CSV text of the filtered history.
    pub async fn export_predictions(&self, query: &PredictionQuery) -> ApiResponse<String> {
        let path = "/user/predictions/export";
        let request = self.http.get(self.url(path)).query(&query_pairs(query));
        let response = match self.dispatch(path, request, &EXPORT).await {
            Ok(response) => response,
            Err(error) => return ApiResponse::failure(error),
        };
        match response.text().await {
            Ok(csv) => ApiResponse::ok(csv),
            Err(_) => ApiResponse::failure(EXPORT.failed),
        }
    }

    /// Update the profile, as multipart form data when an image is attached.
    /// The stored user is replaced with the server's answer.
    pub async fn update_profile(
        &self,
        update: &ProfileUpdate,
        image: Option<ImageFile>,
    ) -> ApiResponse<UserInfo> {
        if let Some(username) = &update.username {
            if let Err(e) = validation::validate_username(username.trim()) {
                return ApiResponse::failure(e);
            }
        }
        if let Some(email) = &update.email {
            if let Err(e) = validation::validate_email(&email.trim().to_lowercase()) {
                return ApiResponse::failure(e);
            }
        }
        if let Some(bio) = &update.bio {
            if let Err(e) = validation::validate_bio(bio) {
                return ApiResponse::failure(e);
            }
        }

        let path = "/user/profile";
        let request = match image {
            Some(image) => {
                let mut form = reqwest::multipart::Form::new();
                let fields = [
                    ("username", &update.username),
                    ("email", &update.email),
                    ("bio", &update.bio),
                    ("theme", &update.theme),
                ];
                for (name, value) in fields {
                    if let Some(value) = value {
                        form = form.text(name, value.clone());
                    }
                }
                let part = reqwest::multipart::Part::bytes(image.bytes).file_name(image.file_name);
                form = form.part("profileImage", part);
                self.http.put(self.url(path)).multipart(form)
            }
            None => self.http.put(self.url(path)).json(update),
        };

        let response: ApiResponse<UserInfo> =
            envelope(self.send(path, request, &PROFILE).await, &PROFILE);
        if let Some(user) = &response.data {
            if let Err(e) = self.session.set_user(user) {
                tracing::warn!("Cannot save session: {}", e);
            }
        }
        response
    }

    /// `confirm_new_password` defaults to `new_password`.
    pub async fn change_password(
        &self,
        current_password: &str,
        new_password: &str,
        confirm_new_password: Option<&str>,
    ) -> ApiResponse<()> {
        let confirm = confirm_new_password.unwrap_or(new_password);
        if let Err(e) = validation::validate_password_change(current_password, new_password, confirm) {
            return ApiResponse::failure(e);
        }
        let body = json!({
            "currentPassword": current_password,
            "newPassword": new_password,
            "confirmNewPassword": confirm,
        });
        let path = "/user/change-password";
        let request = self.http.put(self.url(path)).json(&body);
        envelope(self.send(path, request, &CHANGE_PASSWORD).await, &CHANGE_PASSWORD)
    }

    pub async fn delete_account(&self) -> ApiResponse<()> {
        let path = "/user/delete";
        let request = self.http.delete(self.url(path));
        let response: ApiResponse<()> =
            envelope(self.send(path, request, &DELETE_ACCOUNT).await, &DELETE_ACCOUNT);
        if response.success {
            if let Err(e) = self.session.clear() {
                tracing::warn!("Cannot clear session: {}", e);
            }
        }
        response
    }

    // Chat assistant

    pub async fn chat(&self, message: &str, analyze_message: bool) -> ApiResponse<ChatReply> {
        if message.trim().is_empty() {
            return ApiResponse::failure("Message cannot be empty");
        }
        let body = json!({ "message": message.trim(), "analyze_message": analyze_message });
        self.post("/chatbot/chat", &body, &CHAT).await
    }

    pub async fn conversation(&self) -> ApiResponse<ConversationView> {
        self.get("/chatbot/conversation", &CHAT).await
    }

    pub async fn clear_conversation(&self) -> ApiResponse<()> {
        self.post("/chatbot/clear", &json!({}), &CHAT).await
    }

    pub async fn quick_analyze(&self, message: &str) -> ApiResponse<QuickAnalysis> {
        if message.trim().is_empty() {
            return ApiResponse::failure("Message cannot be empty");
        }
        self.post("/chatbot/quick-analyze", &json!({ "message": message.trim() }), &CHAT)
            .await
    }

    pub async fn scenarios(&self) -> ApiResponse<Value> {
        self.get("/chatbot/scenarios", &CHAT).await
    }
}
