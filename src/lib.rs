//! SMS Guard
//!
//! Spam detection for SMS messages: a REST API backed by an ensemble of
//! classifiers with per-token explanations, and a typed client for it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        SMS GUARD                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐  ┌───────────┐  ┌─────────────────────────┐ │
//! │  │  REST API │  │  Auth     │  │  Detector               │ │
//! │  │  (Axum)   │  │  (JWT)    │  │  (TF-IDF + 5 models,    │ │
//! │  │           │  │           │  │   LIME / SHAP)          │ │
//! │  └─────┬─────┘  └─────┬─────┘  └────────────┬────────────┘ │
//! │        └──────────────┼──────────────────────┘              │
//! │                       ▼                                     │
//! │                ┌─────────────┐                             │
//! │                │   SQLite    │                             │
//! │                └─────────────┘                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod chatbot;
pub mod classifier;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod notifier;
pub mod validation;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware as axum_middleware,
    routing::{delete, get, post, put},
    Router,
};
use sqlx::SqlitePool;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use chatbot::ChatbotService;
use classifier::dataset::Dataset;
use classifier::Detector;
use config::Config;
use notifier::Notifier;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Config,
    pub detector: Arc<Detector>,
    pub chatbot: Arc<ChatbotService>,
    pub notifier: Arc<dyn Notifier>,
}

impl AppState {
    pub fn new(config: Config, pool: SqlitePool, detector: Arc<Detector>) -> Self {
        let notifier: Arc<dyn Notifier> = Arc::from(notifier::from_config(&config));
        Self {
            pool,
            config,
            detector,
            chatbot: Arc::new(ChatbotService::new()),
            notifier,
        }
    }
}

/// Train the detector on `DATASET_PATH`, or on the bundled corpus when no
/// dataset is configured or it cannot be loaded.
pub async fn train_detector(config: &Config) -> anyhow::Result<Detector> {
    let dataset_path = config.dataset_path.clone();
    let max_features = config.max_features;

    let detector = tokio::task::spawn_blocking(move || -> anyhow::Result<Detector> {
        let dataset = match dataset_path {
            Some(path) => Dataset::from_path(&path).or_else(|e| {
                tracing::warn!(
                    "Cannot load dataset {}: {}. Falling back to the bundled corpus",
                    path.display(),
                    e
                );
                Dataset::seed()
            })?,
            None => Dataset::seed()?,
        };
        Ok(Detector::train(&dataset, max_features))
    })
    .await??;

    Ok(detector)
}

pub async fn build_state(config: Config, pool: SqlitePool) -> anyhow::Result<AppState> {
    let detector = train_detector(&config).await?;
    Ok(AppState::new(config, pool, Arc::new(detector)))
}

fn cors_layer(config: &Config) -> CorsLayer {
    let origin = if config.cors_origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| match o.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("Ignoring invalid CORS origin {}", o);
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Create the main router with all routes
pub fn create_router(state: AppState) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(handlers::health::check))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/forgot-password", post(handlers::auth::forgot_password))
        .route("/auth/reset-password", post(handlers::auth::reset_password));

    // User routes (JWT auth)
    let protected_routes = Router::new()
        .route("/auth/me", get(handlers::auth::me))
        .route("/auth/logout", post(handlers::auth::logout))

        // Classification
        .route("/predict", post(handlers::predictions::predict))
        .route("/explain", post(handlers::predictions::explain))
        .route("/model/info", get(handlers::predictions::model_info))
        .route("/model/metrics", get(handlers::predictions::model_metrics))
        .route("/prediction/feedback", post(handlers::predictions::feedback))

        // Account
        .route("/user/stats", get(handlers::users::stats))
        .route("/user/predictions", get(handlers::users::predictions))
        .route("/user/predictions/export", get(handlers::users::export))
        .route("/user/profile", put(handlers::users::update_profile))
        .route("/user/change-password", put(handlers::users::change_password))
        .route("/user/delete", delete(handlers::users::delete_account))

        // Chat assistant
        .route("/chatbot/chat", post(handlers::chatbot::chat))
        .route("/chatbot/conversation", get(handlers::chatbot::conversation))
        .route("/chatbot/clear", post(handlers::chatbot::clear))
        .route("/chatbot/quick-analyze", post(handlers::chatbot::quick_analyze))
        .route("/chatbot/scenarios", get(handlers::chatbot::scenarios))

        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_user_auth,
        ));

    let api = Router::new().merge(public_routes).merge(protected_routes);

    Router::new()
        .nest("/api", api)
        .nest_service(
            handlers::users::PROFILE_IMAGE_URL,
            ServeDir::new(&state.config.upload_dir),
        )
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config))
        .with_state(state)
}
