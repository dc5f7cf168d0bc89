//! Configuration module

use std::env;
use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Server port
    pub port: u16,

    /// JWT secret key
    pub jwt_secret: String,

    /// JWT expiration in hours
    pub jwt_expiration_hours: u64,

    /// Environment (development, production, testing)
    pub environment: String,

    /// Allowed CORS origins, `*` allows any
    pub cors_origins: Vec<String>,

    /// Base URL of the web client, used to build password reset links
    pub frontend_url: String,

    /// Directory for uploaded profile images
    pub upload_dir: PathBuf,

    /// Maximum request body size in bytes
    pub max_upload_bytes: usize,

    /// Lifetime of a password reset token
    pub reset_token_ttl_minutes: i64,

    /// Optional labelled CSV corpus used to train the classifier
    pub dataset_path: Option<PathBuf>,

    /// Vocabulary size of the TF-IDF vectorizer
    pub max_features: usize,

    /// SendGrid API key; reset links fall back to the response body without it
    pub sendgrid_api_key: Option<String>,

    /// Sender address for outgoing mail
    pub mail_from: String,

    /// Create the `demo` / `demo123` account at startup
    pub seed_demo_user: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://smsguard.db".to_string()),

            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5000),

            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| "smsguard-jwt-secret-change-in-production".to_string()),

            jwt_expiration_hours: env::var("JWT_EXPIRATION_HOURS")
                .ok()
                .and_then(|h| h.parse().ok())
                .unwrap_or(24 * 7),

            environment: env::var("ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),

            cors_origins: env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:5173".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),

            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),

            upload_dir: env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("uploads/profile_images")),

            max_upload_bytes: env::var("MAX_UPLOAD_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5 * 1024 * 1024),

            reset_token_ttl_minutes: env::var("RESET_TOKEN_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),

            dataset_path: env::var("DATASET_PATH").ok().map(PathBuf::from),

            max_features: env::var("MAX_FEATURES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4000),

            sendgrid_api_key: env::var("SENDGRID_API_KEY").ok().filter(|k| !k.is_empty()),

            mail_from: env::var("MAIL_FROM")
                .unwrap_or_else(|_| "noreply@smsguard.com".to_string()),

            seed_demo_user: env::var("SEED_DEMO_USER")
                .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
                .unwrap_or(true),
        }
    }

    /// Configuration for tests: in-memory database, no mail, no demo user
    pub fn for_testing() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_expiration_hours: 1,
            environment: "testing".to_string(),
            cors_origins: vec!["*".to_string()],
            frontend_url: "http://localhost:5173".to_string(),
            upload_dir: env::temp_dir().join("smsguard-test-uploads"),
            max_upload_bytes: 5 * 1024 * 1024,
            reset_token_ttl_minutes: 60,
            dataset_path: None,
            max_features: 4000,
            sendgrid_api_key: None,
            mail_from: "noreply@smsguard.com".to_string(),
            seed_demo_user: false,
        }
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Build the reset link sent to a user
    pub fn reset_link(&self, token: &str) -> String {
        format!("{}/reset-password?token={}", self.frontend_url.trim_end_matches('/'), token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_link_trims_trailing_slash() {
        let mut config = Config::for_testing();
        config.frontend_url = "https://smsguard.app/".to_string();
        assert_eq!(
            config.reset_link("abc"),
            "https://smsguard.app/reset-password?token=abc"
        );
    }

    #[test]
    fn test_production_flag() {
        let mut config = Config::for_testing();
        assert!(!config.is_production());
        config.environment = "production".to_string();
        assert!(config.is_production());
    }
}
