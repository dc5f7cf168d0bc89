//! Outgoing mail for password resets.

use std::time::Duration;

use serde_json::json;
use thiserror::Error;

use crate::config::Config;

const SENDGRID_URL: &str = "https://api.sendgrid.com/v3/mail/send";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no mail service configured")]
    NotConfigured,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("mail service rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },
}

#[axum::async_trait]
pub trait Notifier: Send + Sync {
    async fn send_password_reset(
        &self,
        to: &str,
        username: &str,
        reset_link: &str,
    ) -> Result<(), NotifyError>;
}

/// Picks SendGrid when an API key is configured, otherwise a notifier that
/// always reports [`NotifyError::NotConfigured`].
pub fn from_config(config: &Config) -> Box<dyn Notifier> {
    match &config.sendgrid_api_key {
        Some(key) => Box::new(SendGridNotifier::new(key.clone(), config.mail_from.clone())),
        None => Box::new(Unconfigured),
    }
}

pub struct Unconfigured;

#[axum::async_trait]
impl Notifier for Unconfigured {
    async fn send_password_reset(&self, _: &str, _: &str, _: &str) -> Result<(), NotifyError> {
        Err(NotifyError::NotConfigured)
    }
}

pub struct SendGridNotifier {
    api_key: String,
    from: String,
    client: reqwest::Client,
}

impl SendGridNotifier {
    pub fn new(api_key: String, from: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            api_key,
            from,
            client,
        }
    }
}

fn reset_body(username: &str, reset_link: &str) -> String {
    format!(
        "Hello {username},\n\n\
         We received a request to reset your SMS Guard password.\n\
         Open the link below to choose a new password:\n\n\
         {reset_link}\n\n\
         The link expires in one hour and can only be used once.\n\
         If you did not request a reset you can ignore this email.\n"
    )
}

#[axum::async_trait]
impl Notifier for SendGridNotifier {
    async fn send_password_reset(
        &self,
        to: &str,
        username: &str,
        reset_link: &str,
    ) -> Result<(), NotifyError> {
        let payload = json!({
            "personalizations": [{ "to": [{ "email": to }] }],
            "from": { "email": self.from, "name": "SMS Guard" },
            "subject": "Reset your SMS Guard password",
            "content": [{ "type": "text/plain", "value": reset_body(username, reset_link) }],
        });

        let response = self
            .client
            .post(SENDGRID_URL)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!("Password reset email sent to {}", to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_reports_not_configured() {
        let config = Config::for_testing();
        let notifier = from_config(&config);
        let result = notifier
            .send_password_reset("a@example.com", "alice", "http://x/reset-password?token=t")
            .await;
        assert!(matches!(result, Err(NotifyError::NotConfigured)));
    }

    #[test]
    fn test_reset_body_contains_link() {
        let body = reset_body("alice", "http://localhost:5173/reset-password?token=abc");
        assert!(body.starts_with("Hello alice"));
        assert!(body.contains("token=abc"));
    }
}
