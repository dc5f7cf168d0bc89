//! Typed client for the SMS Guard API
//!
//! Every operation answers with the same `{success, data?, message?, error?}`
//! envelope the server uses. Transport and HTTP failures are folded into
//! that envelope, so callers only branch on `success`.

pub mod api;
pub mod session;

pub use api::{ImageFile, PredictionPage, ResetLinkInfo, SmsGuardClient};
pub use session::{SessionData, SessionStore};

use thiserror::Error;

/// Errors from client setup and the local session file.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("session file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("session file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cannot build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}
