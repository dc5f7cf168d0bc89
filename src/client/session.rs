//! Session persistence for the client
//!
//! A small JSON file with three keys, `auth_token`, `user` and
//! `predictions`, mirroring what the web client keeps in local storage.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::ClientError;
use crate::models::{PredictionResult, UserInfo};

/// Predictions kept in the local cache
pub const MAX_CACHED_PREDICTIONS: usize = 50;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub predictions: Vec<PredictionResult>,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    file_path: PathBuf,
}

impl SessionStore {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }

    /// `<local data dir>/smsguard/session.json`
    pub fn default_location() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("smsguard");
        Self::new(data_dir.join("session.json"))
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Missing file means an empty session.
    pub fn load(&self) -> Result<SessionData, ClientError> {
        match fs::read_to_string(&self.file_path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SessionData::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, data: &SessionData) -> Result<(), ClientError> {
        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.file_path, serde_json::to_string_pretty(data)?)?;
        Ok(())
    }

    pub fn token(&self) -> Result<Option<String>, ClientError> {
        Ok(self.load()?.auth_token)
    }

    pub fn set_auth(&self, token: &str, user: &UserInfo) -> Result<(), ClientError> {
        let mut data = self.load()?;
        data.auth_token = Some(token.to_string());
        data.user = Some(user.clone());
        self.save(&data)
    }

    pub fn set_user(&self, user: &UserInfo) -> Result<(), ClientError> {
        let mut data = self.load()?;
        data.user = Some(user.clone());
        self.save(&data)
    }

    /// Newest first, bounded by [`MAX_CACHED_PREDICTIONS`].
    pub fn push_prediction(&self, prediction: &PredictionResult) -> Result<(), ClientError> {
        let mut data = self.load()?;
        data.predictions.insert(0, prediction.clone());
        data.predictions.truncate(MAX_CACHED_PREDICTIONS);
        self.save(&data)
    }

    /// Remove all three keys.
    pub fn clear(&self) -> Result<(), ClientError> {
        match fs::remove_file(&self.file_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ensemble::Label;

    fn user() -> UserInfo {
        UserInfo {
            id: "u1".to_string(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            profile_image: None,
            bio: None,
            member_since: "2024-01-01".to_string(),
            is_authenticated: true,
            theme: Some("light".to_string()),
        }
    }

    fn prediction(id: &str) -> PredictionResult {
        PredictionResult {
            id: id.to_string(),
            message: "hi".to_string(),
            prediction: Label::Ham,
            confidence: 0.9,
            spam_probability: None,
            ham_probability: None,
            model_name: None,
            model_version: None,
            processing_time_ms: None,
            feature_count: None,
            top_features: None,
            timestamp: "2024-01-01T00:00:00.000Z".to_string(),
            user_id: "u1".to_string(),
        }
    }

    #[test]
    fn test_missing_file_is_empty_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("nested/session.json"));
        assert_eq!(store.load().unwrap(), SessionData::default());
        assert_eq!(store.token().unwrap(), None);
        store.clear().unwrap();
    }

    #[test]
    fn test_auth_roundtrip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        store.set_auth("tok", &user()).unwrap();
        store.push_prediction(&prediction("p1")).unwrap();

        let data = store.load().unwrap();
        assert_eq!(data.auth_token.as_deref(), Some("tok"));
        assert_eq!(data.user.unwrap().username, "alice");
        assert_eq!(data.predictions.len(), 1);

        store.clear().unwrap();
        assert!(!store.file_path().exists());
        assert_eq!(store.load().unwrap(), SessionData::default());
    }

    #[test]
    fn test_prediction_cache_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        for i in 0..MAX_CACHED_PREDICTIONS + 5 {
            store.push_prediction(&prediction(&format!("p{}", i))).unwrap();
        }
        let data = store.load().unwrap();
        assert_eq!(data.predictions.len(), MAX_CACHED_PREDICTIONS);
        assert_eq!(data.predictions[0].id, format!("p{}", MAX_CACHED_PREDICTIONS + 4));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(SessionStore::new(path).load(), Err(ClientError::Json(_))));
    }
}
