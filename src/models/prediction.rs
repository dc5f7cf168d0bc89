//! Prediction model: the per-user, append-only history of classified messages

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::classifier::ensemble::{ConfidenceLevel, Consensus, Label, ModelVote};
use crate::classifier::explain::{ExplanationFeature, Method};
use crate::classifier::metrics::round4;
use crate::classifier::{AccuracySummary, Classification, ENSEMBLE_NAME, MODEL_VERSION};

pub const DEFAULT_PER_PAGE: i64 = 50;
pub const MAX_PER_PAGE: i64 = 500;
/// Keeps `(page - 1) * per_page` inside `i64`.
pub const MAX_PAGE: i64 = i64::MAX / MAX_PER_PAGE;
const RECENT_PREDICTIONS: usize = 10;

#[derive(Debug, Clone, FromRow)]
pub struct Prediction {
    pub id: String,
    pub user_id: String,
    pub message: String,
    pub prediction: String,
    pub confidence: f64,
    pub spam_probability: f64,
    pub ham_probability: f64,
    pub model_name: String,
    pub model_version: String,
    pub processing_time_ms: i64,
    pub feature_count: i64,
    /// JSON array of [`ExplanationFeature`]
    pub top_features: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A stored or per-model prediction as seen by the web client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    pub id: String,
    pub message: String,
    pub prediction: Label,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spam_probability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ham_probability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_features: Option<Vec<ExplanationFeature>>,
    /// RFC 3339 with a `Z` suffix
    pub timestamp: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationBrief {
    pub method: Method,
    pub summary: String,
    pub top_features: Vec<ExplanationFeature>,
}

/// Payload of `POST /predict`. Keys at this level are snake_case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsemblePredictionResult {
    pub id: String,
    pub consensus: Consensus,
    pub model_results: BTreeMap<String, PredictionResult>,
    pub weighted_result: PredictionResult,
    pub confidence_level: ConfidenceLevel,
    pub suggestion: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<ExplanationBrief>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelFilter {
    #[default]
    All,
    Spam,
    Ham,
}

impl LabelFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Spam => "spam",
            Self::Ham => "ham",
        }
    }
}

/// Query string of the history and export endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PredictionQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    #[serde(default)]
    pub filter: LabelFilter,
    pub search: Option<String>,
}

impl PredictionQuery {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).clamp(1, MAX_PAGE)
    }

    pub fn per_page(&self) -> i64 {
        self.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE)
    }

    /// Rows skipped before the requested page
    pub fn offset(&self) -> i64 {
        (self.page() - 1).saturating_mul(self.per_page())
    }

    fn search_term(&self) -> String {
        self.search.as_deref().map(str::trim).unwrap_or("").to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    pub count: usize,
    pub avg_confidence: f64,
    pub spam_count: usize,
    pub ham_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccuracyData {
    pub training_accuracy: f64,
    pub validation_accuracy: f64,
    pub real_time_accuracy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub total_messages: usize,
    pub spam_count: usize,
    pub ham_count: usize,
    pub accuracy: f64,
    pub accuracy_data: AccuracyData,
    pub spam_rate: f64,
    pub avg_confidence: f64,
    pub avg_processing_time: f64,
    pub model_stats: BTreeMap<String, ModelUsage>,
    pub recent_predictions: Vec<PredictionResult>,
}

fn wire_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl Prediction {
    /// Persist the ensemble decision for a message. The stored record carries
    /// the majority vote with the mean majority confidence, and the
    /// accuracy-weighted probabilities.
    pub async fn create(
        pool: &SqlitePool,
        user_id: &str,
        message: &str,
        classification: &Classification,
    ) -> Result<Self, sqlx::Error> {
        let outcome = &classification.outcome;
        let spam_probability = outcome.weighted_spam_probability;
        let top_features = serde_json::to_string(&classification.top_features).ok();

        sqlx::query_as::<_, Prediction>(
            r#"
            INSERT INTO predictions (
                id, user_id, message, prediction, confidence, spam_probability,
                ham_probability, model_name, model_version, processing_time_ms,
                feature_count, top_features, timestamp
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(message)
        .bind(outcome.majority.as_str())
        .bind(outcome.majority_confidence.clamp(0.0, 1.0))
        .bind(spam_probability)
        .bind(1.0 - spam_probability)
        .bind(ENSEMBLE_NAME)
        .bind(MODEL_VERSION)
        .bind(classification.processing_time_ms as i64)
        .bind(classification.feature_count as i64)
        .bind(top_features)
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    pub async fn find_for_user(
        pool: &SqlitePool,
        id: &str,
        user_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Prediction>("SELECT * FROM predictions WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    /// One page of the user's history, newest first, with the total number
    /// of matching rows.
    pub async fn list_for_user(
        pool: &SqlitePool,
        user_id: &str,
        query: &PredictionQuery,
    ) -> Result<(Vec<Self>, i64), sqlx::Error> {
        let filter = query.filter.as_str();
        let search = query.search_term();

        let (total,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM predictions
            WHERE user_id = ?
              AND (? = 'all' OR prediction = ?)
              AND (? = '' OR instr(lower(message), lower(?)) > 0)
            "#,
        )
        .bind(user_id)
        .bind(filter)
        .bind(filter)
        .bind(&search)
        .bind(&search)
        .fetch_one(pool)
        .await?;

        let rows = sqlx::query_as::<_, Prediction>(
            r#"
            SELECT * FROM predictions
            WHERE user_id = ?
              AND (? = 'all' OR prediction = ?)
              AND (? = '' OR instr(lower(message), lower(?)) > 0)
            ORDER BY timestamp DESC, rowid DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(user_id)
        .bind(filter)
        .bind(filter)
        .bind(&search)
        .bind(&search)
        .bind(query.per_page())
        .bind(query.offset())
        .fetch_all(pool)
        .await?;

        Ok((rows, total))
    }

    /// Every matching row, newest first (CSV export ignores pagination).
    pub async fn all_for_user(
        pool: &SqlitePool,
        user_id: &str,
        query: &PredictionQuery,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let filter = query.filter.as_str();
        let search = query.search_term();
        sqlx::query_as::<_, Prediction>(
            r#"
            SELECT * FROM predictions
            WHERE user_id = ?
              AND (? = 'all' OR prediction = ?)
              AND (? = '' OR instr(lower(message), lower(?)) > 0)
            ORDER BY timestamp DESC, rowid DESC
            "#,
        )
        .bind(user_id)
        .bind(filter)
        .bind(filter)
        .bind(&search)
        .bind(&search)
        .fetch_all(pool)
        .await
    }

    pub fn label(&self) -> Label {
        Label::parse(&self.prediction).unwrap_or(Label::Ham)
    }

    pub fn to_result(&self) -> PredictionResult {
        let top_features = self
            .top_features
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok());

        PredictionResult {
            id: self.id.clone(),
            message: self.message.clone(),
            prediction: self.label(),
            confidence: round4(self.confidence),
            spam_probability: Some(round4(self.spam_probability)),
            ham_probability: Some(round4(self.ham_probability)),
            model_name: Some(self.model_name.clone()),
            model_version: Some(self.model_version.clone()),
            processing_time_ms: Some(self.processing_time_ms),
            feature_count: Some(self.feature_count),
            top_features,
            timestamp: wire_timestamp(&self.timestamp),
            user_id: self.user_id.clone(),
        }
    }

    /// The single model's view of this prediction.
    fn model_result(&self, vote: &ModelVote) -> PredictionResult {
        PredictionResult {
            id: format!("{}:{}", self.id, vote.model),
            message: self.message.clone(),
            prediction: vote.label(),
            confidence: round4(vote.confidence()),
            spam_probability: Some(round4(vote.spam_probability)),
            ham_probability: Some(round4(1.0 - vote.spam_probability)),
            model_name: Some(vote.model.clone()),
            model_version: Some(self.model_version.clone()),
            processing_time_ms: Some(self.processing_time_ms),
            feature_count: Some(self.feature_count),
            top_features: None,
            timestamp: wire_timestamp(&self.timestamp),
            user_id: self.user_id.clone(),
        }
    }

    pub fn to_ensemble_result(&self, classification: &Classification) -> EnsemblePredictionResult {
        let outcome = &classification.outcome;
        let model_results = outcome
            .votes
            .iter()
            .map(|vote| (vote.model.clone(), self.model_result(vote)))
            .collect();

        EnsemblePredictionResult {
            id: self.id.clone(),
            consensus: outcome.consensus.clone(),
            model_results,
            weighted_result: self.to_result(),
            confidence_level: outcome.confidence_level,
            suggestion: outcome.suggestion.to_string(),
            message: self.message.clone(),
            explanation: Some(ExplanationBrief {
                method: Method::Keyword,
                summary: crate::classifier::explain::summary(&classification.top_features),
                top_features: classification.top_features.clone(),
            }),
        }
    }
}

/// Aggregate a user's full history (newest first) into dashboard statistics.
pub fn compute_stats(
    predictions: &[Prediction],
    model_accuracy: AccuracySummary,
    real_time_accuracy: Option<f64>,
) -> UserStats {
    let total = predictions.len();
    let spam_count = predictions
        .iter()
        .filter(|p| p.label() == Label::Spam)
        .count();
    let ham_count = total - spam_count;

    let mean = |values: &[f64]| {
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    };
    let confidences: Vec<f64> = predictions.iter().map(|p| p.confidence).collect();
    let processing: Vec<f64> = predictions
        .iter()
        .filter(|p| p.processing_time_ms > 0)
        .map(|p| p.processing_time_ms as f64)
        .collect();

    let mut model_stats: BTreeMap<String, ModelUsage> = BTreeMap::new();
    for p in predictions {
        let usage = model_stats.entry(p.model_name.clone()).or_default();
        usage.count += 1;
        usage.avg_confidence += p.confidence;
        match p.label() {
            Label::Spam => usage.spam_count += 1,
            Label::Ham => usage.ham_count += 1,
        }
    }
    for usage in model_stats.values_mut() {
        usage.avg_confidence = round4(usage.avg_confidence / usage.count as f64);
    }

    let spam_rate = if total == 0 {
        0.0
    } else {
        spam_count as f64 / total as f64
    };

    UserStats {
        total_messages: total,
        spam_count,
        ham_count,
        accuracy: real_time_accuracy.unwrap_or(model_accuracy.validation_accuracy),
        accuracy_data: AccuracyData {
            training_accuracy: model_accuracy.training_accuracy,
            validation_accuracy: model_accuracy.validation_accuracy,
            real_time_accuracy,
        },
        spam_rate: round4(spam_rate),
        avg_confidence: round4(mean(&confidences)),
        avg_processing_time: (mean(&processing) * 100.0).round() / 100.0,
        model_stats,
        recent_predictions: predictions
            .iter()
            .take(RECENT_PREDICTIONS)
            .map(Prediction::to_result)
            .collect(),
    }
}

/// `Message,Prediction,Confidence,Timestamp` with RFC 4180 quoting.
pub fn export_csv(predictions: &[Prediction]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["Message", "Prediction", "Confidence", "Timestamp"])?;
    for p in predictions {
        let confidence = format!("{:.1}%", p.confidence * 100.0);
        let timestamp = p.timestamp.format("%Y-%m-%d %H:%M:%S").to_string();
        writer.write_record([
            p.message.as_str(),
            p.prediction.as_str(),
            confidence.as_str(),
            timestamp.as_str(),
        ])?;
    }
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ensemble::{self, ModelVote};
    use crate::db;
    use crate::models::User;

    fn classification(p: f64) -> Classification {
        let votes = ["MultinomialNB", "BernoulliNB", "KeywordHeuristic"]
            .iter()
            .map(|m| ModelVote {
                model: m.to_string(),
                spam_probability: p,
                weight: 0.9,
            })
            .collect();
        Classification {
            outcome: ensemble::combine(votes),
            feature_count: 4,
            processing_time_ms: 3,
            top_features: Vec::new(),
        }
    }

    fn row(message: &str, prediction: &str, confidence: f64) -> Prediction {
        Prediction {
            id: Uuid::new_v4().to_string(),
            user_id: "u1".to_string(),
            message: message.to_string(),
            prediction: prediction.to_string(),
            confidence,
            spam_probability: 0.5,
            ham_probability: 0.5,
            model_name: ENSEMBLE_NAME.to_string(),
            model_version: MODEL_VERSION.to_string(),
            processing_time_ms: 10,
            feature_count: 3,
            top_features: None,
            timestamp: Utc::now(),
        }
    }

    async fn setup() -> (SqlitePool, User) {
        let pool = db::create_pool("sqlite::memory:").await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        let user = User::create(&pool, "alice", "alice@example.com", "hash").await.unwrap();
        (pool, user)
    }

    #[tokio::test]
    async fn test_create_stores_majority_and_weighted_probabilities() {
        let (pool, user) = setup().await;
        let c = classification(0.9);
        let stored = Prediction::create(&pool, &user.id, "Win cash", &c).await.unwrap();
        assert_eq!(stored.prediction, "spam");
        assert!((stored.confidence - 0.9).abs() < 1e-9);
        assert!((stored.spam_probability + stored.ham_probability - 1.0).abs() < 1e-9);

        let result = stored.to_ensemble_result(&c);
        assert_eq!(result.model_results.len(), 3);
        assert_eq!(result.weighted_result.model_name.as_deref(), Some(ENSEMBLE_NAME));
        assert!(result.weighted_result.timestamp.ends_with('Z'));
    }

    #[tokio::test]
    async fn test_list_filters_and_paginates() {
        let (pool, user) = setup().await;
        for (msg, p) in [("Free prize", 0.9), ("Lunch today?", 0.1), ("Claim FREE cash", 0.8)] {
            Prediction::create(&pool, &user.id, msg, &classification(p)).await.unwrap();
        }

        let all = PredictionQuery::default();
        let (rows, total) = Prediction::list_for_user(&pool, &user.id, &all).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(rows[0].message, "Claim FREE cash");

        let spam = PredictionQuery { filter: LabelFilter::Spam, ..Default::default() };
        let (_, total) = Prediction::list_for_user(&pool, &user.id, &spam).await.unwrap();
        assert_eq!(total, 2);

        let search = PredictionQuery { search: Some("free".to_string()), ..Default::default() };
        let (rows, total) = Prediction::list_for_user(&pool, &user.id, &search).await.unwrap();
        assert_eq!(total, 2);
        assert!(rows.iter().all(|r| r.message.to_lowercase().contains("free")));

        let paged = PredictionQuery { page: Some(2), per_page: Some(2), ..Default::default() };
        let (rows, total) = Prediction::list_for_user(&pool, &user.id, &paged).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].message, "Free prize");
    }

    #[tokio::test]
    async fn test_predictions_are_private() {
        let (pool, user) = setup().await;
        let other = User::create(&pool, "bob", "bob@example.com", "hash").await.unwrap();
        let stored = Prediction::create(&pool, &user.id, "hi", &classification(0.1)).await.unwrap();
        assert!(Prediction::find_for_user(&pool, &stored.id, &other.id).await.unwrap().is_none());
        assert!(Prediction::find_for_user(&pool, &stored.id, &user.id).await.unwrap().is_some());
    }

    #[test]
    fn test_compute_stats() {
        let rows = vec![row("a", "spam", 0.9), row("b", "ham", 0.7), row("c", "ham", 0.8)];
        let accuracy = AccuracySummary {
            training_accuracy: 0.99,
            validation_accuracy: 0.95,
        };
        let stats = compute_stats(&rows, accuracy, None);
        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.spam_count, 1);
        assert_eq!(stats.ham_count, 2);
        assert_eq!(stats.spam_rate, 0.3333);
        assert_eq!(stats.avg_confidence, 0.8);
        assert_eq!(stats.accuracy, 0.95);
        assert_eq!(stats.model_stats[ENSEMBLE_NAME].count, 3);
        assert_eq!(stats.recent_predictions.len(), 3);

        let empty = compute_stats(&[], accuracy, Some(0.5));
        assert_eq!(empty.total_messages, 0);
        assert_eq!(empty.accuracy, 0.5);
        assert!(empty.model_stats.is_empty());
    }

    #[test]
    fn test_recent_predictions_capped() {
        let rows: Vec<Prediction> = (0..15).map(|i| row(&format!("m{}", i), "ham", 0.6)).collect();
        let accuracy = AccuracySummary {
            training_accuracy: 1.0,
            validation_accuracy: 1.0,
        };
        let stats = compute_stats(&rows, accuracy, None);
        assert_eq!(stats.recent_predictions.len(), 10);
        assert_eq!(stats.recent_predictions[0].message, "m0");
    }

    #[test]
    fn test_csv_export_escapes_fields() {
        let rows = vec![
            row("Hello, \"friend\"\nsee you", "ham", 0.973),
            row("plain", "spam", 0.5),
        ];
        let csv = String::from_utf8(export_csv(&rows).unwrap()).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("Message,Prediction,Confidence,Timestamp"));
        assert!(csv.contains("\"Hello, \"\"friend\"\"\nsee you\",ham,97.3%,"));
        assert!(csv.contains("plain,spam,50.0%,"));

        let mut reader = csv::Reader::from_reader(csv.as_bytes());
        let first = reader.records().next().unwrap().unwrap();
        assert_eq!(&first[0], "Hello, \"friend\"\nsee you");
    }

    #[test]
    fn test_label_filter_parses_from_query() {
        let q: PredictionQuery = serde_json::from_value(serde_json::json!({"filter": "spam"})).unwrap();
        assert_eq!(q.filter, LabelFilter::Spam);
        assert_eq!(q.page(), 1);
        assert_eq!(q.per_page(), DEFAULT_PER_PAGE);
    }

    #[test]
    fn test_huge_page_does_not_overflow() {
        let q = PredictionQuery {
            page: Some(i64::MAX),
            per_page: Some(MAX_PER_PAGE),
            ..Default::default()
        };
        assert_eq!(q.page(), MAX_PAGE);
        assert!(q.offset() > 0);

        let q = PredictionQuery {
            page: Some(-3),
            ..Default::default()
        };
        assert_eq!(q.page(), 1);
        assert_eq!(q.offset(), 0);
    }
}
