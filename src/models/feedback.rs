//! User feedback on stored predictions, used for real-time accuracy

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::classifier::ensemble::Label;

#[derive(Debug, Clone, FromRow)]
pub struct PredictionFeedback {
    pub id: String,
    pub prediction_id: String,
    pub user_id: String,
    pub actual_label: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRequest {
    #[serde(default)]
    pub prediction_id: String,
    #[serde(default)]
    pub actual_label: String,
}

impl PredictionFeedback {
    pub async fn create(
        pool: &SqlitePool,
        prediction_id: &str,
        user_id: &str,
        actual_label: Label,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, PredictionFeedback>(
            r#"
            INSERT INTO prediction_feedback (id, prediction_id, user_id, actual_label, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(prediction_id)
        .bind(user_id)
        .bind(actual_label.as_str())
        .bind(Utc::now())
        .fetch_one(pool)
        .await
    }

    pub async fn exists_for_prediction(
        pool: &SqlitePool,
        prediction_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM prediction_feedback WHERE prediction_id = ?")
                .bind(prediction_id)
                .fetch_one(pool)
                .await?;
        Ok(count > 0)
    }

    /// Share of feedback where the stored prediction matched the label the
    /// user reported, across all users. `None` until feedback exists.
    pub async fn real_time_accuracy(pool: &SqlitePool) -> Result<Option<f64>, sqlx::Error> {
        let (total, correct): (i64, Option<i64>) = sqlx::query_as(
            r#"
            SELECT COUNT(*), SUM(CASE WHEN f.actual_label = p.prediction THEN 1 ELSE 0 END)
            FROM prediction_feedback f
            JOIN predictions p ON p.id = f.prediction_id
            "#,
        )
        .fetch_one(pool)
        .await?;

        if total == 0 {
            return Ok(None);
        }
        let accuracy = correct.unwrap_or(0) as f64 / total as f64;
        Ok(Some((accuracy * 10_000.0).round() / 10_000.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ensemble::{self, ModelVote};
    use crate::classifier::Classification;
    use crate::db;
    use crate::models::{Prediction, User};

    fn spam_classification() -> Classification {
        Classification {
            outcome: ensemble::combine(vec![ModelVote {
                model: "MultinomialNB".to_string(),
                spam_probability: 0.9,
                weight: 1.0,
            }]),
            feature_count: 1,
            processing_time_ms: 1,
            top_features: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_real_time_accuracy() {
        let pool = db::create_pool("sqlite::memory:").await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        let user = User::create(&pool, "alice", "alice@example.com", "hash").await.unwrap();

        assert_eq!(PredictionFeedback::real_time_accuracy(&pool).await.unwrap(), None);

        let c = spam_classification();
        let first = Prediction::create(&pool, &user.id, "win", &c).await.unwrap();
        let second = Prediction::create(&pool, &user.id, "win again", &c).await.unwrap();

        PredictionFeedback::create(&pool, &first.id, &user.id, Label::Spam).await.unwrap();
        PredictionFeedback::create(&pool, &second.id, &user.id, Label::Ham).await.unwrap();

        assert!(PredictionFeedback::exists_for_prediction(&pool, &first.id).await.unwrap());
        assert_eq!(PredictionFeedback::real_time_accuracy(&pool).await.unwrap(), Some(0.5));

        // One feedback per prediction
        assert!(PredictionFeedback::create(&pool, &first.id, &user.id, Label::Ham).await.is_err());
    }
}
