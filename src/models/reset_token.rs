//! Single-use password reset tokens. Only the SHA-256 of a token is stored.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::middleware::auth::hash_token;

#[derive(Debug, Clone, FromRow)]
pub struct PasswordResetToken {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub created_at: DateTime<Utc>,
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl PasswordResetToken {
    /// Issue a fresh token for `user_id`, retiring any outstanding ones.
    /// Returns the plaintext token, which is never stored.
    pub async fn issue(
        pool: &SqlitePool,
        user_id: &str,
        ttl_minutes: i64,
    ) -> Result<(String, Self), sqlx::Error> {
        sqlx::query("UPDATE password_reset_tokens SET used = 1 WHERE user_id = ? AND used = 0")
            .bind(user_id)
            .execute(pool)
            .await?;

        let token = generate_token();
        let now = Utc::now();
        let row = sqlx::query_as::<_, PasswordResetToken>(
            r#"
            INSERT INTO password_reset_tokens (id, user_id, token_hash, expires_at, used, created_at)
            VALUES (?, ?, ?, ?, 0, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(hash_token(&token))
        .bind(now + Duration::minutes(ttl_minutes))
        .bind(now)
        .fetch_one(pool)
        .await?;

        Ok((token, row))
    }

    pub async fn find_by_token(pool: &SqlitePool, token: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, PasswordResetToken>(
            "SELECT * FROM password_reset_tokens WHERE token_hash = ?",
        )
        .bind(hash_token(token))
        .fetch_optional(pool)
        .await
    }

    pub fn is_usable(&self) -> bool {
        !self.used && self.expires_at > Utc::now()
    }

    /// Marks the token used. False if another request consumed it first.
    pub async fn consume(&self, pool: &SqlitePool) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE password_reset_tokens SET used = 1 WHERE id = ? AND used = 0")
                .bind(&self.id)
                .execute(pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::User;

    async fn setup() -> (SqlitePool, User) {
        let pool = db::create_pool("sqlite::memory:").await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        let user = User::create(&pool, "alice", "alice@example.com", "hash").await.unwrap();
        (pool, user)
    }

    #[tokio::test]
    async fn test_token_is_single_use() {
        let (pool, user) = setup().await;
        let (token, row) = PasswordResetToken::issue(&pool, &user.id, 60).await.unwrap();
        assert_eq!(token.len(), 64);
        assert_ne!(row.token_hash, token);

        let found = PasswordResetToken::find_by_token(&pool, &token).await.unwrap().unwrap();
        assert!(found.is_usable());
        assert!(found.consume(&pool).await.unwrap());
        assert!(!found.consume(&pool).await.unwrap());

        let again = PasswordResetToken::find_by_token(&pool, &token).await.unwrap().unwrap();
        assert!(!again.is_usable());
    }

    #[tokio::test]
    async fn test_expired_token_unusable() {
        let (pool, user) = setup().await;
        let (token, _) = PasswordResetToken::issue(&pool, &user.id, -1).await.unwrap();
        let found = PasswordResetToken::find_by_token(&pool, &token).await.unwrap().unwrap();
        assert!(!found.is_usable());
    }

    #[tokio::test]
    async fn test_new_token_retires_previous() {
        let (pool, user) = setup().await;
        let (first, _) = PasswordResetToken::issue(&pool, &user.id, 60).await.unwrap();
        let (second, _) = PasswordResetToken::issue(&pool, &user.id, 60).await.unwrap();
        let first = PasswordResetToken::find_by_token(&pool, &first).await.unwrap().unwrap();
        let second = PasswordResetToken::find_by_token(&pool, &second).await.unwrap().unwrap();
        assert!(!first.is_usable());
        assert!(second.is_usable());
    }
}
