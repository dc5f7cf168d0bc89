//! Token ids invalidated by logout

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

pub struct RevokedToken;

impl RevokedToken {
    pub async fn revoke(
        pool: &SqlitePool,
        jti: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT OR IGNORE INTO revoked_tokens (jti, expires_at) VALUES (?, ?)")
            .bind(jti)
            .bind(expires_at)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn is_revoked(pool: &SqlitePool, jti: &str) -> Result<bool, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM revoked_tokens WHERE jti = ?")
            .bind(jti)
            .fetch_one(pool)
            .await?;
        Ok(count > 0)
    }

    /// Drop entries whose token would be rejected as expired anyway.
    pub async fn purge_expired(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM revoked_tokens WHERE expires_at < ?")
            .bind(Utc::now())
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use chrono::Duration;

    #[tokio::test]
    async fn test_revoke_and_purge() {
        let pool = db::create_pool("sqlite::memory:").await.unwrap();
        db::run_migrations(&pool).await.unwrap();

        RevokedToken::revoke(&pool, "live", Utc::now() + Duration::hours(1)).await.unwrap();
        RevokedToken::revoke(&pool, "live", Utc::now() + Duration::hours(1)).await.unwrap();
        RevokedToken::revoke(&pool, "stale", Utc::now() - Duration::hours(1)).await.unwrap();

        assert!(RevokedToken::is_revoked(&pool, "live").await.unwrap());
        assert!(!RevokedToken::is_revoked(&pool, "other").await.unwrap());

        assert_eq!(RevokedToken::purge_expired(&pool).await.unwrap(), 1);
        assert!(!RevokedToken::is_revoked(&pool, "stale").await.unwrap());
    }
}
