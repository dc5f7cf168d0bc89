//! User model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub profile_image: Option<String>,
    pub bio: Option<String>,
    pub theme: String,
    pub is_active: bool,
    pub member_since: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }

    /// Unknown values are ignored rather than rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "light" => Some(Self::Light),
            "dark" => Some(Self::Dark),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(default, alias = "username", alias = "email")]
    pub username_or_email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub confirm_password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserInfo,
}

/// User as seen by the web client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    /// `YYYY-MM-DD`
    pub member_since: String,
    #[serde(default)]
    pub is_authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
}

/// Fields accepted by `PUT /user/profile`; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
    #[serde(default)]
    pub confirm_new_password: String,
}

impl User {
    pub async fn create(
        pool: &SqlitePool,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<Self, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username, email, password_hash, member_since, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(username)
        .bind(email)
        .bind(password_hash)
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Exact username match, or case-insensitive email match.
    pub async fn find_by_login(
        pool: &SqlitePool,
        username_or_email: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE username = ? OR email = lower(?) LIMIT 1",
        )
        .bind(username_or_email)
        .bind(username_or_email)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_email(pool: &SqlitePool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = lower(?)")
            .bind(email)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_username(
        pool: &SqlitePool,
        username: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(pool)
            .await
    }

    pub async fn save_profile(&self, pool: &SqlitePool) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET username = ?, email = ?, bio = ?, theme = ?, profile_image = ?, updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(&self.username)
        .bind(&self.email)
        .bind(&self.bio)
        .bind(&self.theme)
        .bind(&self.profile_image)
        .bind(Utc::now())
        .bind(&self.id)
        .fetch_one(pool)
        .await
    }

    pub async fn update_password(
        pool: &SqlitePool,
        id: &str,
        password_hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
            .bind(password_hash)
            .bind(Utc::now())
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Removes the user; predictions, feedback and reset tokens cascade.
    pub async fn delete(pool: &SqlitePool, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub fn to_info(&self) -> UserInfo {
        UserInfo {
            id: self.id.clone(),
            username: self.username.clone(),
            email: self.email.clone(),
            profile_image: self.profile_image.clone(),
            bio: self.bio.clone(),
            member_since: self.member_since.format("%Y-%m-%d").to_string(),
            is_authenticated: true,
            theme: Some(self.theme.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn pool() -> SqlitePool {
        let pool = db::create_pool("sqlite::memory:").await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let pool = pool().await;
        let user = User::create(&pool, "alice", "alice@example.com", "hash").await.unwrap();
        assert_eq!(user.theme, "light");
        assert!(user.is_active);

        let by_name = User::find_by_login(&pool, "alice").await.unwrap().unwrap();
        assert_eq!(by_name.id, user.id);
        let by_email = User::find_by_login(&pool, "Alice@Example.com").await.unwrap().unwrap();
        assert_eq!(by_email.id, user.id);
        assert!(User::find_by_login(&pool, "bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let pool = pool().await;
        User::create(&pool, "alice", "a@example.com", "hash").await.unwrap();
        assert!(User::create(&pool, "alice", "b@example.com", "hash").await.is_err());
    }

    #[tokio::test]
    async fn test_save_profile_and_delete() {
        let pool = pool().await;
        let mut user = User::create(&pool, "alice", "alice@example.com", "hash").await.unwrap();
        user.bio = Some("Hello".to_string());
        user.theme = Theme::Dark.as_str().to_string();
        let saved = user.save_profile(&pool).await.unwrap();
        assert_eq!(saved.bio.as_deref(), Some("Hello"));
        assert_eq!(saved.theme, "dark");

        assert!(User::delete(&pool, &user.id).await.unwrap());
        assert!(User::find_by_id(&pool, &user.id).await.unwrap().is_none());
        assert!(!User::delete(&pool, &user.id).await.unwrap());
    }

    #[test]
    fn test_user_info_wire_shape() {
        let now = Utc::now();
        let user = User {
            id: "u1".to_string(),
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password_hash: "secret".to_string(),
            profile_image: None,
            bio: None,
            theme: "light".to_string(),
            is_active: true,
            member_since: now,
            created_at: now,
            updated_at: now,
        };
        let value = serde_json::to_value(user.to_info()).unwrap();
        assert_eq!(value["isAuthenticated"], true);
        assert_eq!(value["memberSince"], now.format("%Y-%m-%d").to_string());
        assert!(value.get("passwordHash").is_none());
        assert!(value.get("profileImage").is_none());
    }
}
