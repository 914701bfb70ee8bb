use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use zeroize::Zeroize;

use crate::auth::password;

/// Hash checked against when the username does not exist, so a miss costs
/// the same argon2 work as a wrong password.
static DUMMY_HASH: Lazy<String> =
    Lazy::new(|| password::hash_password("autogate-dummy-password").unwrap_or_default());

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("username already exists")]
    AlreadyExists,

    #[error("invalid username or password")]
    InvalidCredentials,

    #[error("password hashing timed out")]
    HashTimeout,

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Single-table credential store. Username uniqueness is enforced by the
/// primary key, so concurrent registrations of one name let exactly one win.
#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
    hash_timeout: Duration,
}

impl UserStore {
    pub async fn connect(database_url: &str, hash_timeout: Duration) -> anyhow::Result<Self> {
        let mut options = SqlitePoolOptions::new();
        if database_url.contains(":memory:") {
            // Every in-memory connection is its own database; pin to one.
            options = options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = options.connect(database_url).await?;
        Ok(Self { pool, hash_timeout })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Create a user. Fails with `AlreadyExists` rather than overwriting.
    pub async fn register(&self, username: &str, plaintext: String) -> Result<(), StoreError> {
        if self.exists(username).await? {
            let mut plaintext = plaintext;
            plaintext.zeroize();
            return Err(StoreError::AlreadyExists);
        }

        let hash = self.hash_blocking(plaintext).await?;

        let result = sqlx::query(
            "INSERT INTO users (username, password_hash, created_at) VALUES (?1, ?2, ?3)",
        )
        .bind(username)
        .bind(&hash)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::info!(username = %username, "user registered");
                Ok(())
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::AlreadyExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Check a username/password pair. Unknown users and wrong passwords
    /// produce the same `InvalidCredentials` error.
    pub async fn verify(&self, username: &str, plaintext: String) -> Result<User, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT username, password_hash, created_at FROM users WHERE username = ?1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        let hash = user.as_ref().map(|u| u.password_hash.clone());

        let matched = self.verify_blocking(plaintext, hash).await?;
        match user {
            Some(u) if matched => Ok(u),
            _ => Err(StoreError::InvalidCredentials),
        }
    }

    pub async fn exists(&self, username: &str) -> Result<bool, StoreError> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM users WHERE username = ?1",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(found > 0)
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    async fn hash_blocking(&self, mut plaintext: String) -> Result<String, StoreError> {
        let task = tokio::task::spawn_blocking(move || {
            let hashed = password::hash_password(&plaintext);
            plaintext.zeroize();
            hashed
        });

        match tokio::time::timeout(self.hash_timeout, task).await {
            Err(_) => Err(StoreError::HashTimeout),
            Ok(Err(join)) => Err(StoreError::Hash(join.to_string())),
            Ok(Ok(Err(e))) => Err(StoreError::Hash(e.to_string())),
            Ok(Ok(Ok(hash))) => Ok(hash),
        }
    }

    /// `None` checks against the dummy hash. Its first use builds it here, on
    /// the blocking pool and inside the timeout.
    async fn verify_blocking(
        &self,
        mut plaintext: String,
        hash: Option<String>,
    ) -> Result<bool, StoreError> {
        let task = tokio::task::spawn_blocking(move || {
            let hash = hash.as_deref().unwrap_or(DUMMY_HASH.as_str());
            let matched = password::verify_password(&plaintext, hash);
            plaintext.zeroize();
            matched
        });

        match tokio::time::timeout(self.hash_timeout, task).await {
            Err(_) => Err(StoreError::HashTimeout),
            Ok(Err(join)) => Err(StoreError::Hash(join.to_string())),
            Ok(Ok(Err(e))) => {
                tracing::warn!("stored password hash could not be parsed: {}", e);
                Ok(false)
            }
            Ok(Ok(Ok(matched))) => Ok(matched),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_store() -> UserStore {
        let store = UserStore::connect("sqlite::memory:", Duration::from_secs(10))
            .await
            .unwrap();
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_register_twice_fails_second_time() {
        let store = memory_store().await;

        store.register("alice", "p".into()).await.unwrap();
        let err = store.register("alice", "other".into()).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists));

        // The original password still works: the row was not overwritten.
        assert!(store.verify("alice", "p".into()).await.is_ok());
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_verify_failures_are_indistinguishable() {
        let store = memory_store().await;
        store.register("bob", "correct".into()).await.unwrap();

        let wrong_password = store.verify("bob", "wrong".into()).await.unwrap_err();
        let no_such_user = store.verify("nobody", "correct".into()).await.unwrap_err();

        assert!(matches!(wrong_password, StoreError::InvalidCredentials));
        assert!(matches!(no_such_user, StoreError::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), no_such_user.to_string());
    }

    #[tokio::test]
    async fn test_verify_returns_user_without_exposing_hash() {
        let store = memory_store().await;
        store.register("carol", "pw".into()).await.unwrap();

        let user = store.verify("carol", "pw".into()).await.unwrap();
        assert_eq!(user.username, "carol");
        assert_ne!(user.password_hash, "pw");

        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
    }

    #[tokio::test]
    async fn test_unknown_user_check_is_bounded_by_hash_timeout() {
        let store = UserStore::connect("sqlite::memory:", Duration::from_nanos(1))
            .await
            .unwrap();
        store.migrate().await.unwrap();

        let err = store.verify("ghost", "whatever".into()).await.unwrap_err();
        assert!(matches!(err, StoreError::HashTimeout));
    }

    #[tokio::test]
    async fn test_concurrent_registrations_let_one_win() {
        let store = memory_store().await;

        let (a, b) = tokio::join!(
            store.register("dave", "one".into()),
            store.register("dave", "two".into()),
        );

        let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(successes, 1);
        assert!(store.exists("dave").await.unwrap());
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
