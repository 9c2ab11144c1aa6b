use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DbError(#[from] sqlx::Error),

    #[error("Subscription {0} not found")]
    NotFound(i64),
}

/// Chat user that requested keys
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Server row mirrored from the static registry
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Server {
    pub id: i64,
    pub region: String,
    pub ip_address: String,
}

/// Issued credential
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub server_id: i64,
    pub protocol: String,
    pub key_data: String,
    pub key_identifier: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
}

/// Fields needed to record a new subscription
#[derive(Debug, Clone)]
pub struct NewSubscription<'a> {
    pub user_id: i64,
    pub server_id: i64,
    pub protocol: &'a str,
    pub key_data: &'a str,
    pub key_identifier: &'a str,
    pub expires_at: DateTime<Utc>,
}

/// SQLite-backed store
#[derive(Clone)]
pub struct KeyStore {
    pool: Pool<Sqlite>,
}

impl KeyStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect_with(options)
            .await?;

        info!(url = %url, "Connected to key store");
        Ok(Self { pool })
    }

    /// Private in-memory database, mostly for tests
    pub async fn in_memory() -> Result<Self, StoreError> {
        // Every connection to :memory: is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        Ok(Self { pool })
    }

    /// Initialize schema
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                username TEXT,
                first_name TEXT,
                last_name TEXT,
                created_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS servers (
                id INTEGER PRIMARY KEY,
                region TEXT NOT NULL,
                ip_address TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                server_id INTEGER NOT NULL REFERENCES servers(id),
                protocol TEXT NOT NULL,
                key_data TEXT NOT NULL,
                key_identifier TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL,
                expires_at TIMESTAMP NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_subscriptions_user ON subscriptions (user_id, is_active)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert servers that are not stored yet; existing rows are left alone.
    /// Returns the number of rows added.
    pub async fn sync_servers(&self, servers: &[(i64, &str, &str)]) -> Result<u64, StoreError> {
        let mut added = 0;
        for &(id, region, ip) in servers {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO servers (id, region, ip_address) VALUES (?, ?, ?)",
            )
            .bind(id)
            .bind(region)
            .bind(ip)
            .execute(&self.pool)
            .await?;
            added += result.rows_affected();
        }

        if added > 0 {
            info!("Added {} new servers to the key store", added);
        } else {
            debug!("Servers table already up-to-date");
        }
        Ok(added)
    }

    pub async fn servers(&self) -> Result<Vec<Server>, StoreError> {
        sqlx::query_as::<_, Server>("SELECT * FROM servers ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    /// Insert the user or refresh their names
    pub async fn upsert_user(
        &self,
        id: i64,
        username: Option<&str>,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> Result<User, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, username, first_name, last_name, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                first_name = excluded.first_name,
                last_name = excluded.last_name
            "#,
        )
        .bind(id)
        .bind(username)
        .bind(first_name)
        .bind(last_name)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(Into::into)
    }

    pub async fn add_subscription(
        &self,
        new: NewSubscription<'_>,
    ) -> Result<Subscription, StoreError> {
        let id = sqlx::query(
            r#"
            INSERT INTO subscriptions
                (user_id, server_id, protocol, key_data, key_identifier, created_at, expires_at, is_active)
            VALUES (?, ?, ?, ?, ?, ?, ?, 1)
            "#,
        )
        .bind(new.user_id)
        .bind(new.server_id)
        .bind(new.protocol)
        .bind(new.key_data)
        .bind(new.key_identifier)
        .bind(Utc::now())
        .bind(new.expires_at)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        info!(
            user_id = new.user_id,
            server_id = new.server_id,
            protocol = new.protocol,
            "Key added"
        );
        self.subscription(id).await?.ok_or(StoreError::NotFound(id))
    }

    /// Active keys of a user, oldest first
    pub async fn user_keys(&self, user_id: i64) -> Result<Vec<Subscription>, StoreError> {
        sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions WHERE user_id = ? AND is_active = 1 ORDER BY created_at ASC, id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    pub async fn count_user_keys(&self, user_id: i64) -> Result<i64, StoreError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions WHERE user_id = ? AND is_active = 1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(Into::into)
    }

    pub async fn subscription(&self, id: i64) -> Result<Option<Subscription>, StoreError> {
        sqlx::query_as::<_, Subscription>("SELECT * FROM subscriptions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    /// Mark a key revoked; returns false when it was already inactive
    pub async fn deactivate_subscription(&self, id: i64) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE subscriptions SET is_active = 0 WHERE id = ? AND is_active = 1")
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 && self.subscription(id).await?.is_none() {
            return Err(StoreError::NotFound(id));
        }
        Ok(result.rows_affected() > 0)
    }
}
