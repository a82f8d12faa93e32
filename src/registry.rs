//! Shared user registry.
//!
//! The registry is the one database shared by every user: it maps an auth id
//! to that user's database path, API key, activation status, and poll
//! schedule. The scheduler reads it to find users due for polling; pollers
//! write back only `next_poll_at` and `non_terminal_torrent_count`.
//!
//! Reads go through a process-wide cache of the active-users list and the
//! per-auth rows. Every mutating write invalidates the cache, so staleness
//! is bounded by one scheduler tick.

use crate::clock;
use crate::error::DatabaseError;
use crate::types::AuthId;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use sqlx::sqlite::SqlitePool;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Decrypts stored API keys.
///
/// Key encryption is owned by the embedding application; the controller only
/// needs the decrypted bearer token at poll time. The default
/// [`PlainKeyDecryptor`] passes stored values through untouched.
pub trait KeyDecryptor: Send + Sync {
    /// Decrypt an encrypted API key into the bearer token
    fn decrypt(&self, encrypted: &str) -> Result<String>;
}

/// Pass-through decryptor for deployments storing keys in the clear
#[derive(Debug, Default)]
pub struct PlainKeyDecryptor;

impl KeyDecryptor for PlainKeyDecryptor {
    fn decrypt(&self, encrypted: &str) -> Result<String> {
        Ok(encrypted.to_string())
    }
}

/// Activation status of a registered user
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserStatus {
    /// Polled by the scheduler
    Active,
    /// Excluded from polling (operator action or auth failure)
    Inactive,
}

impl UserStatus {
    /// Canonical label as stored in the registry
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
        }
    }

    /// Parse a stored label; anything unrecognized is treated as inactive
    pub fn parse(label: &str) -> Self {
        if label.eq_ignore_ascii_case("active") {
            UserStatus::Active
        } else {
            UserStatus::Inactive
        }
    }
}

/// Raw registry row joined with the user's active API key
#[derive(Debug, Clone, FromRow)]
struct RegistryRow {
    auth_id: AuthId,
    db_path: String,
    status: String,
    has_active_rules: i64,
    non_terminal_torrent_count: i64,
    next_poll_at: Option<String>,
    encrypted_key: String,
}

/// One registered user as seen by the scheduler and poller
#[derive(Debug, Clone)]
pub struct RegistryUser {
    /// The user's auth id
    pub auth_id: AuthId,
    /// Path to the user's own database file
    pub db_path: String,
    /// Activation status
    pub status: UserStatus,
    /// Whether the user has at least one enabled rule
    pub has_active_rules: bool,
    /// Non-terminal item count from the last completed poll
    pub non_terminal_torrent_count: i64,
    /// When the next poll is due; `None` means due immediately
    pub next_poll_at: Option<DateTime<Utc>>,
    /// The user's encrypted API key
    pub encrypted_key: String,
}

impl From<RegistryRow> for RegistryUser {
    fn from(row: RegistryRow) -> Self {
        RegistryUser {
            auth_id: row.auth_id,
            db_path: row.db_path,
            status: UserStatus::parse(&row.status),
            has_active_rules: row.has_active_rules != 0,
            non_terminal_torrent_count: row.non_terminal_torrent_count,
            // null, empty, and malformed all collapse to "due immediately"
            next_poll_at: clock::parse_timestamp_opt(row.next_poll_at.as_deref()),
            encrypted_key: row.encrypted_key,
        }
    }
}

#[derive(Default)]
struct RegistryCache {
    active_users: Option<Vec<RegistryUser>>,
    rows: HashMap<AuthId, RegistryUser>,
}

/// Shared registry handle
pub struct Registry {
    pool: SqlitePool,
    cache: RwLock<RegistryCache>,
    decryptor: Arc<dyn KeyDecryptor>,
}

impl Registry {
    /// Open the registry database, creating it and its schema if missing
    pub async fn new(path: &Path, decryptor: Arc<dyn KeyDecryptor>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create registry directory: {}",
                    e
                )))
            })?;
        }

        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse registry path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to registry: {}",
                e
            )))
        })?;

        let registry = Self {
            pool,
            cache: RwLock::new(RegistryCache::default()),
            decryptor,
        };
        registry.migrate().await?;

        Ok(registry)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_registry (
                auth_id TEXT PRIMARY KEY,
                db_path TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL DEFAULT 'active',
                has_active_rules INTEGER NOT NULL DEFAULT 0,
                non_terminal_torrent_count INTEGER NOT NULL DEFAULT 0,
                next_poll_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create user_registry table: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS api_keys (
                auth_id TEXT PRIMARY KEY REFERENCES user_registry(auth_id) ON DELETE CASCADE,
                encrypted_key TEXT NOT NULL,
                key_name TEXT,
                is_active INTEGER NOT NULL DEFAULT 1
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create api_keys table: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Register a user or update their database path. New users start active
    /// with no poll schedule, so the next tick picks them up.
    pub async fn upsert_user(&self, auth_id: &AuthId, db_path: &str) -> Result<()> {
        let now = clock::format_timestamp(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO user_registry (auth_id, db_path, status, created_at, updated_at)
            VALUES (?, ?, 'active', ?, ?)
            ON CONFLICT (auth_id) DO UPDATE SET
                db_path = excluded.db_path,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(auth_id)
        .bind(db_path)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to upsert user: {}",
                e
            )))
        })?;

        self.invalidate().await;
        Ok(())
    }

    /// Store or replace a user's API key
    pub async fn set_api_key(
        &self,
        auth_id: &AuthId,
        encrypted_key: &str,
        key_name: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO api_keys (auth_id, encrypted_key, key_name, is_active)
            VALUES (?, ?, ?, 1)
            ON CONFLICT (auth_id) DO UPDATE SET
                encrypted_key = excluded.encrypted_key,
                key_name = excluded.key_name,
                is_active = 1
            "#,
        )
        .bind(auth_id)
        .bind(encrypted_key)
        .bind(key_name)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to set API key: {}",
                e
            )))
        })?;

        self.invalidate().await;
        Ok(())
    }

    /// Get one user (with their active API key), through the cache
    pub async fn get_user(&self, auth_id: &AuthId) -> Result<Option<RegistryUser>> {
        {
            let cache = self.cache.read().await;
            if let Some(user) = cache.rows.get(auth_id) {
                return Ok(Some(user.clone()));
            }
        }

        let row = sqlx::query_as::<_, RegistryRow>(
            r#"
            SELECT u.auth_id, u.db_path, u.status, u.has_active_rules,
                   u.non_terminal_torrent_count, u.next_poll_at, k.encrypted_key
            FROM user_registry u
            JOIN api_keys k ON k.auth_id = u.auth_id
            WHERE u.auth_id = ?
            "#,
        )
        .bind(auth_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get registry user: {}",
                e
            )))
        })?;

        let user: Option<RegistryUser> = row.map(Into::into);
        if let Some(ref user) = user {
            let mut cache = self.cache.write().await;
            cache.rows.insert(auth_id.clone(), user.clone());
        }

        Ok(user)
    }

    /// Users eligible for polling at all: status active, key active, and at
    /// least one enabled rule. Served from the cache when warm.
    pub async fn active_users(&self) -> Result<Vec<RegistryUser>> {
        {
            let cache = self.cache.read().await;
            if let Some(ref users) = cache.active_users {
                return Ok(users.clone());
            }
        }

        let rows = sqlx::query_as::<_, RegistryRow>(
            r#"
            SELECT u.auth_id, u.db_path, u.status, u.has_active_rules,
                   u.non_terminal_torrent_count, u.next_poll_at, k.encrypted_key
            FROM user_registry u
            JOIN api_keys k ON k.auth_id = u.auth_id
            WHERE u.status = 'active' AND k.is_active = 1 AND u.has_active_rules = 1
            ORDER BY u.next_poll_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list active users: {}",
                e
            )))
        })?;

        let users: Vec<RegistryUser> = rows.into_iter().map(Into::into).collect();

        let mut cache = self.cache.write().await;
        cache.active_users = Some(users.clone());
        for user in &users {
            cache.rows.insert(user.auth_id.clone(), user.clone());
        }

        Ok(users)
    }

    /// Users due for polling now: active users whose `next_poll_at` is
    /// missing or in the past, ordered soonest-due first (missing first)
    pub async fn due_users(&self, now: DateTime<Utc>) -> Result<Vec<RegistryUser>> {
        let mut due: Vec<RegistryUser> = self
            .active_users()
            .await?
            .into_iter()
            .filter(|user| user.next_poll_at.is_none_or(|at| at <= now))
            .collect();
        due.sort_by_key(|user| user.next_poll_at);
        Ok(due)
    }

    /// Write back a completed poll: the next schedule and the observed
    /// non-terminal item count
    pub async fn update_poll_result(
        &self,
        auth_id: &AuthId,
        next_poll_at: DateTime<Utc>,
        non_terminal_count: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE user_registry
            SET next_poll_at = ?, non_terminal_torrent_count = ?, updated_at = ?
            WHERE auth_id = ?
            "#,
        )
        .bind(clock::format_timestamp(next_poll_at))
        .bind(non_terminal_count)
        .bind(clock::format_timestamp(Utc::now()))
        .bind(auth_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update poll result: {}",
                e
            )))
        })?;

        self.invalidate().await;
        Ok(())
    }

    /// Set a user's activation status
    pub async fn set_status(&self, auth_id: &AuthId, status: UserStatus) -> Result<()> {
        sqlx::query("UPDATE user_registry SET status = ?, updated_at = ? WHERE auth_id = ?")
            .bind(status.as_str())
            .bind(clock::format_timestamp(Utc::now()))
            .bind(auth_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to set user status: {}",
                    e
                )))
            })?;

        self.invalidate().await;
        Ok(())
    }

    /// Mark a user inactive (auth failure or operator action)
    pub async fn mark_inactive(&self, auth_id: &AuthId) -> Result<()> {
        self.set_status(auth_id, UserStatus::Inactive).await
    }

    /// Record whether the user has at least one enabled rule
    pub async fn set_has_active_rules(&self, auth_id: &AuthId, has_rules: bool) -> Result<()> {
        sqlx::query(
            "UPDATE user_registry SET has_active_rules = ?, updated_at = ? WHERE auth_id = ?",
        )
        .bind(has_rules as i64)
        .bind(clock::format_timestamp(Utc::now()))
        .bind(auth_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to set has_active_rules: {}",
                e
            )))
        })?;

        self.invalidate().await;
        Ok(())
    }

    /// Decrypt a user's API key into the bearer token
    pub fn decrypt_key(&self, user: &RegistryUser) -> Result<String> {
        self.decryptor.decrypt(&user.encrypted_key)
    }

    /// Drop all cached rows; the next read repopulates from storage
    async fn invalidate(&self) {
        let mut cache = self.cache.write().await;
        cache.active_users = None;
        cache.rows.clear();
    }

    /// Close the registry connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
