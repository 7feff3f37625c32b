// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed state store.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, instrument};

use super::StateStore;
use crate::error::{OrchestratorError, Result};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Keys bound per `IN (...)` lookup, below SQLite's bound-parameter limit.
const MAX_KEYS_PER_QUERY: usize = 500;

/// SQLite-backed [`StateStore`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl SqliteStore {
    /// Create a store from an existing pool. The schema must already be migrated.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite URL and run migrations.
    ///
    /// `sqlite::memory:` URLs get a single, never-recycled connection so the
    /// database lives as long as the store.
    #[instrument]
    pub async fn connect(url: &str) -> Result<Self> {
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| OrchestratorError::store("connect", e))?;

        Self::migrate(&pool).await?;
        debug!(in_memory, "SQLite state store ready");

        Ok(Self { pool })
    }

    /// Create and initialize a store from a file path.
    ///
    /// Creates parent directories and the database file if needed.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                OrchestratorError::store(
                    "create_dir",
                    format!("Failed to create directory {:?}: {}", parent, e),
                )
            })?;
        }

        Self::connect(&format!("sqlite:{}", path.to_string_lossy())).await
    }

    /// Run the embedded schema migrations against a pool.
    pub async fn migrate(pool: &SqlitePool) -> Result<()> {
        MIGRATOR.run(pool).await?;
        Ok(())
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(
            r#"
            SELECT value FROM kv_entries WHERE key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(value,)| value))
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let mut found = HashMap::with_capacity(keys.len());
        for chunk in keys.chunks(MAX_KEYS_PER_QUERY) {
            let mut query: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT key, value FROM kv_entries WHERE key IN (");
            let mut separated = query.separated(", ");
            for key in chunk {
                separated.push_bind(key);
            }
            separated.push_unseparated(")");

            let rows: Vec<(String, Vec<u8>)> =
                query.build_query_as().fetch_all(&self.pool).await?;
            found.extend(rows);
        }

        Ok(found)
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn put_many(&self, entries: &[(String, Vec<u8>)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (key, value) in entries {
            sqlx::query(
                r#"
                INSERT INTO kv_entries (key, value, updated_at)
                VALUES (?, ?, CURRENT_TIMESTAMP)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = CURRENT_TIMESTAMP
                "#,
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO kv_entries (key, value, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn compare_and_swap(&self, key: &str, expected: &[u8], new: &[u8]) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE kv_entries
            SET value = ?1, updated_at = CURRENT_TIMESTAMP
            WHERE key = ?2
              AND value = ?3
            "#,
        )
        .bind(new)
        .bind(key)
        .bind(expected)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_push(&self, key: &str, value: &[u8]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO list_entries (list_key, value, created_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&mut *tx)
        .await?;

        let (len,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM list_entries WHERE list_key = ?
            "#,
        )
        .bind(key)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(len as u64)
    }

    async fn list_range(&self, key: &str, offset: u64, limit: u64) -> Result<Vec<Vec<u8>>> {
        let rows: Vec<(Vec<u8>,)> = sqlx::query_as(
            r#"
            SELECT value FROM list_entries
            WHERE list_key = ?
            ORDER BY id ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(key)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(value,)| value).collect())
    }

    async fn list_len(&self, key: &str) -> Result<u64> {
        let (len,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM list_entries WHERE list_key = ?
            "#,
        )
        .bind(key)
        .fetch_one(&self.pool)
        .await?;

        Ok(len as u64)
    }

    async fn set_add(&self, key: &str, members: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for member in members {
            sqlx::query(
                r#"
                INSERT INTO set_members (set_key, member)
                VALUES (?, ?)
                ON CONFLICT(set_key, member) DO NOTHING
                "#,
            )
            .bind(key)
            .bind(member)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT member FROM set_members
            WHERE set_key = ?
            ORDER BY member ASC
            "#,
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(member,)| member).collect())
    }

    async fn health_check(&self) -> Result<bool> {
        let (one,): (i64,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(one == 1)
    }
}
