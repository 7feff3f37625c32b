// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! State store interface and backends.
//!
//! The orchestration core only needs point get/put, compare-and-swap,
//! ordered list append and unordered set membership. Any backend that can
//! offer those primitives (an in-process map, SQLite, Redis/Valkey) can
//! carry process instances, variables and lifecycle queues.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod sqlite;

pub use self::memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;
pub use self::sqlite::SqliteStore;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::{OrchestratorError, Result};

/// Key-value, list and set primitives consumed by the repositories.
///
/// Implementations own their connection pooling and must be safe to call
/// from many tasks at once without external locking.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read a single value.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Read many values at once. Missing keys are absent from the result.
    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get(key).await? {
                found.insert(key.clone(), value);
            }
        }
        Ok(found)
    }

    /// Write a value, replacing any previous one.
    async fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Write many values. Backends that support it apply the batch atomically.
    async fn put_many(&self, entries: &[(String, Vec<u8>)]) -> Result<()> {
        for (key, value) in entries {
            self.put(key, value).await?;
        }
        Ok(())
    }

    /// Write a value only if the key does not exist yet.
    ///
    /// Returns true if the value was written.
    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool>;

    /// Replace the value at `key` only if it currently equals `expected`.
    ///
    /// Returns false (and writes nothing) on mismatch or when the key is missing.
    async fn compare_and_swap(&self, key: &str, expected: &[u8], new: &[u8]) -> Result<bool>;

    /// Append a value to the tail of the list at `key`, returning the new length.
    async fn list_push(&self, key: &str, value: &[u8]) -> Result<u64>;

    /// Read up to `limit` list entries starting at `offset`, head first.
    async fn list_range(&self, key: &str, offset: u64, limit: u64) -> Result<Vec<Vec<u8>>>;

    /// Number of entries in the list at `key`.
    async fn list_len(&self, key: &str) -> Result<u64>;

    /// Add members to the set at `key`.
    async fn set_add(&self, key: &str, members: &[String]) -> Result<()>;

    /// All members of the set at `key`, sorted.
    async fn set_members(&self, key: &str) -> Result<Vec<String>>;

    /// Check that the backend is reachable.
    async fn health_check(&self) -> Result<bool>;
}

/// Open a state store from a URL.
///
/// Supported schemes:
/// - `memory:` - process-local [`MemoryStore`]
/// - `sqlite:` - [`SqliteStore`] (`sqlite::memory:` or `sqlite:<path>`)
/// - `redis://` / `rediss://` - [`RedisStore`] (requires the `redis` feature)
pub async fn connect(url: &str) -> Result<Arc<dyn StateStore>> {
    if url == "memory:" || url == "memory://" {
        info!("Using in-memory state store");
        return Ok(Arc::new(MemoryStore::new()));
    }

    if url.starts_with("sqlite:") {
        info!(url = %url, "Connecting to SQLite state store");
        return Ok(Arc::new(SqliteStore::connect(url).await?));
    }

    if url.starts_with("redis://") || url.starts_with("rediss://") {
        #[cfg(feature = "redis")]
        {
            info!("Connecting to Redis state store");
            return Ok(Arc::new(RedisStore::connect(url).await?));
        }
        #[cfg(not(feature = "redis"))]
        {
            return Err(OrchestratorError::validation(
                "store_url",
                "redis support is not compiled in (enable the `redis` feature)",
            ));
        }
    }

    Err(OrchestratorError::validation(
        "store_url",
        format!("unsupported state store URL '{}'", url),
    ))
}
