// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Redis/Valkey-backed state store.
//!
//! Values are plain strings, lifecycle queues are lists (`RPUSH`) and the
//! variable index is a set (`SADD`). Compare-and-swap runs as a Lua script so
//! the read and the conditional write happen atomically on the server.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{debug, instrument};

use super::StateStore;
use crate::error::Result;

const COMPARE_AND_SWAP_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2])
    return 1
end
return 0
"#;

/// Redis-backed [`StateStore`].
///
/// Cloning is cheap: clones share the same multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    cas_script: redis::Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("connection", &"...")
            .finish()
    }
}

impl RedisStore {
    /// Connect to a Redis URL (`redis://host:port/db`).
    #[instrument(skip(url))]
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        debug!("Redis connection manager established");
        Ok(Self::new(connection))
    }

    /// Create a store from an existing connection manager.
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            cas_script: redis::Script::new(COMPARE_AND_SWAP_SCRIPT),
        }
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let mut conn = self.connection.clone();
        let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
            .arg(keys.to_vec())
            .query_async(&mut conn)
            .await?;

        Ok(keys
            .iter()
            .zip(values)
            .filter_map(|(key, value)| value.map(|v| (key.clone(), v)))
            .collect())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn put_many(&self, entries: &[(String, Vec<u8>)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in entries {
            pipe.set(key, value.as_slice()).ignore();
        }

        let mut conn = self.connection.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool> {
        let mut conn = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn compare_and_swap(&self, key: &str, expected: &[u8], new: &[u8]) -> Result<bool> {
        let mut conn = self.connection.clone();
        let swapped: i64 = self
            .cas_script
            .key(key)
            .arg(expected)
            .arg(new)
            .invoke_async(&mut conn)
            .await?;
        Ok(swapped == 1)
    }

    async fn list_push(&self, key: &str, value: &[u8]) -> Result<u64> {
        let mut conn = self.connection.clone();
        let len: u64 = conn.rpush(key, value).await?;
        Ok(len)
    }

    async fn list_range(&self, key: &str, offset: u64, limit: u64) -> Result<Vec<Vec<u8>>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let start = isize::try_from(offset).unwrap_or(isize::MAX);
        let stop = isize::try_from(offset.saturating_add(limit - 1)).unwrap_or(isize::MAX);

        let mut conn = self.connection.clone();
        let values: Vec<Vec<u8>> = conn.lrange(key, start, stop).await?;
        Ok(values)
    }

    async fn list_len(&self, key: &str) -> Result<u64> {
        let mut conn = self.connection.clone();
        let len: u64 = conn.llen(key).await?;
        Ok(len)
    }

    async fn set_add(&self, key: &str, members: &[String]) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }

        let mut conn = self.connection.clone();
        let _: u64 = conn.sadd(key, members.to_vec()).await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.connection.clone();
        let mut members: Vec<String> = conn.smembers(key).await?;
        members.sort();
        Ok(members)
    }

    async fn health_check(&self) -> Result<bool> {
        let mut conn = self.connection.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }
}
