// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory state store.
//!
//! Process-local and non-durable. Used for tests and for embedding the
//! orchestrator in a single process.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::StateStore;
use crate::error::Result;

#[derive(Debug, Default)]
struct MemoryState {
    values: HashMap<String, Vec<u8>>,
    lists: HashMap<String, Vec<Vec<u8>>>,
    sets: HashMap<String, BTreeSet<String>>,
}

/// Process-local [`StateStore`] backed by hash maps.
///
/// Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of plain key-value entries (lists and sets excluded).
    pub async fn len(&self) -> usize {
        self.state.lock().await.values.len()
    }

    /// Whether the store holds no key-value entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.state.lock().await.values.get(key).cloned())
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        let state = self.state.lock().await;
        Ok(keys
            .iter()
            .filter_map(|key| state.values.get(key).map(|v| (key.clone(), v.clone())))
            .collect())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.state
            .lock()
            .await
            .values
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn put_many(&self, entries: &[(String, Vec<u8>)]) -> Result<()> {
        let mut state = self.state.lock().await;
        for (key, value) in entries {
            state.values.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.values.contains_key(key) {
            return Ok(false);
        }
        state.values.insert(key.to_string(), value.to_vec());
        Ok(true)
    }

    async fn compare_and_swap(&self, key: &str, expected: &[u8], new: &[u8]) -> Result<bool> {
        let mut state = self.state.lock().await;
        match state.values.get_mut(key) {
            Some(current) if current.as_slice() == expected => {
                *current = new.to_vec();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_push(&self, key: &str, value: &[u8]) -> Result<u64> {
        let mut state = self.state.lock().await;
        let list = state.lists.entry(key.to_string()).or_default();
        list.push(value.to_vec());
        Ok(list.len() as u64)
    }

    async fn list_range(&self, key: &str, offset: u64, limit: u64) -> Result<Vec<Vec<u8>>> {
        let state = self.state.lock().await;
        Ok(state
            .lists
            .get(key)
            .map(|list| {
                list.iter()
                    .skip(offset as usize)
                    .take(limit as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_len(&self, key: &str) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state.lists.get(key).map_or(0, |list| list.len() as u64))
    }

    async fn set_add(&self, key: &str, members: &[String]) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .sets
            .entry(key.to_string())
            .or_default()
            .extend(members.iter().cloned());
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
