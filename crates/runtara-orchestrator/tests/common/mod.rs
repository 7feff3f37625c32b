// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for runtara-orchestrator integration tests.
//!
//! Provides service fixtures over the in-memory and SQLite stores, a
//! [`CountingStore`] that records how many store calls a code path makes and
//! a [`FlakyStore`] that fails a chosen number of writes.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use runtara_orchestrator::{OrchestratorError, Result};
use runtara_orchestrator::instance::ProcessInstance;
use runtara_orchestrator::services::ProcessServices;
use runtara_orchestrator::store::{MemoryStore, SqliteStore, StateStore};

/// Skip a test unless `TEST_REDIS_URL` points at a running Redis.
#[macro_export]
macro_rules! skip_if_no_redis {
    () => {
        if std::env::var("TEST_REDIS_URL").is_err() {
            eprintln!("Skipping test: TEST_REDIS_URL not set");
            return;
        }
    };
}

/// [`StateStore`] wrapper counting every call made through it.
pub struct CountingStore {
    inner: Arc<dyn StateStore>,
    calls: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn StateStore>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    /// Calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StateStore for CountingStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.hit();
        self.inner.get(key).await
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        self.hit();
        self.inner.get_many(keys).await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.hit();
        self.inner.put(key, value).await
    }

    async fn put_many(&self, entries: &[(String, Vec<u8>)]) -> Result<()> {
        self.hit();
        self.inner.put_many(entries).await
    }

    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool> {
        self.hit();
        self.inner.put_if_absent(key, value).await
    }

    async fn compare_and_swap(&self, key: &str, expected: &[u8], new: &[u8]) -> Result<bool> {
        self.hit();
        self.inner.compare_and_swap(key, expected, new).await
    }

    async fn list_push(&self, key: &str, value: &[u8]) -> Result<u64> {
        self.hit();
        self.inner.list_push(key, value).await
    }

    async fn list_range(&self, key: &str, offset: u64, limit: u64) -> Result<Vec<Vec<u8>>> {
        self.hit();
        self.inner.list_range(key, offset, limit).await
    }

    async fn list_len(&self, key: &str) -> Result<u64> {
        self.hit();
        self.inner.list_len(key).await
    }

    async fn set_add(&self, key: &str, members: &[String]) -> Result<()> {
        self.hit();
        self.inner.set_add(key, members).await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        self.hit();
        self.inner.set_members(key).await
    }

    async fn health_check(&self) -> Result<bool> {
        self.hit();
        self.inner.health_check().await
    }
}

/// [`StateStore`] wrapper that fails the next N list appends or puts.
pub struct FlakyStore {
    inner: Arc<dyn StateStore>,
    failing_pushes: AtomicUsize,
    failing_puts: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn StateStore>) -> Self {
        Self {
            inner,
            failing_pushes: AtomicUsize::new(0),
            failing_puts: AtomicUsize::new(0),
        }
    }

    pub fn fail_next_pushes(&self, count: usize) {
        self.failing_pushes.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_puts(&self, count: usize) {
        self.failing_puts.store(count, Ordering::SeqCst);
    }

    fn should_fail(counter: &AtomicUsize, operation: &str) -> Result<()> {
        let armed = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if armed {
            return Err(OrchestratorError::store(operation, "connection reset"));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Vec<u8>>> {
        self.inner.get_many(keys).await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        Self::should_fail(&self.failing_puts, "put")?;
        self.inner.put(key, value).await
    }

    async fn put_many(&self, entries: &[(String, Vec<u8>)]) -> Result<()> {
        Self::should_fail(&self.failing_puts, "put_many")?;
        self.inner.put_many(entries).await
    }

    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool> {
        self.inner.put_if_absent(key, value).await
    }

    async fn compare_and_swap(&self, key: &str, expected: &[u8], new: &[u8]) -> Result<bool> {
        self.inner.compare_and_swap(key, expected, new).await
    }

    async fn list_push(&self, key: &str, value: &[u8]) -> Result<u64> {
        Self::should_fail(&self.failing_pushes, "list_push")?;
        self.inner.list_push(key, value).await
    }

    async fn list_range(&self, key: &str, offset: u64, limit: u64) -> Result<Vec<Vec<u8>>> {
        self.inner.list_range(key, offset, limit).await
    }

    async fn list_len(&self, key: &str) -> Result<u64> {
        self.inner.list_len(key).await
    }

    async fn set_add(&self, key: &str, members: &[String]) -> Result<()> {
        self.inner.set_add(key, members).await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        self.inner.set_members(key).await
    }

    async fn health_check(&self) -> Result<bool> {
        self.inner.health_check().await
    }
}

/// Flaky store over a fresh in-memory store, with services built on it.
pub fn flaky_services() -> (Arc<FlakyStore>, ProcessServices) {
    let store = Arc::new(FlakyStore::new(Arc::new(MemoryStore::new())));
    let services = services_over(store.clone());
    (store, services)
}

/// Services over a fresh in-memory store.
pub fn memory_services() -> ProcessServices {
    services_over(Arc::new(MemoryStore::new()))
}

/// Services over a fresh in-memory SQLite database.
pub async fn sqlite_services() -> ProcessServices {
    let store = SqliteStore::connect("sqlite::memory:")
        .await
        .expect("Failed to open in-memory SQLite store");
    services_over(Arc::new(store))
}

/// Services over `store` with eight partitions.
pub fn services_over(store: Arc<dyn StateStore>) -> ProcessServices {
    ProcessServices::builder()
        .store(store)
        .max_partitions(8)
        .build()
        .expect("Failed to build services")
}

/// A running root instance with the cursor at `task_id`, already stored.
pub async fn running_root(services: &ProcessServices, id: &str, task_id: &str) -> ProcessInstance {
    let mut instance = ProcessInstance::new_root("order-process").with_id(id);
    let now = Utc::now();
    instance.start(now).expect("pending instance starts");
    instance.advance_to(task_id, now);
    assert!(
        services
            .instances()
            .insert(&instance)
            .await
            .expect("insert succeeds")
    );
    instance
}
