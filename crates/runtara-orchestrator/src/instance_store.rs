// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable repository of process instances.
//!
//! Records live under `processInstance/{id}` as camelCase JSON. Updates go
//! through [`ProcessInstanceStore::save`], a compare-and-swap keyed on the
//! stored status and revision: of N workers racing to save the same
//! instance from the same revision, exactly one wins.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::{OrchestratorError, Result};
use crate::instance::{InstanceStatus, ProcessInstance};
use crate::store::StateStore;

const INSTANCE_KEY_PREFIX: &str = "processInstance/";

/// Status and revision of a stored record, decoded without the rest.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRevision {
    status: InstanceStatus,
    #[serde(default)]
    version: u64,
}

/// Repository of [`ProcessInstance`] records over a [`StateStore`].
#[derive(Clone)]
pub struct ProcessInstanceStore {
    store: Arc<dyn StateStore>,
}

impl ProcessInstanceStore {
    /// Create a repository over `store`.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Storage key of an instance record.
    pub fn key(instance_id: &str) -> String {
        format!("{}{}", INSTANCE_KEY_PREFIX, instance_id)
    }

    /// Create a new record. Returns `false` if one already exists.
    #[instrument(skip(self, instance), fields(instance_id = %instance.id))]
    pub async fn insert(&self, instance: &ProcessInstance) -> Result<bool> {
        instance.validate()?;
        let bytes = serde_json::to_vec(instance)?;
        let created = self
            .store
            .put_if_absent(&Self::key(&instance.id), &bytes)
            .await?;
        debug!(created, "Instance insert");
        Ok(created)
    }

    /// Conditionally overwrite the stored record with `instance`.
    ///
    /// Succeeds only if the stored status equals `expected_status` and the
    /// stored revision equals `instance.version`. On success the revision is
    /// bumped in both the stored record and `instance`. On mismatch, or when
    /// no record exists, returns `false` and leaves storage untouched. There
    /// is no retry here: the caller re-reads and decides.
    #[instrument(
        skip(self, instance),
        fields(instance_id = %instance.id, expected = %expected_status, next = %instance.status)
    )]
    pub async fn save(
        &self,
        instance: &mut ProcessInstance,
        expected_status: InstanceStatus,
    ) -> Result<bool> {
        let key = Self::key(&instance.id);

        let Some(current) = self.store.get(&key).await? else {
            debug!("Instance save skipped: no stored record");
            return Ok(false);
        };

        let stored: StoredRevision = serde_json::from_slice(&current)?;
        if stored.status != expected_status || stored.version != instance.version {
            debug!(
                stored_status = %stored.status,
                stored_version = stored.version,
                version = instance.version,
                "Instance save conflict"
            );
            return Ok(false);
        }

        instance.version += 1;
        let bytes = match serde_json::to_vec(&*instance) {
            Ok(bytes) => bytes,
            Err(e) => {
                instance.version -= 1;
                return Err(e.into());
            }
        };

        let swapped = match self.store.compare_and_swap(&key, &current, &bytes).await {
            Ok(swapped) => swapped,
            Err(e) => {
                instance.version -= 1;
                return Err(e);
            }
        };

        if !swapped {
            instance.version -= 1;
            debug!("Instance save lost the race");
        }
        Ok(swapped)
    }

    /// Load an instance, `None` if absent.
    pub async fn find_by_id(&self, instance_id: &str) -> Result<Option<ProcessInstance>> {
        match self.store.get(&Self::key(instance_id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Load an instance only if its stored status equals `expected_status`.
    pub async fn find_by_id_with_status(
        &self,
        instance_id: &str,
        expected_status: InstanceStatus,
    ) -> Result<Option<ProcessInstance>> {
        Ok(self
            .find_by_id(instance_id)
            .await?
            .filter(|instance| instance.status == expected_status))
    }

    /// Load an instance, failing with `InstanceNotFound` if absent.
    pub async fn get_by_id(&self, instance_id: &str) -> Result<ProcessInstance> {
        self.find_by_id(instance_id)
            .await?
            .ok_or_else(|| OrchestratorError::InstanceNotFound {
                instance_id: instance_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::store::{MemoryStore, SqliteStore};

    fn memory_repo() -> ProcessInstanceStore {
        ProcessInstanceStore::new(Arc::new(MemoryStore::new()))
    }

    async fn sqlite_repo() -> ProcessInstanceStore {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        ProcessInstanceStore::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let repo = memory_repo();
        let instance = ProcessInstance::new_root("order-process").with_id("root-1");

        assert!(repo.insert(&instance).await.unwrap());
        assert!(!repo.insert(&instance).await.unwrap());

        let found = repo.find_by_id("root-1").await.unwrap().unwrap();
        assert_eq!(found, instance);
        assert!(repo.find_by_id("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_by_id_not_found() {
        let repo = memory_repo();
        let err = repo.get_by_id("missing").await.unwrap_err();
        assert_eq!(err.error_code(), "INSTANCE_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_save_with_matching_status() {
        let repo = memory_repo();
        let mut instance = ProcessInstance::new_root("p").with_id("i-1");
        repo.insert(&instance).await.unwrap();

        instance.start(Utc::now()).unwrap();
        instance.advance_to("t1", Utc::now());
        assert!(repo.save(&mut instance, InstanceStatus::Pending).await.unwrap());
        assert_eq!(instance.version, 1);

        let stored = repo.get_by_id("i-1").await.unwrap();
        assert_eq!(stored.status, InstanceStatus::Running);
        assert_eq!(stored.curr_task_id.as_deref(), Some("t1"));
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_save_status_mismatch_leaves_record() {
        let repo = memory_repo();
        let mut instance = ProcessInstance::new_root("p").with_id("i-1");
        repo.insert(&instance).await.unwrap();

        instance.start(Utc::now()).unwrap();
        assert!(!repo.save(&mut instance, InstanceStatus::Running).await.unwrap());
        assert_eq!(instance.version, 0);

        let stored = repo.get_by_id("i-1").await.unwrap();
        assert_eq!(stored.status, InstanceStatus::Pending);
    }

    #[tokio::test]
    async fn test_save_missing_record_returns_false() {
        let repo = memory_repo();
        let mut instance = ProcessInstance::new_root("p");
        assert!(!repo.save(&mut instance, InstanceStatus::Pending).await.unwrap());
        assert!(repo.find_by_id(&instance.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_revision_loses_same_status_advance() {
        let repo = memory_repo();
        let mut instance = ProcessInstance::new_root("p").with_id("i-1");
        instance.start(Utc::now()).unwrap();
        instance.advance_to("t1", Utc::now());
        repo.insert(&instance).await.unwrap();

        let mut first = repo.get_by_id("i-1").await.unwrap();
        let mut second = repo.get_by_id("i-1").await.unwrap();

        first.advance_to("t2", Utc::now());
        second.advance_to("t2", Utc::now());

        assert!(repo.save(&mut first, InstanceStatus::Running).await.unwrap());
        assert!(!repo.save(&mut second, InstanceStatus::Running).await.unwrap());

        let stored = repo.get_by_id("i-1").await.unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.prev_task_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn test_find_by_id_with_status() {
        let repo = sqlite_repo().await;
        let instance = ProcessInstance::new_root("p").with_id("i-1");
        repo.insert(&instance).await.unwrap();

        assert!(
            repo.find_by_id_with_status("i-1", InstanceStatus::Pending)
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            repo.find_by_id_with_status("i-1", InstanceStatus::Running)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_insert_rejects_invalid_instance() {
        let repo = memory_repo();
        let mut instance = ProcessInstance::new_root("p");
        instance.parent_id = Some("orphan".to_string());
        assert!(repo.insert(&instance).await.is_err());
    }

    #[test]
    fn test_key_format() {
        assert_eq!(ProcessInstanceStore::key("abc"), "processInstance/abc");
    }
}
