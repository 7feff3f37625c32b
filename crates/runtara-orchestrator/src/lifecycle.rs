// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Partitioned distribution of lifecycle events.
//!
//! Every event is appended to the durable list `{eventType}/{partition}`,
//! where the partition is picked from the event's partition key:
//!
//! ```text
//! partition = |javaStringHash(partitionKey)| % maxPartitions
//! ```
//!
//! Events sharing a key land in one queue in append order. Across queues
//! there is no ordering. The hash is the 32-bit `String.hashCode` used by
//! the existing JVM producers and consumers, so queue keys agree across
//! runtimes.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::config::{DEFAULT_MAX_PARTITIONS, max_partitions_from_env};
use crate::error::{OrchestratorError, Result};
use crate::events::{LifecycleEvent, LifecycleEventType};
use crate::store::StateStore;

/// 32-bit string hash: `h = 31 * h + c` over UTF-16 code units, wrapping.
pub fn java_string_hash(value: &str) -> i32 {
    value
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

/// Appends lifecycle events to partitioned queues.
#[derive(Clone)]
pub struct ExecutionLifecycleManager {
    store: Arc<dyn StateStore>,
    max_partitions: u32,
}

impl std::fmt::Debug for ExecutionLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionLifecycleManager")
            .field("max_partitions", &self.max_partitions)
            .finish()
    }
}

impl ExecutionLifecycleManager {
    /// Create a manager with a fixed partition count. Zero falls back to the default.
    pub fn new(store: Arc<dyn StateStore>, max_partitions: u32) -> Self {
        let max_partitions = if max_partitions == 0 {
            DEFAULT_MAX_PARTITIONS
        } else {
            max_partitions
        };
        Self {
            store,
            max_partitions,
        }
    }

    /// Create a manager with the partition count read from `MAX_PARTITIONS`.
    pub fn from_env(store: Arc<dyn StateStore>) -> Self {
        Self::new(store, max_partitions_from_env())
    }

    /// Number of partitions per event type.
    pub fn max_partitions(&self) -> u32 {
        self.max_partitions
    }

    /// Partition a key maps to.
    pub fn partition_for(&self, partition_key: &str) -> u32 {
        java_string_hash(partition_key).unsigned_abs() % self.max_partitions
    }

    /// Queue an event would be appended to.
    pub fn queue_key(&self, event: &LifecycleEvent) -> String {
        Self::queue_key_for(event.event_type(), self.partition_for(event.partition_key()))
    }

    /// Queue key for an event type and partition.
    pub fn queue_key_for(event_type: LifecycleEventType, partition: u32) -> String {
        format!("{}/{}", event_type, partition)
    }

    /// Every queue key of `event_type`, in partition order.
    pub fn queue_keys(&self, event_type: LifecycleEventType) -> Vec<String> {
        (0..self.max_partitions)
            .map(|partition| Self::queue_key_for(event_type, partition))
            .collect()
    }

    /// Append `event` to its queue if there is one.
    ///
    /// `None` is a no-op returning `Ok(None)`.
    pub async fn emit(&self, event: Option<&LifecycleEvent>) -> Result<Option<String>> {
        match event {
            Some(event) => self.publish(event).await.map(Some),
            None => {
                debug!("No lifecycle event to emit");
                Ok(None)
            }
        }
    }

    /// Append `event` to its queue and return the queue key.
    ///
    /// Events with an empty partition key are rejected. Append failures
    /// propagate without retry.
    #[instrument(skip(self, event), fields(event_type = %event.event_type()))]
    pub async fn publish(&self, event: &LifecycleEvent) -> Result<String> {
        event.validate()?;
        let queue_key = self.queue_key(event);
        let bytes = serde_json::to_vec(event)?;
        let depth = self.store.list_push(&queue_key, &bytes).await?;

        info!(
            partition_key = %event.partition_key(),
            queue = %queue_key,
            depth,
            "Lifecycle event emitted"
        );
        Ok(queue_key)
    }

    /// Read queued events of one partition without removing them.
    pub async fn pending(
        &self,
        event_type: LifecycleEventType,
        partition: u32,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<LifecycleEvent>> {
        self.check_partition(partition)?;
        let raw = self
            .store
            .list_range(&Self::queue_key_for(event_type, partition), offset, limit)
            .await?;
        raw.iter()
            .map(|bytes| serde_json::from_slice(bytes).map_err(OrchestratorError::from))
            .collect()
    }

    /// Number of events queued in one partition.
    pub async fn depth(&self, event_type: LifecycleEventType, partition: u32) -> Result<u64> {
        self.check_partition(partition)?;
        self.store
            .list_len(&Self::queue_key_for(event_type, partition))
            .await
    }

    fn check_partition(&self, partition: u32) -> Result<()> {
        if partition >= self.max_partitions {
            return Err(OrchestratorError::validation(
                "partition",
                format!(
                    "partition {} out of range (max partitions {})",
                    partition, self.max_partitions
                ),
            ));
        }
        Ok(())
    }
}
