// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Execution services shared by every component.
//!
//! [`ProcessServices`] is an explicit context object: it is passed by
//! reference into the resolver and the coordinator instead of being looked up
//! globally.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use runtara_orchestrator::services::ProcessServices;
//! use runtara_orchestrator::store::SqliteStore;
//!
//! let store = Arc::new(SqliteStore::from_path(".data/orchestrator.db").await?);
//! let services = ProcessServices::builder()
//!     .store(store)
//!     .max_partitions(16)
//!     .build()?;
//! ```

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::config::{Config, max_partitions_from_env};
use crate::instance_store::ProcessInstanceStore;
use crate::lifecycle::ExecutionLifecycleManager;
use crate::resiliency::ResiliencyRegistry;
use crate::resolution::VariableResolver;
use crate::store::{self, StateStore};
use crate::variable_store::VariableStore;

/// Builder for [`ProcessServices`].
pub struct ProcessServicesBuilder {
    store: Option<Arc<dyn StateStore>>,
    max_partitions: Option<u32>,
    resiliency: ResiliencyRegistry,
}

impl std::fmt::Debug for ProcessServicesBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessServicesBuilder")
            .field("store", &self.store.as_ref().map(|_| "..."))
            .field("max_partitions", &self.max_partitions)
            .field("resiliency", &self.resiliency.names())
            .finish()
    }
}

impl Default for ProcessServicesBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessServicesBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            store: None,
            max_partitions: None,
            resiliency: ResiliencyRegistry::new(),
        }
    }

    /// Set the backing store (required).
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the partition count. Defaults to `MAX_PARTITIONS` from the environment.
    pub fn max_partitions(mut self, max_partitions: u32) -> Self {
        self.max_partitions = Some(max_partitions);
        self
    }

    /// Set the named resiliency configurations.
    pub fn resiliency(mut self, registry: ResiliencyRegistry) -> Self {
        self.resiliency = registry;
        self
    }

    /// Build the services.
    ///
    /// # Errors
    ///
    /// Returns an error if no store was provided.
    pub fn build(self) -> Result<ProcessServices> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let max_partitions = self.max_partitions.unwrap_or_else(max_partitions_from_env);

        Ok(ProcessServices {
            instances: ProcessInstanceStore::new(store.clone()),
            variables: VariableStore::new(store.clone()),
            lifecycle: ExecutionLifecycleManager::new(store.clone(), max_partitions),
            resiliency: Arc::new(self.resiliency),
            store,
        })
    }
}

/// Repositories, lifecycle manager and configuration over one store.
#[derive(Clone)]
pub struct ProcessServices {
    store: Arc<dyn StateStore>,
    instances: ProcessInstanceStore,
    variables: VariableStore,
    lifecycle: ExecutionLifecycleManager,
    resiliency: Arc<ResiliencyRegistry>,
}

impl std::fmt::Debug for ProcessServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessServices")
            .field("lifecycle", &self.lifecycle)
            .field("resiliency", &self.resiliency.names())
            .finish()
    }
}

impl ProcessServices {
    /// Create a new builder.
    pub fn builder() -> ProcessServicesBuilder {
        ProcessServicesBuilder::new()
    }

    /// Connect to the configured store and build the services.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = store::connect(&config.store_url).await?;
        info!(
            max_partitions = config.max_partitions,
            "Process services initialized"
        );
        Self::builder()
            .store(store)
            .max_partitions(config.max_partitions)
            .build()
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Instance repository.
    pub fn instances(&self) -> &ProcessInstanceStore {
        &self.instances
    }

    /// Variable repository.
    pub fn variables(&self) -> &VariableStore {
        &self.variables
    }

    /// Lifecycle event producer.
    pub fn lifecycle(&self) -> &ExecutionLifecycleManager {
        &self.lifecycle
    }

    /// Named resiliency configurations.
    pub fn resiliency(&self) -> &ResiliencyRegistry {
        &self.resiliency
    }

    /// A resolver over these services.
    pub fn resolver(&self) -> VariableResolver<'_> {
        VariableResolver::new(self)
    }
}
