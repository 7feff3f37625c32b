// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Durable repository of process variables.
//!
//! Each variable is stored under its derived id. A secondary set at
//! `byInstance/{processInstanceId}` lists the ids an instance owns. The
//! index is written after the variables and is only an enumeration aid:
//! a crash in between leaves the variable readable by id but unlisted.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::error::Result;
use crate::instance::ProcessInstance;
use crate::store::StateStore;
use crate::variable::ProcessVariable;

const INDEX_KEY_PREFIX: &str = "byInstance/";

/// Repository of [`ProcessVariable`] records over a [`StateStore`].
#[derive(Clone)]
pub struct VariableStore {
    store: Arc<dyn StateStore>,
}

impl VariableStore {
    /// Create a repository over `store`.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Key of the per-instance index set.
    pub fn index_key(process_instance_id: &str) -> String {
        format!("{}{}", INDEX_KEY_PREFIX, process_instance_id)
    }

    /// Upsert one variable and index it.
    #[instrument(skip(self, variable), fields(variable_id = %variable.id))]
    pub async fn save(&self, variable: &ProcessVariable) -> Result<()> {
        let bytes = serde_json::to_vec(variable)?;
        self.store.put(&variable.id, &bytes).await?;
        self.store
            .set_add(
                &Self::index_key(&variable.process_instance_id),
                std::slice::from_ref(&variable.id),
            )
            .await?;
        Ok(())
    }

    /// Upsert several variables in one write, then index them per instance.
    #[instrument(skip(self, variables), fields(count = variables.len()))]
    pub async fn save_many(&self, variables: &[ProcessVariable]) -> Result<()> {
        if variables.is_empty() {
            return Ok(());
        }

        let mut entries = Vec::with_capacity(variables.len());
        let mut by_instance: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for variable in variables {
            entries.push((variable.id.clone(), serde_json::to_vec(variable)?));
            by_instance
                .entry(variable.process_instance_id.as_str())
                .or_default()
                .push(variable.id.clone());
        }

        self.store.put_many(&entries).await?;
        for (instance_id, ids) in by_instance {
            self.store.set_add(&Self::index_key(instance_id), &ids).await?;
        }

        debug!("Variables saved");
        Ok(())
    }

    /// Bulk point lookup. Missing ids are absent from the result.
    pub async fn find_by_ids(&self, ids: &[String]) -> Result<HashMap<String, ProcessVariable>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let raw = self.store.get_many(ids).await?;
        let mut found = HashMap::with_capacity(raw.len());
        for (id, bytes) in raw {
            let variable: ProcessVariable = serde_json::from_slice(&bytes)?;
            found.insert(id, variable);
        }
        Ok(found)
    }

    /// Every indexed variable of `instance`, ordered by id.
    #[instrument(skip(self, instance), fields(instance_id = %instance.id))]
    pub async fn find_variables_for_instance(
        &self,
        instance: &ProcessInstance,
    ) -> Result<Vec<ProcessVariable>> {
        let ids = self.store.set_members(&Self::index_key(&instance.id)).await?;
        let mut found = self.find_by_ids(&ids).await?;

        // Index entries whose record is gone are skipped
        let variables: Vec<ProcessVariable> =
            ids.iter().filter_map(|id| found.remove(id)).collect();
        debug!(indexed = ids.len(), loaded = variables.len(), "Loaded instance variables");
        Ok(variables)
    }
}
