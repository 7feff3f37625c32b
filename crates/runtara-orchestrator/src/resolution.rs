// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Hierarchical variable resolution.
//!
//! A concurrent child does not copy the variables its ancestors produced.
//! When it needs one, the resolver looks in the child's own container, then
//! in durable storage under the child's id, then walks up the parent chain
//! for as long as each step is a concurrent child:
//!
//! ```text
//!   child container ──miss──► store(child ids) ──miss──► store(parent ids) ──► ...
//!         ▲                          │                          │
//!         └──────── restore ─────────┴──────────────────────────┘
//! ```
//!
//! Ancestors are only read as transient scopes (id, root, parent, flag).
//! Everything found is restored into the original instance's container.

use std::collections::HashSet;

use tracing::{debug, instrument, warn};

use crate::error::Result;
use crate::instance::ProcessInstance;
use crate::instance_store::ProcessInstanceStore;
use crate::services::ProcessServices;
use crate::variable::{ProcessVariable, VariableKey};
use crate::variable_store::VariableStore;

/// The identity fields of one instance in the ancestor chain.
#[derive(Debug)]
struct Scope {
    id: String,
    root_id: Option<String>,
    parent_id: Option<String>,
    concurrent: bool,
}

impl Scope {
    fn of(instance: &ProcessInstance) -> Self {
        Self {
            id: instance.id.clone(),
            root_id: instance.root_id.clone(),
            parent_id: instance.parent_id.clone(),
            concurrent: instance.concurrent,
        }
    }

    /// Parent to continue with, if this scope may read from it.
    fn next_parent(&self) -> Option<&str> {
        if !self.concurrent {
            return None;
        }
        self.parent_id.as_deref().filter(|parent| !parent.is_empty())
    }

    fn variable_id(&self, key: &VariableKey) -> String {
        ProcessVariable::derive_id(
            self.root_id.as_deref(),
            &self.id,
            &key.task_id,
            key.variable_type,
        )
    }
}

/// Fills an instance's variable container from durable storage.
pub struct VariableResolver<'a> {
    instances: &'a ProcessInstanceStore,
    variables: &'a VariableStore,
}

impl<'a> VariableResolver<'a> {
    /// Create a resolver borrowing the repositories of `services`.
    pub fn new(services: &'a ProcessServices) -> Self {
        Self::with_stores(services.instances(), services.variables())
    }

    /// Create a resolver over explicit repositories.
    pub fn with_stores(instances: &'a ProcessInstanceStore, variables: &'a VariableStore) -> Self {
        Self {
            instances,
            variables,
        }
    }

    /// Make every dependency present in `instance.variables` or provably absent.
    ///
    /// Returns the dependencies that are still missing after checking the
    /// instance and every concurrent ancestor up to the root. When all of
    /// them are already in the container, no store call is made. A parent
    /// that cannot be loaded ends the walk without an error.
    #[instrument(skip(self, instance, dependencies), fields(instance_id = %instance.id))]
    pub async fn resolve(
        &self,
        instance: &mut ProcessInstance,
        dependencies: &[VariableKey],
    ) -> Result<Vec<VariableKey>> {
        let mut missing = instance.variables.missing(dependencies);
        if missing.is_empty() {
            debug!("All dependencies already in container");
            return Ok(missing);
        }

        let mut scope = Scope::of(instance);
        let mut visited: HashSet<String> = HashSet::new();

        loop {
            visited.insert(scope.id.clone());

            let ids: Vec<String> = missing.iter().map(|key| scope.variable_id(key)).collect();
            let mut found = self.variables.find_by_ids(&ids).await?;

            let mut still_missing = Vec::with_capacity(missing.len());
            for (key, id) in missing.into_iter().zip(ids) {
                match found.remove(&id) {
                    Some(variable) => instance.variables.restore(variable),
                    None => still_missing.push(key),
                }
            }
            missing = still_missing;

            debug!(
                scope = %scope.id,
                remaining = missing.len(),
                "Resolved variables from scope"
            );

            if missing.is_empty() {
                break;
            }

            let Some(parent_id) = scope.next_parent().map(str::to_string) else {
                break;
            };

            if visited.contains(&parent_id) {
                warn!(
                    scope = %scope.id,
                    parent_id = %parent_id,
                    "Parent chain loops back on itself, stopping resolution"
                );
                break;
            }

            match self.instances.find_by_id(&parent_id).await? {
                Some(parent) => scope = Scope::of(&parent),
                None => {
                    warn!(
                        scope = %scope.id,
                        parent_id = %parent_id,
                        unresolved = missing.len(),
                        "Parent instance not found, dependencies stay unresolved"
                    );
                    break;
                }
            }
        }

        Ok(missing)
    }

    /// Restore every variable indexed for `instance` into its container.
    ///
    /// Returns the number of variables restored.
    pub async fn hydrate(&self, instance: &mut ProcessInstance) -> Result<usize> {
        let variables = self.variables.find_variables_for_instance(instance).await?;
        let count = variables.len();
        for variable in variables {
            instance.variables.restore(variable);
        }
        Ok(count)
    }

    /// Persist variables produced by `instance` and merge them into its container.
    pub async fn record(
        &self,
        instance: &mut ProcessInstance,
        variables: Vec<ProcessVariable>,
    ) -> Result<()> {
        self.variables.save_many(&variables).await?;
        for variable in variables {
            instance.variables.restore(variable);
        }
        Ok(())
    }
}
