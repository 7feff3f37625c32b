// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process variables and the per-instance variable container.
//!
//! Variable ids are derived, never assigned:
//!
//! ```text
//! {rootInstanceId}/{instanceId}/{taskId}/{variableTypeKey}
//! ```
//!
//! `rootInstanceId` falls back to the instance's own id for root instances,
//! so any worker can compute the durable key from (instance, task, type)
//! without a lookup.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OrchestratorError, Result};
use crate::instance::ProcessInstance;

/// Kind of data a task produced or consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariableType {
    /// Data handed to the task when it started.
    Input,
    /// Result produced by the task.
    Output,
    /// Intermediate state a long-running task persisted.
    State,
    /// Error details recorded when the task failed.
    Error,
}

impl VariableType {
    /// Key used in variable ids.
    pub fn key(&self) -> &'static str {
        match self {
            Self::Input => "INPUT",
            Self::Output => "OUTPUT",
            Self::State => "STATE",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for VariableType {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "INPUT" => Ok(Self::Input),
            "OUTPUT" => Ok(Self::Output),
            "STATE" => Ok(Self::State),
            "ERROR" => Ok(Self::Error),
            other => Err(OrchestratorError::validation(
                "type",
                format!("unknown variable type '{}'", other),
            )),
        }
    }
}

/// A (taskId, type) pair naming one variable within an instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableKey {
    /// Task that produced the variable.
    pub task_id: String,
    /// Kind of variable.
    #[serde(rename = "type")]
    pub variable_type: VariableType,
}

impl VariableKey {
    /// Create a key.
    pub fn new(task_id: impl Into<String>, variable_type: VariableType) -> Self {
        Self {
            task_id: task_id.into(),
            variable_type,
        }
    }

    /// Shorthand for the `OUTPUT` variable of a task.
    pub fn output(task_id: impl Into<String>) -> Self {
        Self::new(task_id, VariableType::Output)
    }
}

impl fmt::Display for VariableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.task_id, self.variable_type)
    }
}

/// One persisted piece of task data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessVariable {
    /// Derived id, see [`ProcessVariable::derive_id`].
    pub id: String,
    /// Instance that owns the variable (used for the per-instance index).
    pub process_instance_id: String,
    /// Task that produced the variable.
    pub task_id: String,
    /// Kind of variable.
    #[serde(rename = "type")]
    pub variable_type: VariableType,
    /// Opaque structured value.
    pub payload: Value,
}

impl ProcessVariable {
    /// Create a variable owned by `instance`, deriving its id.
    ///
    /// Rejects an empty task id.
    pub fn new(
        instance: &ProcessInstance,
        task_id: impl Into<String>,
        variable_type: VariableType,
        payload: Value,
    ) -> Result<Self> {
        let task_id = task_id.into();
        if task_id.is_empty() {
            return Err(OrchestratorError::validation("taskId", "must not be empty"));
        }

        Ok(Self {
            id: Self::id_for(instance, &task_id, variable_type),
            process_instance_id: instance.id.clone(),
            task_id,
            variable_type,
            payload,
        })
    }

    /// Derive a variable id from its parts.
    ///
    /// `root_instance_id` of `None` (or empty) means `instance_id` is itself the root.
    pub fn derive_id(
        root_instance_id: Option<&str>,
        instance_id: &str,
        task_id: &str,
        variable_type: VariableType,
    ) -> String {
        let root = root_instance_id
            .filter(|root| !root.is_empty())
            .unwrap_or(instance_id);
        format!(
            "{}/{}/{}/{}",
            root,
            instance_id,
            task_id,
            variable_type.key()
        )
    }

    /// Derive the id a variable of `instance` would have.
    pub fn id_for(instance: &ProcessInstance, task_id: &str, variable_type: VariableType) -> String {
        Self::derive_id(
            instance.root_id.as_deref(),
            &instance.id,
            task_id,
            variable_type,
        )
    }

    /// The (taskId, type) key of this variable.
    pub fn key(&self) -> VariableKey {
        VariableKey::new(self.task_id.clone(), self.variable_type)
    }
}

/// In-memory variables of one instance, keyed by (taskId, type).
///
/// Not persisted with the instance record: it is filled from the variable
/// store on demand by the resolver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableContainer {
    values: HashMap<VariableKey, Value>,
}

impl VariableContainer {
    /// Create an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a payload.
    pub fn get(&self, task_id: &str, variable_type: VariableType) -> Option<&Value> {
        self.values
            .get(&VariableKey::new(task_id, variable_type))
    }

    /// Look up a payload by key.
    pub fn get_key(&self, key: &VariableKey) -> Option<&Value> {
        self.values.get(key)
    }

    /// Whether a payload is present for `key`.
    pub fn contains(&self, key: &VariableKey) -> bool {
        self.values.contains_key(key)
    }

    /// Insert or overwrite a payload, returning the previous one.
    pub fn put(
        &mut self,
        task_id: impl Into<String>,
        variable_type: VariableType,
        payload: Value,
    ) -> Option<Value> {
        self.values
            .insert(VariableKey::new(task_id, variable_type), payload)
    }

    /// Restore a persisted variable into the container.
    pub fn restore(&mut self, variable: ProcessVariable) {
        self.values
            .insert(VariableKey::new(variable.task_id, variable.variable_type), variable.payload);
    }

    /// Remove a payload.
    pub fn remove(&mut self, key: &VariableKey) -> Option<Value> {
        self.values.remove(key)
    }

    /// Keys from `dependencies` that are not present, in input order, deduplicated.
    pub fn missing<'a>(&self, dependencies: impl IntoIterator<Item = &'a VariableKey>) -> Vec<VariableKey> {
        let mut missing: Vec<VariableKey> = Vec::new();
        for key in dependencies {
            if !self.contains(key) && !missing.contains(key) {
                missing.push(key.clone());
            }
        }
        missing
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&VariableKey, &Value)> {
        self.values.iter()
    }

    /// Number of payloads.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the container is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drop every payload.
    pub fn clear(&mut self) {
        self.values.clear();
    }
}
