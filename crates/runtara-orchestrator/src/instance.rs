// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process instances and their status state machine.
//!
//! ```text
//!                     ┌─────────┐
//!                     │ PENDING │──────────────────────┐
//!                     └────┬────┘                      │
//!                          │ begin                     │
//!                          ▼                           │
//!       advance ┌────► ┌─────────┐                     │ cancel
//!               └───── │ RUNNING │ ◄──────┐            │
//!                      └────┬────┘        │ resume     │
//!                           │ wait        │            │
//!                           ▼             │            │
//!                      ┌───────────┐      │            │
//!                      │ SUSPENDED │──────┘            │
//!                      └───────────┘                   │
//!                                                      ▼
//!   RUNNING / SUSPENDED ──► COMPLETED | FAILED | TERMINATED | CANCELLED
//! ```
//!
//! Terminal statuses never transition again.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};
use crate::events::LifecycleEvent;
use crate::variable::VariableContainer;

/// Lifecycle status of a process instance. Drives compare-and-swap saves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Created but not started.
    #[default]
    Pending,
    /// A task is executing or about to.
    Running,
    /// Waiting on a signal or a child.
    Suspended,
    /// Finished successfully.
    Completed,
    /// Finished with a task failure.
    Failed,
    /// Stopped early by a terminating task.
    Terminated,
    /// Cancelled by signal.
    Cancelled,
}

impl InstanceStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Terminated | Self::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// `Running -> Running` is legal: it is how the cursor advances.
    pub fn can_transition_to(&self, next: InstanceStatus) -> bool {
        use InstanceStatus::*;
        match self {
            Pending => matches!(next, Running | Cancelled),
            Running => matches!(
                next,
                Running | Suspended | Completed | Failed | Terminated | Cancelled
            ),
            Suspended => matches!(next, Running | Failed | Terminated | Cancelled),
            Completed | Failed | Terminated | Cancelled => false,
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "suspended" => Ok(Self::Suspended),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "terminated" => Ok(Self::Terminated),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(OrchestratorError::validation(
                "status",
                format!("unknown instance status '{}'", other),
            )),
        }
    }
}

/// One execution of a process definition.
///
/// A root instance has no `root_id` and no `parent_id`. A child's `root_id`
/// always names the top-most ancestor, never the child itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInstance {
    /// Unique instance id.
    pub id: String,
    /// Top-most ancestor, `None` for root instances.
    #[serde(default)]
    pub root_id: Option<String>,
    /// Spawning instance, `None` for root instances.
    #[serde(default)]
    pub parent_id: Option<String>,

    /// Process definition this instance executes.
    pub process_id: String,
    /// Snapshot of the definition taken at launch.
    #[serde(default)]
    pub process_snapshot_id: Option<String>,
    /// Version of the definition.
    #[serde(default)]
    pub process_version: Option<i32>,
    /// Execution strategy named by the definition (opaque to the core).
    #[serde(default)]
    pub execution_strategy: Option<String>,
    /// Whether this child runs in parallel with its parent and siblings
    /// (fan-out) rather than as a strictly sequential sub-process.
    #[serde(default)]
    pub concurrent: bool,

    /// Task currently executing.
    #[serde(default)]
    pub curr_task_id: Option<String>,
    /// Task that executed before the current one.
    #[serde(default)]
    pub prev_task_id: Option<String>,
    /// Optional early-stop marker.
    #[serde(default)]
    pub terminate_at_task_id: Option<String>,

    /// When the instance started running.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// When the instance reached a terminal status.
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// When the current task started.
    #[serde(default)]
    pub current_task_start_time: Option<DateTime<Utc>>,
    /// When the current task was last signalled.
    #[serde(default)]
    pub current_task_signal_time: Option<DateTime<Utc>>,
    /// When the current task finished.
    #[serde(default)]
    pub current_task_end_time: Option<DateTime<Utc>>,

    /// Lifecycle status.
    pub status: InstanceStatus,
    /// Revision counter bumped by every successful save.
    #[serde(default)]
    pub version: u64,
    /// Event committed with this revision but not yet acknowledged by the
    /// queue. Cleared once the append succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbox: Option<LifecycleEvent>,

    /// In-memory variables. Never part of the persisted record.
    #[serde(skip)]
    pub variables: VariableContainer,
}

impl ProcessInstance {
    /// Create a pending root instance with a fresh id.
    pub fn new_root(process_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            root_id: None,
            parent_id: None,
            process_id: process_id.into(),
            process_snapshot_id: None,
            process_version: None,
            execution_strategy: None,
            concurrent: false,
            curr_task_id: None,
            prev_task_id: None,
            terminate_at_task_id: None,
            start_time: None,
            end_time: None,
            current_task_start_time: None,
            current_task_signal_time: None,
            current_task_end_time: None,
            status: InstanceStatus::Pending,
            version: 0,
            outbox: None,
            variables: VariableContainer::new(),
        }
    }

    /// Create a pending child of `parent` with a fresh id.
    ///
    /// `concurrent` marks a fan-out child that resolves missing variables
    /// from its ancestors.
    pub fn child_of(parent: &ProcessInstance, process_id: impl Into<String>, concurrent: bool) -> Self {
        let mut child = Self::new_root(process_id);
        child.root_id = Some(parent.root_instance_id().to_string());
        child.parent_id = Some(parent.id.clone());
        child.concurrent = concurrent;
        child
    }

    /// Replace the generated id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Bind the definition snapshot.
    pub fn with_snapshot(mut self, snapshot_id: impl Into<String>) -> Self {
        self.process_snapshot_id = Some(snapshot_id.into());
        self
    }

    /// Bind the definition version.
    pub fn with_version(mut self, version: i32) -> Self {
        self.process_version = Some(version);
        self
    }

    /// Bind the execution strategy.
    pub fn with_execution_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.execution_strategy = Some(strategy.into());
        self
    }

    /// Stop the instance once `task_id` completes.
    pub fn with_terminate_at(mut self, task_id: impl Into<String>) -> Self {
        self.terminate_at_task_id = Some(task_id.into());
        self
    }

    /// Whether this instance has no ancestors. Empty root ids count as absent.
    pub fn is_root(&self) -> bool {
        self.root_id.as_deref().is_none_or(str::is_empty)
    }

    /// Id of the top-most ancestor, or this instance's id if it is the root.
    pub fn root_instance_id(&self) -> &str {
        self.root_id
            .as_deref()
            .filter(|root| !root.is_empty())
            .unwrap_or(&self.id)
    }

    /// Whether this is a fan-out child that may read ancestor variables.
    pub fn is_concurrent_child(&self) -> bool {
        self.concurrent && self.parent_id.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// Check the root/parent invariants of the record.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(OrchestratorError::validation("id", "must not be empty"));
        }
        if self.process_id.is_empty() {
            return Err(OrchestratorError::validation("processId", "must not be empty"));
        }
        if self.root_id.as_deref() == Some(self.id.as_str()) {
            return Err(OrchestratorError::validation(
                "rootId",
                "must name an ancestor, not the instance itself",
            ));
        }
        let has_parent = self.parent_id.as_deref().is_some_and(|p| !p.is_empty());
        if has_parent == self.is_root() {
            return Err(OrchestratorError::validation(
                "parentId",
                "root instances have no parent and children have a root",
            ));
        }
        Ok(())
    }

    /// Move from `Pending` to `Running`.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(InstanceStatus::Running)?;
        self.start_time = Some(now);
        Ok(())
    }

    /// Point the cursor at `task_id`.
    ///
    /// The previous current task becomes `prev_task_id` and the three
    /// current-task timestamps are reset, with the start time stamped `now`.
    pub fn advance_to(&mut self, task_id: impl Into<String>, now: DateTime<Utc>) {
        self.prev_task_id = self.curr_task_id.take();
        self.curr_task_id = Some(task_id.into());
        self.current_task_start_time = Some(now);
        self.current_task_signal_time = None;
        self.current_task_end_time = None;
    }

    /// Record that the current task received a signal.
    pub fn mark_signalled(&mut self, now: DateTime<Utc>) {
        self.current_task_signal_time = Some(now);
    }

    /// Move to a terminal `status`, stamping end times.
    pub fn finish(&mut self, status: InstanceStatus, now: DateTime<Utc>) -> Result<()> {
        if !status.is_terminal() {
            return Err(OrchestratorError::validation(
                "status",
                format!("'{}' is not a terminal status", status),
            ));
        }
        self.transition(status)?;
        self.end_time = Some(now);
        self.current_task_end_time = Some(now);
        Ok(())
    }

    /// Whether the instance should stop after `task_id` completes.
    pub fn terminates_at(&self, task_id: &str) -> bool {
        self.terminate_at_task_id.as_deref() == Some(task_id)
    }

    /// Change status, rejecting illegal transitions.
    pub fn transition(&mut self, next: InstanceStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(OrchestratorError::InvalidInstanceState {
                instance_id: self.id.clone(),
                expected: format!("a status that can move to '{}'", next),
                actual: self.status.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::variable::VariableType;

    #[test]
    fn test_new_root_is_root() {
        let root = ProcessInstance::new_root("order-process");
        assert!(root.is_root());
        assert_eq!(root.root_instance_id(), root.id);
        assert!(!root.is_concurrent_child());
        assert_eq!(root.status, InstanceStatus::Pending);
        assert!(root.validate().is_ok());
    }

    #[test]
    fn test_child_root_resolves_to_top_ancestor() {
        let root = ProcessInstance::new_root("p").with_id("root-1");
        let child = ProcessInstance::child_of(&root, "p-child", true);
        let grandchild = ProcessInstance::child_of(&child, "p-grandchild", false);

        assert_eq!(child.root_id.as_deref(), Some("root-1"));
        assert_eq!(child.parent_id.as_deref(), Some("root-1"));
        assert!(child.is_concurrent_child());

        assert_eq!(grandchild.root_id.as_deref(), Some("root-1"));
        assert_eq!(grandchild.parent_id.as_deref(), Some(child.id.as_str()));
        assert!(!grandchild.is_concurrent_child());

        assert!(child.validate().is_ok());
        assert!(grandchild.validate().is_ok());
    }

    #[test]
    fn test_empty_root_id_counts_as_root() {
        let mut instance = ProcessInstance::new_root("p").with_id("i-1");
        instance.root_id = Some(String::new());
        assert!(instance.is_root());
        assert_eq!(instance.root_instance_id(), "i-1");
    }

    #[test]
    fn test_validate_rejects_self_root() {
        let mut instance = ProcessInstance::new_root("p").with_id("i-1");
        instance.root_id = Some("i-1".to_string());
        instance.parent_id = Some("i-0".to_string());
        assert!(instance.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_parent_without_root() {
        let mut instance = ProcessInstance::new_root("p");
        instance.parent_id = Some("parent".to_string());
        assert!(instance.validate().is_err());
    }

    #[test]
    fn test_advance_resets_task_timestamps() {
        let mut instance = ProcessInstance::new_root("p");
        let t0 = Utc::now();
        instance.start(t0).unwrap();

        instance.advance_to("t1", t0);
        instance.mark_signalled(t0);
        instance.current_task_end_time = Some(t0);

        let t1 = t0 + chrono::Duration::seconds(5);
        instance.advance_to("t2", t1);

        assert_eq!(instance.prev_task_id.as_deref(), Some("t1"));
        assert_eq!(instance.curr_task_id.as_deref(), Some("t2"));
        assert_eq!(instance.current_task_start_time, Some(t1));
        assert!(instance.current_task_signal_time.is_none());
        assert!(instance.current_task_end_time.is_none());
    }

    #[test]
    fn test_finish_requires_terminal_status() {
        let mut instance = ProcessInstance::new_root("p");
        instance.start(Utc::now()).unwrap();

        assert!(instance.finish(InstanceStatus::Suspended, Utc::now()).is_err());

        let now = Utc::now();
        instance.finish(InstanceStatus::Completed, now).unwrap();
        assert_eq!(instance.status, InstanceStatus::Completed);
        assert_eq!(instance.end_time, Some(now));
        assert_eq!(instance.current_task_end_time, Some(now));

        // Terminal statuses never move again
        let err = instance.finish(InstanceStatus::Failed, now).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INSTANCE_STATE");
    }

    #[test]
    fn test_status_transitions() {
        use InstanceStatus::*;

        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));

        assert!(Running.can_transition_to(Running));
        assert!(Running.can_transition_to(Suspended));
        assert!(Running.can_transition_to(Terminated));
        assert!(!Running.can_transition_to(Pending));

        assert!(Suspended.can_transition_to(Running));
        assert!(!Suspended.can_transition_to(Completed));

        for terminal in [Completed, Failed, Terminated, Cancelled] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(Running));
        }
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            InstanceStatus::Pending,
            InstanceStatus::Running,
            InstanceStatus::Suspended,
            InstanceStatus::Completed,
            InstanceStatus::Failed,
            InstanceStatus::Terminated,
            InstanceStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<InstanceStatus>().unwrap(), status);
        }
        assert!("RUNNING".parse::<InstanceStatus>().is_err());
    }

    #[test]
    fn test_serialization_skips_variables() {
        let mut instance = ProcessInstance::new_root("p").with_id("root-1").with_version(3);
        instance
            .variables
            .put("t1", VariableType::Output, json!({"x": 1}));

        let encoded = serde_json::to_value(&instance).unwrap();
        assert_eq!(encoded["id"], "root-1");
        assert_eq!(encoded["processId"], "p");
        assert_eq!(encoded["processVersion"], 3);
        assert_eq!(encoded["status"], "pending");
        assert!(encoded.get("variables").is_none());

        let decoded: ProcessInstance = serde_json::from_value(encoded).unwrap();
        assert!(decoded.variables.is_empty());
        assert_eq!(decoded.id, "root-1");
    }

    #[test]
    fn test_deserialize_minimal_record() {
        let decoded: ProcessInstance = serde_json::from_value(json!({
            "id": "p1",
            "processId": "proc",
            "status": "running",
            "currTaskId": "t2"
        }))
        .unwrap();

        assert_eq!(decoded.status, InstanceStatus::Running);
        assert_eq!(decoded.curr_task_id.as_deref(), Some("t2"));
        assert_eq!(decoded.version, 0);
        assert!(decoded.is_root());
    }
}
