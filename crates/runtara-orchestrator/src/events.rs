// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle events exchanged between producers and queue consumers.
//!
//! Events serialize with a `type` discriminant so consumers can dispatch
//! before decoding the rest:
//!
//! ```json
//! {"type": "continue_process_from_task", "processInstanceId": "p1", "taskId": "t2"}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{OrchestratorError, Result};
use crate::signal::Signal;

/// Discriminant of a [`LifecycleEvent`], also the queue key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventType {
    /// See [`LifecycleEvent::StartProcess`].
    StartProcess,
    /// See [`LifecycleEvent::StartProcessInstance`].
    StartProcessInstance,
    /// See [`LifecycleEvent::ContinueProcessFromTask`].
    ContinueProcessFromTask,
    /// See [`LifecycleEvent::SignalProcess`].
    SignalProcess,
}

impl LifecycleEventType {
    /// Every event type.
    pub const ALL: [LifecycleEventType; 4] = [
        Self::StartProcess,
        Self::StartProcessInstance,
        Self::ContinueProcessFromTask,
        Self::SignalProcess,
    ];

    /// Wire name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartProcess => "start_process",
            Self::StartProcessInstance => "start_process_instance",
            Self::ContinueProcessFromTask => "continue_process_from_task",
            Self::SignalProcess => "signal_process",
        }
    }
}

impl fmt::Display for LifecycleEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process and task transitions published to partitioned queues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum LifecycleEvent {
    /// Create and start an instance of a process definition.
    StartProcess {
        /// Definition to instantiate.
        process_definition_id: String,
        /// Initial input.
        payload: Value,
    },
    /// Start an instance that has already been created.
    StartProcessInstance {
        /// Created instance.
        instance_id: String,
        /// Initial input.
        payload: Value,
    },
    /// Run the given task of an instance.
    ContinueProcessFromTask {
        /// Instance to advance.
        process_instance_id: String,
        /// Task the cursor now points at.
        task_id: String,
    },
    /// Deliver a signal to an instance.
    SignalProcess {
        /// Target instance.
        process_instance_id: String,
        /// Signal to deliver.
        signal: Signal,
    },
}

impl LifecycleEvent {
    /// Build a [`LifecycleEvent::StartProcess`].
    pub fn start_process(process_definition_id: impl Into<String>, payload: Value) -> Result<Self> {
        Self::StartProcess {
            process_definition_id: process_definition_id.into(),
            payload,
        }
        .validated()
    }

    /// Build a [`LifecycleEvent::StartProcessInstance`].
    pub fn start_process_instance(instance_id: impl Into<String>, payload: Value) -> Result<Self> {
        Self::StartProcessInstance {
            instance_id: instance_id.into(),
            payload,
        }
        .validated()
    }

    /// Build a [`LifecycleEvent::ContinueProcessFromTask`].
    pub fn continue_from_task(
        process_instance_id: impl Into<String>,
        task_id: impl Into<String>,
    ) -> Result<Self> {
        let task_id = task_id.into();
        if task_id.is_empty() {
            return Err(OrchestratorError::validation("taskId", "must not be empty"));
        }
        Self::ContinueProcessFromTask {
            process_instance_id: process_instance_id.into(),
            task_id,
        }
        .validated()
    }

    /// Build a [`LifecycleEvent::SignalProcess`].
    pub fn signal_process(process_instance_id: impl Into<String>, signal: Signal) -> Result<Self> {
        Self::SignalProcess {
            process_instance_id: process_instance_id.into(),
            signal,
        }
        .validated()
    }

    /// Discriminant of this event.
    pub fn event_type(&self) -> LifecycleEventType {
        match self {
            Self::StartProcess { .. } => LifecycleEventType::StartProcess,
            Self::StartProcessInstance { .. } => LifecycleEventType::StartProcessInstance,
            Self::ContinueProcessFromTask { .. } => LifecycleEventType::ContinueProcessFromTask,
            Self::SignalProcess { .. } => LifecycleEventType::SignalProcess,
        }
    }

    /// Value hashed to pick the queue partition.
    ///
    /// Instance-scoped events use the instance id so one instance's events
    /// stay ordered in a single queue.
    pub fn partition_key(&self) -> &str {
        match self {
            Self::StartProcess {
                process_definition_id,
                ..
            } => process_definition_id,
            Self::StartProcessInstance { instance_id, .. } => instance_id,
            Self::ContinueProcessFromTask {
                process_instance_id,
                ..
            }
            | Self::SignalProcess {
                process_instance_id,
                ..
            } => process_instance_id,
        }
    }

    /// Reject events without a partition key.
    pub fn validate(&self) -> Result<()> {
        if self.partition_key().is_empty() {
            return Err(OrchestratorError::validation(
                "partitionKey",
                format!("{} event has an empty partition key", self.event_type()),
            ));
        }
        Ok(())
    }

    fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_continue_event_wire_format() {
        let event = LifecycleEvent::continue_from_task("p1", "t2").unwrap();
        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(
            encoded,
            json!({
                "type": "continue_process_from_task",
                "processInstanceId": "p1",
                "taskId": "t2"
            })
        );

        let decoded: LifecycleEvent = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_event_types_match_tags() {
        let events = vec![
            LifecycleEvent::start_process("def-1", json!({})).unwrap(),
            LifecycleEvent::start_process_instance("i-1", json!({"a": 1})).unwrap(),
            LifecycleEvent::continue_from_task("i-1", "t1").unwrap(),
            LifecycleEvent::signal_process("i-1", Signal::resume()).unwrap(),
        ];

        for event in events {
            let encoded = serde_json::to_value(&event).unwrap();
            assert_eq!(encoded["type"], event.event_type().as_str());
        }
    }

    #[test]
    fn test_partition_keys() {
        let start = LifecycleEvent::start_process("def-1", json!(null)).unwrap();
        assert_eq!(start.partition_key(), "def-1");

        let launch = LifecycleEvent::start_process_instance("i-9", json!(null)).unwrap();
        assert_eq!(launch.partition_key(), "i-9");

        let signal = LifecycleEvent::signal_process("i-9", Signal::cancel("stop")).unwrap();
        assert_eq!(signal.partition_key(), "i-9");
    }

    #[test]
    fn test_empty_partition_key_rejected() {
        let err = LifecycleEvent::continue_from_task("", "t1").unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert!(LifecycleEvent::start_process("", json!(null)).is_err());
        assert!(LifecycleEvent::continue_from_task("p1", "").is_err());
    }

    #[test]
    fn test_decode_signal_event() {
        let decoded: LifecycleEvent = serde_json::from_value(json!({
            "type": "signal_process",
            "processInstanceId": "p1",
            "signal": {"type": "CANCEL", "details": {"reason": "user"}}
        }))
        .unwrap();

        match decoded {
            LifecycleEvent::SignalProcess { signal, .. } => assert!(signal.is_cancel()),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result: std::result::Result<LifecycleEvent, _> =
            serde_json::from_value(json!({"type": "pause_process", "processInstanceId": "p1"}));
        assert!(result.is_err());
    }
}
