// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Signals sent to waiting tasks and the outcome of a task execution.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Signal tag that resumes a suspended task.
pub const SIGNAL_RESUME: &str = "RESUME";

/// Signal tag that requests cancellation.
pub const SIGNAL_CANCEL: &str = "CANCEL";

/// External stimulus delivered to a waiting task.
///
/// The tag is engine-defined and left open; [`SIGNAL_RESUME`] and
/// [`SIGNAL_CANCEL`] are the ones this crate knows about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Signal tag, e.g. `RESUME` or `CANCEL`.
    #[serde(rename = "type")]
    pub signal_type: String,
    /// Opaque signal payload.
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl Signal {
    /// Create a signal with an arbitrary tag and no details.
    pub fn new(signal_type: impl Into<String>) -> Self {
        Self {
            signal_type: signal_type.into(),
            details: Map::new(),
        }
    }

    /// A `RESUME` signal.
    pub fn resume() -> Self {
        Self::new(SIGNAL_RESUME)
    }

    /// A `CANCEL` signal carrying the reason under `details.reason`.
    pub fn cancel(reason: impl Into<String>) -> Self {
        Self::new(SIGNAL_CANCEL).with_detail("reason", Value::String(reason.into()))
    }

    /// Add one detail entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    /// Whether this is a cancellation request.
    pub fn is_cancel(&self) -> bool {
        self.signal_type == SIGNAL_CANCEL
    }
}

/// Kind of task outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionType {
    /// The task finished normally.
    Success,
    /// The task failed.
    Failure,
    /// The task asked for the whole instance to stop.
    Terminated,
}

/// Outcome of one task execution. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionSignal {
    #[serde(rename = "type")]
    completion_type: CompletionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    details: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl CompletionSignal {
    /// Successful completion without details.
    pub fn success() -> Self {
        Self {
            completion_type: CompletionType::Success,
            details: None,
            reason: None,
        }
    }

    /// Successful completion with details.
    pub fn success_with(details: Map<String, Value>) -> Self {
        Self {
            completion_type: CompletionType::Success,
            details: Some(details),
            reason: None,
        }
    }

    /// Failed completion.
    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            completion_type: CompletionType::Failure,
            details: None,
            reason: Some(reason.into()),
        }
    }

    /// Failed completion with details.
    pub fn failure_with(reason: impl Into<String>, details: Map<String, Value>) -> Self {
        Self {
            completion_type: CompletionType::Failure,
            details: Some(details),
            reason: Some(reason.into()),
        }
    }

    /// The task stopped the instance.
    pub fn terminated(reason: impl Into<String>) -> Self {
        Self {
            completion_type: CompletionType::Terminated,
            details: None,
            reason: Some(reason.into()),
        }
    }

    /// Kind of outcome.
    pub fn completion_type(&self) -> CompletionType {
        self.completion_type
    }

    /// Outcome details, if any.
    pub fn details(&self) -> Option<&Map<String, Value>> {
        self.details.as_ref()
    }

    /// Failure or termination reason, if any.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Whether the task succeeded.
    pub fn is_success(&self) -> bool {
        self.completion_type == CompletionType::Success
    }
}
