// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Task completion flow: persist variables, advance the instance, emit.
//!
//! ```text
//! complete_task
//!   │
//!   ├─► record outputs ───────────► VariableStore (+ container)
//!   │
//!   ├─► CAS save (status, version) ─► ProcessInstanceStore
//!   │       └── conflict: re-read, re-check, retry (bounded)
//!   │
//!   └─► emit continue event ────────► ExecutionLifecycleManager
//! ```
//!
//! Variables are written before the CAS, and the continuation event after
//! it, so a consumer picking up the event always finds what it depends on.
//! A worker that loses the CAS never emits.
//!
//! The event is committed together with the instance in its `outbox` and
//! cleared once the queue append succeeds. If the append fails the state
//! change stays committed, and repeating the same call publishes the
//! outbox again instead of reporting the request as stale.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::config::{Config, DEFAULT_MAX_ADVANCE_ATTEMPTS};
use crate::error::{OrchestratorError, Result};
use crate::events::LifecycleEvent;
use crate::instance::{InstanceStatus, ProcessInstance};
use crate::services::ProcessServices;
use crate::signal::{CompletionSignal, CompletionType, Signal};
use crate::variable::{ProcessVariable, VariableType};

/// Result of trying to move an instance forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The cursor moved and a continuation event was queued.
    Advanced {
        /// Task the cursor now points at.
        task_id: String,
        /// Queue the continuation event went to.
        queue_key: String,
    },
    /// The instance reached a terminal status. No event is emitted.
    Finished {
        /// Terminal status written.
        status: InstanceStatus,
    },
    /// The request no longer matches the stored instance. Nothing was written.
    Stale,
    /// Every attempt lost the compare-and-swap.
    Conflict,
}

/// What a winning save should be followed by.
enum Plan {
    Continue(String),
    Finish(InstanceStatus),
}

/// Drives instances through their lifecycle on top of [`ProcessServices`].
#[derive(Debug, Clone)]
pub struct ExecutionCoordinator {
    services: Arc<ProcessServices>,
    max_advance_attempts: u32,
}

impl ExecutionCoordinator {
    /// Create a coordinator with the default attempt bound.
    pub fn new(services: Arc<ProcessServices>) -> Self {
        Self {
            services,
            max_advance_attempts: DEFAULT_MAX_ADVANCE_ATTEMPTS,
        }
    }

    /// Connect to the configured store and bound the loop by `max_advance_attempts`.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let services = ProcessServices::from_config(config).await?;
        Ok(Self::new(Arc::new(services)).with_max_advance_attempts(config.max_advance_attempts))
    }

    /// Bound the compare-and-swap loop. Zero is treated as one attempt.
    pub fn with_max_advance_attempts(mut self, attempts: u32) -> Self {
        self.max_advance_attempts = attempts.max(1);
        self
    }

    /// The services this coordinator runs on.
    pub fn services(&self) -> &Arc<ProcessServices> {
        &self.services
    }

    /// Queue a request to instantiate `definition_id`.
    pub async fn start_process(&self, definition_id: &str, payload: Value) -> Result<String> {
        let event = LifecycleEvent::start_process(definition_id, payload)?;
        self.services.lifecycle().publish(&event).await
    }

    /// Store a new pending instance and queue its start.
    ///
    /// Returns `false`, emitting nothing, if the instance already exists and
    /// its start has been queued.
    #[instrument(skip(self, instance, payload), fields(instance_id = %instance.id))]
    pub async fn launch_instance(&self, instance: &ProcessInstance, payload: Value) -> Result<bool> {
        if instance.status != InstanceStatus::Pending {
            return Err(OrchestratorError::InvalidInstanceState {
                instance_id: instance.id.clone(),
                expected: InstanceStatus::Pending.to_string(),
                actual: instance.status.to_string(),
            });
        }

        let mut record = instance.clone();
        record.outbox = Some(LifecycleEvent::start_process_instance(&instance.id, payload)?);

        if !self.services.instances().insert(&record).await? {
            record = self.services.instances().get_by_id(&instance.id).await?;
            if record.status != InstanceStatus::Pending || record.outbox.is_none() {
                debug!("Instance already exists, not launching");
                return Ok(false);
            }
            debug!("Re-publishing start of an unannounced instance");
        }

        self.flush_outbox(&mut record).await?;
        info!(process_id = %record.process_id, "Instance launched");
        Ok(true)
    }

    /// Move a pending instance to running with the cursor at `first_task`.
    #[instrument(skip(self))]
    pub async fn begin_instance(&self, instance_id: &str, first_task: &str) -> Result<AdvanceOutcome> {
        for attempt in 1..=self.max_advance_attempts {
            let mut instance = self.services.instances().get_by_id(instance_id).await?;
            if instance.status != InstanceStatus::Pending {
                if awaits_continuation(&instance, first_task) {
                    debug!("Re-publishing unannounced first task");
                    return self.announce(&mut instance, first_task).await;
                }
                debug!(status = %instance.status, "Instance already begun");
                return Ok(AdvanceOutcome::Stale);
            }

            let now = Utc::now();
            instance.start(now)?;
            instance.advance_to(first_task, now);
            instance.outbox = Some(LifecycleEvent::continue_from_task(instance_id, first_task)?);

            if self
                .services
                .instances()
                .save(&mut instance, InstanceStatus::Pending)
                .await?
            {
                info!(task_id = %first_task, "Instance started");
                return self.announce(&mut instance, first_task).await;
            }
            debug!(attempt, "Begin lost the compare-and-swap");
        }

        warn!(
            attempts = self.max_advance_attempts,
            "Gave up beginning contended instance"
        );
        Ok(AdvanceOutcome::Conflict)
    }

    /// Apply the outcome of `task_id` to its instance.
    ///
    /// Outputs are recorded as variables of the task before the instance is
    /// saved. On success the cursor moves to `next_task`, or the instance
    /// completes when there is none or the task is the early-stop marker.
    /// Failure and termination end the instance. A completion for a task
    /// that is no longer current, or for a finished instance, is `Stale`.
    #[instrument(skip(self, completion, outputs), fields(kind = ?completion.completion_type()))]
    pub async fn complete_task(
        &self,
        instance_id: &str,
        task_id: &str,
        completion: &CompletionSignal,
        outputs: Vec<(VariableType, Value)>,
        next_task: Option<&str>,
    ) -> Result<AdvanceOutcome> {
        let mut instance = self.services.instances().get_by_id(instance_id).await?;
        if is_stale(&instance, task_id) {
            let repeated = next_task.filter(|next| {
                completion.is_success()
                    && instance.prev_task_id.as_deref() == Some(task_id)
                    && awaits_continuation(&instance, next)
            });
            if let Some(next) = repeated {
                debug!(next_task = %next, "Re-publishing unannounced continuation");
                return self.announce(&mut instance, next).await;
            }
            debug!(status = %instance.status, "Stale task completion");
            return Ok(AdvanceOutcome::Stale);
        }

        if !outputs.is_empty() {
            let variables = outputs
                .into_iter()
                .map(|(variable_type, payload)| {
                    ProcessVariable::new(&instance, task_id, variable_type, payload)
                })
                .collect::<Result<Vec<_>>>()?;
            self.services
                .resolver()
                .record(&mut instance, variables)
                .await?;
        }

        let mut attempt = 1;
        loop {
            let expected = instance.status;
            let plan = apply_completion(&mut instance, task_id, completion, next_task, Utc::now())?;

            if self.services.instances().save(&mut instance, expected).await? {
                return self.after_save(&mut instance, plan).await;
            }

            if attempt >= self.max_advance_attempts {
                warn!(
                    attempts = attempt,
                    "Gave up advancing contended instance"
                );
                return Ok(AdvanceOutcome::Conflict);
            }
            attempt += 1;
            debug!(attempt, "Advance lost the compare-and-swap, re-reading");

            instance = self.services.instances().get_by_id(instance_id).await?;
            if is_stale(&instance, task_id) {
                debug!(status = %instance.status, "Task completed by another worker");
                return Ok(AdvanceOutcome::Stale);
            }
        }
    }

    /// Queue `signal` for a live instance.
    ///
    /// The signal time of the current task is stamped before the event is
    /// queued. If every attempt to stamp it loses the compare-and-swap the
    /// signal is still queued.
    #[instrument(skip(self, signal), fields(signal_type = %signal.signal_type))]
    pub async fn signal(&self, instance_id: &str, signal: Signal) -> Result<String> {
        let event = LifecycleEvent::signal_process(instance_id, signal)?;

        for attempt in 1..=self.max_advance_attempts {
            let mut instance = self.services.instances().get_by_id(instance_id).await?;
            if instance.status.is_terminal() {
                return Err(OrchestratorError::InvalidInstanceState {
                    instance_id: instance.id,
                    expected: "a non-terminal status".to_string(),
                    actual: instance.status.to_string(),
                });
            }

            instance.mark_signalled(Utc::now());
            let status = instance.status;
            if self.services.instances().save(&mut instance, status).await? {
                break;
            }
            if attempt == self.max_advance_attempts {
                warn!(attempts = attempt, "Signal time not recorded on contended instance");
            }
        }

        self.services.lifecycle().publish(&event).await
    }

    async fn after_save(&self, instance: &mut ProcessInstance, plan: Plan) -> Result<AdvanceOutcome> {
        match plan {
            Plan::Continue(task_id) => self.announce(instance, &task_id).await,
            Plan::Finish(status) => {
                info!(instance_id = %instance.id, status = %status, "Instance finished");
                Ok(AdvanceOutcome::Finished { status })
            }
        }
    }

    async fn announce(&self, instance: &mut ProcessInstance, task_id: &str) -> Result<AdvanceOutcome> {
        let queue_key = self.flush_outbox(instance).await?;
        Ok(AdvanceOutcome::Advanced {
            task_id: task_id.to_string(),
            queue_key,
        })
    }

    /// Publish the event committed with `instance`, then clear it from the record.
    async fn flush_outbox(&self, instance: &mut ProcessInstance) -> Result<String> {
        let event = instance.outbox.clone().ok_or_else(|| {
            OrchestratorError::validation(
                "outbox",
                format!("instance '{}' has no unpublished event", instance.id),
            )
        })?;
        let queue_key = self.services.lifecycle().publish(&event).await?;

        // The event is out. A failed clear only means a repeated call queues it again.
        instance.outbox = None;
        let status = instance.status;
        match self.services.instances().save(instance, status).await {
            Ok(true) => {}
            Ok(false) => debug!(instance_id = %instance.id, "Outbox superseded by a newer revision"),
            Err(e) => warn!(instance_id = %instance.id, error = %e, "Failed to clear outbox"),
        }
        Ok(queue_key)
    }
}

fn is_stale(instance: &ProcessInstance, task_id: &str) -> bool {
    instance.status.is_terminal() || instance.curr_task_id.as_deref() != Some(task_id)
}

/// Whether `instance` committed a move to `task_id` whose event was never queued.
fn awaits_continuation(instance: &ProcessInstance, task_id: &str) -> bool {
    instance.curr_task_id.as_deref() == Some(task_id)
        && matches!(
            &instance.outbox,
            Some(LifecycleEvent::ContinueProcessFromTask { task_id: queued, .. }) if queued == task_id
        )
}

fn apply_completion(
    instance: &mut ProcessInstance,
    task_id: &str,
    completion: &CompletionSignal,
    next_task: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Plan> {
    // Completing a task implies it is running again
    if instance.status == InstanceStatus::Suspended {
        instance.transition(InstanceStatus::Running)?;
    }

    let finish = match completion.completion_type() {
        CompletionType::Success => match next_task.filter(|_| !instance.terminates_at(task_id)) {
            Some(next) => {
                instance.transition(InstanceStatus::Running)?;
                instance.advance_to(next, now);
                instance.outbox = Some(LifecycleEvent::continue_from_task(&instance.id, next)?);
                return Ok(Plan::Continue(next.to_string()));
            }
            None => InstanceStatus::Completed,
        },
        CompletionType::Failure => InstanceStatus::Failed,
        CompletionType::Terminated => InstanceStatus::Terminated,
    };

    instance.finish(finish, now)?;
    instance.outbox = None;
    Ok(Plan::Finish(finish))
}
