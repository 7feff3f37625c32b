// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtara Orchestrator - State and Coordination Core
//!
//! This crate tracks long-running, possibly hierarchical process instances,
//! persists the variables their tasks produce, and distributes lifecycle
//! events over partitioned ordered queues so independent workers can advance
//! execution without a central scheduler. The backing store is the only
//! synchronization point.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              Workers                                    │
//! │          (execute tasks, consume lifecycle queues - external)           │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       ExecutionCoordinator                              │
//! │            record outputs  →  CAS save  →  emit continuation            │
//! └─────────────────────────────────────────────────────────────────────────┘
//!        │                         │                          │
//!        ▼                         ▼                          ▼
//! ┌──────────────────┐   ┌─────────────────────┐   ┌───────────────────────┐
//! │ VariableResolver │   │ ProcessInstanceStore│   │ ExecutionLifecycle    │
//! │  VariableStore   │   │  (status + version  │   │ Manager (partitioned  │
//! │                  │   │   compare-and-swap) │   │ queues)               │
//! └──────────────────┘   └─────────────────────┘   └───────────────────────┘
//!        │                         │                          │
//!        └─────────────────────────┼──────────────────────────┘
//!                                  ▼
//!                    ┌───────────────────────────┐
//!                    │        StateStore         │
//!                    │  memory | SQLite | Redis  │
//!                    └───────────────────────────┘
//! ```
//!
//! # Storage Layout
//!
//! | Key | Kind | Contents |
//! |-----|------|----------|
//! | `processInstance/{id}` | value | camelCase JSON [`ProcessInstance`](instance::ProcessInstance) |
//! | `{rootId}/{instanceId}/{taskId}/{TYPE}` | value | camelCase JSON [`ProcessVariable`](variable::ProcessVariable) |
//! | `byInstance/{instanceId}` | set | variable ids owned by the instance |
//! | `{eventType}/{partition}` | list | JSON [`LifecycleEvent`](events::LifecycleEvent)s in append order |
//!
//! # Guarantees
//!
//! - Of N workers saving the same instance from the same status and
//!   revision, exactly one succeeds. Losers get `Ok(false)` and must not emit.
//! - Events sharing a partition key land in one queue in submission order.
//! - A coordinator event is committed with the instance it belongs to, so a
//!   failed queue append is re-published when the same call is repeated.
//! - After [`VariableResolver::resolve`](resolution::VariableResolver::resolve),
//!   every dependency is in the container or absent from the instance and all
//!   of its concurrent ancestors.
//!
//! # Configuration
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `RUNTARA_STORE_URL` | Yes | - | `memory:`, `sqlite:<path>`, `sqlite::memory:` or `redis://...` |
//! | `MAX_PARTITIONS` | No | `8` | Queues per event type; unusable values fall back silently |
//! | `RUNTARA_MAX_ADVANCE_ATTEMPTS` | No | `3` | CAS attempts per task completion |
//!
//! # Features
//!
//! - `redis`: enables [`store::RedisStore`] and `redis://` URLs.

#![deny(missing_docs)]

/// Configuration loaded from environment variables.
pub mod config;

/// Task completion flow over the services.
pub mod coordinator;

/// Error types with stable error codes.
pub mod error;

/// Lifecycle event variants.
pub mod events;

/// Process instances and the status state machine.
pub mod instance;

/// Compare-and-swap repository of process instances.
pub mod instance_store;

/// Partitioned lifecycle event distribution.
pub mod lifecycle;

/// Resiliency configuration contracts and registry.
pub mod resiliency;

/// Hierarchical variable resolution.
pub mod resolution;

/// Shared execution services and their builder.
pub mod services;

/// Task signals and completion outcomes.
pub mod signal;

/// Key-value, list and set storage backends.
pub mod store;

/// Process variables and the in-memory container.
pub mod variable;

/// Durable variable repository with per-instance index.
pub mod variable_store;

pub use coordinator::{AdvanceOutcome, ExecutionCoordinator};
pub use error::{OrchestratorError, Result};
pub use instance::{InstanceStatus, ProcessInstance};
pub use services::ProcessServices;
