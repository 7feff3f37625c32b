// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for runtara-orchestrator.
//!
//! CAS conflicts are not errors: they surface as `Ok(false)` from
//! [`ProcessInstanceStore::save`](crate::instance_store::ProcessInstanceStore::save).

use thiserror::Error;

use crate::config::ConfigError;

/// Result type using [`OrchestratorError`].
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors raised by the orchestration core.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OrchestratorError {
    /// Instance was not found by an or-fail lookup.
    #[error("Instance '{instance_id}' not found")]
    InstanceNotFound {
        /// The instance ID that was not found.
        instance_id: String,
    },

    /// Named resiliency configuration was not found by an or-fail lookup.
    #[error("Resiliency config '{name}' not found")]
    ConfigNotFound {
        /// The configuration name.
        name: String,
    },

    /// Instance is in a state that does not allow the requested operation.
    #[error("Instance '{instance_id}' is in invalid state: expected '{expected}', got '{actual}'")]
    InvalidInstanceState {
        /// The instance ID.
        instance_id: String,
        /// The expected status (or set of statuses).
        expected: String,
        /// The actual status.
        actual: String,
    },

    /// Malformed input rejected at construction.
    #[error("Validation error for '{field}': {message}")]
    Validation {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// Store operation failed (connection, query, script).
    #[error("Store error during '{operation}': {details}")]
    Store {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// Stored record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl OrchestratorError {
    /// Shorthand for a [`OrchestratorError::Validation`] error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a [`OrchestratorError::Store`] error.
    pub fn store(operation: impl Into<String>, details: impl ToString) -> Self {
        Self::Store {
            operation: operation.into(),
            details: details.to_string(),
        }
    }

    /// Get the stable error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InstanceNotFound { .. } => "INSTANCE_NOT_FOUND",
            Self::ConfigNotFound { .. } => "CONFIG_NOT_FOUND",
            Self::InvalidInstanceState { .. } => "INVALID_INSTANCE_STATE",
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Store { .. } => "STORE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Whether the failure came from the backing store and may succeed if
    /// the caller retries the whole operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store { .. })
    }
}

impl From<sqlx::Error> for OrchestratorError {
    fn from(err: sqlx::Error) -> Self {
        OrchestratorError::store("query", err)
    }
}

impl From<sqlx::migrate::MigrateError> for OrchestratorError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        OrchestratorError::store("migrate", err)
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for OrchestratorError {
    fn from(err: redis::RedisError) -> Self {
        OrchestratorError::store("redis", err)
    }
}
