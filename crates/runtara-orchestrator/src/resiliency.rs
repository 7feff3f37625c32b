// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resiliency configuration contracts.
//!
//! These are data only. Enforcement (caching, circuit breaking, retrying,
//! timeouts) belongs to the task execution layer, which reads them by name
//! from a [`ResiliencyRegistry`].
//!
//! Durations are integer milliseconds on the wire:
//!
//! ```json
//! {
//!   "http-default": {
//!     "timeoutMs": 30000,
//!     "retry": { "maxAttempts": 5, "initialBackoffMs": 200 },
//!     "circuitBreaker": { "failureThreshold": 10 }
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

/// Result caching for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    /// Entry lifetime in milliseconds.
    pub ttl_ms: u64,
    /// Maximum number of cached entries.
    pub max_size: u64,
    /// Expression evaluated against the task input to build the cache key.
    pub cache_key_expression: Option<String>,
    /// Whether failures are cached too.
    pub cache_errors: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 300_000,
            max_size: 1_000,
            cache_key_expression: None,
            cache_errors: false,
        }
    }
}

impl CacheConfig {
    /// Entry lifetime.
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Reject zero-sized or zero-lifetime caches.
    pub fn validate(&self) -> Result<()> {
        if self.ttl_ms == 0 {
            return Err(OrchestratorError::validation("cache.ttlMs", "must be positive"));
        }
        if self.max_size == 0 {
            return Err(OrchestratorError::validation("cache.maxSize", "must be positive"));
        }
        Ok(())
    }
}

/// Circuit breaker thresholds for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CircuitBreakerConfig {
    /// Failures within the window that open the circuit.
    pub failure_threshold: u32,
    /// Calls required before the failure rate is evaluated.
    pub minimum_calls: u32,
    /// How long the circuit stays open, in milliseconds.
    pub wait_duration_ms: u64,
    /// Trial calls allowed while half-open.
    pub permitted_half_open_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            minimum_calls: 10,
            wait_duration_ms: 60_000,
            permitted_half_open_calls: 3,
        }
    }
}

impl CircuitBreakerConfig {
    /// Open-state duration.
    pub fn wait_duration(&self) -> Duration {
        Duration::from_millis(self.wait_duration_ms)
    }

    /// Check threshold consistency.
    pub fn validate(&self) -> Result<()> {
        if self.failure_threshold == 0 {
            return Err(OrchestratorError::validation(
                "circuitBreaker.failureThreshold",
                "must be positive",
            ));
        }
        if self.minimum_calls < self.failure_threshold {
            return Err(OrchestratorError::validation(
                "circuitBreaker.minimumCalls",
                "must be at least failureThreshold",
            ));
        }
        if self.permitted_half_open_calls == 0 {
            return Err(OrchestratorError::validation(
                "circuitBreaker.permittedHalfOpenCalls",
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Retry policy for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_backoff_ms: u64,
    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,
    /// Expression deciding whether a failure is retryable.
    pub retry_predicate: Option<String>,
    /// Retry every failure, ignoring `retry_predicate`.
    pub retry_on_all_failures: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            retry_predicate: None,
            retry_on_all_failures: false,
        }
    }
}

impl RetryConfig {
    /// Delay before retry `attempt` (1-indexed: attempt 1 is the first retry).
    ///
    /// `initial * multiplier^(attempt-1)`, capped at `max_backoff_ms`.
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let raw = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.max_backoff_ms as f64)
        } else {
            self.max_backoff_ms as f64
        };
        Duration::from_millis(capped as u64)
    }

    /// Check attempt counts and backoff bounds.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(OrchestratorError::validation(
                "retry.maxAttempts",
                "must be at least 1",
            ));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(OrchestratorError::validation(
                "retry.maxBackoffMs",
                "must be at least initialBackoffMs",
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(OrchestratorError::validation(
                "retry.backoffMultiplier",
                "must be a finite number >= 1.0",
            ));
        }
        Ok(())
    }
}

/// Resiliency settings attached to a task. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResiliencyConfig {
    /// Result caching.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheConfig>,
    /// Circuit breaking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    /// Retrying.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    /// Per-call timeout in milliseconds, passed through unenforced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl ResiliencyConfig {
    /// Per-call timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Validate every present section.
    pub fn validate(&self) -> Result<()> {
        if let Some(cache) = &self.cache {
            cache.validate()?;
        }
        if let Some(breaker) = &self.circuit_breaker {
            breaker.validate()?;
        }
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        if self.timeout_ms == Some(0) {
            return Err(OrchestratorError::validation("timeoutMs", "must be positive"));
        }
        Ok(())
    }
}

/// Named resiliency configurations.
#[derive(Debug, Clone, Default)]
pub struct ResiliencyRegistry {
    configs: HashMap<String, ResiliencyConfig>,
}

impl ResiliencyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a `{ name: config }` JSON document, validating every entry.
    pub fn from_json(document: &str) -> Result<Self> {
        let configs: HashMap<String, ResiliencyConfig> = serde_json::from_str(document)?;
        let mut registry = Self::new();
        for (name, config) in configs {
            registry.register(name, config)?;
        }
        Ok(registry)
    }

    /// Validate and store `config` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, config: ResiliencyConfig) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(OrchestratorError::validation("name", "must not be empty"));
        }
        config.validate()?;
        self.configs.insert(name, config);
        Ok(())
    }

    /// Look up a config, `None` when absent.
    pub fn find(&self, name: &str) -> Option<&ResiliencyConfig> {
        self.configs.get(name)
    }

    /// Look up a config, failing with `ConfigNotFound` when absent.
    pub fn get(&self, name: &str) -> Result<&ResiliencyConfig> {
        self.find(name)
            .ok_or_else(|| OrchestratorError::ConfigNotFound {
                name: name.to_string(),
            })
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.configs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered configs.
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}
