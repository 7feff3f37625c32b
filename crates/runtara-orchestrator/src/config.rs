// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use tracing::debug;

/// Partition count used when `MAX_PARTITIONS` is absent or unusable.
pub const DEFAULT_MAX_PARTITIONS: u32 = 8;

/// Default bound on the coordinator's compare-and-swap loop.
pub const DEFAULT_MAX_ADVANCE_ATTEMPTS: u32 = 3;

/// Runtara Orchestrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// State store URL (`memory:`, `sqlite:<path>`, `redis://...`)
    pub store_url: String,
    /// Number of ordered queues per lifecycle event type
    pub max_partitions: u32,
    /// Attempts the coordinator makes before giving up on a contended instance
    pub max_advance_attempts: u32,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `RUNTARA_STORE_URL`: state store connection string
    ///
    /// Optional (with defaults):
    /// - `MAX_PARTITIONS`: lifecycle queue partitions (default: 8, invalid values fall back silently)
    /// - `RUNTARA_MAX_ADVANCE_ATTEMPTS`: CAS attempts per task completion (default: 3)
    pub fn from_env() -> Result<Self, ConfigError> {
        let store_url = std::env::var("RUNTARA_STORE_URL")
            .map_err(|_| ConfigError::Missing("RUNTARA_STORE_URL"))?;

        let max_advance_attempts: u32 = std::env::var("RUNTARA_MAX_ADVANCE_ATTEMPTS")
            .unwrap_or_else(|_| DEFAULT_MAX_ADVANCE_ATTEMPTS.to_string())
            .parse()
            .ok()
            .filter(|attempts| *attempts > 0)
            .ok_or(ConfigError::Invalid(
                "RUNTARA_MAX_ADVANCE_ATTEMPTS",
                "must be a positive integer",
            ))?;

        Ok(Self {
            store_url,
            max_partitions: max_partitions_from_env(),
            max_advance_attempts,
        })
    }
}

/// Resolve the lifecycle partition count from `MAX_PARTITIONS`.
///
/// Unset, empty, non-numeric and non-positive values all resolve to
/// [`DEFAULT_MAX_PARTITIONS`].
pub fn max_partitions_from_env() -> u32 {
    parse_max_partitions(std::env::var("MAX_PARTITIONS").ok().as_deref())
}

fn parse_max_partitions(raw: Option<&str>) -> u32 {
    match raw.map(str::trim).and_then(|s| s.parse::<i64>().ok()) {
        Some(n) if n > 0 => u32::try_from(n).unwrap_or(u32::MAX),
        _ => {
            debug!(raw = ?raw, "Using default partition count");
            DEFAULT_MAX_PARTITIONS
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
