// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction configuration
//!
//! Read once at startup and shared by the registry and every database
//! context. Unset fields in a config file fall back to [`Default`].

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Smallest id chunk the generator accepts; two full ids plus headroom.
pub const MIN_ID_CHUNK_SIZE: u64 = 8;

/// Longest lock timeout or ttl accepted from a config file or a request
pub const MAX_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Registry and transaction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Time a transaction stays registered after it was inserted or closed
    pub default_ttl: Duration,

    /// Per-transaction byte budget for buffered operations (0 = unlimited)
    pub memory_limit: usize,

    /// Transactions running longer than this are logged when they finish
    pub slow_threshold: Duration,

    /// Enable slow-transaction tracking
    pub tracking: bool,

    /// Turn abort-marker failures into errors instead of warnings
    pub fail_on_warning: bool,

    /// Number of identifiers reserved per generator refill
    pub id_chunk_size: u64,

    /// Upper bound for waiting on a collection lock
    pub lock_timeout: Duration,

    /// Sleep between two checks of the WAL throttle flag
    pub throttle_poll_interval: Duration,

    /// Whether read access may register collections implicitly
    pub allow_implicit_collections: bool,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(600),
            memory_limit: 0,
            slow_threshold: Duration::from_secs(10),
            tracking: true,
            fail_on_warning: false,
            id_chunk_size: 10_000,
            lock_timeout: Duration::from_secs(900),
            throttle_poll_interval: Duration::from_millis(50),
            allow_implicit_collections: true,
        }
    }
}

impl TransactionConfig {
    /// Load a JSON config file and validate it
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id_chunk_size < MIN_ID_CHUNK_SIZE {
            return Err(ConfigError::Invalid {
                field: "id_chunk_size",
                reason: format!(
                    "must be at least {}, got {}",
                    MIN_ID_CHUNK_SIZE, self.id_chunk_size
                ),
            });
        }
        for (field, value) in [
            ("default_ttl", self.default_ttl),
            ("lock_timeout", self.lock_timeout),
        ] {
            if value > MAX_TIMEOUT {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must not exceed {}s, got {:?}", MAX_TIMEOUT.as_secs(), value),
                });
            }
        }
        if self.throttle_poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "throttle_poll_interval",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Memory limit as an optional value
    pub fn memory_limit(&self) -> Option<usize> {
        (self.memory_limit > 0).then_some(self.memory_limit)
    }
}
