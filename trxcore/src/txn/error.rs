// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction error types

use super::types::{AccessMode, TransactionStatus};
use crate::storage::{CollectionId, StorageError};
use crate::wal::WalError;
use thiserror::Error;

/// Errors raised by a transaction state machine
#[derive(Error, Debug)]
pub enum TransactionError {
    /// Nested write to a collection that was not registered for write at level 0,
    /// or implicit read registration while that is disallowed
    #[error("unregistered collection {collection} used with {access} access at nesting level {level}")]
    UnregisteredCollectionAccess {
        collection: CollectionId,
        access: AccessMode,
        level: u32,
    },

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("cannot write to collection '{0}' while the server is in read-only mode")]
    ReadOnlyModeViolation(String),

    #[error("timed out after {waited_ms} ms waiting for WAL write throttling to end")]
    WriteThrottleTimeout { waited_ms: u128 },

    #[error("WAL error: {0}")]
    Wal(#[from] WalError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid transaction status: expected {expected}, found {found}")]
    InvalidStatus {
        expected: TransactionStatus,
        found: TransactionStatus,
    },

    #[error("transaction was killed")]
    Killed,

    #[error("Memory limit exceeded: requested {requested} bytes, available {available} bytes")]
    MemoryLimitExceeded { requested: usize, available: usize },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("action failed: {0}")]
    ActionFailed(String),
}

impl TransactionError {
    /// Errors the caller may fix by retrying or adjusting its request
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TransactionError::UnregisteredCollectionAccess { .. }
                | TransactionError::CollectionNotFound(_)
                | TransactionError::ReadOnlyModeViolation(_)
                | TransactionError::WriteThrottleTimeout { .. }
                | TransactionError::Storage(StorageError::LockTimeout { .. })
        )
    }
}
