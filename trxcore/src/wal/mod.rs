// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Write-ahead-log collaborator
//!
//! Transactions emit begin/commit/abort markers (and one marker per document
//! operation) through a [`WalManager`]. The manager also hands out the
//! server-wide tick that identifies a transaction in the log, keeps the set of
//! running transactions for recovery, and reports write throttling.
//!
//! [`FileWal`] is an append-only single-file implementation; [`recovery`]
//! classifies the markers it replays.

pub mod file;
pub mod recovery;

use crate::storage::CollectionId;
use std::time::Duration;
use thiserror::Error;

pub use file::{FileWal, FileWalOptions};
pub use recovery::RecoveryReport;

/// WAL marker types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    BeginTransaction = 1,
    Document = 2,
    CommitTransaction = 3,
    AbortTransaction = 4,
}

impl MarkerKind {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(MarkerKind::BeginTransaction),
            2 => Some(MarkerKind::Document),
            3 => Some(MarkerKind::CommitTransaction),
            4 => Some(MarkerKind::AbortTransaction),
            _ => None,
        }
    }
}

/// A single log record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalMarker {
    pub kind: MarkerKind,
    pub database_id: u64,
    /// Tick of the owning transaction
    pub transaction_id: u64,
    pub collection_id: Option<CollectionId>,
    pub revision: u64,
}

impl WalMarker {
    pub fn transaction(kind: MarkerKind, database_id: u64, transaction_id: u64) -> Self {
        Self {
            kind,
            database_id,
            transaction_id,
            collection_id: None,
            revision: 0,
        }
    }

    pub fn document(
        database_id: u64,
        transaction_id: u64,
        collection_id: CollectionId,
        revision: u64,
    ) -> Self {
        Self {
            kind: MarkerKind::Document,
            database_id,
            transaction_id,
            collection_id: Some(collection_id),
            revision,
        }
    }
}

/// Position of a marker that was written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalSlot {
    pub tick: u64,
    pub logfile_id: u64,
}

/// WAL errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WalError {
    #[error("no space left in write-ahead log")]
    NoSpace,

    #[error("WAL I/O error: {0}")]
    Io(String),

    #[error("corrupted WAL entry: {0}")]
    Corrupted(String),

    #[error("internal WAL error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for WalError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::StorageFull {
            WalError::NoSpace
        } else {
            WalError::Io(err.to_string())
        }
    }
}

/// Allocates and durably writes transaction markers
pub trait WalManager: Send + Sync {
    /// Write `marker`, syncing before returning when `wait_for_sync` is set
    fn allocate_and_write(&self, marker: &WalMarker, wait_for_sync: bool)
        -> Result<WalSlot, WalError>;

    /// Next server-wide tick
    fn next_sequence(&self) -> u64;

    /// Record a running transaction for crash-recovery bookkeeping
    fn register_transaction(&self, transaction_id: u64) -> Result<(), WalError>;

    fn unregister_transaction(&self, transaction_id: u64);

    fn can_be_throttled(&self) -> bool {
        false
    }

    fn is_throttled(&self) -> bool {
        false
    }

    /// Ceiling for waiting on throttling in `begin`
    fn max_throttle_wait(&self) -> Duration {
        Duration::from_secs(15)
    }
}
