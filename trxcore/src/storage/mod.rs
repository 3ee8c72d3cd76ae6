// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Storage collaborator interfaces
//!
//! The transaction core does not own collections. It resolves them through a
//! [`CollectionManager`], locks them through [`Collection`], and keeps the
//! [`DocumentOperation`]s it buffered so they can be reverted on abort.
//!
//! [`memory`] provides an in-memory implementation of all three; it backs the
//! CLI and the test-suite.

pub mod memory;
pub mod script;

use crate::txn::AccessMode;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use memory::{MemoryCollection, MemoryCollectionManager};
pub use script::{ActionExecutor, ScriptExecutor};

/// Numeric collection identifier
pub type CollectionId = u64;

/// Storage errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("timed out acquiring {mode} lock on collection '{collection}'")]
    LockTimeout { collection: String, mode: AccessMode },

    #[error("document '{key}' not found in collection '{collection}'")]
    DocumentNotFound { collection: String, key: String },

    #[error("unique constraint violated: '{key}' already exists in collection '{collection}'")]
    DuplicateKey { collection: String, key: String },

    #[error("Storage error: {0}")]
    Internal(String),
}

/// Kind of a buffered document write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Insert,
    Update,
    Remove,
}

/// A document write that has been applied and may have to be undone
pub trait DocumentOperation: Send {
    fn collection_id(&self) -> CollectionId;

    fn kind(&self) -> OperationKind;

    /// Revision the write produced
    fn revision(&self) -> u64;

    /// Approximate memory held while the operation stays buffered
    fn estimated_size(&self) -> usize;

    /// Undo the write
    fn revert(&mut self) -> Result<(), StorageError>;
}

/// A collection as seen by a transaction
pub trait Collection: Send + Sync {
    fn id(&self) -> CollectionId;

    fn name(&self) -> &str;

    /// System collections stay writable in read-only mode
    fn is_system(&self) -> bool {
        self.name().starts_with('_')
    }

    fn wait_for_sync(&self) -> bool;

    fn revision(&self) -> u64;

    /// Advance the revision; `force` allows moving it backwards
    fn set_revision(&self, revision: u64, force: bool);

    /// Take a reader hold on the compaction lock
    fn prevent_compaction(&self);

    fn allow_compaction(&self);

    /// Acquire the collection lock in `mode`, waiting at most `timeout`
    fn lock(&self, mode: AccessMode, timeout: Duration) -> Result<(), StorageError>;

    fn unlock(&self, mode: AccessMode);

    /// Account for committed writes that still need to be collected from the WAL
    fn add_uncollected(&self, count: u64);
}

/// Resolves collection ids to usable handles
pub trait CollectionManager: Send + Sync {
    /// Acquire a counted usage handle
    fn use_collection(&self, id: CollectionId) -> Result<Arc<dyn Collection>, StorageError>;

    /// Look a collection up without taking a usage reference
    fn lookup_collection(&self, id: CollectionId) -> Option<Arc<dyn Collection>>;

    /// Give back a handle obtained from [`CollectionManager::use_collection`]
    fn release_collection(&self, collection: &Arc<dyn Collection>);

    fn resolve(&self, name: &str) -> Option<CollectionId>;
}
