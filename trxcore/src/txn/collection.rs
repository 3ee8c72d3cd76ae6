// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Per-(transaction, collection) bookkeeping
//!
//! A [`TransactionCollection`] records how a transaction uses one collection:
//! the access it asked for, the nesting level that registered it, the lock it
//! currently holds in the storage layer, and the writes buffered against it.
//! `lock_type != AccessMode::None` always means the storage lock is held.

use super::error::TransactionError;
use super::types::{AccessMode, Hint, TransactionHints};
use crate::database::Database;
use crate::storage::{Collection, CollectionId, DocumentOperation};
use std::sync::Arc;
use std::time::Duration;

/// A buffered write, tagged with its position in the transaction's write order
pub(crate) struct BufferedOperation {
    pub(crate) sequence: u64,
    pub(crate) operation: Box<dyn DocumentOperation>,
}

/// One collection registered with a transaction
pub struct TransactionCollection {
    id: CollectionId,
    access: AccessMode,
    nesting_level: u32,
    lock_type: AccessMode,
    collection: Option<Arc<dyn Collection>>,
    /// The handle came from `use_collection` and must be released
    usage_locked: bool,
    compaction_locked: bool,
    wait_for_sync: bool,
    original_revision: u64,
    operations: Vec<BufferedOperation>,
}

impl std::fmt::Debug for TransactionCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCollection")
            .field("id", &self.id)
            .field("access", &self.access)
            .field("nesting_level", &self.nesting_level)
            .field("lock_type", &self.lock_type)
            .field("in_use", &self.collection.is_some())
            .field("operations", &self.operations.len())
            .finish()
    }
}

impl TransactionCollection {
    pub(crate) fn new(id: CollectionId, access: AccessMode, nesting_level: u32) -> Self {
        Self {
            id,
            access,
            nesting_level,
            lock_type: AccessMode::None,
            collection: None,
            usage_locked: false,
            compaction_locked: false,
            wait_for_sync: false,
            original_revision: 0,
            operations: Vec::new(),
        }
    }

    pub fn id(&self) -> CollectionId {
        self.id
    }

    pub fn access_mode(&self) -> AccessMode {
        self.access
    }

    pub fn nesting_level(&self) -> u32 {
        self.nesting_level
    }

    pub fn lock_type(&self) -> AccessMode {
        self.lock_type
    }

    pub fn is_locked(&self) -> bool {
        self.lock_type != AccessMode::None
    }

    /// Handle of the underlying collection while the transaction uses it
    pub fn collection(&self) -> Option<&Arc<dyn Collection>> {
        self.collection.as_ref()
    }

    pub fn original_revision(&self) -> u64 {
        self.original_revision
    }

    pub fn wait_for_sync(&self) -> bool {
        self.wait_for_sync
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }

    pub fn has_operations(&self) -> bool {
        !self.operations.is_empty()
    }

    pub(crate) fn set_access_mode(&mut self, access: AccessMode) {
        self.access = access;
    }

    pub(crate) fn lower_nesting_level(&mut self, level: u32) {
        self.nesting_level = self.nesting_level.min(level);
    }

    pub(crate) fn push_operation(&mut self, sequence: u64, operation: Box<dyn DocumentOperation>) {
        self.operations.push(BufferedOperation {
            sequence,
            operation,
        });
    }

    pub(crate) fn take_operations(&mut self) -> Vec<BufferedOperation> {
        std::mem::take(&mut self.operations)
    }

    /// Acquire everything this collection needs for `level`
    ///
    /// The usage handle is stored as soon as it is obtained, so a later
    /// failure still leaves it for [`TransactionCollection::release`].
    pub(crate) fn use_at(
        &mut self,
        database: &Database,
        hints: TransactionHints,
        level: u32,
        lock_timeout: Duration,
    ) -> Result<(), TransactionError> {
        if self.nesting_level != level {
            return Ok(());
        }

        if self.collection.is_none() {
            let collection = if hints.has(Hint::NoUsageLock) {
                database
                    .collections()
                    .lookup_collection(self.id)
                    .ok_or_else(|| TransactionError::CollectionNotFound(self.id.to_string()))?
            } else {
                let collection = database.collections().use_collection(self.id)?;
                self.usage_locked = true;
                collection
            };
            self.wait_for_sync = collection.wait_for_sync();
            self.collection = Some(collection);
        }

        let Some(collection) = self.collection.clone() else {
            return Err(TransactionError::CollectionNotFound(self.id.to_string()));
        };

        if self.access.is_write() && database.is_read_only() && !collection.is_system() {
            return Err(TransactionError::ReadOnlyModeViolation(
                collection.name().to_string(),
            ));
        }

        if level == 0
            && self.access.is_write()
            && !hints.has(Hint::NoCompactionLock)
            && !self.compaction_locked
        {
            collection.prevent_compaction();
            self.compaction_locked = true;
        }

        if self.access.is_write() && self.original_revision == 0 {
            self.original_revision = collection.revision();
        }

        let should_lock = !hints.has(Hint::LockNever)
            && (hints.has(Hint::LockEntirely)
                || (self.access.is_write() && !hints.has(Hint::SingleOperation)));
        if should_lock && !self.is_locked() {
            collection.lock(self.access, lock_timeout)?;
            self.lock_type = self.access;
        }
        Ok(())
    }

    /// Release the storage lock taken at `level`; level 0 releases any lock
    pub(crate) fn unlock_at(&mut self, level: u32) {
        if !self.is_locked() || (level != 0 && self.nesting_level != level) {
            return;
        }
        if let Some(collection) = &self.collection {
            collection.unlock(self.lock_type);
        }
        self.lock_type = AccessMode::None;
    }

    /// Give back the compaction hold and the usage handle
    pub(crate) fn release(&mut self, database: &Database) {
        let Some(collection) = self.collection.take() else {
            return;
        };
        if self.compaction_locked {
            collection.allow_compaction();
            self.compaction_locked = false;
        }
        if self.usage_locked {
            database.collections().release_collection(&collection);
            self.usage_locked = false;
        }
    }

    pub(crate) fn is_in_use(&self) -> bool {
        self.collection.is_some()
    }
}
