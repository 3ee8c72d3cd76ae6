// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction state machine
//!
//! A [`TransactionState`] owns the ordered set of collections one transaction
//! touches and drives them through `begin -> operations -> commit | abort`.
//! Nested sub-operations share the same state and are distinguished by a
//! nesting level; only level 0 owns WAL markers, compaction holds and usage
//! handles.
//!
//! # Status transitions
//!
//! `Created -> Running -> {Committed | Aborted}`. A failed `begin` moves a
//! created transaction straight to `Aborted`. Finished transactions only
//! release what they still hold.

use super::budget::MemoryBudget;
use super::collection::TransactionCollection;
use super::error::TransactionError;
use super::id::TransactionId;
use super::types::{
    AbortSignal, AccessMode, Hint, TransactionHints, TransactionOptions, TransactionStatus,
};
use crate::database::Database;
use crate::storage::{CollectionId, DocumentOperation};
use crate::wal::WalMarker;
use std::sync::Arc;
use std::time::{Duration, Instant};

mod markers;

pub struct TransactionState {
    id: TransactionId,
    /// Server tick identifying the transaction in the WAL; assigned by `begin`
    tick: u64,
    database: Arc<Database>,
    access_type: AccessMode,
    status: TransactionStatus,
    hints: TransactionHints,
    nesting_level: u32,
    /// Sorted by collection id
    collections: Vec<TransactionCollection>,
    allow_implicit: bool,
    lock_timeout: Duration,
    wait_for_sync: bool,
    begin_written: bool,
    registered_in_wal: bool,
    operation_sequence: u64,
    budget: MemoryBudget,
    abort_signal: AbortSignal,
    started_at: Instant,
}

impl std::fmt::Debug for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionState")
            .field("id", &self.id)
            .field("tick", &self.tick)
            .field("database", &self.database.name())
            .field("access_type", &self.access_type)
            .field("status", &self.status)
            .field("nesting_level", &self.nesting_level)
            .field("collections", &self.collections)
            .field("begin_written", &self.begin_written)
            .finish()
    }
}

impl TransactionState {
    pub fn new(database: Arc<Database>, options: TransactionOptions) -> Self {
        let config = database.config();
        let allow_implicit = options
            .allow_implicit_collections
            .unwrap_or(config.allow_implicit_collections);
        let lock_timeout = options.lock_timeout.unwrap_or(config.lock_timeout);
        let budget = MemoryBudget::from_limit(config.memory_limit());

        Self {
            id: TransactionId::ZERO,
            tick: 0,
            database,
            access_type: AccessMode::Read,
            status: TransactionStatus::Created,
            hints: TransactionHints::none(),
            nesting_level: 0,
            collections: Vec::new(),
            allow_implicit,
            lock_timeout,
            wait_for_sync: options.wait_for_sync,
            begin_written: false,
            registered_in_wal: false,
            operation_sequence: 0,
            budget,
            abort_signal: AbortSignal::new(),
            started_at: Instant::now(),
        }
    }

    /// Registry id; ZERO until the transaction is inserted into a registry
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: TransactionId) {
        self.id = id;
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    pub fn database_name(&self) -> &str {
        self.database.name()
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn access_type(&self) -> AccessMode {
        self.access_type
    }

    pub fn hints(&self) -> TransactionHints {
        self.hints
    }

    pub fn nesting_level(&self) -> u32 {
        self.nesting_level
    }

    pub fn is_read_only_transaction(&self) -> bool {
        !self.access_type.is_write()
    }

    pub fn is_single_operation(&self) -> bool {
        self.hints.has(Hint::SingleOperation)
    }

    pub fn wait_for_sync(&self) -> bool {
        self.wait_for_sync
    }

    /// Whether undeclared collections may be registered for reading
    pub fn allows_implicit(&self) -> bool {
        self.allow_implicit
    }

    pub fn wal_begin_written(&self) -> bool {
        self.begin_written
    }

    pub fn collections(&self) -> &[TransactionCollection] {
        &self.collections
    }

    pub fn has_operations(&self) -> bool {
        self.collections.iter().any(|c| c.has_operations())
    }

    pub fn memory_budget(&self) -> &MemoryBudget {
        &self.budget
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Shared kill flag; triggering it makes the next operation fail with `Killed`
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort_signal.clone()
    }

    pub fn is_killed(&self) -> bool {
        self.abort_signal.is_triggered()
    }

    pub fn kill(&self) {
        self.abort_signal.trigger();
    }

    /// Collection registered with at least `access`
    pub fn collection(&self, id: CollectionId, access: AccessMode) -> Option<&TransactionCollection> {
        let idx = self.find_collection(id).ok()?;
        let collection = &self.collections[idx];
        (access <= collection.access_mode()).then_some(collection)
    }

    fn find_collection(&self, id: CollectionId) -> Result<usize, usize> {
        self.collections.binary_search_by_key(&id, |c| c.id())
    }

    fn expect_status(&self, expected: TransactionStatus) -> Result<(), TransactionError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(TransactionError::InvalidStatus {
                expected,
                found: self.status,
            })
        }
    }

    /// Enter a nested sub-operation and return its level
    pub fn enter_nested(&mut self) -> u32 {
        self.nesting_level += 1;
        self.nesting_level
    }

    pub fn leave_nested(&mut self) {
        self.nesting_level = self.nesting_level.saturating_sub(1);
    }

    /// Register a collection with the transaction
    ///
    /// An existing registration is escalated at level 0 when more access is
    /// requested. Nested levels may add readers but never new writers.
    /// Declared collections pass `allow_implicit = true`; an unregistered
    /// reader is refused when it is false.
    pub fn add_collection(
        &mut self,
        id: CollectionId,
        access: AccessMode,
        level: u32,
        force: bool,
        allow_implicit: bool,
    ) -> Result<(), TransactionError> {
        if level == 0 && !force {
            self.expect_status(TransactionStatus::Created)?;
        }

        let unregistered = TransactionError::UnregisteredCollectionAccess {
            collection: id,
            access,
            level,
        };

        match self.find_collection(id) {
            Ok(idx) => {
                let collection = &mut self.collections[idx];
                let current = collection.access_mode();
                if level > 0 {
                    if access.is_write() && !current.is_write() {
                        return Err(unregistered);
                    }
                } else if access > current {
                    if collection.is_locked() {
                        return Err(unregistered);
                    }
                    collection.set_access_mode(access);
                }
                collection.lower_nesting_level(level);
            }
            Err(pos) => {
                if access.is_write() && level > 0 {
                    return Err(unregistered);
                }
                if !access.is_write() && !allow_implicit {
                    return Err(unregistered);
                }
                self.collections
                    .insert(pos, TransactionCollection::new(id, access, level));
            }
        }

        if level == 0 && access.is_write() {
            self.access_type = self.access_type.max(access);
        }
        Ok(())
    }

    /// Start the transaction (level 0) or a nested sub-operation
    ///
    /// Nested levels run with the hints given at level 0.
    pub fn begin(&mut self, hints: TransactionHints, level: u32) -> Result<(), TransactionError> {
        if self.is_killed() {
            return Err(TransactionError::Killed);
        }

        if level == 0 {
            self.expect_status(TransactionStatus::Created)?;
            if self.access_type.is_write()
                && !hints.has(Hint::NoThrottling)
                && self.database.wal().can_be_throttled()
            {
                self.wait_for_throttling()?;
            }
            self.hints = hints;
            self.tick = self.database.wal().next_sequence();
            if let Err(e) = self.database.wal().register_transaction(self.tick) {
                self.status = TransactionStatus::Aborted;
                return Err(e.into());
            }
            self.registered_in_wal = true;
        } else {
            self.expect_status(TransactionStatus::Running)?;
        }

        match self.use_collections(level) {
            Ok(()) => {
                if level == 0 {
                    self.status = TransactionStatus::Running;
                    self.started_at = Instant::now();
                }
                Ok(())
            }
            Err(e) => {
                log::debug!(
                    "begin of transaction {} failed at level {}: {}",
                    self.id,
                    level,
                    e
                );
                if level == 0 {
                    self.status = TransactionStatus::Aborted;
                    self.unregister_from_wal();
                }
                self.unuse_collections(level);
                Err(e)
            }
        }
    }

    fn wait_for_throttling(&self) -> Result<(), TransactionError> {
        let wal = self.database.wal();
        if !wal.is_throttled() {
            return Ok(());
        }

        let max_wait = wal.max_throttle_wait();
        let poll = self.database.config().throttle_poll_interval;
        let started = Instant::now();
        log::debug!("WAL is throttled, delaying write transaction for up to {:?}", max_wait);

        while wal.is_throttled() {
            if started.elapsed() >= max_wait {
                return Err(TransactionError::WriteThrottleTimeout {
                    waited_ms: started.elapsed().as_millis(),
                });
            }
            std::thread::sleep(poll);
        }
        Ok(())
    }

    /// Acquire usage handles, compaction holds and locks for `level`
    pub fn use_collections(&mut self, level: u32) -> Result<(), TransactionError> {
        let hints = self.hints;
        let timeout = self.lock_timeout;
        for collection in self.collections.iter_mut() {
            collection.use_at(&self.database, hints, level, timeout)?;
        }
        Ok(())
    }

    /// Release what `level` acquired; level 0 releases everything
    pub fn unuse_collections(&mut self, level: u32) {
        for collection in self.collections.iter_mut().rev() {
            collection.unlock_at(level);
            if level == 0 {
                collection.release(&self.database);
            }
        }
    }

    /// Record a document write that was applied to storage
    ///
    /// The first write of a multi-operation transaction emits the begin
    /// marker. The operation is reverted before any error is returned.
    pub fn add_operation(
        &mut self,
        mut operation: Box<dyn DocumentOperation>,
        wait_for_sync: bool,
    ) -> Result<(), TransactionError> {
        match self.log_operation(operation.as_ref(), wait_for_sync) {
            Ok(idx) => {
                self.store_operation(idx, operation);
                Ok(())
            }
            Err(e) => {
                if let Err(revert_err) = operation.revert() {
                    log::error!(
                        "failed to revert rejected operation in transaction {}: {}",
                        self.id,
                        revert_err
                    );
                }
                Err(e)
            }
        }
    }

    fn log_operation(
        &mut self,
        operation: &dyn DocumentOperation,
        wait_for_sync: bool,
    ) -> Result<usize, TransactionError> {
        if self.is_killed() {
            return Err(TransactionError::Killed);
        }
        self.expect_status(TransactionStatus::Running)?;

        let cid = operation.collection_id();
        let idx = match self.find_collection(cid) {
            Ok(idx) if self.collections[idx].access_mode().is_write() => idx,
            _ => {
                return Err(TransactionError::UnregisteredCollectionAccess {
                    collection: cid,
                    access: AccessMode::Write,
                    level: self.nesting_level,
                })
            }
        };
        if !self.collections[idx].is_in_use() {
            return Err(TransactionError::CollectionNotFound(cid.to_string()));
        }

        let sync = !self.hints.has(Hint::Recovery)
            && (wait_for_sync || self.collections[idx].wait_for_sync());
        let single = self.is_single_operation();
        let reserved = if single { 0 } else { operation.estimated_size() };
        self.budget.allocate(reserved)?;

        let marker = WalMarker::document(self.database.id(), self.tick, cid, operation.revision());
        let logged = self.write_begin_marker().and_then(|_| {
            self.database
                .wal()
                .allocate_and_write(&marker, sync)
                .map(|_| ())
                .map_err(TransactionError::from)
        });
        if let Err(e) = logged {
            self.budget.release(reserved);
            return Err(e);
        }

        if sync {
            self.wait_for_sync = true;
        }
        Ok(idx)
    }

    fn store_operation(&mut self, idx: usize, operation: Box<dyn DocumentOperation>) {
        let revision = operation.revision();
        let single = self.is_single_operation();
        let collection = &mut self.collections[idx];

        if let Some(handle) = collection.collection() {
            handle.set_revision(revision, false);
            if single {
                handle.add_uncollected(1);
                if let Some(cache) = self.database.query_cache() {
                    if cache.may_be_active() {
                        cache.invalidate(self.database.name(), &[handle.name().to_string()]);
                    }
                }
            }
        }

        if !single {
            self.operation_sequence += 1;
            collection.push_operation(self.operation_sequence, operation);
        }
    }

    /// Commit at `level`; only level 0 writes the commit marker
    pub fn commit(&mut self, level: u32) -> Result<(), TransactionError> {
        if level == 0 && self.is_killed() && self.status == TransactionStatus::Running {
            if let Err(e) = self.abort(0) {
                log::error!("abort of killed transaction {} failed: {}", self.id, e);
            }
            return Err(TransactionError::Killed);
        }
        self.expect_status(TransactionStatus::Running)?;

        if level == 0 {
            if let Err(e) = self.write_commit_marker() {
                if let Err(abort_err) = self.abort(level) {
                    log::error!(
                        "abort after failed commit of transaction {} failed: {}",
                        self.id,
                        abort_err
                    );
                }
                return Err(e);
            }
            self.status = TransactionStatus::Committed;
            self.invalidate_query_cache();
            self.free_operations();
            self.unregister_from_wal();
            self.log_if_slow();
        }

        self.unuse_collections(level);
        Ok(())
    }

    /// Abort at `level`; level 0 writes the abort marker and reverts buffered writes
    ///
    /// An abort-marker failure is logged and the abort still completes; it is
    /// only returned when `fail_on_warning` is configured.
    pub fn abort(&mut self, level: u32) -> Result<(), TransactionError> {
        if level > 0 {
            self.expect_status(TransactionStatus::Running)?;
            self.unuse_collections(level);
            return Ok(());
        }

        if self.status == TransactionStatus::Created {
            self.status = TransactionStatus::Aborted;
            self.unregister_from_wal();
            self.unuse_collections(0);
            return Ok(());
        }
        self.expect_status(TransactionStatus::Running)?;

        let marker = self.write_abort_marker();
        self.status = TransactionStatus::Aborted;
        self.free_operations();
        self.unregister_from_wal();
        self.unuse_collections(0);
        self.log_if_slow();

        match marker {
            Err(e) if self.database.config().fail_on_warning => Err(e),
            Err(e) => {
                log::error!("abort marker of transaction {} was not written: {}", self.id, e);
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }

    fn invalidate_query_cache(&self) {
        let Some(cache) = self.database.query_cache() else {
            return;
        };
        if !self.access_type.is_write() || !cache.may_be_active() {
            return;
        }
        let names: Vec<String> = self
            .collections
            .iter()
            .filter(|c| c.access_mode().is_write() && c.has_operations())
            .filter_map(|c| c.collection().map(|h| h.name().to_string()))
            .collect();
        if !names.is_empty() {
            cache.invalidate(self.database.name(), &names);
        }
    }

    /// Discard (commit) or revert (abort) buffered operations
    fn free_operations(&mut self) {
        let rollback = self.status == TransactionStatus::Aborted;
        let mut buffered = Vec::new();
        let mut reserved = 0;

        for (idx, collection) in self.collections.iter_mut().enumerate() {
            let operations = collection.take_operations();
            if operations.is_empty() {
                continue;
            }
            if let Some(handle) = collection.collection() {
                if !rollback {
                    handle.add_uncollected(operations.len() as u64);
                }
            }
            for op in operations {
                reserved += op.operation.estimated_size();
                buffered.push((idx, op));
            }
        }
        self.budget.release(reserved);

        if !rollback || buffered.is_empty() {
            return;
        }

        // undo in global reverse write order
        buffered.sort_by(|a, b| b.1.sequence.cmp(&a.1.sequence));
        let mut touched = Vec::new();
        for (idx, mut op) in buffered {
            if let Err(e) = op.operation.revert() {
                log::error!(
                    "failed to revert operation {} of transaction {}: {}",
                    op.sequence,
                    self.id,
                    e
                );
            }
            if !touched.contains(&idx) {
                touched.push(idx);
            }
        }
        for idx in touched {
            let collection = &self.collections[idx];
            if let Some(handle) = collection.collection() {
                handle.set_revision(collection.original_revision(), true);
            }
        }
    }

    fn unregister_from_wal(&mut self) {
        if self.registered_in_wal {
            self.database.wal().unregister_transaction(self.tick);
            self.registered_in_wal = false;
        }
    }

    fn log_if_slow(&self) {
        let config = self.database.config();
        let elapsed = self.elapsed();
        if config.tracking && elapsed > config.slow_threshold {
            log::warn!(
                "slow transaction {} in database '{}' {} after {:.3} s",
                self.id,
                self.database.name(),
                self.status,
                elapsed.as_secs_f64()
            );
        }
    }
}

impl Drop for TransactionState {
    fn drop(&mut self) {
        if self.status == TransactionStatus::Running {
            log::warn!("transaction {} dropped while running, aborting", self.id);
            if let Err(e) = self.abort(0) {
                log::error!("abort of dropped transaction {} failed: {}", self.id, e);
            }
        } else if self.collections.iter().any(|c| c.is_in_use() || c.is_locked()) {
            self.unuse_collections(0);
        }
        self.unregister_from_wal();
    }
}
