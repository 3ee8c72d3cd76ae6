// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Registry of transactions that span several requests
//!
//! The registry maps `(database, id)` to a parked transaction. A request
//! opens a transaction to obtain an exclusive [`TransactionLease`], works on
//! it, and closes it as live, committed or aborted. Terminal entries stay
//! registered until their ttl passes so that late requests get a precise
//! "already committed/aborted" answer instead of "not found".
//!
//! The registry mutex is never held across WAL or storage work: commit,
//! abort and teardown run after the entry has been taken out or marked.

mod error;
mod info;
mod lease;
mod proxy;

pub use error::RegistryError;
pub use info::{LifeCycle, RegistrySnapshot, TransactionSnapshot};
pub use lease::TransactionLease;
pub use proxy::TransactionProxy;

use crate::clock::{Clock, MonotonicClock};
use crate::config::TransactionConfig;
use crate::txn::{IdGenerator, TransactionId, TransactionState, TransactionStatus};
use info::{Slot, TransactionInfo};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

type DatabaseEntries = HashMap<TransactionId, TransactionInfo>;

/// Result of a destroy request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyOutcome {
    /// The entry was removed and its transaction torn down
    Destroyed,
    /// The entry is leased; it was killed and is removed once returned
    Deferred,
}

/// Why an entry is being destroyed, for the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    Expired,
    Requested,
    Shutdown,
}

pub struct TransactionRegistry {
    transactions: Mutex<HashMap<String, DatabaseEntries>>,
    generator: IdGenerator,
    config: TransactionConfig,
    clock: Arc<dyn Clock>,
}

impl TransactionRegistry {
    pub fn new(config: TransactionConfig) -> Result<Self, RegistryError> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(
        config: TransactionConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RegistryError> {
        config.validate()?;
        let generator = IdGenerator::new(config.id_chunk_size)?;
        Ok(Self::with_parts(config, clock, generator))
    }

    pub fn with_parts(
        config: TransactionConfig,
        clock: Arc<dyn Clock>,
        generator: IdGenerator,
    ) -> Self {
        log::info!(
            "transaction registry {} started (default ttl {:?})",
            generator.coordinator(),
            config.default_ttl
        );
        Self {
            transactions: Mutex::new(HashMap::new()),
            generator,
            config,
            clock,
        }
    }

    /// Coordinator part of every id this registry hands out
    pub fn registry_id(&self) -> u64 {
        self.generator.coordinator()
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    pub fn generate_id(&self) -> TransactionId {
        self.generator.next_id()
    }

    /// Register `state` under a freshly generated id
    pub fn insert(
        &self,
        state: TransactionState,
        ttl: Option<Duration>,
    ) -> Result<TransactionId, RegistryError> {
        let id = self.generate_id();
        self.insert_with_id(id, state, ttl)?;
        Ok(id)
    }

    /// Register `state` under `id`
    ///
    /// A duplicate id is rejected and the rejected transaction is discarded.
    pub fn insert_with_id(
        &self,
        id: TransactionId,
        mut state: TransactionState,
        ttl: Option<Duration>,
    ) -> Result<(), RegistryError> {
        if id.is_zero() {
            return Err(RegistryError::InvalidId(id));
        }
        state.set_id(id);
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let database = state.database_name().to_string();
        let now = self.clock.now();

        let rejected = {
            let mut transactions = self.transactions.lock();
            let entries = transactions.entry(database.clone()).or_default();
            if entries.contains_key(&id) {
                Some(state)
            } else {
                entries.insert(id, TransactionInfo::new(Box::new(state), ttl, now));
                None
            }
        };

        match rejected {
            Some(state) => {
                drop(state);
                Err(RegistryError::AlreadyRegistered { database, id })
            }
            None => {
                log::debug!("registered transaction {} in '{}' with ttl {:?}", id, database, ttl);
                Ok(())
            }
        }
    }

    fn find<'m>(
        transactions: &'m mut HashMap<String, DatabaseEntries>,
        database: Option<&str>,
        id: TransactionId,
    ) -> Option<&'m mut TransactionInfo> {
        match database {
            Some(database) => transactions.get_mut(database)?.get_mut(&id),
            None => transactions
                .values_mut()
                .find_map(|entries| entries.get_mut(&id)),
        }
    }

    /// Take exclusive ownership of a live transaction
    ///
    /// Without a database name the id is looked up in every database.
    pub fn open(
        &self,
        id: TransactionId,
        database: Option<&str>,
    ) -> Result<TransactionLease<'_>, RegistryError> {
        let mut transactions = self.transactions.lock();
        let info = Self::find(&mut transactions, database, id).ok_or(RegistryError::NotFound(id))?;

        match info.lifecycle {
            LifeCycle::Committed => return Err(RegistryError::AlreadyCommitted(id)),
            LifeCycle::Aborted => return Err(RegistryError::AlreadyAborted(id)),
            LifeCycle::Live => {}
        }

        let state = match std::mem::replace(&mut info.slot, Slot::Leased) {
            Slot::Available(state) => state,
            Slot::Leased => return Err(RegistryError::AlreadyOpen(id)),
        };
        let database = info.database.clone();
        drop(transactions);

        log::trace!("opened transaction {} in '{}'", id, database);
        Ok(TransactionLease::new(self, database, id, state))
    }

    /// Return a lease, finishing the transaction as `target` requires
    ///
    /// `ttl` replaces the entry's ttl when given. A failed commit leaves the
    /// entry aborted and returns the commit error.
    pub fn close(
        &self,
        lease: TransactionLease<'_>,
        ttl: Option<Duration>,
        target: LifeCycle,
    ) -> Result<(), RegistryError> {
        if !std::ptr::eq(lease.registry(), self) {
            let id = lease.id();
            drop(lease);
            return Err(RegistryError::NotFound(id));
        }
        let (database, id, state) = lease.into_parts();
        self.return_state(database, id, state, ttl, target)
    }

    pub fn close_commit(
        &self,
        lease: TransactionLease<'_>,
        ttl: Option<Duration>,
    ) -> Result<(), RegistryError> {
        self.close(lease, ttl, LifeCycle::Committed)
    }

    pub fn close_abort(
        &self,
        lease: TransactionLease<'_>,
        ttl: Option<Duration>,
    ) -> Result<(), RegistryError> {
        self.close(lease, ttl, LifeCycle::Aborted)
    }

    pub(crate) fn return_state(
        &self,
        database: String,
        id: TransactionId,
        mut state: Box<TransactionState>,
        ttl: Option<Duration>,
        target: LifeCycle,
    ) -> Result<(), RegistryError> {
        let admitted = {
            let mut transactions = self.transactions.lock();
            match Self::find(&mut transactions, Some(&database), id) {
                None => Err(RegistryError::NotFound(id)),
                Some(info) if info.lifecycle == LifeCycle::Committed => {
                    Err(RegistryError::AlreadyCommitted(id))
                }
                Some(info) if info.lifecycle == LifeCycle::Aborted => {
                    Err(RegistryError::AlreadyAborted(id))
                }
                Some(info) if !info.is_open() => Err(RegistryError::NotOpen(id)),
                Some(_) => Ok(()),
            }
        };
        if let Err(e) = admitted {
            log::error!("closing transaction {} in '{}' failed: {}", id, database, e);
            drop(state);
            return Err(e);
        }

        let (lifecycle, result) = Self::finish(&mut state, target);

        let now = self.clock.now();
        let mut orphan = None;
        let destroy_requested = {
            let mut transactions = self.transactions.lock();
            match Self::find(&mut transactions, Some(&database), id) {
                Some(info) => {
                    info.slot = Slot::Available(state);
                    info.lifecycle = lifecycle;
                    if let Some(ttl) = ttl {
                        info.ttl = ttl;
                    }
                    info.expires_at = now.saturating_add(info.ttl);
                    info.destroy_requested
                }
                None => {
                    orphan = Some(state);
                    false
                }
            }
        };

        if let Some(state) = orphan {
            log::error!("transaction {} disappeared from '{}' while open", id, database);
            drop(state);
            return Err(RegistryError::NotFound(id));
        }

        log::debug!("closed transaction {} in '{}' as {}", id, database, lifecycle);
        if destroy_requested {
            self.destroy(&database, id, DestroyReason::Requested)?;
        }
        result
    }

    /// Bring the transaction to the requested lifecycle outside the lock
    fn finish(
        state: &mut TransactionState,
        target: LifeCycle,
    ) -> (LifeCycle, Result<(), RegistryError>) {
        let current = LifeCycle::from_status(state.status());
        if current.is_terminal() {
            let result = match (target, current) {
                (LifeCycle::Committed, LifeCycle::Aborted) => {
                    Err(RegistryError::AlreadyAborted(state.id()))
                }
                (LifeCycle::Aborted, LifeCycle::Committed) => {
                    Err(RegistryError::AlreadyCommitted(state.id()))
                }
                _ => Ok(()),
            };
            return (current, result);
        }

        match target {
            LifeCycle::Live => (LifeCycle::Live, Ok(())),
            LifeCycle::Committed => match state.commit(0) {
                Ok(()) => (LifeCycle::Committed, Ok(())),
                Err(e) => {
                    if !state.status().is_finished() {
                        if let Err(abort_err) = state.abort(0) {
                            log::error!(
                                "abort after failed commit of transaction {} failed: {}",
                                state.id(),
                                abort_err
                            );
                        }
                    }
                    (LifeCycle::Aborted, Err(e.into()))
                }
            },
            LifeCycle::Aborted => {
                let result = state.abort(0).map_err(RegistryError::from);
                (LifeCycle::Aborted, result)
            }
        }
    }

    /// Remove an entry and tear its transaction down
    ///
    /// A leased entry cannot be removed under its holder: it is killed and
    /// marked for destruction when the lease comes back.
    pub fn destroy(
        &self,
        database: &str,
        id: TransactionId,
        reason: DestroyReason,
    ) -> Result<DestroyOutcome, RegistryError> {
        let info = {
            let mut transactions = self.transactions.lock();
            let entries = transactions
                .get_mut(database)
                .ok_or(RegistryError::NotFound(id))?;
            let info = entries.get_mut(&id).ok_or(RegistryError::NotFound(id))?;

            if info.is_open() {
                info.abort_signal.trigger();
                info.destroy_requested = true;
                log::debug!(
                    "transaction {} in '{}' is open, destroy deferred ({:?})",
                    id,
                    database,
                    reason
                );
                return Ok(DestroyOutcome::Deferred);
            }

            let info = entries.remove(&id);
            if entries.is_empty() {
                transactions.remove(database);
            }
            info
        };

        if let Some(mut state) = info.and_then(TransactionInfo::into_state) {
            if state.status() == TransactionStatus::Running {
                log::info!(
                    "aborting running transaction {} in '{}' ({:?})",
                    id,
                    database,
                    reason
                );
                if let Err(e) = state.abort(0) {
                    log::warn!("abort of destroyed transaction {} failed: {}", id, e);
                }
            }
        }
        log::debug!("destroyed transaction {} in '{}' ({:?})", id, database, reason);
        Ok(DestroyOutcome::Destroyed)
    }

    /// Destroy every entry whose ttl has passed; returns how many were removed
    ///
    /// Open entries are never touched by the sweep.
    pub fn expire_transactions(&self) -> usize {
        let now = self.clock.now();
        let expired: Vec<(String, TransactionId)> = {
            let transactions = self.transactions.lock();
            transactions
                .iter()
                .flat_map(|(database, entries)| {
                    entries
                        .values()
                        .filter(|info| info.is_expired(now))
                        .map(move |info| (database.clone(), info.id))
                })
                .collect()
        };

        let destroyed = self.destroy_entries(expired, DestroyReason::Expired);
        if destroyed > 0 {
            log::info!("expired {} transactions", destroyed);
        }
        destroyed
    }

    /// Destroy everything; open entries are killed and removed when returned
    pub fn destroy_all(&self) -> usize {
        let all: Vec<(String, TransactionId)> = {
            let transactions = self.transactions.lock();
            transactions
                .iter()
                .flat_map(|(database, entries)| {
                    entries.keys().map(move |id| (database.clone(), *id))
                })
                .collect()
        };
        self.destroy_entries(all, DestroyReason::Shutdown)
    }

    fn destroy_entries(&self, entries: Vec<(String, TransactionId)>, reason: DestroyReason) -> usize {
        let mut destroyed = 0;
        for (database, id) in entries {
            match self.destroy(&database, id, reason) {
                Ok(DestroyOutcome::Destroyed) => destroyed += 1,
                Ok(DestroyOutcome::Deferred) => {}
                // raced with another remover
                Err(e) => log::debug!("skipping transaction {}: {}", id, e),
            }
        }
        destroyed
    }

    pub fn number_registered(&self) -> usize {
        self.transactions.lock().values().map(HashMap::len).sum()
    }

    pub fn contains(&self, database: &str, id: TransactionId) -> bool {
        self.transactions
            .lock()
            .get(database)
            .is_some_and(|entries| entries.contains_key(&id))
    }

    pub fn info(&self, database: Option<&str>, id: TransactionId) -> Option<TransactionSnapshot> {
        let now = self.clock.now();
        let mut transactions = self.transactions.lock();
        Self::find(&mut transactions, database, id).map(|info| info.snapshot(now))
    }

    /// Status of every entry, grouped by database and ordered by id
    pub fn snapshot(&self) -> RegistrySnapshot {
        let now = self.clock.now();
        let transactions = self.transactions.lock();
        transactions
            .iter()
            .map(|(database, entries)| {
                let mut list: Vec<TransactionSnapshot> =
                    entries.values().map(|info| info.snapshot(now)).collect();
                list.sort_by_key(|s| (s.id.coordinator(), s.id.identifier()));
                (database.clone(), list)
            })
            .collect()
    }
}

impl Drop for TransactionRegistry {
    fn drop(&mut self) {
        let destroyed = self.destroy_all();
        if destroyed > 0 {
            log::info!("transaction registry shut down, destroyed {} transactions", destroyed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::database::Database;
    use crate::storage::MemoryCollectionManager;
    use crate::txn::{TransactionHints, TransactionOptions};
    use crate::wal::FileWal;
    use crate::wal::FileWalOptions;
    use tempfile::TempDir;

    struct Fixture {
        clock: Arc<ManualClock>,
        registry: TransactionRegistry,
        database: Arc<Database>,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let wal = FileWal::open(dir.path(), FileWalOptions::default()).unwrap();
        let config = TransactionConfig::default();
        let database = Arc::new(Database::new(
            1,
            "_system",
            Arc::new(MemoryCollectionManager::new()),
            Arc::new(wal),
            config.clone(),
        ));
        let clock = Arc::new(ManualClock::new(Duration::ZERO));
        let generator = IdGenerator::with_coordinator(7, 100).unwrap();
        let registry = TransactionRegistry::with_parts(config, clock.clone(), generator);
        Fixture {
            clock,
            registry,
            database,
            _dir: dir,
        }
    }

    fn state(db: &Arc<Database>) -> TransactionState {
        TransactionState::new(Arc::clone(db), TransactionOptions::default())
    }

    #[test]
    fn test_insert_assigns_registry_ids() {
        let f = fixture();
        let a = f.registry.insert(state(&f.database), None).unwrap();
        let b = f.registry.insert(state(&f.database), None).unwrap();
        assert_eq!(a.coordinator(), 7);
        assert!(b.identifier() > a.identifier());
        assert_eq!(f.registry.number_registered(), 2);
        assert!(f.registry.contains("_system", a));
    }

    #[test]
    fn test_duplicate_and_zero_ids_rejected() {
        let f = fixture();
        let id = TransactionId::new(7, 4);
        f.registry.insert_with_id(id, state(&f.database), None).unwrap();
        assert!(matches!(
            f.registry.insert_with_id(id, state(&f.database), None),
            Err(RegistryError::AlreadyRegistered { .. })
        ));
        assert!(matches!(
            f.registry.insert_with_id(TransactionId::ZERO, state(&f.database), None),
            Err(RegistryError::InvalidId(_))
        ));
        assert_eq!(f.registry.number_registered(), 1);
    }

    #[test]
    fn test_lease_is_exclusive() {
        let f = fixture();
        let id = f.registry.insert(state(&f.database), None).unwrap();

        let lease = f.registry.open(id, Some("_system")).unwrap();
        assert!(matches!(
            f.registry.open(id, None),
            Err(RegistryError::AlreadyOpen(_))
        ));
        assert!(f.registry.info(None, id).unwrap().open);
        drop(lease);

        let lease = f.registry.open(id, None).unwrap();
        assert_eq!(lease.id(), id);
        lease.release(None).unwrap();
    }

    #[test]
    fn test_commit_is_terminal() {
        let f = fixture();
        let id = f.registry.insert(state(&f.database), None).unwrap();
        let mut lease = f.registry.open(id, None).unwrap();
        lease.begin(TransactionHints::none(), 0).unwrap();
        lease.commit(None).unwrap();

        assert!(matches!(
            f.registry.open(id, None),
            Err(RegistryError::AlreadyCommitted(_))
        ));
        assert_eq!(
            f.registry.info(None, id).unwrap().status,
            LifeCycle::Committed
        );
    }

    #[test]
    fn test_expiry_respects_ttl() {
        let f = fixture();
        let id = f
            .registry
            .insert(state(&f.database), Some(Duration::from_secs(30)))
            .unwrap();

        f.clock.advance(Duration::from_secs(30));
        assert_eq!(f.registry.expire_transactions(), 0);

        f.clock.advance(Duration::from_secs(1));
        assert_eq!(f.registry.expire_transactions(), 1);
        assert!(!f.registry.contains("_system", id));
        assert_eq!(f.registry.number_registered(), 0);
    }

    #[test]
    fn test_destroy_while_open_is_deferred() {
        let f = fixture();
        let id = f.registry.insert(state(&f.database), None).unwrap();
        let lease = f.registry.open(id, None).unwrap();

        assert_eq!(
            f.registry.destroy("_system", id, DestroyReason::Requested).unwrap(),
            DestroyOutcome::Deferred
        );
        assert!(lease.is_killed());
        assert!(f.registry.info(None, id).unwrap().pending_destroy);

        lease.release(None).unwrap();
        assert!(!f.registry.contains("_system", id));
    }

    #[test]
    fn test_snapshot_groups_by_database() {
        let f = fixture();
        f.registry.insert(state(&f.database), None).unwrap();
        f.registry.insert(state(&f.database), None).unwrap();

        let snapshot = f.registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        let list = &snapshot["_system"];
        assert_eq!(list.len(), 2);
        assert!(list[0].id.identifier() < list[1].id.identifier());
        assert_eq!(list[0].status, LifeCycle::Live);
    }
}
