// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! In-memory collections for testing and the CLI

use super::{
    Collection, CollectionId, CollectionManager, DocumentOperation, OperationKind, StorageError,
};
use crate::txn::AccessMode;
use parking_lot::{Condvar, Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    writer: bool,
}

/// Many readers or one writer, with a bounded wait
#[derive(Debug, Default)]
struct CollectionLock {
    state: Mutex<LockState>,
    released: Condvar,
}

impl CollectionLock {
    fn acquire(&self, mode: AccessMode, timeout: Duration) -> bool {
        // no deadline when the timeout runs past what Instant can represent
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        loop {
            let free = match mode {
                AccessMode::None => return true,
                AccessMode::Read => !state.writer,
                AccessMode::Write | AccessMode::Exclusive => !state.writer && state.readers == 0,
            };
            if free {
                break;
            }
            let Some(deadline) = deadline else {
                self.released.wait(&mut state);
                continue;
            };
            if self.released.wait_until(&mut state, deadline).timed_out() {
                let free_now = match mode {
                    AccessMode::Read => !state.writer,
                    _ => !state.writer && state.readers == 0,
                };
                if !free_now {
                    return false;
                }
                break;
            }
        }
        match mode {
            AccessMode::Read => state.readers += 1,
            _ => state.writer = true,
        }
        true
    }

    fn release(&self, mode: AccessMode) {
        let mut state = self.state.lock();
        match mode {
            AccessMode::None => return,
            AccessMode::Read => state.readers = state.readers.saturating_sub(1),
            AccessMode::Write | AccessMode::Exclusive => state.writer = false,
        }
        drop(state);
        self.released.notify_all();
    }

    fn holders(&self) -> (usize, bool) {
        let state = self.state.lock();
        (state.readers, state.writer)
    }
}

/// A collection whose documents live in a map
pub struct MemoryCollection {
    id: CollectionId,
    name: String,
    wait_for_sync: bool,
    revision: AtomicU64,
    documents: RwLock<BTreeMap<String, Value>>,
    lock: CollectionLock,
    compaction_holds: AtomicUsize,
    usage: AtomicUsize,
    uncollected: AtomicU64,
}

impl std::fmt::Debug for MemoryCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCollection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("revision", &self.revision())
            .field("documents", &self.len())
            .finish()
    }
}

impl MemoryCollection {
    pub fn new(id: CollectionId, name: impl Into<String>, wait_for_sync: bool) -> Self {
        Self {
            id,
            name: name.into(),
            wait_for_sync,
            revision: AtomicU64::new(0),
            documents: RwLock::new(BTreeMap::new()),
            lock: CollectionLock::default(),
            compaction_holds: AtomicUsize::new(0),
            usage: AtomicUsize::new(0),
            uncollected: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.documents.read().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.documents.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Insert a new document and return the operation that undoes it
    pub fn insert(
        self: &Arc<Self>,
        key: impl Into<String>,
        value: Value,
        revision: u64,
    ) -> Result<MemoryOperation, StorageError> {
        let key = key.into();
        let mut documents = self.documents.write();
        if documents.contains_key(&key) {
            return Err(StorageError::DuplicateKey {
                collection: self.name.clone(),
                key,
            });
        }
        let size = estimate_size(&key, &value);
        documents.insert(key.clone(), value);
        Ok(self.operation(OperationKind::Insert, key, None, revision, size))
    }

    /// Replace an existing document
    pub fn update(
        self: &Arc<Self>,
        key: impl Into<String>,
        value: Value,
        revision: u64,
    ) -> Result<MemoryOperation, StorageError> {
        let key = key.into();
        let mut documents = self.documents.write();
        let size = estimate_size(&key, &value);
        let slot = documents
            .get_mut(&key)
            .ok_or_else(|| StorageError::DocumentNotFound {
                collection: self.name.clone(),
                key: key.clone(),
            })?;
        let previous = std::mem::replace(slot, value);
        Ok(self.operation(OperationKind::Update, key, Some(previous), revision, size))
    }

    pub fn remove(
        self: &Arc<Self>,
        key: impl Into<String>,
        revision: u64,
    ) -> Result<MemoryOperation, StorageError> {
        let key = key.into();
        let previous = self
            .documents
            .write()
            .remove(&key)
            .ok_or_else(|| StorageError::DocumentNotFound {
                collection: self.name.clone(),
                key: key.clone(),
            })?;
        let size = estimate_size(&key, &previous);
        Ok(self.operation(OperationKind::Remove, key, Some(previous), revision, size))
    }

    fn operation(
        self: &Arc<Self>,
        kind: OperationKind,
        key: String,
        previous: Option<Value>,
        revision: u64,
        size: usize,
    ) -> MemoryOperation {
        MemoryOperation {
            collection: Arc::clone(self),
            kind,
            key,
            previous,
            revision,
            size,
            reverted: false,
        }
    }

    pub fn compaction_holds(&self) -> usize {
        self.compaction_holds.load(Ordering::SeqCst)
    }

    pub fn usage_count(&self) -> usize {
        self.usage.load(Ordering::SeqCst)
    }

    pub fn uncollected(&self) -> u64 {
        self.uncollected.load(Ordering::SeqCst)
    }

    /// Current lock holders as `(readers, writer)`
    pub fn lock_holders(&self) -> (usize, bool) {
        self.lock.holders()
    }
}

fn estimate_size(key: &str, value: &Value) -> usize {
    key.len() + value.to_string().len() + std::mem::size_of::<MemoryOperation>()
}

impl Collection for MemoryCollection {
    fn id(&self) -> CollectionId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn wait_for_sync(&self) -> bool {
        self.wait_for_sync
    }

    fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    fn set_revision(&self, revision: u64, force: bool) {
        if force {
            self.revision.store(revision, Ordering::SeqCst);
        } else {
            self.revision.fetch_max(revision, Ordering::SeqCst);
        }
    }

    fn prevent_compaction(&self) {
        self.compaction_holds.fetch_add(1, Ordering::SeqCst);
    }

    fn allow_compaction(&self) {
        let _ = self
            .compaction_holds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
    }

    fn lock(&self, mode: AccessMode, timeout: Duration) -> Result<(), StorageError> {
        if self.lock.acquire(mode, timeout) {
            Ok(())
        } else {
            Err(StorageError::LockTimeout {
                collection: self.name.clone(),
                mode,
            })
        }
    }

    fn unlock(&self, mode: AccessMode) {
        self.lock.release(mode);
    }

    fn add_uncollected(&self, count: u64) {
        self.uncollected.fetch_add(count, Ordering::SeqCst);
    }
}

/// Undo record for a write applied to a [`MemoryCollection`]
pub struct MemoryOperation {
    collection: Arc<MemoryCollection>,
    kind: OperationKind,
    key: String,
    previous: Option<Value>,
    revision: u64,
    size: usize,
    reverted: bool,
}

impl MemoryOperation {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl DocumentOperation for MemoryOperation {
    fn collection_id(&self) -> CollectionId {
        self.collection.id
    }

    fn kind(&self) -> OperationKind {
        self.kind
    }

    fn revision(&self) -> u64 {
        self.revision
    }

    fn estimated_size(&self) -> usize {
        self.size
    }

    fn revert(&mut self) -> Result<(), StorageError> {
        if self.reverted {
            return Ok(());
        }
        let mut documents = self.collection.documents.write();
        match self.kind {
            OperationKind::Insert => {
                documents.remove(&self.key);
            }
            OperationKind::Update | OperationKind::Remove => {
                let previous = self.previous.take().ok_or_else(|| {
                    StorageError::Internal(format!("no previous version of '{}'", self.key))
                })?;
                documents.insert(self.key.clone(), previous);
            }
        }
        self.reverted = true;
        Ok(())
    }
}

/// Collection manager over [`MemoryCollection`]s
#[derive(Debug)]
pub struct MemoryCollectionManager {
    collections: RwLock<HashMap<CollectionId, Arc<MemoryCollection>>>,
    next_id: AtomicU64,
}

impl Default for MemoryCollectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCollectionManager {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn create_collection(
        &self,
        name: &str,
        wait_for_sync: bool,
    ) -> Result<Arc<MemoryCollection>, StorageError> {
        let mut collections = self.collections.write();
        if collections.values().any(|c| c.name == name) {
            return Err(StorageError::Internal(format!(
                "collection '{}' already exists",
                name
            )));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let collection = Arc::new(MemoryCollection::new(id, name, wait_for_sync));
        collections.insert(id, Arc::clone(&collection));
        Ok(collection)
    }

    pub fn get(&self, id: CollectionId) -> Option<Arc<MemoryCollection>> {
        self.collections.read().get(&id).cloned()
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<MemoryCollection>> {
        self.collections
            .read()
            .values()
            .find(|c| c.name == name)
            .cloned()
    }

    pub fn drop_collection(&self, id: CollectionId) -> Option<Arc<MemoryCollection>> {
        self.collections.write().remove(&id)
    }
}

impl CollectionManager for MemoryCollectionManager {
    fn use_collection(&self, id: CollectionId) -> Result<Arc<dyn Collection>, StorageError> {
        let collection = self
            .get(id)
            .ok_or_else(|| StorageError::CollectionNotFound(id.to_string()))?;
        collection.usage.fetch_add(1, Ordering::SeqCst);
        Ok(collection)
    }

    fn lookup_collection(&self, id: CollectionId) -> Option<Arc<dyn Collection>> {
        self.get(id).map(|c| c as Arc<dyn Collection>)
    }

    fn release_collection(&self, collection: &Arc<dyn Collection>) {
        if let Some(collection) = self.get(collection.id()) {
            let _ = collection
                .usage
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
        }
    }

    fn resolve(&self, name: &str) -> Option<CollectionId> {
        self.by_name(name).map(|c| c.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread;

    #[test]
    fn test_operations_revert() {
        let manager = MemoryCollectionManager::new();
        let users = manager.create_collection("users", false).unwrap();

        let mut insert = users.insert("alice", json!({"age": 30}), 1).unwrap();
        let mut update = users.update("alice", json!({"age": 31}), 2).unwrap();
        assert_eq!(users.get("alice"), Some(json!({"age": 31})));

        update.revert().unwrap();
        assert_eq!(users.get("alice"), Some(json!({"age": 30})));
        insert.revert().unwrap();
        assert!(users.is_empty());
    }

    #[test]
    fn test_remove_reverts_to_previous() {
        let manager = MemoryCollectionManager::new();
        let users = manager.create_collection("users", false).unwrap();
        users.insert("bob", json!(1), 1).unwrap();

        let mut remove = users.remove("bob", 2).unwrap();
        assert!(users.get("bob").is_none());
        remove.revert().unwrap();
        assert_eq!(users.get("bob"), Some(json!(1)));
        // second revert is a no-op
        remove.revert().unwrap();
        assert_eq!(users.len(), 1);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let manager = MemoryCollectionManager::new();
        let users = manager.create_collection("users", false).unwrap();
        users.insert("k", json!(null), 1).unwrap();
        assert!(matches!(
            users.insert("k", json!(null), 2),
            Err(StorageError::DuplicateKey { .. })
        ));
    }

    #[test]
    fn test_usage_counting() {
        let manager = MemoryCollectionManager::new();
        let users = manager.create_collection("users", false).unwrap();
        let handle = manager.use_collection(users.id()).unwrap();
        assert_eq!(users.usage_count(), 1);
        manager.release_collection(&handle);
        assert_eq!(users.usage_count(), 0);
        assert!(manager.use_collection(999).is_err());
        assert_eq!(manager.resolve("users"), Some(users.id()));
    }

    #[test]
    fn test_writer_excludes_readers_until_timeout() {
        let manager = MemoryCollectionManager::new();
        let users = manager.create_collection("users", false).unwrap();
        users.lock(AccessMode::Write, Duration::from_millis(10)).unwrap();

        let err = users
            .lock(AccessMode::Read, Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, StorageError::LockTimeout { .. }));

        users.unlock(AccessMode::Write);
        users.lock(AccessMode::Read, Duration::from_millis(10)).unwrap();
        users.lock(AccessMode::Read, Duration::from_millis(10)).unwrap();
        assert_eq!(users.lock_holders(), (2, false));
    }

    #[test]
    fn test_unbounded_timeout_waits_without_deadline() {
        let manager = MemoryCollectionManager::new();
        let users = manager.create_collection("users", false).unwrap();
        users.lock(AccessMode::Read, Duration::MAX).unwrap();

        let waiter = {
            let users = Arc::clone(&users);
            thread::spawn(move || users.lock(AccessMode::Write, Duration::MAX))
        };
        thread::sleep(Duration::from_millis(20));
        users.unlock(AccessMode::Read);

        assert!(waiter.join().unwrap().is_ok());
        assert_eq!(users.lock_holders(), (0, true));
    }

    #[test]
    fn test_waiting_writer_is_woken() {
        let manager = MemoryCollectionManager::new();
        let users = manager.create_collection("users", false).unwrap();
        users.lock(AccessMode::Read, Duration::from_secs(1)).unwrap();

        let waiter = {
            let users = Arc::clone(&users);
            thread::spawn(move || users.lock(AccessMode::Exclusive, Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        users.unlock(AccessMode::Read);

        assert!(waiter.join().unwrap().is_ok());
        assert_eq!(users.lock_holders(), (0, true));
    }

    #[test]
    fn test_revision_only_moves_forward_unless_forced() {
        let collection = MemoryCollection::new(1, "_system", false);
        assert!(collection.is_system());
        collection.set_revision(10, false);
        collection.set_revision(5, false);
        assert_eq!(collection.revision(), 10);
        collection.set_revision(5, true);
        assert_eq!(collection.revision(), 5);
    }
}
