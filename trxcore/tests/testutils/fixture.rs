//! Shared fixture: one database over in-memory collections

use super::recording_wal::RecordingWal;
use std::sync::Arc;
use std::time::Duration;
use trxcore::storage::{Collection, MemoryCollection};
use trxcore::{
    AccessMode, Database, IdGenerator, ManualClock, MemoryCollectionManager, TransactionConfig,
    TransactionHints, TransactionOptions, TransactionRegistry, TransactionState,
};

pub const COORDINATOR: u64 = 4343;

pub struct Fixture {
    pub wal: Arc<RecordingWal>,
    pub collections: Arc<MemoryCollectionManager>,
    pub database: Arc<Database>,
    pub clock: Arc<ManualClock>,
    pub registry: Arc<TransactionRegistry>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(TransactionConfig::default())
    }

    pub fn with_config(config: TransactionConfig) -> Self {
        Self::build(config, COORDINATOR)
    }

    pub fn with_coordinator(coordinator: u64) -> Self {
        Self::build(TransactionConfig::default(), coordinator)
    }

    fn build(config: TransactionConfig, coordinator: u64) -> Self {
        let wal = Arc::new(RecordingWal::new());
        let collections = Arc::new(MemoryCollectionManager::new());
        let database = Arc::new(Database::new(
            1,
            "_system",
            collections.clone(),
            wal.clone(),
            config.clone(),
        ));
        let clock = Arc::new(ManualClock::new(Duration::from_secs(1000)));
        let generator =
            IdGenerator::with_coordinator(coordinator, 100).expect("valid chunk size");
        let registry = Arc::new(TransactionRegistry::with_parts(
            config,
            clock.clone(),
            generator,
        ));
        Self {
            wal,
            collections,
            database,
            clock,
            registry,
        }
    }

    pub fn collection(&self, name: &str) -> Arc<MemoryCollection> {
        self.collections
            .create_collection(name, false)
            .expect("collection created")
    }

    pub fn state(&self) -> TransactionState {
        TransactionState::new(self.database.clone(), TransactionOptions::default())
    }

    /// A running transaction with `collections` registered for `access`
    pub fn running(
        &self,
        collections: &[&Arc<MemoryCollection>],
        access: AccessMode,
    ) -> TransactionState {
        let mut state = self.state();
        for collection in collections {
            state
                .add_collection(collection.id(), access, 0, false, true)
                .expect("collection registered");
        }
        state
            .begin(TransactionHints::none(), 0)
            .expect("transaction started");
        state
    }
}
