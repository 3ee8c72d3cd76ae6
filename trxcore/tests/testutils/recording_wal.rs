//! In-memory WAL for observing marker traffic

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use trxcore::wal::{MarkerKind, WalMarker, WalSlot};
use trxcore::{WalError, WalManager};

/// Records every marker written and fails on demand per marker kind
pub struct RecordingWal {
    markers: Mutex<Vec<WalMarker>>,
    failures: Mutex<HashMap<MarkerKind, WalError>>,
    running: Mutex<HashSet<u64>>,
    sequence: AtomicU64,
    throttled: AtomicBool,
    throttle_wait: Duration,
}

impl RecordingWal {
    pub fn new() -> Self {
        Self::with_throttle_wait(Duration::from_millis(200))
    }

    pub fn with_throttle_wait(throttle_wait: Duration) -> Self {
        Self {
            markers: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            running: Mutex::new(HashSet::new()),
            sequence: AtomicU64::new(0),
            throttled: AtomicBool::new(false),
            throttle_wait,
        }
    }

    /// Make every write of `kind` fail with `error`
    pub fn fail_on(&self, kind: MarkerKind, error: WalError) {
        self.failures.lock().insert(kind, error);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    pub fn set_throttled(&self, throttled: bool) {
        self.throttled.store(throttled, Ordering::SeqCst);
    }

    pub fn markers(&self) -> Vec<WalMarker> {
        self.markers.lock().clone()
    }

    pub fn kinds(&self) -> Vec<MarkerKind> {
        self.markers.lock().iter().map(|m| m.kind).collect()
    }

    pub fn count(&self, kind: MarkerKind) -> usize {
        self.markers.lock().iter().filter(|m| m.kind == kind).count()
    }

    pub fn running(&self) -> usize {
        self.running.lock().len()
    }
}

impl WalManager for RecordingWal {
    fn allocate_and_write(
        &self,
        marker: &WalMarker,
        _wait_for_sync: bool,
    ) -> Result<WalSlot, WalError> {
        if let Some(error) = self.failures.lock().get(&marker.kind) {
            return Err(error.clone());
        }
        let tick = self.next_sequence();
        self.markers.lock().push(*marker);
        Ok(WalSlot {
            tick,
            logfile_id: 1,
        })
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn register_transaction(&self, transaction_id: u64) -> Result<(), WalError> {
        self.running.lock().insert(transaction_id);
        Ok(())
    }

    fn unregister_transaction(&self, transaction_id: u64) {
        self.running.lock().remove(&transaction_id);
    }

    fn can_be_throttled(&self) -> bool {
        true
    }

    fn is_throttled(&self) -> bool {
        self.throttled.load(Ordering::SeqCst)
    }

    fn max_throttle_wait(&self) -> Duration {
        self.throttle_wait
    }
}
