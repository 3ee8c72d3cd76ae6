// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Analysis of replayed WAL markers
//!
//! Groups markers by owning transaction and decides, per transaction, whether
//! it committed, aborted, or never finished. Document markers of transactions
//! without a begin marker belong to single-operation transactions and count
//! as committed.

use super::file::StoredMarker;
use super::MarkerKind;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of one transaction found in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryStatus {
    /// Begin marker without commit or abort
    InProgress,
    Committed,
    Aborted,
}

/// Result of analysing a marker stream
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    pub total_markers: usize,
    pub committed: BTreeSet<u64>,
    pub aborted: BTreeSet<u64>,
    pub unfinished: BTreeSet<u64>,
    /// Document markers per transaction tick
    pub documents: BTreeMap<u64, usize>,
}

impl RecoveryReport {
    pub fn analyze(markers: &[StoredMarker]) -> Self {
        let mut report = RecoveryReport {
            total_markers: markers.len(),
            ..Default::default()
        };
        let mut states: BTreeMap<u64, RecoveryStatus> = BTreeMap::new();
        let mut single_ops: BTreeSet<u64> = BTreeSet::new();

        for stored in markers {
            let trx = stored.marker.transaction_id;
            match stored.marker.kind {
                MarkerKind::BeginTransaction => {
                    states.insert(trx, RecoveryStatus::InProgress);
                }
                MarkerKind::Document => {
                    *report.documents.entry(trx).or_insert(0) += 1;
                    if !states.contains_key(&trx) {
                        single_ops.insert(trx);
                    }
                }
                MarkerKind::CommitTransaction => {
                    states.insert(trx, RecoveryStatus::Committed);
                }
                MarkerKind::AbortTransaction => {
                    states.insert(trx, RecoveryStatus::Aborted);
                }
            }
        }

        for (trx, status) in states {
            single_ops.remove(&trx);
            match status {
                RecoveryStatus::InProgress => report.unfinished.insert(trx),
                RecoveryStatus::Committed => report.committed.insert(trx),
                RecoveryStatus::Aborted => report.aborted.insert(trx),
            };
        }
        report.committed.extend(single_ops);

        log::debug!(
            "WAL analysis: {} markers, {} committed, {} aborted, {} unfinished",
            report.total_markers,
            report.committed.len(),
            report.aborted.len(),
            report.unfinished.len()
        );
        report
    }

    pub fn status(&self, transaction_id: u64) -> Option<RecoveryStatus> {
        if self.committed.contains(&transaction_id) {
            Some(RecoveryStatus::Committed)
        } else if self.aborted.contains(&transaction_id) {
            Some(RecoveryStatus::Aborted)
        } else if self.unfinished.contains(&transaction_id) {
            Some(RecoveryStatus::InProgress)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::WalMarker;

    fn stored(tick: u64, marker: WalMarker) -> StoredMarker {
        StoredMarker { tick, marker }
    }

    #[test]
    fn test_classifies_transactions() {
        let markers = vec![
            stored(1, WalMarker::transaction(MarkerKind::BeginTransaction, 1, 10)),
            stored(2, WalMarker::document(1, 10, 5, 2)),
            stored(3, WalMarker::transaction(MarkerKind::BeginTransaction, 1, 20)),
            stored(4, WalMarker::transaction(MarkerKind::CommitTransaction, 1, 10)),
            stored(5, WalMarker::transaction(MarkerKind::BeginTransaction, 1, 30)),
            stored(6, WalMarker::transaction(MarkerKind::AbortTransaction, 1, 30)),
            stored(7, WalMarker::document(1, 40, 5, 7)),
        ];

        let report = RecoveryReport::analyze(&markers);
        assert_eq!(report.total_markers, 7);
        assert_eq!(report.status(10), Some(RecoveryStatus::Committed));
        assert_eq!(report.status(20), Some(RecoveryStatus::InProgress));
        assert_eq!(report.status(30), Some(RecoveryStatus::Aborted));
        // single-operation transaction without begin marker
        assert_eq!(report.status(40), Some(RecoveryStatus::Committed));
        assert_eq!(report.status(99), None);
        assert_eq!(report.documents.get(&10), Some(&1));
    }
}
