// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Begin/commit/abort marker emission
//!
//! Markers are only written for multi-operation write transactions; a
//! single-operation transaction's document marker stands on its own. The
//! begin marker is written lazily by the first document operation and at
//! most once. Commit and abort markers follow only if a begin marker exists.

use super::TransactionState;
use crate::txn::error::TransactionError;
use crate::txn::types::Hint;
use crate::wal::{MarkerKind, WalMarker};

impl TransactionState {
    fn need_write_marker(&self, is_begin: bool) -> bool {
        if self.is_read_only_transaction() || self.is_single_operation() {
            return false;
        }
        is_begin || (self.nesting_level == 0 && self.begin_written)
    }

    fn write_marker(&self, kind: MarkerKind, wait_for_sync: bool) -> Result<(), TransactionError> {
        let marker = WalMarker::transaction(kind, self.database.id(), self.tick);
        match self.database.wal().allocate_and_write(&marker, wait_for_sync) {
            Ok(_) => Ok(()),
            Err(e) => {
                log::warn!(
                    "could not write {:?} marker for transaction {}: {}",
                    kind,
                    self.id,
                    e
                );
                Err(e.into())
            }
        }
    }

    pub(super) fn write_begin_marker(&mut self) -> Result<(), TransactionError> {
        if self.begin_written || !self.need_write_marker(true) || self.hints.has(Hint::NoBeginMarker)
        {
            return Ok(());
        }
        self.write_marker(MarkerKind::BeginTransaction, false)?;
        self.begin_written = true;
        Ok(())
    }

    pub(super) fn write_commit_marker(&self) -> Result<(), TransactionError> {
        if !self.need_write_marker(false) {
            return Ok(());
        }
        self.write_marker(MarkerKind::CommitTransaction, self.wait_for_sync)
    }

    pub(super) fn write_abort_marker(&self) -> Result<(), TransactionError> {
        if !self.need_write_marker(false) || self.hints.has(Hint::NoAbortMarker) {
            return Ok(());
        }
        self.write_marker(MarkerKind::AbortTransaction, false)
    }
}
