// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Embedded sub-operations on a parent transaction
//!
//! A [`TransactionProxy`] lets a single-collection operation run inside a
//! parent transaction taken from the registry. The proxy works one nesting
//! level below the parent and adds its collection at that level, so it can
//! only read new collections or write collections the parent registered.
//! Without a parent the proxy owns a fresh standalone transaction at level 0.

use super::error::RegistryError;
use super::lease::TransactionLease;
use super::TransactionRegistry;
use crate::database::Database;
use crate::storage::CollectionId;
use crate::txn::{
    AccessMode, TransactionError, TransactionHints, TransactionId, TransactionOptions,
    TransactionState,
};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

enum Origin<'r> {
    Embedded(TransactionLease<'r>),
    Standalone(Box<TransactionState>),
}

pub struct TransactionProxy<'r> {
    origin: Origin<'r>,
    level: u32,
    finished: bool,
}

impl<'r> TransactionProxy<'r> {
    /// Attach to `parent`, or start standalone when `parent` is zero
    pub fn new(
        registry: &'r TransactionRegistry,
        database: &Arc<Database>,
        parent: TransactionId,
        collection: CollectionId,
        access: AccessMode,
    ) -> Result<Self, RegistryError> {
        if parent.is_zero() {
            let mut state = Box::new(TransactionState::new(
                Arc::clone(database),
                TransactionOptions::default(),
            ));
            state.add_collection(collection, access, 0, false, true)?;
            return Ok(Self {
                origin: Origin::Standalone(state),
                level: 0,
                finished: false,
            });
        }

        let mut lease = registry.open(parent, Some(database.name()))?;
        let level = lease.enter_nested();
        let implicit = lease.allows_implicit();
        if let Err(e) = lease.add_collection(collection, access, level, false, implicit) {
            lease.leave_nested();
            return Err(e.into());
        }
        log::debug!("embedded operation on transaction {} at level {}", parent, level);

        Ok(Self {
            origin: Origin::Embedded(lease),
            level,
            finished: false,
        })
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self.origin, Origin::Embedded(_))
    }

    /// Begin at the proxy's level; a nested begin runs with the parent's hints
    pub fn begin(&mut self, hints: TransactionHints) -> Result<(), TransactionError> {
        let level = self.level;
        self.deref_mut().begin(hints, level)
    }

    /// Commit (`success`) or abort the sub-operation
    pub fn finish(mut self, success: bool) -> Result<(), TransactionError> {
        self.finished = true;
        self.complete(success)
    }

    fn complete(&mut self, success: bool) -> Result<(), TransactionError> {
        let level = self.level;
        let state = self.deref_mut();
        let result = if success {
            state.commit(level)
        } else {
            state.abort(level)
        };
        if level > 0 {
            state.leave_nested();
        }
        result
    }
}

impl Deref for TransactionProxy<'_> {
    type Target = TransactionState;

    fn deref(&self) -> &TransactionState {
        match &self.origin {
            Origin::Embedded(lease) => &**lease,
            Origin::Standalone(state) => &**state,
        }
    }
}

impl DerefMut for TransactionProxy<'_> {
    fn deref_mut(&mut self) -> &mut TransactionState {
        match &mut self.origin {
            Origin::Embedded(lease) => &mut **lease,
            Origin::Standalone(state) => &mut **state,
        }
    }
}

impl Drop for TransactionProxy<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Err(e) = self.complete(false) {
            log::debug!("unfinished sub-operation at level {} not aborted: {}", self.level, e);
        }
    }
}
