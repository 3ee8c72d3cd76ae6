// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Exclusive lease on a registered transaction
//!
//! Opening a transaction moves its state out of the registry into a
//! [`TransactionLease`]. The registry only records that the entry is open,
//! so at most one lease per transaction exists at a time. Dropping a lease
//! hands the state back as a live transaction with its previous ttl.

use super::error::RegistryError;
use super::info::LifeCycle;
use super::TransactionRegistry;
use crate::txn::{TransactionId, TransactionState};
use std::ops::{Deref, DerefMut};
use std::time::Duration;

pub struct TransactionLease<'r> {
    registry: &'r TransactionRegistry,
    database: String,
    id: TransactionId,
    /// `None` only after the lease was consumed by a close
    state: Option<Box<TransactionState>>,
}

impl<'r> TransactionLease<'r> {
    pub(crate) fn new(
        registry: &'r TransactionRegistry,
        database: String,
        id: TransactionId,
        state: Box<TransactionState>,
    ) -> Self {
        Self {
            registry,
            database,
            id,
            state: Some(state),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub(crate) fn registry(&self) -> &'r TransactionRegistry {
        self.registry
    }

    /// Commit the transaction and record it as committed
    pub fn commit(self, ttl: Option<Duration>) -> Result<(), RegistryError> {
        let registry = self.registry;
        registry.close(self, ttl, LifeCycle::Committed)
    }

    /// Abort the transaction and record it as aborted
    pub fn abort(self, ttl: Option<Duration>) -> Result<(), RegistryError> {
        let registry = self.registry;
        registry.close(self, ttl, LifeCycle::Aborted)
    }

    /// Hand the transaction back as live, optionally with a new ttl
    pub fn release(self, ttl: Option<Duration>) -> Result<(), RegistryError> {
        let registry = self.registry;
        registry.close(self, ttl, LifeCycle::Live)
    }

    pub(crate) fn into_parts(mut self) -> (String, TransactionId, Box<TransactionState>) {
        let state = self
            .state
            .take()
            .expect("lease holds its transaction until consumed");
        (std::mem::take(&mut self.database), self.id, state)
    }
}

impl Deref for TransactionLease<'_> {
    type Target = TransactionState;

    fn deref(&self) -> &TransactionState {
        self.state
            .as_deref()
            .expect("lease holds its transaction until consumed")
    }
}

impl DerefMut for TransactionLease<'_> {
    fn deref_mut(&mut self) -> &mut TransactionState {
        self.state
            .as_deref_mut()
            .expect("lease holds its transaction until consumed")
    }
}

impl std::fmt::Debug for TransactionLease<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionLease")
            .field("database", &self.database)
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for TransactionLease<'_> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            let database = std::mem::take(&mut self.database);
            if let Err(e) = self
                .registry
                .return_state(database, self.id, state, None, LifeCycle::Live)
            {
                log::warn!("could not return transaction {} to the registry: {}", self.id, e);
            }
        }
    }
}
