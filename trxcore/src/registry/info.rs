// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Registry entries and their status snapshots

use crate::txn::{AbortSignal, TransactionId, TransactionState, TransactionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Registry-level lifecycle of a transaction; terminal values are permanent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifeCycle {
    Live,
    Committed,
    Aborted,
}

impl LifeCycle {
    pub fn is_terminal(self) -> bool {
        self != LifeCycle::Live
    }

    pub(crate) fn from_status(status: TransactionStatus) -> Self {
        match status {
            TransactionStatus::Committed => LifeCycle::Committed,
            TransactionStatus::Aborted => LifeCycle::Aborted,
            TransactionStatus::Created | TransactionStatus::Running => LifeCycle::Live,
        }
    }
}

impl fmt::Display for LifeCycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifeCycle::Live => "live",
            LifeCycle::Committed => "committed",
            LifeCycle::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Where the transaction object currently lives
pub(crate) enum Slot {
    /// Parked in the registry
    Available(Box<TransactionState>),
    /// Moved out to a lease holder
    Leased,
}

/// One registered transaction
pub(crate) struct TransactionInfo {
    pub(crate) database: String,
    pub(crate) id: TransactionId,
    pub(crate) slot: Slot,
    pub(crate) lifecycle: LifeCycle,
    pub(crate) ttl: Duration,
    /// Clock reading after which the entry may be swept
    pub(crate) expires_at: Duration,
    /// Destroy was requested while leased (PendingDestroy)
    pub(crate) destroy_requested: bool,
    pub(crate) abort_signal: AbortSignal,
    pub(crate) registered_at: DateTime<Utc>,
}

impl TransactionInfo {
    pub(crate) fn new(state: Box<TransactionState>, ttl: Duration, now: Duration) -> Self {
        Self {
            database: state.database_name().to_string(),
            id: state.id(),
            abort_signal: state.abort_signal(),
            slot: Slot::Available(state),
            lifecycle: LifeCycle::Live,
            ttl,
            expires_at: now.saturating_add(ttl),
            destroy_requested: false,
            registered_at: Utc::now(),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        matches!(self.slot, Slot::Leased)
    }

    pub(crate) fn is_pending_destroy(&self) -> bool {
        self.is_open() && self.destroy_requested
    }

    /// Eligible for the expiry sweep at clock reading `now`
    pub(crate) fn is_expired(&self, now: Duration) -> bool {
        !self.is_open() && (self.destroy_requested || now > self.expires_at)
    }

    pub(crate) fn into_state(self) -> Option<Box<TransactionState>> {
        match self.slot {
            Slot::Available(state) => Some(state),
            Slot::Leased => None,
        }
    }

    pub(crate) fn snapshot(&self, now: Duration) -> TransactionSnapshot {
        TransactionSnapshot {
            id: self.id,
            database: self.database.clone(),
            open: self.is_open(),
            pending_destroy: self.is_pending_destroy(),
            status: self.lifecycle,
            ttl: self.ttl.as_secs_f64(),
            expires_in: self.expires_at.saturating_sub(now).as_secs_f64(),
            registered_at: self.registered_at,
        }
    }
}

/// Serializable view of one registry entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSnapshot {
    pub id: TransactionId,
    pub database: String,
    pub open: bool,
    pub pending_destroy: bool,
    pub status: LifeCycle,
    /// Seconds
    pub ttl: f64,
    /// Seconds until the entry becomes eligible for expiry
    pub expires_in: f64,
    pub registered_at: DateTime<Utc>,
}

/// All entries, grouped by database
pub type RegistrySnapshot = BTreeMap<String, Vec<TransactionSnapshot>>;
