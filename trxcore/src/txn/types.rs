// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Access modes, statuses and behavioral hints

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Access mode of a transaction or of one of its collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    None,
    Read,
    Write,
    Exclusive,
}

impl AccessMode {
    /// Write and exclusive access both modify data
    pub fn is_write(self) -> bool {
        matches!(self, AccessMode::Write | AccessMode::Exclusive)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccessMode::None => "none",
            AccessMode::Read => "read",
            AccessMode::Write => "write",
            AccessMode::Exclusive => "exclusive",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction lifecycle states
///
/// Transitions are monotonic: `Created -> Running -> {Committed | Aborted}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Created,
    Running,
    Committed,
    Aborted,
}

impl TransactionStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, TransactionStatus::Committed | TransactionStatus::Aborted)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Created => "created",
            TransactionStatus::Running => "running",
            TransactionStatus::Committed => "committed",
            TransactionStatus::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Behavioral flags passed to `begin`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Hint {
    /// The transaction wraps exactly one document operation
    SingleOperation = 1 << 0,
    /// Lock every collection, including read-only ones
    LockEntirely = 1 << 1,
    /// Never take collection locks; an outer caller holds them
    LockNever = 1 << 2,
    NoBeginMarker = 1 << 3,
    NoAbortMarker = 1 << 4,
    /// Skip waiting for the WAL to lift write throttling
    NoThrottling = 1 << 5,
    NoCompactionLock = 1 << 6,
    /// Look collections up without taking a usage reference
    NoUsageLock = 1 << 7,
    /// Replaying the WAL; per-operation syncs are suppressed
    Recovery = 1 << 8,
}

/// A set of [`Hint`]s
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionHints(u32);

impl TransactionHints {
    pub fn none() -> Self {
        Self(0)
    }

    pub fn has(&self, hint: Hint) -> bool {
        self.0 & hint as u32 != 0
    }

    pub fn set(&mut self, hint: Hint) {
        self.0 |= hint as u32;
    }

    pub fn unset(&mut self, hint: Hint) {
        self.0 &= !(hint as u32);
    }

    pub fn with(mut self, hint: Hint) -> Self {
        self.set(hint);
        self
    }
}

impl FromIterator<Hint> for TransactionHints {
    fn from_iter<I: IntoIterator<Item = Hint>>(iter: I) -> Self {
        iter.into_iter()
            .fold(TransactionHints::none(), TransactionHints::with)
    }
}

impl From<Hint> for TransactionHints {
    fn from(hint: Hint) -> Self {
        TransactionHints::none().with(hint)
    }
}

/// Per-transaction options chosen by the creator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionOptions {
    /// Overrides the configured collection lock timeout
    pub lock_timeout: Option<Duration>,
    /// Force a synchronous commit marker
    pub wait_for_sync: bool,
    /// Overrides the configured implicit-collection policy
    pub allow_implicit_collections: Option<bool>,
}

/// Thread-safe kill flag shared between a registry entry and its transaction
///
/// The registry triggers it when asked to destroy a transaction that is
/// currently leased; the lease holder observes it on its next operation.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_set_operations() {
        let mut hints: TransactionHints = [Hint::SingleOperation, Hint::NoThrottling]
            .into_iter()
            .collect();
        assert!(hints.has(Hint::SingleOperation));
        assert!(hints.has(Hint::NoThrottling));
        assert!(!hints.has(Hint::LockNever));

        hints.unset(Hint::SingleOperation);
        assert!(!hints.has(Hint::SingleOperation));
        assert!(TransactionHints::from(Hint::Recovery).has(Hint::Recovery));
    }

    #[test]
    fn test_access_mode_ordering() {
        assert!(AccessMode::Write > AccessMode::Read);
        assert!(AccessMode::Exclusive.is_write());
        assert!(!AccessMode::Read.is_write());
    }

    #[test]
    fn test_abort_signal_is_shared() {
        let signal = AbortSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_triggered());
        signal.trigger();
        assert!(observer.is_triggered());
    }
}
