// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! trxcore - transaction lifecycle core
//!
//! A registry that leases, commits, aborts and expires active transactions
//! across databases and cluster coordinators, layered on a per-transaction
//! state machine that tracks the collections a transaction touches, the
//! access mode it holds and the write-ahead-log markers it must emit.
//!
//! # Features
//!
//! - **Leased transactions**: a transaction started by one request can be
//!   continued and committed by a later one via [`TransactionRegistry::open`]
//! - **Expiry**: closed transactions linger for a TTL and are then swept
//! - **Nesting**: sub-operations piggyback on an outer transaction through a
//!   nesting level counter
//! - **Durability markers**: begin/commit/abort markers go through a
//!   [`WalManager`]; a failed commit marker always ends in an abort
//!
//! # Usage
//!
//! ```ignore
//! let registry = TransactionRegistry::new(TransactionConfig::default())?;
//! let mut state = TransactionState::new(database.clone(), TransactionOptions::default());
//! state.add_collection(cid, AccessMode::Write, 0, false, true)?;
//! state.begin(TransactionHints::none(), 0)?;
//! let id = registry.insert(state, None)?;
//!
//! // later, possibly from another thread
//! let lease = registry.open(id, None)?;
//! lease.commit(None)?;
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod database;
pub mod registry;
pub mod rest;
pub mod storage;
pub mod txn;
pub mod wal;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{ConfigError, TransactionConfig};
pub use database::Database;
pub use registry::{
    DestroyOutcome, DestroyReason, LifeCycle, RegistryError, RegistrySnapshot, TransactionLease,
    TransactionProxy, TransactionRegistry, TransactionSnapshot,
};
pub use rest::{RequestMethod, RestRequest, RestResponse, RestTransactionHandler};
pub use storage::{ActionExecutor, MemoryCollectionManager, ScriptExecutor};
pub use txn::{
    AccessMode, Hint, IdGenerator, TransactionError, TransactionHints, TransactionId,
    TransactionOptions, TransactionState, TransactionStatus,
};
pub use wal::{FileWal, WalError, WalManager};

/// trxcore version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
