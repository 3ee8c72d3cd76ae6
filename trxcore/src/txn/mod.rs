// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction identifiers and the per-transaction state machine
//!
//! # Features
//! - Cluster-wide ids (`coordinator-identifier`) allocated in chunks
//! - Collection registration with access-mode escalation and nesting levels
//! - Collection usage, compaction and read/write locking discipline
//! - Lazy begin markers, commit markers that fall through to abort
//! - Buffered operations reverted last-in-first-out on abort

pub mod budget;
pub mod collection;
pub mod error;
pub mod generator;
pub mod id;
pub mod state;
pub mod types;

pub use budget::MemoryBudget;
pub use collection::TransactionCollection;
pub use error::TransactionError;
pub use generator::IdGenerator;
pub use id::{ParseTransactionIdError, TransactionId};
pub use state::TransactionState;
pub use types::{
    AbortSignal, AccessMode, Hint, TransactionHints, TransactionOptions, TransactionStatus,
};
