// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Registry error types

use crate::config::ConfigError;
use crate::txn::{TransactionError, TransactionId};
use thiserror::Error;

/// Admission and lifecycle errors of the transaction registry
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("transaction {id} is already registered in database '{database}'")]
    AlreadyRegistered {
        database: String,
        id: TransactionId,
    },

    #[error("transaction {0} not found")]
    NotFound(TransactionId),

    #[error("transaction {0} is already open")]
    AlreadyOpen(TransactionId),

    #[error("transaction {0} is already committed")]
    AlreadyCommitted(TransactionId),

    #[error("transaction {0} is already aborted")]
    AlreadyAborted(TransactionId),

    #[error("transaction {0} is not open")]
    NotOpen(TransactionId),

    #[error("invalid transaction id {0}")]
    InvalidId(TransactionId),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}
