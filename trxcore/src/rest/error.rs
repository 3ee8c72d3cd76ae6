// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Handler errors and their mapping to response codes

use super::request::{ResponseCode, RestResponse};
use crate::registry::RegistryError;
use crate::storage::StorageError;
use crate::txn::{TransactionError, TransactionId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RestError {
    #[error("Transaction IDs in URL and headers do not match")]
    IdMismatch,

    #[error("Transaction ID is not properly formatted: '{0}'")]
    MalformedId(String),

    #[error("Transaction ID is missing")]
    MissingId,

    #[error("Receiving coordinator is not assigned to transaction {0}")]
    ForeignCoordinator(TransactionId),

    #[error("Transaction {0} is not listed within registry")]
    NotListed(TransactionId),

    #[error("bad parameter: {0}")]
    BadParameter(String),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("unknown path '{0}'")]
    UnknownPath(String),

    #[error("request canceled")]
    Canceled,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl RestError {
    /// Id extraction failures; the request is canceled before any lookup
    pub fn is_request_canceled(&self) -> bool {
        matches!(
            self,
            RestError::IdMismatch
                | RestError::MalformedId(_)
                | RestError::MissingId
                | RestError::ForeignCoordinator(_)
                | RestError::NotListed(_)
        )
    }

    pub fn response_code(&self) -> ResponseCode {
        match self {
            RestError::IdMismatch
            | RestError::MalformedId(_)
            | RestError::MissingId
            | RestError::ForeignCoordinator(_)
            | RestError::BadParameter(_) => ResponseCode::BadRequest,
            RestError::NotListed(_) | RestError::UnknownPath(_) => ResponseCode::NotFound,
            RestError::MethodNotAllowed => ResponseCode::MethodNotAllowed,
            RestError::Canceled => ResponseCode::Gone,
            RestError::Internal(_) => ResponseCode::InternalServerError,
            RestError::Registry(e) => registry_code(e),
            RestError::Transaction(e) => transaction_code(e),
        }
    }

    /// Failures on our side rather than the client's
    pub fn is_internal(&self) -> bool {
        self.response_code() == ResponseCode::InternalServerError
    }
}

fn registry_code(error: &RegistryError) -> ResponseCode {
    match error {
        RegistryError::NotFound(_) => ResponseCode::NotFound,
        RegistryError::AlreadyRegistered { .. }
        | RegistryError::AlreadyOpen(_)
        | RegistryError::AlreadyCommitted(_)
        | RegistryError::AlreadyAborted(_)
        | RegistryError::NotOpen(_) => ResponseCode::Conflict,
        RegistryError::InvalidId(_) => ResponseCode::BadRequest,
        RegistryError::Config(_) => ResponseCode::InternalServerError,
        RegistryError::Transaction(e) => transaction_code(e),
    }
}

fn transaction_code(error: &TransactionError) -> ResponseCode {
    match error {
        TransactionError::UnregisteredCollectionAccess { .. }
        | TransactionError::InvalidParameter(_) => ResponseCode::BadRequest,
        TransactionError::CollectionNotFound(_) => ResponseCode::NotFound,
        TransactionError::ReadOnlyModeViolation(_) => ResponseCode::Forbidden,
        TransactionError::WriteThrottleTimeout { .. } => ResponseCode::ServiceUnavailable,
        TransactionError::InvalidStatus { .. } => ResponseCode::Conflict,
        TransactionError::Killed => ResponseCode::Gone,
        TransactionError::Storage(e) => match e {
            StorageError::CollectionNotFound(_) | StorageError::DocumentNotFound { .. } => {
                ResponseCode::NotFound
            }
            StorageError::DuplicateKey { .. } => ResponseCode::Conflict,
            StorageError::LockTimeout { .. } | StorageError::Internal(_) => {
                ResponseCode::InternalServerError
            }
        },
        TransactionError::Wal(_)
        | TransactionError::MemoryLimitExceeded { .. }
        | TransactionError::ActionFailed(_) => ResponseCode::InternalServerError,
    }
}

impl From<&RestError> for RestResponse {
    fn from(error: &RestError) -> Self {
        RestResponse::error(error.response_code(), error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::WalError;

    #[test]
    fn test_status_mapping() {
        let id = TransactionId::new(1, 4);
        assert_eq!(RestError::IdMismatch.response_code().as_u16(), 400);
        assert_eq!(RestError::NotListed(id).response_code().as_u16(), 404);
        assert_eq!(
            RestError::from(RegistryError::AlreadyOpen(id)).response_code().as_u16(),
            409
        );
        assert_eq!(
            RestError::from(TransactionError::ReadOnlyModeViolation("c".into()))
                .response_code()
                .as_u16(),
            403
        );
        assert_eq!(
            RestError::from(TransactionError::WriteThrottleTimeout { waited_ms: 10 })
                .response_code()
                .as_u16(),
            503
        );
        assert_eq!(RestError::Canceled.response_code().as_u16(), 410);
        assert!(RestError::from(TransactionError::Wal(WalError::Internal("x".into()))).is_internal());
    }

    #[test]
    fn test_canceled_classification() {
        assert!(RestError::MalformedId("76998".into()).is_request_canceled());
        assert!(!RestError::MethodNotAllowed.is_request_canceled());
    }
}
