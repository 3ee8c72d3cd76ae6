// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! REST surface for multi-request transactions
//!
//! Requests and responses are plain values so the handler can sit behind any
//! HTTP server. Clients carry a transaction between requests in the
//! `X-ArangoDB-Trx` header as `<coordinator>-<identifier>`.

pub mod error;
pub mod handler;
pub mod request;

pub use error::RestError;
pub use handler::{extract_transaction_id, RestTransactionHandler};
pub use request::{RequestMethod, ResponseCode, RestRequest, RestResponse, TRANSACTION_HEADER};
