// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! `/transaction` request handler
//!
//! | Method | Suffix | Effect |
//! |--------|--------|--------|
//! | POST   | none   | run `action` in a fresh transaction and commit it |
//! | POST   | start  | begin a transaction and register it; id in `X-ArangoDB-Trx` |
//! | PUT    | id     | commit a registered transaction |
//! | DELETE | id     | abort a registered transaction |
//! | GET    | [id]   | status of one or all registered transactions |
//!
//! For PUT, DELETE and GET the id may come from the URL suffix, the
//! `X-ArangoDB-Trx` header, or both, in which case they must be identical.

use super::error::RestError;
use super::request::{RequestMethod, RestRequest, RestResponse, TRANSACTION_HEADER};
use crate::config::MAX_TIMEOUT;
use crate::database::Database;
use crate::registry::{LifeCycle, TransactionRegistry};
use crate::storage::ActionExecutor;
use crate::txn::{
    AccessMode, TransactionError, TransactionHints, TransactionId, TransactionOptions,
    TransactionState, TransactionStatus,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NameList {
    One(String),
    Many(Vec<String>),
}

impl Default for NameList {
    fn default() -> Self {
        NameList::Many(Vec::new())
    }
}

impl NameList {
    fn names(&self) -> &[String] {
        match self {
            NameList::One(name) => std::slice::from_ref(name),
            NameList::Many(names) => names,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct CollectionLists {
    #[serde(default)]
    read: NameList,
    #[serde(default)]
    write: NameList,
    #[serde(default)]
    exclusive: NameList,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionBody {
    #[serde(default)]
    collections: CollectionLists,
    #[serde(default)]
    action: Option<Value>,
    /// Seconds
    lock_timeout: Option<f64>,
    #[serde(default)]
    wait_for_sync: bool,
    allow_implicit: Option<bool>,
    /// Seconds a started transaction stays registered between requests
    ttl: Option<f64>,
}

fn seconds(field: &str, value: Option<f64>) -> Result<Option<Duration>, RestError> {
    value
        .map(|secs| match Duration::try_from_secs_f64(secs) {
            Ok(duration) if duration <= MAX_TIMEOUT => Ok(duration),
            Ok(_) => Err(RestError::BadParameter(format!(
                "'{}' must not exceed {} seconds",
                field,
                MAX_TIMEOUT.as_secs()
            ))),
            Err(_) => Err(RestError::BadParameter(format!(
                "'{}' must be a non-negative number",
                field
            ))),
        })
        .transpose()
}

/// Pick the transaction id of a request
///
/// Header and single URL suffix must agree when both are present. The id
/// must have been minted by `registry` and still be listed in it.
pub fn extract_transaction_id(
    request: &RestRequest,
    registry: &TransactionRegistry,
) -> Result<TransactionId, RestError> {
    let header = request.header(TRANSACTION_HEADER).filter(|v| !v.is_empty());
    let url = match request.suffixes() {
        [suffix] if !suffix.is_empty() => Some(suffix.as_str()),
        _ => None,
    };

    let selected = match (header, url) {
        (Some(header), Some(url)) if header != url => return Err(RestError::IdMismatch),
        (Some(value), _) | (None, Some(value)) => value,
        (None, None) => return Err(RestError::MissingId),
    };

    let id = TransactionId::parse_or_zero(selected);
    if id.is_zero() {
        return Err(RestError::MalformedId(selected.to_string()));
    }
    if id.coordinator() != registry.registry_id() {
        return Err(RestError::ForeignCoordinator(id));
    }
    if registry.info(None, id).is_none() {
        return Err(RestError::NotListed(id));
    }
    Ok(id)
}

pub struct RestTransactionHandler {
    registry: Arc<TransactionRegistry>,
    database: Arc<Database>,
    executor: Arc<dyn ActionExecutor>,
    canceled: AtomicBool,
}

impl RestTransactionHandler {
    pub fn new(
        registry: Arc<TransactionRegistry>,
        database: Arc<Database>,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        Self {
            registry,
            database,
            executor,
            canceled: AtomicBool::new(false),
        }
    }

    /// Cancel the handler; actions that have not started yet are refused
    pub fn cancel(&self) -> bool {
        self.canceled.store(true, Ordering::SeqCst);
        true
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub fn execute(&self, request: &RestRequest) -> RestResponse {
        let result = match request.method() {
            RequestMethod::Post => self.execute_post(request),
            RequestMethod::Put => self.execute_close(request, LifeCycle::Committed),
            RequestMethod::Delete => self.execute_close(request, LifeCycle::Aborted),
            RequestMethod::Get => self.execute_get(request),
            _ => Err(RestError::MethodNotAllowed),
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                if e.is_internal() {
                    log::error!("transaction request failed: {}", e);
                } else {
                    log::debug!("transaction request rejected: {}", e);
                }
                RestResponse::from(&e)
            }
        }
    }

    fn parse_body(request: &RestRequest) -> Result<TransactionBody, RestError> {
        if !request.body().is_object() {
            return Err(RestError::BadParameter(
                "request body must be a JSON object".to_string(),
            ));
        }
        serde_json::from_value(request.body().clone())
            .map_err(|e| RestError::BadParameter(e.to_string()))
    }

    /// Create a transaction with the body's collections registered at level 0
    fn create_transaction(&self, body: &TransactionBody) -> Result<TransactionState, RestError> {
        let options = TransactionOptions {
            lock_timeout: seconds("lockTimeout", body.lock_timeout)?,
            wait_for_sync: body.wait_for_sync,
            allow_implicit_collections: body.allow_implicit,
        };
        let mut state = TransactionState::new(Arc::clone(&self.database), options);

        let collections = &body.collections;
        for (access, list) in [
            (AccessMode::Read, &collections.read),
            (AccessMode::Write, &collections.write),
            (AccessMode::Exclusive, &collections.exclusive),
        ] {
            for name in list.names() {
                let cid = self
                    .database
                    .collections()
                    .resolve(name)
                    .ok_or_else(|| TransactionError::CollectionNotFound(name.clone()))?;
                state.add_collection(cid, access, 0, false, true)?;
            }
        }
        Ok(state)
    }

    fn execute_post(&self, request: &RestRequest) -> Result<RestResponse, RestError> {
        let start = match request.suffixes() {
            [] => false,
            [suffix] if suffix == "start" => true,
            suffixes => return Err(RestError::UnknownPath(suffixes.join("/"))),
        };
        let body = Self::parse_body(request)?;
        if !start && body.action.is_none() {
            return Err(RestError::BadParameter("missing 'action'".to_string()));
        }
        let ttl = seconds("ttl", body.ttl)?;

        if self.is_canceled() {
            return Err(RestError::Canceled);
        }

        let mut state = self.create_transaction(&body)?;
        state.begin(TransactionHints::none(), 0)?;

        let result = match &body.action {
            Some(action) => match self.executor.execute(&mut state, action) {
                Ok(result) => Some(result),
                Err(e) => {
                    if state.status() == TransactionStatus::Running {
                        if let Err(abort_err) = state.abort(0) {
                            log::warn!("abort after failed action failed: {}", abort_err);
                        }
                    }
                    return Err(e.into());
                }
            },
            None => None,
        };

        if !start {
            state.commit(0)?;
            return Ok(RestResponse::success(
                json!({ "result": result.unwrap_or(Value::Null) }),
            ));
        }

        let id = self.registry.insert(state, ttl)?;
        log::debug!("started transaction {} in '{}'", id, request.database());
        let mut started = serde_json::Map::new();
        started.insert(TRANSACTION_HEADER.to_string(), Value::String(id.to_string()));
        let mut fields = json!({ "result": started });
        if let Some(result) = result {
            fields["actionResult"] = result;
        }
        Ok(RestResponse::success(fields).with_header(TRANSACTION_HEADER, id.to_string()))
    }

    fn execute_close(
        &self,
        request: &RestRequest,
        target: LifeCycle,
    ) -> Result<RestResponse, RestError> {
        let id = extract_transaction_id(request, &self.registry)?;
        let lease = self.registry.open(id, Some(request.database()))?;
        match target {
            LifeCycle::Committed => lease.commit(None)?,
            LifeCycle::Aborted => lease.abort(None)?,
            LifeCycle::Live => lease.release(None)?,
        }
        Ok(RestResponse::success(json!({
            "id": id.to_string(),
            "status": target.to_string(),
        })))
    }

    fn execute_get(&self, request: &RestRequest) -> Result<RestResponse, RestError> {
        let wants_one =
            !request.suffixes().is_empty() || request.header(TRANSACTION_HEADER).is_some();
        if !wants_one {
            let snapshot = serde_json::to_value(self.registry.snapshot())
                .map_err(|e| RestError::Internal(e.to_string()))?;
            return Ok(RestResponse::success(json!({ "transactions": snapshot })));
        }

        let id = extract_transaction_id(request, &self.registry)?;
        let info = self
            .registry
            .info(None, id)
            .ok_or(RestError::NotListed(id))?;
        let info = serde_json::to_value(info).map_err(|e| RestError::Internal(e.to_string()))?;
        Ok(RestResponse::success(json!({ "transaction": info })))
    }
}
