// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Action payloads executed inside a transaction
//!
//! [`ScriptExecutor`] runs a JSON list of document steps against
//! [`MemoryCollection`](super::MemoryCollection)s:
//!
//! ```text
//! [
//!   {"op": "insert", "collection": "products", "key": "p1", "value": {"n": 1}},
//!   {"op": "update", "collection": "products", "key": "p1", "value": {"n": 2}},
//!   {"op": "remove", "collection": "products", "key": "p1"},
//!   {"op": "fail", "message": "stop here"}
//! ]
//! ```
//!
//! A single step object is accepted as a one-element list. Every write goes
//! through [`TransactionState::add_operation`] so it is logged and can be
//! reverted with the transaction.

use super::memory::{MemoryCollection, MemoryCollectionManager};
use crate::txn::{TransactionError, TransactionState};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Runs the `action` part of a transaction request
pub trait ActionExecutor: Send + Sync {
    fn execute(&self, trx: &mut TransactionState, action: &Value) -> Result<Value, TransactionError>;
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Step {
    Insert {
        collection: String,
        key: Option<String>,
        #[serde(default)]
        value: Value,
        #[serde(default, rename = "waitForSync")]
        wait_for_sync: bool,
    },
    Update {
        collection: String,
        key: String,
        #[serde(default)]
        value: Value,
        #[serde(default, rename = "waitForSync")]
        wait_for_sync: bool,
    },
    Remove {
        collection: String,
        key: String,
        #[serde(default, rename = "waitForSync")]
        wait_for_sync: bool,
    },
    Fail {
        #[serde(default)]
        message: Option<String>,
    },
}

/// [`ActionExecutor`] over in-memory collections
#[derive(Debug, Clone)]
pub struct ScriptExecutor {
    collections: Arc<MemoryCollectionManager>,
}

impl ScriptExecutor {
    pub fn new(collections: Arc<MemoryCollectionManager>) -> Self {
        Self { collections }
    }

    fn parse(action: &Value) -> Result<Vec<Step>, TransactionError> {
        let steps = match action {
            Value::Array(_) => action.clone(),
            Value::Object(_) => Value::Array(vec![action.clone()]),
            Value::Null => Value::Array(Vec::new()),
            other => {
                return Err(TransactionError::InvalidParameter(format!(
                    "action must be a step or a list of steps, got {}",
                    other
                )))
            }
        };
        serde_json::from_value(steps)
            .map_err(|e| TransactionError::InvalidParameter(format!("invalid action: {}", e)))
    }

    fn collection(&self, name: &str) -> Result<Arc<MemoryCollection>, TransactionError> {
        self.collections
            .by_name(name)
            .ok_or_else(|| TransactionError::CollectionNotFound(name.to_string()))
    }

    fn run_step(&self, trx: &mut TransactionState, step: Step) -> Result<Value, TransactionError> {
        let revision = trx.database().wal().next_sequence();
        match step {
            Step::Insert {
                collection,
                key,
                value,
                wait_for_sync,
            } => {
                let handle = self.collection(&collection)?;
                let key = key.unwrap_or_else(|| revision.to_string());
                let operation = handle.insert(key.clone(), value, revision)?;
                trx.add_operation(Box::new(operation), wait_for_sync)?;
                Ok(json!({ "_key": key, "_rev": revision.to_string() }))
            }
            Step::Update {
                collection,
                key,
                value,
                wait_for_sync,
            } => {
                let handle = self.collection(&collection)?;
                let operation = handle.update(key.clone(), value, revision)?;
                trx.add_operation(Box::new(operation), wait_for_sync)?;
                Ok(json!({ "_key": key, "_rev": revision.to_string() }))
            }
            Step::Remove {
                collection,
                key,
                wait_for_sync,
            } => {
                let handle = self.collection(&collection)?;
                let operation = handle.remove(key.clone(), revision)?;
                trx.add_operation(Box::new(operation), wait_for_sync)?;
                Ok(json!({ "_key": key }))
            }
            Step::Fail { message } => Err(TransactionError::ActionFailed(
                message.unwrap_or_else(|| "action failed".to_string()),
            )),
        }
    }
}

impl ActionExecutor for ScriptExecutor {
    fn execute(&self, trx: &mut TransactionState, action: &Value) -> Result<Value, TransactionError> {
        let steps = Self::parse(action)?;
        let mut results = Vec::with_capacity(steps.len());
        for step in steps {
            results.push(self.run_step(trx, step)?);
        }
        log::debug!(
            "executed {} steps in transaction {}",
            results.len(),
            trx.id()
        );
        Ok(Value::Array(results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_single_step() {
        let steps = ScriptExecutor::parse(&json!({"op": "fail"})).unwrap();
        assert_eq!(steps.len(), 1);
        assert!(ScriptExecutor::parse(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_unknown_ops() {
        assert!(matches!(
            ScriptExecutor::parse(&json!([{"op": "truncate", "collection": "c"}])),
            Err(TransactionError::InvalidParameter(_))
        ));
        assert!(matches!(
            ScriptExecutor::parse(&json!("function () {}")),
            Err(TransactionError::InvalidParameter(_))
        ));
    }
}
