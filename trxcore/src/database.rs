// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Database context visible to transactions
//!
//! Bundles the collaborators a [`TransactionState`](crate::txn::TransactionState)
//! talks to: the collection manager, the WAL and the optional query cache.

use crate::cache::QueryCache;
use crate::config::TransactionConfig;
use crate::storage::CollectionManager;
use crate::wal::WalManager;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct Database {
    id: u64,
    name: String,
    collections: Arc<dyn CollectionManager>,
    wal: Arc<dyn WalManager>,
    query_cache: Option<Arc<dyn QueryCache>>,
    config: TransactionConfig,
    read_only: AtomicBool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("read_only", &self.is_read_only())
            .finish()
    }
}

impl Database {
    pub fn new(
        id: u64,
        name: impl Into<String>,
        collections: Arc<dyn CollectionManager>,
        wal: Arc<dyn WalManager>,
        config: TransactionConfig,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            collections,
            wal,
            query_cache: None,
            config,
            read_only: AtomicBool::new(false),
        }
    }

    pub fn with_query_cache(mut self, cache: Arc<dyn QueryCache>) -> Self {
        self.query_cache = Some(cache);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collections(&self) -> &dyn CollectionManager {
        self.collections.as_ref()
    }

    pub fn wal(&self) -> &dyn WalManager {
        self.wal.as_ref()
    }

    pub fn query_cache(&self) -> Option<&dyn QueryCache> {
        self.query_cache.as_deref()
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    /// Switch the server's read-only mode
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::SeqCst)
    }
}
