// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Query result cache and its invalidation on commit
//!
//! A committed write transaction invalidates every cached query result that
//! read one of the collections it wrote. [`QueryResultCache`] keeps a reverse
//! index from collection name to dependent entries so that invalidation only
//! touches the affected results.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

/// Cache collaborator as seen by a committing transaction
pub trait QueryCache: Send + Sync {
    /// Whether any invalidation work can be necessary
    fn may_be_active(&self) -> bool;

    /// Drop results of `database` that depend on any of `collections`
    fn invalidate(&self, database: &str, collections: &[String]);

    fn invalidate_database(&self, database: &str);
}

/// Cache operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    Off,
    /// Cache every eligible query
    On,
    /// Cache only queries that ask for it
    Demand,
}

#[derive(Debug, Clone)]
struct CachedResult {
    query: String,
    result: Value,
    collections: Vec<String>,
}

#[derive(Debug, Default)]
struct DatabaseResults {
    entries: HashMap<u64, CachedResult>,
    /// Reverse index: collection -> dependent entry keys
    by_collection: HashMap<String, HashSet<u64>>,
}

impl DatabaseResults {
    fn remove_entry(&mut self, key: u64) -> bool {
        let Some(entry) = self.entries.remove(&key) else {
            return false;
        };
        for collection in &entry.collections {
            if let Some(keys) = self.by_collection.get_mut(collection) {
                keys.remove(&key);
                if keys.is_empty() {
                    self.by_collection.remove(collection);
                }
            }
        }
        true
    }
}

/// Per-database query result cache
#[derive(Debug)]
pub struct QueryResultCache {
    mode: RwLock<CacheMode>,
    max_results: usize,
    databases: RwLock<HashMap<String, DatabaseResults>>,
}

impl QueryResultCache {
    pub fn new(mode: CacheMode, max_results: usize) -> Self {
        Self {
            mode: RwLock::new(mode),
            max_results,
            databases: RwLock::new(HashMap::new()),
        }
    }

    pub fn mode(&self) -> CacheMode {
        *self.mode.read()
    }

    /// Changing the mode to `Off` empties the cache
    pub fn set_mode(&self, mode: CacheMode) {
        *self.mode.write() = mode;
        if mode == CacheMode::Off {
            self.databases.write().clear();
        }
    }

    fn key(query: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        query.hash(&mut hasher);
        hasher.finish()
    }

    /// Store a result that was computed from `collections`
    pub fn store(&self, database: &str, query: &str, collections: &[String], result: Value) {
        if self.mode() == CacheMode::Off || self.max_results == 0 {
            return;
        }
        let key = Self::key(query);
        let mut databases = self.databases.write();
        let results = databases.entry(database.to_string()).or_default();
        results.remove_entry(key);
        if results.entries.len() >= self.max_results {
            // evict an arbitrary entry to stay within bounds
            if let Some(victim) = results.entries.keys().next().copied() {
                results.remove_entry(victim);
            }
        }
        for collection in collections {
            results
                .by_collection
                .entry(collection.clone())
                .or_default()
                .insert(key);
        }
        results.entries.insert(
            key,
            CachedResult {
                query: query.to_string(),
                result,
                collections: collections.to_vec(),
            },
        );
    }

    pub fn lookup(&self, database: &str, query: &str) -> Option<Value> {
        let databases = self.databases.read();
        let entry = databases.get(database)?.entries.get(&Self::key(query))?;
        (entry.query == query).then(|| entry.result.clone())
    }

    pub fn len(&self, database: &str) -> usize {
        self.databases
            .read()
            .get(database)
            .map(|r| r.entries.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, database: &str) -> bool {
        self.len(database) == 0
    }
}

impl QueryCache for QueryResultCache {
    fn may_be_active(&self) -> bool {
        self.mode() != CacheMode::Off
    }

    fn invalidate(&self, database: &str, collections: &[String]) {
        let mut databases = self.databases.write();
        let Some(results) = databases.get_mut(database) else {
            return;
        };
        let mut removed = 0;
        for collection in collections {
            let keys: Vec<u64> = results
                .by_collection
                .get(collection)
                .map(|keys| keys.iter().copied().collect())
                .unwrap_or_default();
            for key in keys {
                if results.remove_entry(key) {
                    removed += 1;
                }
            }
        }
        log::debug!(
            "invalidated {} cached results in '{}' for {:?}",
            removed,
            database,
            collections
        );
    }

    fn invalidate_database(&self, database: &str) {
        self.databases.write().remove(database);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_invalidation_only_hits_dependents() {
        let cache = QueryResultCache::new(CacheMode::On, 16);
        cache.store("db", "FOR u IN users RETURN u", &names(&["users"]), json!([1]));
        cache.store("db", "FOR o IN orders RETURN o", &names(&["orders"]), json!([2]));
        cache.store(
            "db",
            "FOR u IN users FOR o IN orders RETURN [u, o]",
            &names(&["users", "orders"]),
            json!([3]),
        );

        cache.invalidate("db", &names(&["users"]));

        assert!(cache.lookup("db", "FOR u IN users RETURN u").is_none());
        assert_eq!(cache.lookup("db", "FOR o IN orders RETURN o"), Some(json!([2])));
        assert_eq!(cache.len("db"), 1);
    }

    #[test]
    fn test_databases_are_separate() {
        let cache = QueryResultCache::new(CacheMode::On, 16);
        cache.store("a", "q", &names(&["c"]), json!(1));
        cache.store("b", "q", &names(&["c"]), json!(2));

        cache.invalidate("a", &names(&["c"]));
        assert!(cache.is_empty("a"));
        assert_eq!(cache.lookup("b", "q"), Some(json!(2)));

        cache.invalidate_database("b");
        assert!(cache.is_empty("b"));
    }

    #[test]
    fn test_off_mode_is_inactive() {
        let cache = QueryResultCache::new(CacheMode::Demand, 16);
        cache.store("db", "q", &names(&["c"]), json!(1));
        assert!(cache.may_be_active());

        cache.set_mode(CacheMode::Off);
        assert!(!cache.may_be_active());
        assert!(cache.is_empty("db"));
        cache.store("db", "q", &names(&["c"]), json!(1));
        assert!(cache.is_empty("db"));
    }

    #[test]
    fn test_result_limit_evicts() {
        let cache = QueryResultCache::new(CacheMode::On, 2);
        for i in 0..5 {
            cache.store("db", &format!("q{i}"), &names(&["c"]), json!(i));
        }
        assert_eq!(cache.len("db"), 2);
        assert_eq!(cache.lookup("db", "q4"), Some(json!(4)));
    }

    #[test]
    fn test_zero_limit_stores_nothing() {
        let cache = QueryResultCache::new(CacheMode::On, 0);
        cache.store("db", "q", &names(&["c"]), json!(1));
        assert!(cache.is_empty("db"));
        assert!(cache.lookup("db", "q").is_none());
    }
}
