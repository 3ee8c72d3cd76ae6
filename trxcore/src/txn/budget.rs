// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Memory budget for buffered transaction operations
//!
//! Every buffered write reserves its estimated size; the reservation is
//! returned once the operations are freed at commit or abort.

use super::error::TransactionError;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Byte budget tracker for one transaction
pub struct MemoryBudget {
    /// Maximum allowed memory in bytes
    limit: usize,

    /// Currently reserved memory
    allocated: AtomicUsize,

    /// Peak reserved memory (for statistics)
    peak: AtomicUsize,
}

impl std::fmt::Debug for MemoryBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBudget")
            .field("limit", &self.limit)
            .field("allocated", &self.allocated())
            .field("peak", &self.peak())
            .finish()
    }
}

impl MemoryBudget {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            allocated: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(usize::MAX)
    }

    /// Budget for an optional limit
    pub fn from_limit(limit: Option<usize>) -> Self {
        limit.map(Self::new).unwrap_or_else(Self::unlimited)
    }

    /// Reserve `bytes`, failing without side effects if the limit would be exceeded
    pub fn allocate(&self, bytes: usize) -> Result<(), TransactionError> {
        let current = self.allocated.fetch_add(bytes, Ordering::SeqCst);
        let new_total = current.saturating_add(bytes);

        if new_total > self.limit {
            self.allocated.fetch_sub(bytes, Ordering::SeqCst);
            return Err(TransactionError::MemoryLimitExceeded {
                requested: bytes,
                available: self.limit.saturating_sub(current),
            });
        }

        self.peak.fetch_max(new_total, Ordering::SeqCst);
        Ok(())
    }

    /// Return `bytes` to the budget
    pub fn release(&self, bytes: usize) {
        let _ = self
            .allocated
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                Some(current.saturating_sub(bytes))
            });
    }

    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available(&self) -> usize {
        self.limit.saturating_sub(self.allocated())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_budget_basic() {
        let budget = MemoryBudget::new(1000);

        assert!(budget.allocate(100).is_ok());
        assert!(budget.allocate(200).is_ok());
        assert_eq!(budget.allocated(), 300);

        budget.release(100);
        assert_eq!(budget.allocated(), 200);
        assert_eq!(budget.peak(), 300);
    }

    #[test]
    fn test_memory_budget_limit_exceeded() {
        let budget = MemoryBudget::new(1000);
        assert!(budget.allocate(900).is_ok());

        let result = budget.allocate(200);
        assert!(matches!(
            result,
            Err(TransactionError::MemoryLimitExceeded {
                requested: 200,
                available: 100
            })
        ));
        assert_eq!(budget.allocated(), 900);
    }

    #[test]
    fn test_release_saturates_at_zero() {
        let budget = MemoryBudget::new(10);
        budget.allocate(5).unwrap();
        budget.release(50);
        assert_eq!(budget.allocated(), 0);
        assert_eq!(budget.available(), 10);
    }

    #[test]
    fn test_unlimited_budget() {
        let budget = MemoryBudget::from_limit(None);
        assert!(budget.allocate(1_000_000_000).is_ok());
        assert!(budget.allocate(1_000_000_000).is_ok());
        assert_eq!(MemoryBudget::from_limit(Some(64)).limit(), 64);
    }
}
