// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Chunked transaction id allocation
//!
//! Identifiers are handed out from reserved chunks so that the generator's
//! lock is only contended for a few arithmetic instructions. Every identifier
//! is a multiple of four; the two low bits are reserved for flags.

use super::error::TransactionError;
use super::id::TransactionId;
use crate::config::MIN_ID_CHUNK_SIZE;
use parking_lot::Mutex;

/// Distance between two consecutive identifiers
const ID_STEP: u64 = 4;

/// Coordinator tags are drawn from 48 bits so they stay readable on the wire.
const MAX_COORDINATOR_TAG: u64 = 0xFFFF_FFFF_FFFF;

#[derive(Debug)]
struct Allocation {
    next: u64,
    last: u64,
    /// Start of the next chunk to reserve
    reserved_until: u64,
}

/// Produces strictly increasing transaction ids for one registry
#[derive(Debug)]
pub struct IdGenerator {
    coordinator: u64,
    chunk_size: u64,
    allocation: Mutex<Allocation>,
}

impl IdGenerator {
    /// Create a generator with a random coordinator tag
    pub fn new(chunk_size: u64) -> Result<Self, TransactionError> {
        Self::with_coordinator(fastrand::u64(1..=MAX_COORDINATOR_TAG), chunk_size)
    }

    /// Create a generator with a fixed coordinator tag
    pub fn with_coordinator(coordinator: u64, chunk_size: u64) -> Result<Self, TransactionError> {
        if chunk_size < MIN_ID_CHUNK_SIZE {
            return Err(TransactionError::InvalidParameter(format!(
                "id chunk size must be at least {}, got {}",
                MIN_ID_CHUNK_SIZE, chunk_size
            )));
        }
        Ok(Self {
            coordinator,
            chunk_size,
            allocation: Mutex::new(Allocation {
                next: 0,
                last: 0,
                reserved_until: 0,
            }),
        })
    }

    pub fn coordinator(&self) -> u64 {
        self.coordinator
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Next transaction id
    pub fn next_id(&self) -> TransactionId {
        let mut alloc = self.allocation.lock();
        if alloc.next == alloc.last {
            // Reserve [start, start + chunk - 1], trimmed to multiples of four.
            let start = alloc.reserved_until;
            let end = start.saturating_add(self.chunk_size - 1);
            alloc.reserved_until = end.saturating_add(1);
            alloc.next = round_up(start);
            alloc.last = round_down(end);
            log::debug!(
                "coordinator {} reserved id chunk [{}, {}]",
                self.coordinator,
                alloc.next,
                alloc.last
            );
        }
        alloc.next += ID_STEP;
        TransactionId::new(self.coordinator, alloc.next)
    }
}

fn round_up(value: u64) -> u64 {
    value.div_ceil(ID_STEP) * ID_STEP
}

fn round_down(value: u64) -> u64 {
    value - value % ID_STEP
}
