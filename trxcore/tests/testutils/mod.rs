//! Test utilities for trxcore integration tests
//!
//! - RecordingWal: in-memory WAL that records markers and injects failures
//! - Fixture: database, collections and a registry on a manual clock

#![allow(dead_code)]

pub mod fixture;
pub mod recording_wal;
