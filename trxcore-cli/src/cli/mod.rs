// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! CLI module for trxcore
//!
//! Inspects ids and configuration, and plays a multi-request transaction
//! against a file WAL.

pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{Cli, Commands};
pub use handlers::{handle_config, handle_parse_id, handle_simulate};
