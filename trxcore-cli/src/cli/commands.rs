// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Command-line definitions

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "trxcore")]
#[command(about = "Drive the trxcore transaction registry from the command line", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level (default: warn)
    #[arg(long, global = true, value_enum)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print version information
    Version,

    /// Split a transaction id into coordinator and identifier
    ParseId {
        /// Id in `<coordinator>-<identifier>` form
        id: String,
    },

    /// Print the effective configuration as JSON
    Config {
        /// JSON config file; unset fields keep their defaults
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Run a multi-request transaction against a file WAL
    Simulate {
        /// Directory holding the marker log
        #[arg(long)]
        wal_dir: PathBuf,

        /// Collections written by the transaction
        #[arg(long, value_delimiter = ',', default_value = "users")]
        collections: Vec<String>,

        /// Abort instead of committing
        #[arg(long)]
        abort: bool,

        /// Seconds the transaction stays registered between requests
        #[arg(long, default_value_t = 60.0)]
        ttl: f64,

        /// JSON config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
}

/// Output format for status dumps and reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}
