// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! trxcore CLI entry point

use clap::Parser;
use colored::Colorize;

mod cli;
use cli::{Cli, Commands};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // -v wins over --log-level; RUST_LOG still applies per module
    let log_level = if cli.verbose {
        log::LevelFilter::Debug
    } else if let Some(level) = cli.log_level {
        level.to_level_filter()
    } else {
        log::LevelFilter::Warn
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    match cli.command {
        Commands::Version => {
            println!("{} {}", "trxcore".bold().green(), trxcore::VERSION);
            println!("Transaction lifecycle core");
            Ok(())
        }

        Commands::ParseId { id } => cli::handle_parse_id(id),

        Commands::Config { config } => cli::handle_config(config),

        Commands::Simulate {
            wal_dir,
            collections,
            abort,
            ttl,
            config,
            format,
        } => cli::handle_simulate(wal_dir, collections, abort, ttl, config, format),
    }
}
