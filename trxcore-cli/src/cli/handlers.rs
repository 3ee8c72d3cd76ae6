// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! CLI command handlers

use colored::Colorize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::commands::OutputFormat;
use super::output::ReportFormatter;
use trxcore::rest::TRANSACTION_HEADER;
use trxcore::wal::{FileWalOptions, RecoveryReport};
use trxcore::{
    ActionExecutor, Database, FileWal, ManualClock, MemoryCollectionManager, RequestMethod,
    RestRequest, RestResponse, RestTransactionHandler, ScriptExecutor, TransactionConfig,
    TransactionId, TransactionRegistry,
};

type CliResult = Result<(), Box<dyn std::error::Error>>;

const DATABASE: &str = "_system";

fn load_config(path: Option<PathBuf>) -> Result<TransactionConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => TransactionConfig::from_json_file(&path)
            .map_err(|e| format!("Failed to load config {:?}: {}", path, e).into()),
        None => Ok(TransactionConfig::default()),
    }
}

/// Handle the parse-id command
pub fn handle_parse_id(id: String) -> CliResult {
    let parsed: TransactionId = id.parse()?;
    println!("{} {}", "Coordinator:".bold(), parsed.coordinator());
    println!("{} {}", "Identifier: ".bold(), parsed.identifier());
    Ok(())
}

/// Handle the config command
pub fn handle_config(path: Option<PathBuf>) -> CliResult {
    let config = load_config(path)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Turn an error response into an error
fn expect_ok(
    step: &str,
    response: RestResponse,
) -> Result<RestResponse, Box<dyn std::error::Error>> {
    if response.body()["error"] == true {
        return Err(format!(
            "{} failed with {}: {}",
            step,
            response.code(),
            response.body()["errorMessage"].as_str().unwrap_or("unknown error")
        )
        .into());
    }
    Ok(response)
}

/// Handle the simulate command
///
/// Plays the requests of one multi-request transaction against a file WAL:
/// start, a second request that writes, commit or abort, a status dump and an
/// expiry sweep, then reads the markers back.
pub fn handle_simulate(
    wal_dir: PathBuf,
    collections: Vec<String>,
    abort: bool,
    ttl: f64,
    config: Option<PathBuf>,
    format: OutputFormat,
) -> CliResult {
    let config = load_config(config)?;
    let ttl_duration =
        Duration::try_from_secs_f64(ttl).map_err(|_| format!("invalid ttl {}", ttl))?;

    std::fs::create_dir_all(&wal_dir)?;
    let wal = Arc::new(FileWal::open(&wal_dir, FileWalOptions::default())?);
    let storage = Arc::new(MemoryCollectionManager::new());
    for name in &collections {
        storage.create_collection(name, false)?;
    }
    let database = Arc::new(Database::new(
        1,
        DATABASE,
        storage.clone(),
        wal.clone(),
        config.clone(),
    ));
    let clock = Arc::new(ManualClock::new(Duration::ZERO));
    let registry = Arc::new(TransactionRegistry::with_clock(config, clock.clone())?);
    let executor = Arc::new(ScriptExecutor::new(storage.clone()));
    let handler = RestTransactionHandler::new(registry.clone(), database, executor.clone());

    println!("{}", "Simulating a multi-request transaction".bold().green());
    println!("  WAL: {:?}", wal.path());

    println!("  → POST /transaction/start");
    let started = expect_ok(
        "start",
        handler.execute(
            &RestRequest::new(RequestMethod::Post, DATABASE)
                .with_suffix("start")
                .with_body(json!({
                    "collections": { "write": collections },
                    "ttl": ttl,
                })),
        ),
    )?;
    let id = started
        .header(TRANSACTION_HEADER)
        .ok_or("start response carries no transaction id")?
        .to_string();
    println!("    {}: {}", TRANSACTION_HEADER, id.cyan());

    println!("  → second request writes through a lease");
    {
        let trx: TransactionId = id.parse()?;
        let mut lease = registry.open(trx, Some(DATABASE))?;
        let steps: Vec<Value> = collections
            .iter()
            .map(|name| {
                json!({ "op": "insert", "collection": name, "value": { "source": "simulate" } })
            })
            .collect();
        let written = executor.execute(&mut lease, &Value::Array(steps))?;
        println!("    wrote {} documents", written.as_array().map_or(0, Vec::len));
        lease.release(None)?;
    }

    let (method, verb) = if abort {
        (RequestMethod::Delete, "DELETE")
    } else {
        (RequestMethod::Put, "PUT")
    };
    println!("  → {} /transaction/{}", verb, id);
    let closed = expect_ok(
        verb,
        handler.execute(
            &RestRequest::new(method, DATABASE).with_header(TRANSACTION_HEADER, id.as_str()),
        ),
    )?;
    println!(
        "    status: {}",
        closed.body()["status"].as_str().unwrap_or("unknown").bold()
    );

    let status = expect_ok(
        "status",
        handler.execute(&RestRequest::new(RequestMethod::Get, DATABASE)),
    )?;
    println!();
    print!("{}", ReportFormatter::format_status(status.body(), format));

    clock.advance(ttl_duration + Duration::from_secs(1));
    let expired = registry.expire_transactions();
    println!(
        "\n{} {} expired after {:.1}s",
        "Expiry sweep:".bold(),
        expired,
        ttl_duration.as_secs_f64() + 1.0
    );

    for name in &collections {
        if let Some(collection) = storage.by_name(name) {
            println!("  {}: {} documents", name, collection.len());
        }
    }

    let report = RecoveryReport::analyze(&wal.read_markers()?);
    println!();
    print!("{}", ReportFormatter::format_recovery(&report, format));
    Ok(())
}
