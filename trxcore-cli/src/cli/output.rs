// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Formatting of registry dumps and WAL reports

use colored::*;
use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};
use serde_json::Value;
use trxcore::wal::RecoveryReport;

use super::commands::OutputFormat;

/// Renders simulation output in the requested format
pub struct ReportFormatter;

impl ReportFormatter {
    /// Format a `GET /transaction` body
    pub fn format_status(body: &Value, format: OutputFormat) -> String {
        match format {
            OutputFormat::Table => Self::status_table(body),
            OutputFormat::Json => Self::pretty(&body["transactions"]),
        }
    }

    /// Format a WAL recovery report
    pub fn format_recovery(report: &RecoveryReport, format: OutputFormat) -> String {
        match format {
            OutputFormat::Table => Self::recovery_table(report),
            OutputFormat::Json => match serde_json::to_value(report) {
                Ok(value) => Self::pretty(&value),
                Err(e) => format!("{{\"status\": \"error\", \"error\": \"{}\"}}", e),
            },
        }
    }

    fn status_table(body: &Value) -> String {
        let databases = match body["transactions"].as_object() {
            Some(databases) if !databases.is_empty() => databases,
            _ => return format!("{}\n", "No registered transactions".yellow()),
        };

        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(
            ["database", "id", "status", "open", "pending destroy", "ttl", "expires in"]
                .into_iter()
                .map(|col| Cell::new(col).fg(Color::Green))
                .collect::<Vec<_>>(),
        );

        let mut rows = 0;
        for (database, entries) in databases {
            for entry in entries.as_array().into_iter().flatten() {
                rows += 1;
                table.add_row(vec![
                    Cell::new(database),
                    Cell::new(Self::text(&entry["id"])),
                    Self::status_cell(&entry["status"]),
                    Cell::new(Self::text(&entry["open"])),
                    Cell::new(Self::text(&entry["pending_destroy"])),
                    Cell::new(Self::seconds(&entry["ttl"])),
                    Cell::new(Self::seconds(&entry["expires_in"])),
                ]);
            }
        }

        let mut output = format!("{}\n", "Registered transactions".bold().green());
        output.push_str(&format!("Entries: {}\n\n", rows));
        output.push_str(&table.to_string());
        output.push('\n');
        output
    }

    fn recovery_table(report: &RecoveryReport) -> String {
        let mut output = format!("{}\n", "WAL recovery report".bold().green());
        output.push_str(&format!("Markers read: {}\n\n", report.total_markers));

        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec![
            Cell::new("tick").fg(Color::Green),
            Cell::new("outcome").fg(Color::Green),
            Cell::new("documents").fg(Color::Green),
        ]);

        let outcomes = report
            .committed
            .iter()
            .map(|tick| (*tick, "committed", Color::Green))
            .chain(report.aborted.iter().map(|tick| (*tick, "aborted", Color::Red)))
            .chain(
                report
                    .unfinished
                    .iter()
                    .map(|tick| (*tick, "in progress", Color::Yellow)),
            );
        let mut outcomes: Vec<_> = outcomes.collect();
        outcomes.sort_by_key(|(tick, _, _)| *tick);

        for (tick, outcome, color) in outcomes {
            table.add_row(vec![
                Cell::new(tick),
                Cell::new(outcome).fg(color),
                Cell::new(report.documents.get(&tick).copied().unwrap_or(0)),
            ]);
        }

        output.push_str(&table.to_string());
        output.push('\n');
        if !report.unfinished.is_empty() {
            output.push_str(&format!(
                "\n{}\n",
                "Unfinished transactions would be rolled back on restart".yellow()
            ));
        }
        output
    }

    fn status_cell(status: &Value) -> Cell {
        let text = Self::text(status);
        let color = match text.as_str() {
            "committed" => Color::Green,
            "aborted" => Color::Red,
            _ => Color::Yellow,
        };
        Cell::new(text).fg(color)
    }

    fn text(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Null => "NULL".to_string(),
            other => other.to_string(),
        }
    }

    fn seconds(value: &Value) -> String {
        value
            .as_f64()
            .map(|secs| format!("{:.1}s", secs))
            .unwrap_or_else(|| Self::text(value))
    }

    fn pretty(value: &Value) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|_| {
            "{\"status\": \"error\", \"error\": \"Could not serialize output to JSON\"}".to_string()
        })
    }
}
