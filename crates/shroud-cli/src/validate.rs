//! `shroud validate`: check key, rule file and governed tables before use.

use std::collections::HashSet;

use rusqlite::Connection;
use tracing::{error, info};

use shroud_core::{column_key, ShroudConfig};
use shroud_crypto::CryptoService;
use shroud_rules::{EraseRule, RuleRegistry};

/// Result of a validation run.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub key_bits: Option<usize>,
    pub rules: usize,
    pub tables_checked: usize,
    pub mirrored_rows: i64,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty() && self.key_bits.is_some()
    }
}

/// Validate configuration against the database it points at.
pub fn validate(config: &ShroudConfig) -> ValidationReport {
    let mut report = ValidationReport::default();

    match config
        .require_key()
        .and_then(CryptoService::from_base64_key)
    {
        Ok(crypto) => report.key_bits = Some(crypto.key_bits()),
        Err(e) => report.errors.push(format!("Key: {}", e)),
    }

    let registry = match RuleRegistry::from_json_file(&config.data_paths.rules_file) {
        Ok(r) => r,
        Err(e) => {
            report.errors.push(format!("Rules: {}", e));
            return report;
        }
    };
    report.rules = registry.len();

    let store = match crate::open_store(config, &registry) {
        Ok(s) => s,
        Err(e) => {
            report.errors.push(format!("Database: {}", e));
            return report;
        }
    };

    let checked = store.with_connection(|conn| {
        for rule in registry.iter() {
            check_rule(conn, rule, &mut report);
        }
        report.mirrored_rows = conn
            .query_row("SELECT COUNT(*) FROM erasure_mirror", [], |r| r.get(0))
            .map_err(|e| shroud_core::Error::Database(e.to_string()))?;
        Ok(())
    });
    if let Err(e) = checked {
        report.errors.push(format!("Database: {}", e));
    }

    if report.is_valid() {
        info!("Validation passed: {} rules", report.rules);
    } else {
        error!("Validation failed with {} errors", report.errors.len());
    }
    report
}

fn check_rule(conn: &Connection, rule: &EraseRule, report: &mut ValidationReport) {
    let columns = match table_columns(conn, rule.schema(), rule.table()) {
        Ok(c) if c.is_empty() => {
            report
                .errors
                .push(format!("Missing governed table: {}", rule.label()));
            return;
        }
        Ok(c) => c,
        Err(e) => {
            report
                .errors
                .push(format!("Error reading table {}: {}", rule.label(), e));
            return;
        }
    };
    report.tables_checked += 1;

    let mut required: Vec<&str> = vec![rule.id_column(), rule.mask_flag_column()];
    required.extend(rule.whitelist().iter().map(String::as_str));
    required.extend(rule.erase_overrides().iter().map(|(c, _)| c.as_str()));
    required.extend(rule.restore_overrides().iter().map(|(c, _)| c.as_str()));
    if let Some(parent) = rule.parent() {
        required.push(&parent.fk_column);
        if let Ok(c) = table_columns(conn, rule.schema(), &parent.table) {
            if c.is_empty() {
                report.warnings.push(format!(
                    "{}: parent table {} not found",
                    rule.label(),
                    parent.table
                ));
            }
        }
    }
    for column in required {
        if !columns.contains(&column_key(column)) {
            report
                .errors
                .push(format!("{}: missing column {}", rule.label(), column));
        }
    }

    if let Some(lookup) = rule.lookup() {
        match table_columns(conn, rule.schema(), &lookup.table) {
            Ok(c) if c.is_empty() => report.errors.push(format!(
                "{}: missing lookup table {}",
                rule.label(),
                lookup.table
            )),
            Ok(c) => {
                for column in [&lookup.source_column, &lookup.dest_column] {
                    if !c.contains(&column_key(column)) {
                        report.errors.push(format!(
                            "{}: lookup table {} has no column {}",
                            rule.label(),
                            lookup.table,
                            column
                        ));
                    }
                }
            }
            Err(e) => report.errors.push(format!(
                "Error reading lookup table {}: {}",
                lookup.table, e
            )),
        }
    }
}

/// Column keys of `schema.table`; empty when the table does not exist.
fn table_columns(conn: &Connection, schema: &str, table: &str) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1, ?2)")?;
    let names = stmt.query_map([table, schema], |row| row.get::<_, String>(0))?;
    let keys = names
        .map(|n| n.map(|n| column_key(&n)))
        .collect::<rusqlite::Result<HashSet<_>>>()?;
    Ok(keys)
}

pub fn print_report(report: &ValidationReport) {
    println!("=== Shroud Validation Report ===");
    println!();
    println!(
        "Erasure key:        {}",
        report
            .key_bits
            .map(|b| format!("AES-{}", b))
            .unwrap_or_else(|| "INVALID".into())
    );
    println!("Rules:              {}", report.rules);
    println!("Tables checked:     {}", report.tables_checked);
    println!("Mirrored rows:      {}", report.mirrored_rows);

    if !report.warnings.is_empty() {
        println!();
        println!("Warnings:");
        for w in &report.warnings {
            println!("  - {}", w);
        }
    }

    if !report.errors.is_empty() {
        println!();
        println!("Errors:");
        for e in &report.errors {
            println!("  - {}", e);
        }
    }

    println!();
    if report.is_valid() {
        println!("Status: READY");
    } else {
        println!("Status: INVALID");
    }
}
