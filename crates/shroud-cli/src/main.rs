//! Shroud — field-level erasure and restoration for governed SQLite tables.

use std::path::{Path, PathBuf};

use tracing::info;
use tracing_subscriber::EnvFilter;

use shroud_core::ShroudConfig;
use shroud_crypto::CryptoService;
use shroud_rules::{RuleRegistry, DEFAULT_SCHEMA};
use shroud_runtime::{EraseCommand, Eraser, RestoreCommand};
use shroud_store::SqliteStore;

mod validate;

const DATA_DIR_VAR: &str = "SHROUD_DATA_DIR";

fn resolve_data_dir() -> PathBuf {
    std::env::var(DATA_DIR_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}

/// Open the store and attach `<db_dir>/<schema>.db` for every non-main schema the rules use.
pub(crate) fn open_store(
    config: &ShroudConfig,
    registry: &RuleRegistry,
) -> shroud_core::Result<SqliteStore> {
    let store = SqliteStore::open(&config.data_paths.db_dir)?;
    for schema in registry.schemas() {
        if schema.eq_ignore_ascii_case(DEFAULT_SCHEMA) {
            continue;
        }
        let path = config.data_paths.db_dir.join(format!("{}.db", schema));
        store.attach_schema(schema, &path)?;
        info!("Attached schema {} ({})", schema, path.display());
    }
    Ok(store)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&text)
        .map_err(|e| anyhow::anyhow!("Malformed command file {}: {}", path.display(), e))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_usage() {
    println!("Shroud — field-level erasure and restoration");
    println!();
    println!("Usage: shroud <command>");
    println!();
    println!("Commands:");
    println!("  validate                 Check key, rule file and governed tables");
    println!("  erase <command.json>     Mirror, encrypt and mask a subject's rows");
    println!("  restore <command.json>   Verify and write back a subject's rows");
    println!("  status <subject-key>     Show mirrored rows and audit trail");
    println!("  keygen                   Print a fresh Base64 256-bit key");
    println!("  help                     Show this help message");
    println!();
    println!("Environment:");
    println!("  {:<24} Data directory (default: data)", DATA_DIR_VAR);
    println!(
        "  {:<24} Base64 AES key (16, 24 or 32 bytes)",
        shroud_core::config::ERASURE_KEY_VAR
    );
    println!(
        "  {:<24} Rule file (default: <data>/erase-rules.json)",
        shroud_core::config::RULES_FILE_VAR
    );
    println!(
        "  {:<24} Ids per IN-list (default: {})",
        shroud_core::config::BATCH_SIZE_VAR,
        shroud_core::config::DEFAULT_BATCH_SIZE
    );
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1).map(String::as_str) else {
        print_usage();
        return Ok(());
    };

    match command {
        "keygen" => {
            println!("{}", CryptoService::generate_key());
            return Ok(());
        }
        "--help" | "-h" | "help" => {
            print_usage();
            return Ok(());
        }
        _ => {}
    }

    let data_dir = resolve_data_dir();
    info!("Data directory: {}", data_dir.display());
    let config = ShroudConfig::from_env(&data_dir)?;

    match command {
        "validate" => {
            let report = validate::validate(&config);
            validate::print_report(&report);
            std::process::exit(if report.is_valid() { 0 } else { 1 });
        }
        "erase" | "restore" => {
            let Some(path) = args.get(2) else {
                eprintln!("Usage: shroud {} <command.json>", command);
                std::process::exit(1);
            };
            let eraser = Eraser::from_config(&config)
                .map_err(|e| anyhow::anyhow!("Failed to initialize: {}", e))?;
            let store = open_store(&config, eraser.registry())
                .map_err(|e| anyhow::anyhow!("Failed to open store: {}", e))?;

            if command == "erase" {
                let cmd: EraseCommand = read_json(Path::new(path))?;
                let report = eraser
                    .erase(&store, &cmd)
                    .map_err(|e| anyhow::anyhow!("Erase failed: {}", e))?;
                print_json(&report)?;
            } else {
                let cmd: RestoreCommand = read_json(Path::new(path))?;
                let report = eraser
                    .restore(&store, &cmd)
                    .map_err(|e| anyhow::anyhow!("Restore failed: {}", e))?;
                print_json(&report)?;
            }
        }
        "status" => {
            let Some(subject) = args.get(2) else {
                eprintln!("Usage: shroud status <subject-key>");
                std::process::exit(1);
            };
            let eraser = Eraser::from_config(&config)
                .map_err(|e| anyhow::anyhow!("Failed to initialize: {}", e))?;
            let store = open_store(&config, eraser.registry())
                .map_err(|e| anyhow::anyhow!("Failed to open store: {}", e))?;
            let status = eraser
                .status(&store, subject)
                .map_err(|e| anyhow::anyhow!("Status failed: {}", e))?;
            print_json(&status)?;
        }
        other => {
            eprintln!("Unknown command: {}. Use 'shroud help' for usage.", other);
            std::process::exit(1);
        }
    }

    Ok(())
}
