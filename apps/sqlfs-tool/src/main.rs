//! Command-line front end for the schema filesystem.
//!
//! Provides commands for:
//! - Validating connection profiles and credential files
//! - Dry-running filesystem edits against an in-memory catalog and printing
//!   the DDL a flush would deploy

mod cli;
mod script;

use std::path::Path;

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use sqlfs_core::{FsConfig, MemoryServer};
use sqlfs_runtime::FsSession;
use tracing::{info, Level};

use cli::{Cli, Commands};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::CheckConfig { config, profile, auth } => check_config(&config, &profile, auth.as_deref()),
        Commands::Plan {
            script,
            catalog,
            dbname,
        } => plan(&script, catalog.as_deref(), dbname),
    }
}

fn check_config(path: &Path, profile: &str, auth: Option<&Path>) -> anyhow::Result<()> {
    let mut config = FsConfig::from_file(path, profile)?;
    if let Some(auth) = auth {
        config.apply_auth_file(auth)?;
    }
    config.apply_env_overrides()?;
    config.validate()?;

    info!("Profile '{}' is valid", profile);
    println!("{}", serde_json::to_string_pretty(&config.redacted())?);
    Ok(())
}

fn plan(script_path: &Path, catalog: Option<&Path>, dbname: String) -> anyhow::Result<()> {
    let source = std::fs::read_to_string(script_path)
        .with_context(|| format!("reading {}", script_path.display()))?;
    let base = script_path.parent().unwrap_or_else(|| Path::new("."));
    let steps = script::parse(&source, base)?;

    let server = match catalog {
        Some(path) => MemoryServer::from_file(path)?,
        None => MemoryServer::new(),
    };
    let mut config = FsConfig::default();
    config.dbname = Some(dbname);
    // Only explicit flushes deploy during a dry run
    config.deploy_time = 3600;
    let fs = FsSession::with_memory(config, &server)?;

    let mut records = script::run(&fs, &steps);
    if !fs.pending_commands().is_empty() {
        let report = fs.flush_now()?;
        records.push(json!({ "final_flush": report }));
    }
    let discarded = fs.shutdown()?;

    let output = json!({
        "steps": records,
        "deployed": server.committed(),
        "discarded": discarded,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
