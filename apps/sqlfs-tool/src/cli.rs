use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a connection profile and print it with the password redacted
    CheckConfig {
        /// Profile file with [global] and [profile.<name>] tables
        #[arg(short, long)]
        config: PathBuf,

        /// Profile to select
        #[arg(short, long, default_value = "default")]
        profile: String,

        /// Auth file holding the credential group named by the profile
        #[arg(long)]
        auth: Option<PathBuf>,
    },

    /// Replay a script of filesystem operations against an in-memory catalog
    Plan {
        /// Script with one operation per line
        script: PathBuf,

        /// Catalog TOML to seed the in-memory database with
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Database name reported by the session
        #[arg(long, default_value = "plan")]
        dbname: String,
    },
}
