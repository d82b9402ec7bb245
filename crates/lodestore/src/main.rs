//! Lodestore - cached key-value storage.
//!
//! This is the main entry point for the lodestore CLI.

mod commands;

use clap::{Parser, Subcommand};
use commands::{Session, SessionOptions};
use lodestore_util::log::{self, LogConfig};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lodestore")]
#[command(author, version, about = "Namespaced key-value storage", long_about = None)]
struct Cli {
    /// Storage directory (overrides config and LODESTORE_STORAGE_DIR)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Workspace the namespace is scoped to
    #[arg(short, long, global = true)]
    workspace: Option<String>,

    /// Namespace to operate on
    #[arg(short, long, global = true, default_value = "global")]
    namespace: String,

    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print logs at this level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the value stored under a key
    Get {
        /// Key to read
        key: String,
        /// Printed instead of failing when the key is absent
        #[arg(short, long)]
        default: Option<String>,
    },
    /// Store a value under a key
    Set {
        /// Key to write
        key: String,
        /// JSON value; text that is not JSON is stored as a string
        value: String,
    },
    /// Remove a key
    Delete {
        /// Key to remove
        key: String,
    },
    /// List every key in the namespace
    List {
        /// Print the namespace as one JSON object
        #[arg(long)]
        json: bool,
    },
    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_config = match cli.log_level.as_deref() {
        Some(name) => LogConfig {
            print: true,
            level: log::parse_level(name)
                .ok_or_else(|| anyhow::anyhow!("Unknown log level: {name}"))?,
            ..LogConfig::default()
        },
        None if cli.verbose => LogConfig::verbose(),
        None => LogConfig::default(),
    };
    log::init(log_config);

    let options = SessionOptions {
        config_path: cli.config,
        directory: cli.dir,
        namespace: cli.namespace,
        workspace: cli.workspace,
    };

    if let Commands::Config = cli.command {
        return commands::show_config(&options);
    }

    let session = Session::open(&options).await?;
    let result = match cli.command {
        Commands::Get { key, default } => commands::get(&session, &key, default.as_deref()),
        Commands::Set { key, value } => commands::set(&session, &key, &value).await,
        Commands::Delete { key } => commands::delete(&session, &key).await,
        Commands::List { json } => commands::list(&session, json),
        Commands::Config => Ok(()),
    };
    session.close().await;

    result
}
