//! Command dispatch for the `sheetkeeper` binary.

/// Clap definitions
mod args;

/// The `config` command
mod config;

/// The `set` command
mod edit;

/// The `history`, `show`, `restore` and `clear` commands
mod history;

use clap::Parser;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use sheetkeeper_core::HistorySession;
use sheetkeeper_core::config::HistoryConfig;
use sheetkeeper_core::history::SqliteStorage;
use sheetkeeper_core::tabs::TabBus;

use args::{Cli, Commands};

/// Run a future to completion on a fresh runtime.
fn block_on<F: Future>(future: F) -> Result<F::Output, String> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("Could not start runtime: {}", e))?;
    Ok(runtime.block_on(future))
}

/// Load the configuration, applying the `--database` override.
fn load_config(database: Option<PathBuf>) -> Result<HistoryConfig, String> {
    let mut config =
        HistoryConfig::load().map_err(|e| format!("Could not load config: {}", e))?;
    if database.is_some() {
        config.database_path = database;
    }
    Ok(config)
}

/// Open a history session over the configured SQLite log.
///
/// Must be called from inside the runtime, the session spawns its tab
/// listener on open.
fn open_session(config: HistoryConfig) -> Result<HistorySession, String> {
    let path = config
        .resolved_database_path()
        .map_err(|e| format!("Could not locate history database: {}", e))?;
    log::debug!("Using history database at {}", path.display());

    let bus = TabBus::new(&config.document_type);
    HistorySession::open(config, Arc::new(SqliteStorage::new(&path)), bus)
        .map_err(|e| format!("Could not open history at {}: {}", path.display(), e))
}

fn with_config(database: Option<PathBuf>, handler: impl FnOnce(HistoryConfig) -> bool) -> bool {
    match load_config(database) {
        Ok(config) => handler(config),
        Err(e) => {
            eprintln!("✗ {}", e);
            false
        }
    }
}

pub fn run_cli() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let success = match cli.command {
        Commands::Config { command } => config::handle_config_command(command, cli.database),
        Commands::History { json } => {
            with_config(cli.database, |config| history::handle_history(config, json))
        }
        Commands::Show { index } => {
            with_config(cli.database, |config| history::handle_show(config, index))
        }
        Commands::Set { assignments } => {
            with_config(cli.database, |config| edit::handle_set(config, &assignments))
        }
        Commands::Restore { index } => {
            with_config(cli.database, |config| history::handle_restore(config, index))
        }
        Commands::Clear { yes } => {
            with_config(cli.database, |config| history::handle_clear(config, yes))
        }
    };

    if !success {
        std::process::exit(1);
    }
}
