use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sheetkeeper")]
#[command(version)]
#[command(about = "Version history for character sheets", long_about = None)]
pub struct Cli {
    /// Override the SQLite history database location
    #[arg(short, long, global = true)]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List stored versions, oldest first
    History {
        /// Print the records as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print a stored version (defaults to the newest)
    Show {
        /// Version index as listed by `history`
        index: Option<usize>,
    },

    /// Edit fields of the newest version and store the result
    ///
    /// Each assignment is FIELD=VALUE. VALUE is parsed as JSON and falls back
    /// to a plain string. Nested fields use dots, e.g. stats.might=12.
    /// All assignments of one call are squashed into a single version.
    Set {
        /// One or more FIELD=VALUE assignments
        #[arg(required = true, value_name = "FIELD=VALUE")]
        assignments: Vec<String>,
    },

    /// Restore an older version as a new version
    Restore {
        /// Version index as listed by `history`
        index: usize,
    },

    /// Delete every stored version
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Show or change configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Print the config file location
    Path,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Set one configuration value
    Set {
        /// squash_delay_ms, max_versions, conflict_grace_ms, teardown_timeout_ms,
        /// excluded_fields, document_type or database_path
        key: String,

        /// New value (comma separated for excluded_fields)
        value: String,
    },
}
