//! machines - FSM description editor
//!
//! Creates and edits machine bundles for the swiftfsm, vhdl, clfsm, ucfsm and
//! spartanfsm dialects. Every edit is validated before the bundle is written.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use colored::Colorize;
use config::Config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "machines")]
#[command(about = "Editor for finite-state-machine descriptions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Create a machine bundle with the dialect's default contents
    New {
        /// Bundle location, e.g. `Door.machine`
        machine: PathBuf,

        /// Dialect (defaults to the configured dialect)
        #[arg(short, long)]
        dialect: Option<String>,
    },

    /// Print a machine as JSON
    Show {
        machine: PathBuf,

        /// Print only the value at this path
        #[arg(short, long)]
        path: Option<String>,
    },

    /// Check a machine against its dialect's rules
    Validate { machine: PathBuf },

    /// Add a state with a generated name
    NewState { machine: PathBuf },

    /// Add a transition between two states
    NewTransition {
        machine: PathBuf,
        source: String,
        target: String,

        /// Guard condition
        #[arg(short, long)]
        condition: Option<String>,
    },

    /// Delete states by index
    DeleteStates {
        machine: PathBuf,

        #[arg(value_delimiter = ',', required = true)]
        indices: Vec<usize>,
    },

    /// Delete transitions leaving a state, by position
    DeleteTransitions {
        machine: PathBuf,

        /// Index of the source state
        state: usize,

        #[arg(value_delimiter = ',', required = true)]
        indices: Vec<usize>,
    },

    /// Write a value at a path
    Set {
        machine: PathBuf,

        /// Path, e.g. `machine.attributes["settings"]["suspend_state"]`
        path: String,

        /// Plain text, or a `{"kind": ..., "payload": ...}` JSON value
        value: String,
    },

    /// Rename a state, updating every reference to it
    RenameState {
        machine: PathBuf,
        from: String,
        to: String,
    },

    /// Append a row to a table, or an element to a collection
    AddRow {
        machine: PathBuf,

        /// Path of the table or collection
        path: String,

        /// JSON array of attribute values for a row, or one attribute value
        item: String,
    },

    /// Delete rows of a table or elements of a collection
    DeleteRows {
        machine: PathBuf,
        path: String,

        #[arg(value_delimiter = ',', required = true)]
        indices: Vec<usize>,
    },

    /// Move rows so they start at a position of the original list
    MoveRows {
        machine: PathBuf,
        path: String,

        #[arg(value_delimiter = ',', required = true)]
        indices: Vec<usize>,

        /// Destination offset
        #[arg(short, long)]
        to: usize,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration (from file if MACHINES_CONFIG is set, then env overrides)
    let loaded = Config::load();
    let level = loaded
        .as_ref()
        .map(|c| c.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    let config = match loaded {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    match commands::execute(&config, cli.command) {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}
