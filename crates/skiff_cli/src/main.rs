//! Skiff CLI
//!
//! Command-line tools for a Skiff sync store.
//!
//! # Commands
//!
//! - `status` - Summarize the outbox, error store and checkpoint
//! - `outbox` - List pending outbox entries
//! - `errors` - List recorded sync errors
//! - `clear-errors` - Delete error records
//! - `sync` - Run one sync cycle against the configured server
//! - `report` - Send unsent error records
//! - `reset` - Clear the outbox and sync counters

mod commands;

use clap::{Parser, Subcommand};
use commands::Context;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Skiff sync store tools.
#[derive(Parser)]
#[command(name = "skiff")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the sync store
    #[arg(global = true, short, long, default_value = ".skiff")]
    data_dir: PathBuf,

    /// JSON configuration file
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize the outbox, error store and checkpoint
    Status {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List pending outbox entries, oldest first
    Outbox {
        /// Maximum number of entries to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// List recorded sync errors, newest first
    Errors {
        /// Only show errors not yet reported
        #[arg(short, long)]
        unsent: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Delete error records (reported ones by default)
    ClearErrors {
        /// Only delete reported errors older than this many days
        #[arg(long, conflicts_with = "all")]
        sent_older_than_days: Option<u32>,

        /// Delete every error record
        #[arg(long)]
        all: bool,
    },

    /// Run one sync cycle
    Sync {
        /// Entity type to download (repeatable)
        #[arg(short, long = "entity")]
        entities: Vec<String>,

        /// Clear the halt and failure counter first
        #[arg(long)]
        force: bool,
    },

    /// Send unsent error records to the report endpoint
    Report,

    /// Clear the outbox and sync counters
    Reset {
        /// Also forget the download checkpoint
        #[arg(long)]
        checkpoint: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let ctx = Context::load(cli.data_dir, cli.config.as_deref())?;

    match cli.command {
        Commands::Status { format } => {
            commands::status::run(&ctx, &format).await?;
        }
        Commands::Outbox { limit } => {
            commands::outbox::run(&ctx, limit).await?;
        }
        Commands::Errors { unsent, format } => {
            commands::errors::list(&ctx, unsent, &format).await?;
        }
        Commands::ClearErrors {
            sent_older_than_days,
            all,
        } => {
            commands::errors::clear(&ctx, sent_older_than_days, all).await?;
        }
        Commands::Sync { entities, force } => {
            commands::sync::run(&ctx, &entities, force).await?;
        }
        Commands::Report => {
            commands::sync::report(&ctx).await?;
        }
        Commands::Reset { checkpoint } => {
            commands::sync::reset(&ctx, checkpoint).await?;
        }
    }

    Ok(())
}
