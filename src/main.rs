mod analysis;
mod comfy_table;
mod error;
mod fall_from_high;
mod klines;
mod presentation;
mod storage_utils;
mod tui;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Mutex;
use storage_utils::{AppConfig, AsyncStorageManager};
use tracing_subscriber::EnvFilter;

/// Percentage fall from the 52-week high for a fixed watchlist.
#[derive(Debug, Parser)]
#[command(name = "fall-screener", version)]
struct Cli {
    /// Directory holding config.json (defaults to `storage` next to the binary)
    #[arg(long, global = true)]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Print the fall table and bar chart once (default)
    Table {
        /// Keep the current terminal contents instead of clearing the screen
        #[arg(long)]
        no_clear: bool,
    },
    /// Interactive dashboard, F5 refreshes
    Tui,
}

fn init_tracing(command: &Command, storage: &AsyncStorageManager) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match command {
        // The TUI owns the terminal, so logs go to a file next to config.json.
        Command::Tui => {
            let file = std::fs::File::create(storage.base_dir.join("fall-screener.log"))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        Command::Table { .. } => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let storage = match cli.storage_dir {
        Some(dir) => AsyncStorageManager::new(dir).await?,
        None => AsyncStorageManager::new_relative("storage").await?,
    };
    let command = cli.command.unwrap_or(Command::Table { no_clear: false });
    init_tracing(&command, &storage)?;

    let config = AppConfig::load_or_init(&storage).await?;

    match command {
        Command::Table { no_clear } => {
            let dashboard = analysis::run_analysis_pipeline(&config).await?;
            if !no_clear {
                if let Err(e) = clearscreen::clear() {
                    tracing::debug!("could not clear screen: {}", e);
                }
            }
            comfy_table::run(&dashboard);
        }
        Command::Tui => tui::run_tui(config).await?,
    }

    Ok(())
}
