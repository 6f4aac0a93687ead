//! Headless replay CLI for vegawidget
//!
//! Replays a script of widget renders and server messages against the
//! in-memory engine and prints the resulting chart state.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod replay;

#[derive(Parser)]
#[command(name = "vegawidget")]
#[command(about = "vegawidget - remote control for embedded chart views", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines script of renders and server messages
    Replay {
        /// Script file, one step per line
        script: PathBuf,

        /// Bridge configuration (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Replay { script, config } => {
            let report = replay::run(&script, config.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
