//! Harmonic Hub CLI.
//!
//! Commands:
//! - serve: Run the stream, RPC and metrics listeners until Ctrl-C
//! - print-config: Print the effective configuration as JSON

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use harmonic_hub::config::ConfigOverrides;

#[derive(Parser)]
#[command(name = "harmonic-hub")]
#[command(version)]
#[command(about = "Shared harmonic field hub")]
struct Cli {
    #[command(flatten)]
    overrides: ConfigOverrides,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hub
    Serve,

    /// Print the effective configuration
    PrintConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();

    let config = cli.overrides.resolve()?;

    match cli.command {
        Commands::Serve => {
            info!(
                fast_tick_ms = config.ticks.fast_tick_ms,
                session_timeout_ms = config.ticks.session_timeout_ms,
                noise = config.noise.amplitude,
                "Starting harmonic hub"
            );
            harmonic_hub::serve(config).await?;
        }
        Commands::PrintConfig => {
            let json = serde_json::to_string_pretty(&config).context("Failed to encode config")?;
            println!("{}", json);
        }
    }

    Ok(())
}
