//! Waveline CLI
//!
//! Command-line interface for the waveline audio processing core.

mod cli;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::{commands, Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the -v flag
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("Waveline v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Analyze {
            input,
            config,
            json,
        } => commands::analyze(&input, config.as_deref(), json),
        Commands::Process {
            input,
            output,
            config,
            bit_depth,
        } => commands::process(&input, &output, config.as_deref(), bit_depth),
        Commands::Formats { config } => commands::formats(config.as_deref()),
        Commands::Presets { config } => commands::presets(config.as_deref()),
        Commands::CheckConfig { path } => commands::check_config(&path),
    }
}
