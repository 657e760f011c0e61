//! CLI Module
//!
//! Command-line front end for the waveline core. WAV decoding and encoding
//! happen here; the library itself never touches files.

pub mod commands;
pub mod wav;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Waveline - audio effect chain and analysis tool
#[derive(Parser, Debug)]
#[command(name = "waveline-cli")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print loudness summary and waveform of a WAV file
    #[command(name = "analyze")]
    Analyze {
        /// Input WAV file
        input: PathBuf,

        /// Configuration snapshot (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a WAV file through the configured effect chain
    ///
    /// The file is processed in independent chunks of `buffer_size` samples.
    /// Effect state (reverb tails, compressor envelope) does not carry across
    /// chunk boundaries, so raise `buffer_size` in the config to keep long
    /// tails intact.
    #[command(name = "process")]
    Process {
        /// Input WAV file
        input: PathBuf,

        /// Output WAV file
        #[arg(short, long)]
        output: PathBuf,

        /// Configuration snapshot (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output bit depth: 16, 24 or 32 (float)
        #[arg(long, default_value_t = 16)]
        bit_depth: u16,
    },

    /// List supported formats and codecs
    #[command(name = "formats")]
    Formats {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// List quality and reverb presets
    #[command(name = "presets")]
    Presets {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Validate a configuration file
    #[command(name = "check-config")]
    CheckConfig {
        /// Configuration snapshot (JSON)
        path: PathBuf,
    },
}
