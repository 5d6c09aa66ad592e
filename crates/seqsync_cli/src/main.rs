//! SeqSync CLI
//!
//! Command-line tools for exercising and debugging SeqSync sessions.
//!
//! # Commands
//!
//! - `simulate` - Run an outbox and a client over a lossy loopback link
//! - `classify` - Run a JSON-lines envelope capture through the sequencer

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// SeqSync command-line tools.
#[derive(Parser)]
#[command(name = "seqsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// What happens when a live update skips ahead.
#[derive(Clone, Copy, ValueEnum)]
enum GapMode {
    /// Reload the page
    Reload,
    /// Reconnect and replay the missing updates
    Resync,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an outbox and a client over an in-process link
    Simulate {
        /// Number of updates to send
        #[arg(short, long, default_value = "200")]
        updates: u64,

        /// Updates lost in transit, per thousand
        #[arg(short, long, default_value = "0")]
        loss: u64,

        /// Enable simulated disconnects after every handshake
        #[arg(short, long)]
        chaos: bool,

        /// Seed for identifiers, loss and chaos timings
        #[arg(short, long, default_value = "1")]
        seed: u64,

        /// Reaction to a live gap
        #[arg(short, long, value_enum, default_value = "resync")]
        gap: GapMode,

        /// Maximum number of retained messages on the outbox
        #[arg(long, default_value = "1000")]
        history: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Classify a JSON-lines file of update envelopes
    Classify {
        /// Capture file, one envelope per line
        file: PathBuf,

        /// Last sequence accepted before the capture starts
        #[arg(short, long, default_value = "0")]
        start: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Simulate {
            updates,
            loss,
            chaos,
            seed,
            gap,
            history,
            format,
        } => {
            let options = commands::simulate::SimulateOptions {
                updates,
                loss_per_mille: loss.min(1000),
                chaos,
                seed,
                resync_gaps: matches!(gap, GapMode::Resync),
                history_max_length: history,
            };
            commands::simulate::run(&options, &format)?;
        }
        Commands::Classify {
            file,
            start,
            format,
        } => {
            commands::classify::run(&file, start, &format)?;
        }
        Commands::Version => {
            println!("SeqSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("SeqSync Protocol v{}", seqsync_protocol::VERSION);
        }
    }

    Ok(())
}
