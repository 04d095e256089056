mod collectors;
mod commands;
mod config;
mod domain;
mod errors;
mod platform;
mod ticket;
mod tools;
mod transcript;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::collectors::ScanMode;
use crate::domain::finding::Severity;

#[derive(Parser)]
#[command(
    name = "sounder",
    version,
    about = "Unix host performance diagnostics and bottleneck classification"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a diagnostic scan and write transcript + report artifacts
    Scan {
        /// What to cover: quick, full, deep, or a single domain
        #[arg(long, value_enum, default_value = "full")]
        mode: ScanMode,

        /// Directory for the transcript and JSON report
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// File a ticket for findings at or above the severity floor
        #[arg(long)]
        ticket: bool,

        /// Severity floor for ticket filing
        #[arg(long, value_enum, default_value = "high")]
        ticket_severity: Severity,
    },

    /// Detect and print this host's platform profile
    Platform,

    /// Print the builtin threshold table
    Thresholds,
}

fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Scan {
            mode,
            output_dir,
            ticket,
            ticket_severity,
        } => commands::scan::run(mode, output_dir, ticket, ticket_severity),
        Commands::Platform => commands::platform::run(),
        Commands::Thresholds => commands::thresholds::run(),
    }
}
