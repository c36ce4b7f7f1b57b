//! Rangeflow CLI - chunked parallel downloads from the command line
//!
//! Downloads (or copies, with `--local`) one or more sources strictly one
//! after another, each split into byte ranges fetched in parallel.

mod commands;
mod output;
mod progress;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Rangeflow - resumable, chunked, parallel transfers
#[derive(Parser, Debug)]
#[command(name = "rangeflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// URLs (or paths with --local) to transfer, in order
    #[arg(required = true)]
    pub sources: Vec<String>,

    /// Destination directory
    #[arg(short, long, default_value = ".", env = "RANGEFLOW_DIRECTORY")]
    pub directory: PathBuf,

    /// Bytes per chunk
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// Concurrent chunk fetches per file
    #[arg(short, long)]
    pub parallel: Option<usize>,

    /// Treat sources as local files and copy them
    #[arg(long)]
    pub local: bool,

    /// Split into chunks even when the server does not advertise range support
    #[arg(long)]
    pub accept_range_always_true: bool,

    /// Extra request header as `Name: value`; repeatable
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// JSON file with engine options; flags override its values
    #[arg(long, env = "RANGEFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print final per-file statuses as JSON
    #[arg(long)]
    pub json: bool,
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("rangeflow_core={0},rangeflow={0}", default_level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    commands::run(cli).await
}
