//! CLI command implementation

use crate::output::{print_summary, TransferSummary};
use crate::progress::TransferProgressBar;
use crate::Cli;
use anyhow::{anyhow, Context, Result};
use rangeflow_core::{
    download_file, download_sequence, DownloadEngine, DownloadFileOptions, FetchStrategy,
};
use rangeflow_types::EngineOptions;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub async fn run(cli: Cli) -> Result<()> {
    let mut options = load_options(cli.config.as_deref()).await?;
    apply_flags(&mut options, &cli)?;

    let strategy = if cli.local {
        FetchStrategy::LocalFile
    } else {
        FetchStrategy::Fetch
    };

    let mut engines: Vec<Arc<dyn DownloadEngine>> = Vec::with_capacity(cli.sources.len());
    let mut destinations = Vec::with_capacity(cli.sources.len());
    for source in &cli.sources {
        let mut file_options = DownloadFileOptions::new(source.clone(), cli.directory.clone());
        file_options.fetch_strategy = strategy;
        file_options.engine = options.clone();
        destinations.push(file_options.destination());

        let engine = download_file(file_options)
            .await
            .with_context(|| format!("Failed to prepare {}", source))?;
        engines.push(engine);
    }

    let sequence = Arc::new(download_sequence(engines));
    info!(
        "Transferring {} sources, {} bytes total",
        cli.sources.len(),
        sequence.download_size()
    );

    let bar = TransferProgressBar::new(sequence.download_size(), cli.json);
    let render = tokio::spawn(bar.follow(sequence.subscribe()));

    let download = sequence.download();
    tokio::pin!(download);
    let result = tokio::select! {
        result = &mut download => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, closing transfers");
            let (closed, result) = tokio::join!(sequence.close(), &mut download);
            if let Err(e) = closed {
                warn!("Close after interrupt failed: {}", e);
            }
            result
        }
    };
    render.await.context("Progress renderer stopped unexpectedly")?;

    let summaries: Vec<TransferSummary> = cli
        .sources
        .iter()
        .zip(destinations)
        .zip(sequence.download_statuses())
        .map(|((source, destination), progress)| TransferSummary {
            source: source.clone(),
            destination,
            progress,
        })
        .collect();
    print_summary(&summaries, cli.json)?;

    result.map_err(|e| anyhow!("Transfer failed: {}", e))
}

/// Read engine options from a JSON file, or use defaults
async fn load_options(path: Option<&Path>) -> Result<EngineOptions> {
    let Some(path) = path else {
        return Ok(EngineOptions::default());
    };

    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let options = serde_json::from_str(&json)
        .with_context(|| format!("Invalid config {}", path.display()))?;
    Ok(options)
}

/// Overlay command-line flags on loaded options
fn apply_flags(options: &mut EngineOptions, cli: &Cli) -> Result<()> {
    if let Some(chunk_size) = cli.chunk_size {
        options.chunk_size = chunk_size;
    }
    if let Some(parallel) = cli.parallel {
        options.parallel_streams = parallel;
    }
    if cli.accept_range_always_true {
        options.accept_range_always_true = true;
    }
    for header in &cli.headers {
        let (name, value) = parse_header(header)?;
        options.headers.insert(name, value);
    }
    Ok(())
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("Header must look like `Name: value`, got `{}`", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("Header name is empty in `{}`", raw));
    }
    Ok((name.to_string(), value.trim().to_string()))
}
