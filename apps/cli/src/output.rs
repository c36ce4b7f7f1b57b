//! Output formatting utilities

use console::style;
use rangeflow_types::{TransferProgress, TransferStatus};
use serde::Serialize;
use std::path::PathBuf;

/// Final state of one source
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSummary {
    pub source: String,
    pub destination: PathBuf,
    pub progress: TransferProgress,
}

/// Print final statuses as JSON or one line per source
pub fn print_summary(summaries: &[TransferSummary], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summaries)?);
        return Ok(());
    }

    for summary in summaries {
        let marker = match summary.progress.status {
            TransferStatus::Completed => style("✓").green().bold(),
            TransferStatus::Error => style("✗").red().bold(),
            _ => style("○").dim(),
        };
        println!(
            "{} {} -> {} ({}/{}, {})",
            marker,
            summary.source,
            style(summary.destination.display()).cyan(),
            format_bytes(summary.progress.bytes_transferred),
            format_bytes(summary.progress.total_bytes),
            summary.progress.status
        );
    }
    Ok(())
}

/// Format bytes as human-readable
pub fn format_bytes(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}

/// Format speed as human-readable
pub fn format_speed(bytes_per_sec: u64) -> String {
    format!("{}/s", human_bytes::human_bytes(bytes_per_sec as f64))
}

/// Format duration as human-readable
pub fn format_eta(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}
