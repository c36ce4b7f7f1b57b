//! Progress bar for the aggregate transfer

use crate::output::{format_eta, format_speed};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use rangeflow_types::{EngineEvent, TransferProgress, TransferStatus};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Renders one engine's event stream as a terminal progress bar
pub struct TransferProgressBar {
    bar: ProgressBar,
}

impl TransferProgressBar {
    pub fn new(total: u64, hidden: bool) -> Self {
        let bar = if hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(total)
        };

        if let Ok(template) = ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
        ) {
            bar.set_style(template.progress_chars("█▓▒░  "));
        }

        Self { bar }
    }

    /// Follow events until the engine closes
    pub async fn follow(self, mut events: broadcast::Receiver<EngineEvent>) {
        let mut status = TransferStatus::Idle;
        loop {
            match events.recv().await {
                Ok(EngineEvent::Progress(progress)) => {
                    status = progress.status;
                    self.update(&progress);
                }
                Ok(EngineEvent::Paused) => {
                    self.bar.set_message(format!("{} Paused", style("⏸").yellow()));
                }
                Ok(EngineEvent::Closed) => break,
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }

        match status {
            TransferStatus::Completed => self
                .bar
                .finish_with_message(format!("{} Complete", style("✓").green().bold())),
            TransferStatus::Error => self
                .bar
                .abandon_with_message(format!("{} Failed", style("✗").red().bold())),
            _ => self
                .bar
                .abandon_with_message(format!("{} Closed", style("○").dim())),
        }
    }

    fn update(&self, progress: &TransferProgress) {
        if progress.total_bytes > 0 {
            self.bar.set_length(progress.total_bytes);
        }
        self.bar.set_position(progress.bytes_transferred);

        let eta = progress.eta.map(format_eta).unwrap_or_else(|| "-".to_string());
        self.bar
            .set_message(format!("({}, {})", format_speed(progress.speed), eta));
    }
}
