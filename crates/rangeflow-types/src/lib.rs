//! Shared types for Rangeflow
//!
//! This crate contains the plain data structures shared between
//! the transfer engine and its front ends.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// Transfer Status
// ============================================================================

/// Engine-level state of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    #[default]
    Idle,
    Downloading,
    Paused,
    Completed,
    Error,
    Closed,
}

impl TransferStatus {
    /// Rank used when several statuses are folded into one.
    /// Higher wins: error > paused > downloading > closed > idle > completed.
    pub fn precedence(self) -> u8 {
        match self {
            TransferStatus::Error => 5,
            TransferStatus::Paused => 4,
            TransferStatus::Downloading => 3,
            TransferStatus::Closed => 2,
            TransferStatus::Idle => 1,
            TransferStatus::Completed => 0,
        }
    }

    /// Whether no further transfer can happen in this state
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Error | TransferStatus::Closed
        )
    }

    /// Resolve the status of a group of transfers
    pub fn resolve<I: IntoIterator<Item = TransferStatus>>(statuses: I) -> TransferStatus {
        statuses
            .into_iter()
            .max_by_key(|s| s.precedence())
            .unwrap_or(TransferStatus::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Idle => "idle",
            TransferStatus::Downloading => "downloading",
            TransferStatus::Paused => "paused",
            TransferStatus::Completed => "completed",
            TransferStatus::Error => "error",
            TransferStatus::Closed => "closed",
        }
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Chunk Types
// ============================================================================

/// Lifecycle of a single chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkState {
    Pending,
    Active,
    Done,
    Error,
}

/// A contiguous byte range `[start, end)` of the transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: u32,
    pub start: u64,
    /// Exclusive end offset
    pub end: u64,
    pub downloaded: u64,
    pub state: ChunkState,
}

impl Chunk {
    pub fn new(index: u32, start: u64, end: u64) -> Self {
        Self {
            index,
            start,
            end,
            downloaded: 0,
            state: ChunkState::Pending,
        }
    }

    /// Size of this chunk in bytes
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_done(&self) -> bool {
        self.state == ChunkState::Done
    }
}

// ============================================================================
// Progress Types
// ============================================================================

/// One immutable progress sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TransferProgress {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    /// Bytes per second over the statistics window
    pub speed: u64,
    /// Seconds remaining, if the speed allows an estimate
    pub eta: Option<u64>,
    pub status: TransferStatus,
}

impl TransferProgress {
    pub fn new(bytes_transferred: u64, total_bytes: u64, status: TransferStatus) -> Self {
        Self {
            bytes_transferred,
            total_bytes,
            speed: 0,
            eta: None,
            status,
        }
    }

    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return match self.status {
                TransferStatus::Completed => 100.0,
                _ => 0.0,
            };
        }
        (self.bytes_transferred as f64 / self.total_bytes as f64) * 100.0
    }
}

/// Result of probing a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadInfo {
    pub length: u64,
    pub accept_range: bool,
}

// ============================================================================
// Options
// ============================================================================

/// Attempt count and backoff schedule applied to a single fetch operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub attempts: u32,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: f64,
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(64) as i32;
        let delay = self.min_delay_ms as f64 * self.factor.powi(exp);
        let capped = delay.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            min_delay_ms: 200,
            max_delay_ms: 5_000,
            factor: 1.5,
        }
    }
}

/// Options recognized by a transfer engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Bytes per chunk
    pub chunk_size: u64,
    /// Maximum number of concurrent chunk fetches
    pub parallel_streams: usize,
    pub retry: RetryPolicy,
    /// Fetch in parallel even when the source does not advertise range support
    pub accept_range_always_true: bool,
    /// Extra request headers for network sources
    pub headers: HashMap<String, String>,
    /// Sliding window used for speed calculation
    pub speed_window_ms: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            chunk_size: 5 * 1024 * 1024,
            parallel_streams: 4,
            retry: RetryPolicy::default(),
            accept_range_always_true: false,
            headers: HashMap::new(),
            speed_window_ms: 3_000,
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Notifications published by an engine on its own channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    Started,
    Progress(TransferProgress),
    Paused,
    Resumed,
    ChildStarted { engine_id: Uuid },
    ChildClosed { engine_id: Uuid },
    Finished,
    Closed,
}
