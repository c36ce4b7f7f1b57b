//! Rangeflow Core - resumable, chunked, parallel transfer engine
//!
//! A [`DownloadEngineFile`] splits a source into byte-range chunks, fetches
//! them concurrently through a retrying [`FetchStream`] and writes each one
//! at its offset through a [`WriteStream`]. [`DownloadEngineMultiDownload`]
//! runs several engines strictly one after another. Both publish progress
//! samples with throughput and ETA, and can be paused, resumed and closed.

mod config;
mod download;
mod engine;
mod error;

pub use config::*;
pub use download::*;
pub use engine::*;
pub use error::*;

pub use rangeflow_types::{
    Chunk, ChunkState, DownloadInfo, EngineEvent, EngineOptions, RetryPolicy, TransferProgress,
    TransferStatus,
};
