//! Transfer engine - the heart of Rangeflow
//!
//! This module implements a chunked, parallel transfer engine with:
//! - Byte-range chunk planning with bounded parallel fetches
//! - Retry-wrapped pluggable fetch adapters (HTTP, local file)
//! - Offset-addressed pluggable write adapters
//! - Event-driven progress aggregation with sliding-window speed
//! - In-process pause/resume/close
//! - Strictly sequential multi-download composition

mod chunks;
mod download_engine;
mod download_engine_file;
mod fetch_stream;
mod http_fetch_stream;
mod local_file_fetch_stream;
mod multi_download;
mod progress;
mod retry;
mod statistics;
mod write_stream;

#[cfg(test)]
pub(crate) mod testing;

pub use chunks::*;
pub use download_engine::*;
pub use download_engine_file::*;
pub use fetch_stream::*;
pub use http_fetch_stream::*;
pub use local_file_fetch_stream::*;
pub use multi_download::*;
pub use progress::*;
pub use retry::*;
pub use statistics::*;
pub use write_stream::*;
