//! The capability shared by every engine variant

use crate::engine::progress::ProgressSubscriber;
use crate::error::TransferResult;
use async_trait::async_trait;
use rangeflow_types::{EngineEvent, TransferProgress};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// A transfer that can be driven, paused, resumed and closed.
///
/// Implemented by [`DownloadEngineFile`](crate::DownloadEngineFile) and
/// [`DownloadEngineMultiDownload`](crate::DownloadEngineMultiDownload), which
/// callers treat interchangeably.
#[async_trait]
pub trait DownloadEngine: Send + Sync {
    /// Stable identity of this engine
    fn id(&self) -> Uuid;

    /// Run the transfer to completion
    async fn download(&self) -> TransferResult<()>;

    /// Stop scheduling new work until resumed
    fn pause(&self);

    fn resume(&self);

    /// Abort, wait for in-flight work to settle and release resources.
    /// Idempotent.
    async fn close(&self) -> TransferResult<()>;

    /// Total bytes to transfer, once known
    fn download_size(&self) -> u64;

    /// Latest progress sample
    fn progress(&self) -> TransferProgress;

    /// Subscribe to this engine's events
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;

    /// Attach a synchronous progress subscriber
    fn attach(&self, subscriber: Arc<dyn ProgressSubscriber>);

    /// The leaf engines this engine is made of; a single engine is its own leaf
    fn into_leaves(self: Arc<Self>) -> Vec<Arc<dyn DownloadEngine>>;
}
