//! Fetch adapter contract
//!
//! Adapters implement the single-attempt operations; the provided
//! `fetch_bytes` and `fetch_download_info` wrap them in the retry loop.

use crate::engine::retry::with_retry;
use crate::error::{FetchError, TransferResult};
use async_trait::async_trait;
use rangeflow_types::{DownloadInfo, RetryPolicy};
use tokio_util::sync::CancellationToken;

/// Invoked with the length of every block as it arrives
pub type OnProgress<'a> = &'a (dyn Fn(u64) + Send + Sync);

/// A source of byte ranges
#[async_trait]
pub trait FetchStream: Send + Sync {
    /// Retry policy applied to both operations
    fn retry_policy(&self) -> &RetryPolicy;

    /// Fetch `[start, end)` once, without retrying
    async fn fetch_bytes_once(
        &self,
        url: &str,
        start: u64,
        end: u64,
        on_progress: Option<OnProgress<'_>>,
    ) -> Result<Vec<u8>, FetchError>;

    /// Probe the source once, without retrying
    async fn fetch_download_info_once(&self, url: &str) -> Result<DownloadInfo, FetchError>;

    /// Fetch `[start, end)` under the retry policy
    async fn fetch_bytes(
        &self,
        url: &str,
        start: u64,
        end: u64,
        on_progress: Option<OnProgress<'_>>,
        abort: &CancellationToken,
    ) -> TransferResult<Vec<u8>> {
        with_retry(self.retry_policy(), abort, move |_| {
            self.fetch_bytes_once(url, start, end, on_progress)
        })
        .await
    }

    /// Probe length and range support under the retry policy
    async fn fetch_download_info(
        &self,
        url: &str,
        abort: &CancellationToken,
    ) -> TransferResult<DownloadInfo> {
        with_retry(self.retry_policy(), abort, move |_| {
            self.fetch_download_info_once(url)
        })
        .await
    }

    /// Release held connection resources. Must be idempotent.
    async fn close(&self) {}
}
