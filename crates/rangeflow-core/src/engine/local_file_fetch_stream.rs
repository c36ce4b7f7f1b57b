//! Local file fetch adapter - lets the engine copy files through the same pipeline

use crate::engine::fetch_stream::{FetchStream, OnProgress};
use crate::error::FetchError;
use async_trait::async_trait;
use rangeflow_types::{DownloadInfo, EngineOptions, RetryPolicy};
use std::io::SeekFrom;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

const READ_BLOCK_SIZE: usize = 64 * 1024;

/// Reads byte ranges from a file on disk
pub struct LocalFileFetchStream {
    retry: RetryPolicy,
}

impl LocalFileFetchStream {
    pub fn new(options: &EngineOptions) -> Self {
        Self {
            retry: options.retry.clone(),
        }
    }
}

/// Accepts plain paths as well as `file://` URLs
pub fn local_path(source: &str) -> PathBuf {
    match url::Url::parse(source) {
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .unwrap_or_else(|_| PathBuf::from(source)),
        _ => PathBuf::from(source),
    }
}

#[async_trait]
impl FetchStream for LocalFileFetchStream {
    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    async fn fetch_bytes_once(
        &self,
        url: &str,
        start: u64,
        end: u64,
        on_progress: Option<OnProgress<'_>>,
    ) -> Result<Vec<u8>, FetchError> {
        let expected = end.saturating_sub(start) as usize;
        let mut file = File::open(local_path(url)).await?;
        file.seek(SeekFrom::Start(start)).await?;

        let mut buffer = vec![0u8; expected];
        let mut filled = 0;
        while filled < expected {
            let upper = (filled + READ_BLOCK_SIZE).min(expected);
            let n = file.read(&mut buffer[filled..upper]).await?;
            if n == 0 {
                return Err(FetchError::ShortRead {
                    expected: expected as u64,
                    received: filled as u64,
                });
            }
            filled += n;

            if let Some(on_progress) = on_progress {
                on_progress(n as u64);
            }
        }

        Ok(buffer)
    }

    async fn fetch_download_info_once(&self, url: &str) -> Result<DownloadInfo, FetchError> {
        let metadata = tokio::fs::metadata(local_path(url)).await?;
        Ok(DownloadInfo {
            length: metadata.len(),
            accept_range: true,
        })
    }
}
