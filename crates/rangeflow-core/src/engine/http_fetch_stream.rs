//! HTTP fetch adapter - ranged GET requests over reqwest

use crate::engine::fetch_stream::{FetchStream, OnProgress};
use crate::error::FetchError;
use async_trait::async_trait;
use futures::StreamExt;
use rangeflow_types::{DownloadInfo, EngineOptions, RetryPolicy};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fetches byte ranges from an HTTP(S) server
pub struct HttpFetchStream {
    client: Client,
    headers: HeaderMap,
    retry: RetryPolicy,
}

impl HttpFetchStream {
    /// Create an adapter with its own client
    pub fn new(options: &EngineOptions) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(concat!("Rangeflow/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .read_timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self::with_client(client, options))
    }

    /// Create an adapter sharing an existing client
    pub fn with_client(client: Client, options: &EngineOptions) -> Self {
        let mut headers = HeaderMap::new();
        for (name, value) in &options.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!("Ignoring invalid request header: {}", name),
            }
        }

        Self {
            client,
            headers,
            retry: options.retry.clone(),
        }
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        self.client.request(method, url).headers(self.headers.clone())
    }

    /// Fall back to a one-byte range request when HEAD is refused or reports
    /// no length. Many CDNs only answer with a size on GET.
    async fn probe_with_range(&self, url: &str) -> Result<DownloadInfo, FetchError> {
        info!("HEAD gave no usable length, trying partial GET on {}", url);

        let response = self
            .request(Method::GET, url)
            .header(reqwest::header::RANGE, "bytes=0-0")
            .send()
            .await?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {
                let length = header_str(response.headers(), reqwest::header::CONTENT_RANGE)
                    .and_then(parse_content_range_total)
                    .ok_or(FetchError::MissingLength)?;
                Ok(DownloadInfo {
                    length,
                    accept_range: true,
                })
            }
            StatusCode::OK => {
                // Server ignored the range and is sending the whole body
                let length = header_str(response.headers(), reqwest::header::CONTENT_LENGTH)
                    .and_then(|v| v.parse().ok())
                    .ok_or(FetchError::MissingLength)?;
                Ok(DownloadInfo {
                    length,
                    accept_range: false,
                })
            }
            status => Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            }),
        }
    }
}

#[async_trait]
impl FetchStream for HttpFetchStream {
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
        let expected = end.saturating_sub(start);
        if expected == 0 {
            return Ok(Vec::new());
        }

        let range_header = format!("bytes={}-{}", start, end - 1);
        debug!("Requesting range {} from {}", range_header, url);

        let response = self
            .request(Method::GET, url)
            .header(reqwest::header::RANGE, range_header)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::OK && start > 0 {
            // The whole body would start at offset 0, not at `start`
            return Err(FetchError::Status {
                status: StatusCode::RANGE_NOT_SATISFIABLE.as_u16(),
                url: url.to_string(),
            });
        }
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        if status == StatusCode::PARTIAL_CONTENT {
            let served = header_str(response.headers(), reqwest::header::CONTENT_RANGE)
                .and_then(parse_content_range_start);
            if let Some(served) = served.filter(|served| *served != start) {
                return Err(FetchError::UnexpectedRange {
                    requested: start,
                    served,
                });
            }
        }

        let mut buffer = Vec::with_capacity(expected as usize);
        let mut stream = response.bytes_stream();

        while let Some(block) = stream.next().await {
            let block = block?;
            let remaining = (expected as usize).saturating_sub(buffer.len());
            let take = block.len().min(remaining);
            buffer.extend_from_slice(&block[..take]);

            if let Some(on_progress) = on_progress {
                on_progress(take as u64);
            }

            if buffer.len() as u64 >= expected {
                break;
            }
        }

        if buffer.len() as u64 != expected {
            return Err(FetchError::ShortRead {
                expected,
                received: buffer.len() as u64,
            });
        }

        Ok(buffer)
    }

    async fn fetch_download_info_once(&self, url: &str) -> Result<DownloadInfo, FetchError> {
        let response = self.request(Method::HEAD, url).send().await?;

        let status = response.status();
        if !status.is_success() {
            debug!("HEAD on {} answered {}", url, status);
            return self.probe_with_range(url).await;
        }

        let accept_range = header_str(response.headers(), reqwest::header::ACCEPT_RANGES)
            .map(|v| v.eq_ignore_ascii_case("bytes"))
            .unwrap_or(false);
        let length = header_str(response.headers(), reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.parse::<u64>().ok());

        match length {
            Some(length) => Ok(DownloadInfo {
                length,
                accept_range,
            }),
            None => self.probe_with_range(url).await,
        }
    }
}

fn header_str(headers: &HeaderMap, name: HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Total size from a `Content-Range` value such as `bytes 0-0/12345`
pub fn parse_content_range_total(value: &str) -> Option<u64> {
    let total = value.rsplit('/').next()?.trim();
    if total == "*" {
        return None;
    }
    total.parse().ok()
}

/// First offset from a `Content-Range` value such as `bytes 100-199/12345`
pub fn parse_content_range_start(value: &str) -> Option<u64> {
    let range = value.trim().strip_prefix("bytes")?.trim_start();
    let (start, _) = range.split_once('-')?;
    start.trim().parse().ok()
}
