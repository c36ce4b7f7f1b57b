//! Scripted in-memory adapters for engine tests

use crate::engine::fetch_stream::{FetchStream, OnProgress};
use crate::engine::write_stream::WriteStream;
use crate::error::FetchError;
use async_trait::async_trait;
use parking_lot::Mutex;
use rangeflow_types::{DownloadInfo, RetryPolicy};
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Serves ranges of a fixed buffer, optionally failing on chosen offsets
pub struct MemoryFetchStream {
    data: Vec<u8>,
    accept_range: bool,
    retry: RetryPolicy,
    delay: Duration,
    transient_failures: Mutex<HashMap<u64, u32>>,
    permanent_failures: Vec<u64>,
    calls: Mutex<Vec<u64>>,
}

impl MemoryFetchStream {
    pub fn new(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            accept_range: true,
            retry: RetryPolicy {
                attempts: 3,
                min_delay_ms: 10,
                max_delay_ms: 10,
                factor: 1.0,
            },
            delay: Duration::ZERO,
            transient_failures: Mutex::new(HashMap::new()),
            permanent_failures: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn without_range_support(mut self) -> Self {
        self.accept_range = false;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.retry.attempts = attempts;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the fetch starting at `start` the next `times` attempts
    pub fn failing_at(self, start: u64, times: u32) -> Self {
        self.transient_failures.lock().insert(start, times);
        self
    }

    /// Fail every fetch starting at `start` with a permanent error
    pub fn rejecting_at(mut self, start: u64) -> Self {
        self.permanent_failures.push(start);
        self
    }

    pub fn info(&self) -> DownloadInfo {
        DownloadInfo {
            length: self.data.len() as u64,
            accept_range: self.accept_range,
        }
    }

    /// Start offsets of every fetch attempt, in call order
    pub fn calls(&self) -> Vec<u64> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl FetchStream for MemoryFetchStream {
    fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    async fn fetch_bytes_once(
        &self,
        _url: &str,
        start: u64,
        end: u64,
        on_progress: Option<OnProgress<'_>>,
    ) -> Result<Vec<u8>, FetchError> {
        self.calls.lock().push(start);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.permanent_failures.contains(&start) {
            return Err(FetchError::Status {
                status: 404,
                url: "memory://".into(),
            });
        }

        let should_fail = {
            let mut failures = self.transient_failures.lock();
            match failures.get_mut(&start) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            }
        };
        if should_fail {
            return Err(FetchError::Status {
                status: 503,
                url: "memory://".into(),
            });
        }

        let bytes = self.data[start as usize..end as usize].to_vec();
        if let Some(on_progress) = on_progress {
            for block in bytes.chunks(2) {
                on_progress(block.len() as u64);
            }
        }
        Ok(bytes)
    }

    async fn fetch_download_info_once(&self, _url: &str) -> Result<DownloadInfo, FetchError> {
        Ok(self.info())
    }
}

/// Collects writes into a buffer and counts the bytes passed in
pub struct MemoryWriteStream {
    pub buffer: Mutex<Vec<u8>>,
    pub written: Mutex<u64>,
    pub closes: Mutex<u32>,
    /// Writes at this offset fail
    failing_offset: Option<u64>,
}

impl MemoryWriteStream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            buffer: Mutex::new(Vec::new()),
            written: Mutex::new(0),
            closes: Mutex::new(0),
            failing_offset: None,
        })
    }

    /// A stream whose write at `offset` fails as if the disk were full
    pub fn failing_at(offset: u64) -> Arc<Self> {
        Arc::new(Self {
            buffer: Mutex::new(Vec::new()),
            written: Mutex::new(0),
            closes: Mutex::new(0),
            failing_offset: Some(offset),
        })
    }

    pub fn contents(&self) -> Vec<u8> {
        self.buffer.lock().clone()
    }

    pub fn written(&self) -> u64 {
        *self.written.lock()
    }
}

#[async_trait]
impl WriteStream for MemoryWriteStream {
    async fn prepare(&self, total_size: u64) -> io::Result<()> {
        self.buffer.lock().resize(total_size as usize, 0);
        Ok(())
    }

    async fn write(&self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        if self.failing_offset == Some(offset) {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        let offset = offset as usize;
        self.buffer.lock()[offset..offset + bytes.len()].copy_from_slice(bytes);
        *self.written.lock() += bytes.len() as u64;
        Ok(())
    }

    async fn close(&self) -> io::Result<()> {
        *self.closes.lock() += 1;
        Ok(())
    }
}
