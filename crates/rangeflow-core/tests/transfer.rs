//! End-to-end engine behavior through the public API

use async_trait::async_trait;
use parking_lot::Mutex;
use rangeflow_core::{
    CallbackWriteStream, DownloadEngine, DownloadEngineFile, DownloadEngineMultiDownload,
    DownloadInfo, EngineEvent, EngineOptions, FetchError, FetchStream, OnProgress,
    ProgressSubscriber, RetryPolicy, TransferError, TransferProgress, TransferStatus,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Serves a generated payload slowly and records peak concurrency
struct SlowSource {
    data: Vec<u8>,
    latency: Duration,
    retry: RetryPolicy,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    fetched: Mutex<Vec<u64>>,
}

impl SlowSource {
    fn new(len: usize, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            data: (0..len).map(|i| (i % 251) as u8).collect(),
            latency,
            retry: RetryPolicy::none(),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            fetched: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl FetchStream for SlowSource {
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
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.fetched.lock().push(start);

        tokio::time::sleep(self.latency).await;
        let bytes = self.data[start as usize..end as usize].to_vec();
        if let Some(on_progress) = on_progress {
            on_progress(bytes.len() as u64);
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(bytes)
    }

    async fn fetch_download_info_once(&self, _url: &str) -> Result<DownloadInfo, FetchError> {
        Ok(DownloadInfo {
            length: self.data.len() as u64,
            accept_range: true,
        })
    }
}

fn collecting_sink(len: usize) -> (Arc<CallbackWriteStream>, Arc<Mutex<Vec<u8>>>) {
    let buffer = Arc::new(Mutex::new(vec![0u8; len]));
    let sink = buffer.clone();
    let stream = CallbackWriteStream::new(move |offset, bytes| {
        let offset = offset as usize;
        sink.lock()[offset..offset + bytes.len()].copy_from_slice(bytes);
    });
    (Arc::new(stream), buffer)
}

fn options(chunk_size: u64, parallel_streams: usize) -> EngineOptions {
    EngineOptions {
        chunk_size,
        parallel_streams,
        ..EngineOptions::default()
    }
}

#[tokio::test(start_paused = true)]
async fn parallel_fetches_respect_the_stream_limit() {
    let source = SlowSource::new(1_000, Duration::from_millis(20));
    let (sink, buffer) = collecting_sink(1_000);
    let engine =
        DownloadEngineFile::new("slow://payload", options(64, 3), source.clone(), sink).unwrap();

    engine.download().await.unwrap();

    assert_eq!(source.peak.load(Ordering::SeqCst), 3);
    assert_eq!(source.fetched.lock().len(), 16);
    assert_eq!(*buffer.lock(), source.data);
    assert_eq!(engine.status(), TransferStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn speed_and_eta_are_reported_while_downloading() {
    let source = SlowSource::new(4_000, Duration::from_millis(500));
    let (sink, _) = collecting_sink(4_000);
    let engine = DownloadEngineFile::new("slow://payload", options(1_000, 1), source, sink).unwrap();
    let mut events = engine.subscribe();

    engine.download().await.unwrap();

    let mut saw_speed = false;
    while let Ok(event) = events.try_recv() {
        if let EngineEvent::Progress(progress) = event {
            if progress.status == TransferStatus::Downloading && progress.speed > 0 {
                saw_speed = true;
                assert!(progress.eta.is_some());
            }
        }
    }
    assert!(saw_speed);
    assert_eq!(engine.progress().speed, 0);
}

#[tokio::test(start_paused = true)]
async fn invalid_options_are_rejected() {
    let source = SlowSource::new(10, Duration::ZERO);
    let (sink, _) = collecting_sink(10);

    let result = DownloadEngineFile::new("slow://payload", options(0, 1), source, sink);

    assert!(matches!(result, Err(TransferError::InvalidOptions(_))));
}

/// Counts how many leaves report `Downloading` at once
struct Overlap {
    statuses: Mutex<Vec<TransferStatus>>,
    worst: AtomicUsize,
}

struct Leaf {
    index: usize,
    overlap: Arc<Overlap>,
}

impl ProgressSubscriber for Leaf {
    fn on_progress(&self, progress: &TransferProgress) {
        let mut statuses = self.overlap.statuses.lock();
        statuses[self.index] = progress.status;
        let downloading = statuses
            .iter()
            .filter(|s| **s == TransferStatus::Downloading)
            .count();
        self.overlap.worst.fetch_max(downloading, Ordering::SeqCst);
    }
}

#[tokio::test(start_paused = true)]
async fn nested_sequences_download_one_leaf_at_a_time() {
    let sources: Vec<_> = [300usize, 200, 500]
        .into_iter()
        .map(|len| SlowSource::new(len, Duration::from_millis(10)))
        .collect();
    let overlap = Arc::new(Overlap {
        statuses: Mutex::new(vec![TransferStatus::Idle; sources.len()]),
        worst: AtomicUsize::new(0),
    });

    let mut leaves: Vec<Arc<dyn DownloadEngine>> = Vec::new();
    for (index, source) in sources.iter().enumerate() {
        let (sink, _) = collecting_sink(source.data.len());
        let engine = Arc::new(
            DownloadEngineFile::new("slow://payload", options(64, 4), source.clone(), sink)
                .unwrap(),
        );
        engine.attach(Arc::new(Leaf {
            index,
            overlap: overlap.clone(),
        }));
        leaves.push(engine);
    }

    let third = leaves.pop().unwrap();
    let inner = Arc::new(DownloadEngineMultiDownload::new(leaves));
    let outer = DownloadEngineMultiDownload::new(vec![inner as Arc<dyn DownloadEngine>, third]);
    let mut events = outer.subscribe();

    outer.download().await.unwrap();

    assert_eq!(overlap.worst.load(Ordering::SeqCst), 1);
    assert_eq!(outer.download_size(), 1_000);
    let progress = outer.progress();
    assert_eq!(progress.bytes_transferred, 1_000);
    assert_eq!(progress.status, TransferStatus::Completed);

    let children = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|e| matches!(e, EngineEvent::ChildStarted { .. }))
        .count();
    assert_eq!(children, 3);
}
