//! Single-file engine - plans chunks and runs the bounded parallel pipeline
//!
//! Chunk tasks only fetch and write. Every change to the chunk table
//! happens in the scheduling loop, as tasks report progress or finish.

use crate::config::validate_options;
use crate::engine::chunks::plan_chunks;
use crate::engine::download_engine::DownloadEngine;
use crate::engine::fetch_stream::{FetchStream, OnProgress};
use crate::engine::progress::{
    ProgressChannel, ProgressStatisticsBuilder, ProgressSubscriber, SlotId,
};
use crate::engine::write_stream::WriteStream;
use crate::error::{FetchError, TransferError, TransferResult};
use async_trait::async_trait;
use parking_lot::{Mutex, ReentrantMutex};
use rangeflow_types::{
    Chunk, ChunkState, DownloadInfo, EngineEvent, EngineOptions, TransferProgress, TransferStatus,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

enum RunOutcome {
    Finished,
    Aborted,
}

enum ChunkOutcome {
    Written(u64),
    /// Fetched or interrupted after abort; nothing was written
    Discarded,
    Failed(TransferError),
}

struct FileState {
    chunks: Vec<Chunk>,
    bytes_written: u64,
    status: TransferStatus,
    /// Highest byte count published so far
    reported: u64,
}

/// Owns one transfer end-to-end
pub struct DownloadEngineFile {
    id: Uuid,
    url: String,
    options: EngineOptions,
    fetch_stream: Arc<dyn FetchStream>,
    write_stream: Arc<dyn WriteStream>,
    info: Mutex<Option<DownloadInfo>>,
    state: Mutex<FileState>,
    publishing: ReentrantMutex<()>,
    started: AtomicBool,
    closed: AtomicBool,
    paused: watch::Sender<bool>,
    abort: CancellationToken,
    /// Held while the scheduling loop runs; `close` takes it to wait for in-flight work
    settled: tokio::sync::Mutex<()>,
    events: Arc<ProgressChannel>,
    statistics: ProgressStatisticsBuilder,
    slot: SlotId,
}

impl DownloadEngineFile {
    /// Create an engine for `url`. The source is probed on `download()`
    /// unless its info is supplied with [`with_download_info`](Self::with_download_info).
    pub fn new(
        url: impl Into<String>,
        options: EngineOptions,
        fetch_stream: Arc<dyn FetchStream>,
        write_stream: Arc<dyn WriteStream>,
    ) -> TransferResult<Self> {
        validate_options(&options)?;

        let events = Arc::new(ProgressChannel::new());
        let statistics = ProgressStatisticsBuilder::with_window(
            events.clone(),
            Duration::from_millis(options.speed_window_ms),
        );
        let slot = statistics.add_slot(TransferProgress::default());
        let (paused, _) = watch::channel(false);

        Ok(Self {
            id: Uuid::new_v4(),
            url: url.into(),
            options,
            fetch_stream,
            write_stream,
            info: Mutex::new(None),
            state: Mutex::new(FileState {
                chunks: Vec::new(),
                bytes_written: 0,
                status: TransferStatus::Idle,
                reported: 0,
            }),
            publishing: ReentrantMutex::new(()),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            paused,
            abort: CancellationToken::new(),
            settled: tokio::sync::Mutex::new(()),
            events,
            statistics,
            slot,
        })
    }

    /// Use already-probed source info instead of probing on `download()`
    pub fn with_download_info(self, info: DownloadInfo) -> Self {
        *self.info.lock() = Some(info);
        self.update_state(|_| {});
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn status(&self) -> TransferStatus {
        self.state.lock().status
    }

    /// Snapshot of the chunk table
    pub fn chunks(&self) -> Vec<Chunk> {
        self.state.lock().chunks.clone()
    }

    /// Bytes persisted through the write stream so far
    pub fn bytes_written(&self) -> u64 {
        self.state.lock().bytes_written
    }

    /// Apply `mutate`, then publish the resulting sample.
    ///
    /// Subscribers run after the state lock is released, so they may read
    /// the engine. `publishing` keeps samples leaving in the order they
    /// were taken and is reentrant for subscribers on the same thread.
    fn update_state<R>(&self, mutate: impl FnOnce(&mut FileState) -> R) -> R {
        let _publishing = self.publishing.lock();
        let total = self.download_size();

        let (result, sample) = {
            let mut state = self.state.lock();
            let result = mutate(&mut state);

            let transferred = state
                .chunks
                .iter()
                .map(|c| c.downloaded)
                .sum::<u64>()
                .max(state.reported);
            state.reported = transferred;

            (result, TransferProgress::new(transferred, total, state.status))
        };

        self.statistics.record(self.slot, &sample);
        result
    }

    async fn run(&self) -> TransferResult<RunOutcome> {
        if self.abort.is_cancelled() {
            return Ok(RunOutcome::Aborted);
        }

        let paused = *self.paused.borrow();
        self.update_state(|state| {
            state.status = if paused {
                TransferStatus::Paused
            } else {
                TransferStatus::Downloading
            };
        });
        self.events.emit(EngineEvent::Started);
        info!("Starting download {} from {}", self.id, self.url);

        let info = match self.ensure_info().await {
            Ok(info) => info,
            Err(TransferError::Aborted) => return Ok(RunOutcome::Aborted),
            Err(e) => return Err(e),
        };

        let ranged = info.accept_range || self.options.accept_range_always_true;
        let chunk_size = if ranged {
            self.options.chunk_size
        } else {
            info!("{} does not advertise range support, fetching sequentially", self.url);
            info.length
        };

        let chunks = plan_chunks(info.length, chunk_size);
        info!(
            "Planned {} chunks for {} ({} bytes, {} parallel streams)",
            chunks.len(),
            self.url,
            info.length,
            self.options.parallel_streams
        );
        self.update_state(|state| state.chunks = chunks);

        self.write_stream.prepare(info.length).await?;
        self.schedule().await
    }

    async fn ensure_info(&self) -> TransferResult<DownloadInfo> {
        let cached = *self.info.lock();
        if let Some(info) = cached {
            return Ok(info);
        }

        let info = self
            .fetch_stream
            .fetch_download_info(&self.url, &self.abort)
            .await?;
        *self.info.lock() = Some(info);
        Ok(info)
    }

    async fn schedule(&self) -> TransferResult<RunOutcome> {
        let parallel_streams = self.options.parallel_streams.max(1);
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<(usize, u64)>();
        let mut paused_rx = self.paused.subscribe();
        let mut in_flight: JoinSet<(usize, ChunkOutcome)> = JoinSet::new();
        let mut failure: Option<TransferError> = None;

        loop {
            let paused = *paused_rx.borrow_and_update();
            if failure.is_none() && !self.abort.is_cancelled() && !paused {
                while in_flight.len() < parallel_streams {
                    let Some(position) = self.activate_next_chunk() else {
                        break;
                    };
                    self.spawn_chunk(&mut in_flight, position, progress_tx.clone());
                }
            }

            if in_flight.is_empty() {
                if let Some(error) = failure {
                    return Err(error);
                }
                if self.abort.is_cancelled() {
                    return Ok(RunOutcome::Aborted);
                }
                if self.all_chunks_done() {
                    return Ok(RunOutcome::Finished);
                }

                debug!("Download {} waiting for resume", self.id);
                tokio::select! {
                    _ = self.abort.cancelled() => {}
                    _ = wait_for_resume(&mut paused_rx) => {}
                }
                continue;
            }

            tokio::select! {
                Some((position, received)) = progress_rx.recv() => {
                    self.record_partial(position, received);
                }
                Some(joined) = in_flight.join_next() => match joined {
                    Ok((position, ChunkOutcome::Written(len))) => {
                        self.complete_chunk(position, len);
                    }
                    Ok((position, ChunkOutcome::Discarded)) => {
                        self.requeue_chunk(position);
                    }
                    Ok((position, ChunkOutcome::Failed(e))) => {
                        self.fail_chunk(position);
                        if failure.is_none() {
                            error!("Chunk {} of {} failed: {}", position, self.url, e);
                            self.abort.cancel();
                            failure = Some(e);
                        }
                    }
                    Err(e) => {
                        error!("Chunk task panicked: {}", e);
                        if failure.is_none() {
                            self.abort.cancel();
                            failure = Some(TransferError::TaskFailed(e.to_string()));
                        }
                    }
                },
            }
        }
    }

    fn activate_next_chunk(&self) -> Option<usize> {
        let mut state = self.state.lock();
        let position = state
            .chunks
            .iter()
            .position(|c| c.state == ChunkState::Pending)?;
        let chunk = &mut state.chunks[position];
        chunk.state = ChunkState::Active;
        chunk.downloaded = 0;
        Some(position)
    }

    fn spawn_chunk(
        &self,
        in_flight: &mut JoinSet<(usize, ChunkOutcome)>,
        position: usize,
        progress_tx: mpsc::UnboundedSender<(usize, u64)>,
    ) {
        let (start, end) = {
            let state = self.state.lock();
            let chunk = &state.chunks[position];
            (chunk.start, chunk.end)
        };
        debug!("Fetching chunk {} [{}, {}) of {}", position, start, end, self.url);

        let url = self.url.clone();
        let fetch_stream = self.fetch_stream.clone();
        let write_stream = self.write_stream.clone();
        let abort = self.abort.clone();

        in_flight.spawn(async move {
            let report = move |received: u64| {
                let _ = progress_tx.send((position, received));
            };
            let on_progress: OnProgress<'_> = &report;

            let bytes = match fetch_stream
                .fetch_bytes(&url, start, end, Some(on_progress), &abort)
                .await
            {
                Ok(bytes) => bytes,
                Err(TransferError::Aborted) => return (position, ChunkOutcome::Discarded),
                Err(e) => return (position, ChunkOutcome::Failed(e)),
            };

            if abort.is_cancelled() {
                return (position, ChunkOutcome::Discarded);
            }

            let expected = end - start;
            if bytes.len() as u64 != expected {
                let short = FetchError::ShortRead {
                    expected,
                    received: bytes.len() as u64,
                };
                return (position, ChunkOutcome::Failed(TransferError::NonRetryable(short)));
            }

            match write_stream.write(start, &bytes).await {
                Ok(()) => (position, ChunkOutcome::Written(expected)),
                Err(e) => (position, ChunkOutcome::Failed(TransferError::Write(e))),
            }
        });
    }

    fn record_partial(&self, position: usize, received: u64) {
        self.update_state(|state| {
            if let Some(chunk) = state.chunks.get_mut(position) {
                if chunk.state == ChunkState::Active {
                    chunk.downloaded = (chunk.downloaded + received).min(chunk.len());
                }
            }
        });
    }

    fn complete_chunk(&self, position: usize, len: u64) {
        self.update_state(|state| {
            let chunk = &mut state.chunks[position];
            chunk.downloaded = chunk.len();
            chunk.state = ChunkState::Done;
            state.bytes_written += len;
        });
        debug!("Chunk {} of {} done", position, self.url);
    }

    fn requeue_chunk(&self, position: usize) {
        self.update_state(|state| {
            let chunk = &mut state.chunks[position];
            chunk.downloaded = 0;
            chunk.state = ChunkState::Pending;
        });
    }

    fn fail_chunk(&self, position: usize) {
        self.update_state(|state| state.chunks[position].state = ChunkState::Error);
    }

    fn all_chunks_done(&self) -> bool {
        self.state.lock().chunks.iter().all(Chunk::is_done)
    }
}

async fn wait_for_resume(paused_rx: &mut watch::Receiver<bool>) {
    loop {
        let paused = *paused_rx.borrow_and_update();
        if !paused || paused_rx.changed().await.is_err() {
            return;
        }
    }
}

#[async_trait]
impl DownloadEngine for DownloadEngineFile {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn download(&self) -> TransferResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(TransferError::AlreadyStarted);
        }

        let outcome = {
            let _running = self.settled.lock().await;
            let outcome = self.run().await;
            match &outcome {
                Ok(RunOutcome::Finished) => {
                    self.update_state(|state| state.status = TransferStatus::Completed)
                }
                Ok(RunOutcome::Aborted) => {}
                Err(_) => self.update_state(|state| state.status = TransferStatus::Error),
            }
            outcome
        };

        match outcome {
            Ok(RunOutcome::Finished) => {
                info!("Download completed: {} ({} bytes)", self.url, self.bytes_written());
                self.events.emit(EngineEvent::Finished);
                self.close().await
            }
            Ok(RunOutcome::Aborted) => {
                info!("Download aborted: {}", self.url);
                Ok(())
            }
            Err(e) => {
                error!("Download failed: {} - {}", self.url, e);
                if let Err(close_error) = self.close().await {
                    warn!("Failed to release {} after error: {}", self.url, close_error);
                }
                Err(e)
            }
        }
    }

    fn pause(&self) {
        if self.closed.load(Ordering::Acquire) || self.status().is_terminal() {
            return;
        }

        self.paused.send_replace(true);
        self.update_state(|state| {
            if state.status == TransferStatus::Downloading {
                state.status = TransferStatus::Paused;
            }
        });
        self.events.emit(EngineEvent::Paused);
        info!("Download {} paused", self.id);
    }

    fn resume(&self) {
        if self.closed.load(Ordering::Acquire) || self.status().is_terminal() {
            return;
        }

        self.paused.send_replace(false);
        self.update_state(|state| {
            if state.status == TransferStatus::Paused {
                state.status = TransferStatus::Downloading;
            }
        });
        self.events.emit(EngineEvent::Resumed);
        info!("Download {} resumed", self.id);
    }

    async fn close(&self) -> TransferResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.abort.cancel();
        let _settled = self.settled.lock().await;

        self.fetch_stream.close().await;
        let released = self.write_stream.close().await;

        self.update_state(|state| {
            if !state.status.is_terminal() {
                state.status = TransferStatus::Closed;
            }
        });
        self.events.emit(EngineEvent::Closed);
        info!("Download {} closed", self.id);

        released.map_err(TransferError::Write)
    }

    fn download_size(&self) -> u64 {
        self.info.lock().map(|info| info.length).unwrap_or(0)
    }

    fn progress(&self) -> TransferProgress {
        self.events.latest()
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn attach(&self, subscriber: Arc<dyn ProgressSubscriber>) {
        self.events.attach(subscriber);
    }

    fn into_leaves(self: Arc<Self>) -> Vec<Arc<dyn DownloadEngine>> {
        vec![self as Arc<dyn DownloadEngine>]
    }
}
