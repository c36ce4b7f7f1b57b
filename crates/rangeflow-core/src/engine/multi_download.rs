//! Sequential composite engine
//!
//! Runs its children one after another and presents them as a single
//! engine. Progress of every child is folded into one aggregate sample.

use crate::engine::download_engine::DownloadEngine;
use crate::engine::progress::{ProgressChannel, ProgressStatisticsBuilder, ProgressSubscriber};
use crate::error::{TransferError, TransferResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use rangeflow_types::{EngineEvent, TransferProgress};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct DownloadEngineMultiDownload {
    id: Uuid,
    engines: Vec<Arc<dyn DownloadEngine>>,
    started: AtomicBool,
    aborted: AtomicBool,
    /// Index of the child currently downloading
    active: Mutex<Option<usize>>,
    events: Arc<ProgressChannel>,
    statistics: Arc<ProgressStatisticsBuilder>,
}

impl DownloadEngineMultiDownload {
    /// Compose `engines` into one sequence. Nested sequences are flattened
    /// so each leaf keeps its own slot in the aggregate.
    pub fn new(engines: Vec<Arc<dyn DownloadEngine>>) -> Self {
        let engines: Vec<Arc<dyn DownloadEngine>> = engines
            .into_iter()
            .flat_map(|engine| engine.into_leaves())
            .collect();

        let events = Arc::new(ProgressChannel::new());
        let statistics = Arc::new(ProgressStatisticsBuilder::new(events.clone()));
        for engine in &engines {
            statistics.add(engine.as_ref());
        }

        Self {
            id: Uuid::new_v4(),
            engines,
            started: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            active: Mutex::new(None),
            events,
            statistics,
        }
    }

    /// The flattened children, in download order
    pub fn engines(&self) -> &[Arc<dyn DownloadEngine>] {
        &self.engines
    }

    /// Last-known sample of each child, in download order
    pub fn download_statuses(&self) -> Vec<TransferProgress> {
        self.statistics.snapshots()
    }

    fn active_engine(&self) -> Option<Arc<dyn DownloadEngine>> {
        let active = *self.active.lock();
        active.and_then(|index| self.engines.get(index).cloned())
    }
}

#[async_trait]
impl DownloadEngine for DownloadEngineMultiDownload {
    fn id(&self) -> Uuid {
        self.id
    }

    async fn download(&self) -> TransferResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(TransferError::AlreadyStarted);
        }

        self.events.emit(EngineEvent::Started);
        info!("Starting sequence {} of {} downloads", self.id, self.engines.len());

        for (index, engine) in self.engines.iter().enumerate() {
            if self.aborted.load(Ordering::Acquire) {
                info!("Sequence {} aborted before download {}", self.id, index);
                return Ok(());
            }

            *self.active.lock() = Some(index);
            self.events.emit(EngineEvent::ChildStarted {
                engine_id: engine.id(),
            });

            if let Err(e) = engine.download().await {
                error!("Sequence {} stopped at download {}: {}", self.id, index, e);
                if let Err(close_error) = self.close().await {
                    warn!("Failed to close sequence {}: {}", self.id, close_error);
                }
                *self.active.lock() = None;
                return Err(e);
            }

            *self.active.lock() = None;
            self.events.emit(EngineEvent::ChildClosed {
                engine_id: engine.id(),
            });
        }

        if self.aborted.load(Ordering::Acquire) {
            return Ok(());
        }

        info!("Sequence {} completed", self.id);
        self.events.emit(EngineEvent::Finished);
        self.close().await
    }

    fn pause(&self) {
        if let Some(engine) = self.active_engine() {
            engine.pause();
            self.events.emit(EngineEvent::Paused);
        }
    }

    fn resume(&self) {
        if let Some(engine) = self.active_engine() {
            engine.resume();
            self.events.emit(EngineEvent::Resumed);
        }
    }

    async fn close(&self) -> TransferResult<()> {
        if self.aborted.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let result = match self.active_engine() {
            Some(engine) => engine.close().await,
            None => Ok(()),
        };

        self.events.emit(EngineEvent::Closed);
        info!("Sequence {} closed", self.id);
        result
    }

    fn download_size(&self) -> u64 {
        self.engines.iter().map(|e| e.download_size()).sum()
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
        self.engines.clone()
    }
}
