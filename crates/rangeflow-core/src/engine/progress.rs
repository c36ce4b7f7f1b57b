//! Progress publish/subscribe and aggregation
//!
//! Every engine owns a [`ProgressChannel`]. External observers take a
//! broadcast receiver from it; aggregators attach as synchronous
//! [`ProgressSubscriber`]s so they see every sample in publish order.
//! A [`ProgressStatisticsBuilder`] folds any number of sources, each in a
//! stable slot, into one sample and publishes it on its output channel.

use crate::engine::download_engine::DownloadEngine;
use crate::engine::statistics::{estimate_eta, TransferStatistics, DEFAULT_SPEED_WINDOW};
use parking_lot::{Mutex, ReentrantMutex};
use rangeflow_types::{EngineEvent, TransferProgress, TransferStatus};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

const EVENT_CAPACITY: usize = 1024;

/// Receives progress samples synchronously, in publish order
pub trait ProgressSubscriber: Send + Sync {
    fn on_progress(&self, progress: &TransferProgress);
}

/// Per-engine event channel holding the latest progress sample
pub struct ProgressChannel {
    event_tx: broadcast::Sender<EngineEvent>,
    latest: Mutex<TransferProgress>,
    subscribers: Mutex<Vec<Arc<dyn ProgressSubscriber>>>,
}

impl ProgressChannel {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            event_tx,
            latest: Mutex::new(TransferProgress::default()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to all events
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.event_tx.subscribe()
    }

    /// Attach a synchronous progress subscriber
    pub fn attach(&self, subscriber: Arc<dyn ProgressSubscriber>) {
        self.subscribers.lock().push(subscriber);
    }

    pub fn latest(&self) -> TransferProgress {
        self.latest.lock().clone()
    }

    /// Publish a new progress sample
    pub fn publish(&self, progress: TransferProgress) {
        *self.latest.lock() = progress.clone();

        let subscribers = self.subscribers.lock().clone();
        for subscriber in subscribers {
            subscriber.on_progress(&progress);
        }

        let _ = self.event_tx.send(EngineEvent::Progress(progress));
    }

    /// Emit a non-progress event
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl Default for ProgressChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSubscriber for ProgressChannel {
    fn on_progress(&self, progress: &TransferProgress) {
        self.publish(progress.clone());
    }
}

/// Stable position of a source inside a builder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub usize);

struct Slot {
    progress: TransferProgress,
    statistics: TransferStatistics,
}

/// Folds many progress sources into one throughput/ETA/status sample
pub struct ProgressStatisticsBuilder {
    window: Duration,
    slots: Mutex<Vec<Slot>>,
    /// Orders aggregate publication without holding `slots` during callbacks
    publishing: ReentrantMutex<()>,
    output: Arc<ProgressChannel>,
}

impl ProgressStatisticsBuilder {
    /// Create a builder publishing on `output`
    pub fn new(output: Arc<ProgressChannel>) -> Self {
        Self::with_window(output, DEFAULT_SPEED_WINDOW)
    }

    pub fn with_window(output: Arc<ProgressChannel>, window: Duration) -> Self {
        Self {
            window,
            slots: Mutex::new(Vec::new()),
            publishing: ReentrantMutex::new(()),
            output,
        }
    }

    /// The channel aggregates are published on
    pub fn channel(&self) -> &Arc<ProgressChannel> {
        &self.output
    }

    /// Reserve a slot fed manually through [`record`](Self::record)
    pub fn add_slot(&self, initial: TransferProgress) -> SlotId {
        let _publishing = self.publishing.lock();
        let (id, aggregate) = {
            let mut slots = self.slots.lock();
            slots.push(Slot {
                progress: initial,
                statistics: TransferStatistics::new(self.window),
            });
            (SlotId(slots.len() - 1), Self::fold(&slots))
        };
        self.output.publish(aggregate);
        id
    }

    /// Track an engine: its samples are recorded into a new slot as they are published
    pub fn add(self: &Arc<Self>, source: &dyn DownloadEngine) -> SlotId {
        let slot = self.add_slot(source.progress());
        source.attach(Arc::new(SlotSubscriber {
            builder: Arc::downgrade(self),
            slot,
        }));
        slot
    }

    /// Record a new sample for `slot` and publish the aggregate
    pub fn record(&self, slot: SlotId, progress: &TransferProgress) {
        let _publishing = self.publishing.lock();
        let aggregate = {
            let mut slots = self.slots.lock();
            let Some(entry) = slots.get_mut(slot.0) else {
                return;
            };

            let bytes = progress
                .bytes_transferred
                .max(entry.progress.bytes_transferred);

            let speed = if progress.status == TransferStatus::Downloading {
                entry.statistics.update(bytes, Instant::now())
            } else {
                entry.statistics.reset();
                0
            };

            entry.progress = TransferProgress {
                bytes_transferred: bytes,
                total_bytes: progress.total_bytes,
                speed,
                eta: estimate_eta(progress.total_bytes.saturating_sub(bytes), speed),
                status: progress.status,
            };
            Self::fold(&slots)
        };

        self.output.publish(aggregate);
    }

    /// Last-known sample of every slot, by position
    pub fn snapshots(&self) -> Vec<TransferProgress> {
        self.slots.lock().iter().map(|s| s.progress.clone()).collect()
    }

    /// Current aggregate without publishing it
    pub fn aggregate(&self) -> TransferProgress {
        Self::fold(&self.slots.lock())
    }

    fn fold(slots: &[Slot]) -> TransferProgress {
        let bytes_transferred: u64 = slots.iter().map(|s| s.progress.bytes_transferred).sum();
        let total_bytes: u64 = slots.iter().map(|s| s.progress.total_bytes).sum();
        let speed: u64 = slots.iter().map(|s| s.progress.speed).sum();
        let status = TransferStatus::resolve(slots.iter().map(|s| s.progress.status));

        TransferProgress {
            bytes_transferred,
            total_bytes,
            speed,
            eta: estimate_eta(total_bytes.saturating_sub(bytes_transferred), speed),
            status,
        }
    }
}

struct SlotSubscriber {
    builder: Weak<ProgressStatisticsBuilder>,
    slot: SlotId,
}

impl ProgressSubscriber for SlotSubscriber {
    fn on_progress(&self, progress: &TransferProgress) {
        if let Some(builder) = self.builder.upgrade() {
            builder.record(self.slot, progress);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(bytes: u64, total: u64, status: TransferStatus) -> TransferProgress {
        TransferProgress::new(bytes, total, status)
    }

    #[tokio::test(start_paused = true)]
    async fn test_aggregates_slots() {
        let builder = ProgressStatisticsBuilder::new(Arc::new(ProgressChannel::new()));
        let a = builder.add_slot(sample(0, 4, TransferStatus::Idle));
        let b = builder.add_slot(sample(0, 8, TransferStatus::Idle));

        builder.record(a, &sample(4, 4, TransferStatus::Completed));
        builder.record(b, &sample(2, 8, TransferStatus::Downloading));

        let aggregate = builder.aggregate();
        assert_eq!(aggregate.bytes_transferred, 6);
        assert_eq!(aggregate.total_bytes, 12);
        assert_eq!(aggregate.status, TransferStatus::Downloading);
        assert_eq!(builder.channel().latest(), aggregate);
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_is_summed_over_sources() {
        let builder = ProgressStatisticsBuilder::new(Arc::new(ProgressChannel::new()));
        let a = builder.add_slot(TransferProgress::default());
        let b = builder.add_slot(TransferProgress::default());

        builder.record(a, &sample(0, 10_000, TransferStatus::Downloading));
        builder.record(b, &sample(0, 10_000, TransferStatus::Downloading));
        tokio::time::advance(Duration::from_secs(1)).await;
        builder.record(a, &sample(1_000, 10_000, TransferStatus::Downloading));
        builder.record(b, &sample(3_000, 10_000, TransferStatus::Downloading));

        let aggregate = builder.aggregate();
        assert_eq!(aggregate.speed, 4_000);
        assert_eq!(aggregate.eta, Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bytes_never_decrease_per_source() {
        let builder = ProgressStatisticsBuilder::new(Arc::new(ProgressChannel::new()));
        let slot = builder.add_slot(TransferProgress::default());

        builder.record(slot, &sample(10, 20, TransferStatus::Downloading));
        builder.record(slot, &sample(4, 20, TransferStatus::Paused));

        let snapshot = &builder.snapshots()[0];
        assert_eq!(snapshot.bytes_transferred, 10);
        assert_eq!(snapshot.status, TransferStatus::Paused);
        assert_eq!(snapshot.speed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_update_is_broadcast() {
        let output = Arc::new(ProgressChannel::new());
        let mut rx = output.subscribe();
        let builder = ProgressStatisticsBuilder::new(output);
        let slot = builder.add_slot(TransferProgress::default());

        builder.record(slot, &sample(1, 3, TransferStatus::Downloading));
        builder.record(slot, &sample(3, 3, TransferStatus::Completed));

        let mut seen = Vec::new();
        while let Ok(EngineEvent::Progress(p)) = rx.try_recv() {
            seen.push(p.bytes_transferred);
        }
        assert_eq!(seen, vec![0, 1, 3]);
    }

    struct SnapshotReader {
        builder: Weak<ProgressStatisticsBuilder>,
        seen: Mutex<Vec<usize>>,
    }

    impl ProgressSubscriber for SnapshotReader {
        fn on_progress(&self, _progress: &TransferProgress) {
            if let Some(builder) = self.builder.upgrade() {
                let slots = builder.snapshots().len();
                let _ = builder.aggregate();
                self.seen.lock().push(slots);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_may_read_the_builder() {
        let output = Arc::new(ProgressChannel::new());
        let builder = Arc::new(ProgressStatisticsBuilder::new(output.clone()));
        let reader = Arc::new(SnapshotReader {
            builder: Arc::downgrade(&builder),
            seen: Mutex::new(Vec::new()),
        });
        output.attach(reader.clone());

        let slot = builder.add_slot(TransferProgress::default());
        builder.add_slot(TransferProgress::default());
        builder.record(slot, &sample(2, 4, TransferStatus::Downloading));

        assert_eq!(*reader.seen.lock(), vec![1, 2, 2]);
    }
}
