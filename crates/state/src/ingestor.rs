//! Ingestion loop: the single writer into the cache

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info};

use searcher_core::Slot;

use crate::cache::{BatchSummary, StateCache};
use crate::feed::{FeedEvent, FeedIngestor};

/// Drives a feed into the cache and publishes the slot clock
pub struct Ingestor {
    cache: Arc<StateCache>,
    slot_tx: watch::Sender<Slot>,
    events: AtomicU64,
    batches: AtomicU64,
}

impl Ingestor {
    pub fn new(cache: Arc<StateCache>) -> Self {
        let (slot_tx, _) = watch::channel(cache.latest_slot());
        Self {
            cache,
            slot_tx,
            events: AtomicU64::new(0),
            batches: AtomicU64::new(0),
        }
    }

    pub fn cache(&self) -> Arc<StateCache> {
        Arc::clone(&self.cache)
    }

    /// Receiver notified whenever the cache slot advances
    pub fn subscribe_slots(&self) -> watch::Receiver<Slot> {
        self.slot_tx.subscribe()
    }

    /// Consume `feed` until it ends or shutdown is requested
    pub async fn run<F: FeedIngestor>(&self, mut feed: F, mut shutdown: oneshot::Receiver<()>) -> IngestStats {
        info!("Starting ingestion from feed {}", feed.name());

        loop {
            tokio::select! {
                event = feed.next_event() => {
                    match event {
                        Some(event) => {
                            self.handle(event);
                        }
                        None => {
                            info!("Feed {} exhausted", feed.name());
                            break;
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("Ingestion shutdown requested");
                    break;
                }
            }
        }

        let stats = self.stats();
        info!(
            "Ingestion stopped: {} events, {} deltas applied, {} duplicate, {} unknown, {} malformed",
            stats.events, stats.applied, stats.duplicate + stats.outdated, stats.unknown, stats.malformed
        );
        stats
    }

    /// Apply one event to the cache
    pub fn handle(&self, event: FeedEvent) -> BatchSummary {
        self.events.fetch_add(1, Ordering::Relaxed);

        let summary = match event {
            FeedEvent::Delta(delta) => {
                let mut summary = BatchSummary::default();
                summary.record(self.cache.apply(delta));
                summary
            }
            FeedEvent::Batch { deltas } => {
                self.batches.fetch_add(1, Ordering::Relaxed);
                let summary = self.cache.apply_batch(deltas);
                debug!(?summary, "batch applied");
                summary
            }
            FeedEvent::Slot { slot } => {
                self.cache.advance_slot(slot);
                BatchSummary::default()
            }
        };

        let current = self.cache.latest_slot();
        self.slot_tx.send_if_modified(|slot| {
            if current > *slot {
                *slot = current;
                true
            } else {
                false
            }
        });
        summary
    }

    pub fn stats(&self) -> IngestStats {
        let cache = self.cache.stats();
        IngestStats {
            events: self.events.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            applied: cache.applied,
            duplicate: cache.duplicate,
            outdated: cache.outdated,
            unknown: cache.unknown,
            malformed: cache.malformed,
            current_slot: cache.current_slot,
        }
    }
}

/// Ingestion statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IngestStats {
    pub events: u64,
    pub batches: u64,
    pub applied: u64,
    pub duplicate: u64,
    pub outdated: u64,
    pub unknown: u64,
    pub malformed: u64,
    pub current_slot: Slot,
}
