//! Ingestion boundary
//!
//! The transport that produces account updates lives outside this crate. It
//! only has to hand over `FeedEvent`s in order, at least once.

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

use searcher_core::{Slot, StateDelta};

/// One message from the ingestion boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FeedEvent {
    /// Single account update
    Delta(StateDelta),
    /// Updates that must become visible together
    Batch { deltas: Vec<StateDelta> },
    /// Slot notification without account data
    Slot { slot: Slot },
}

impl FeedEvent {
    pub fn slot(&self) -> Option<Slot> {
        match self {
            FeedEvent::Delta(d) => Some(d.slot),
            FeedEvent::Batch { deltas } => deltas.iter().map(|d| d.slot).max(),
            FeedEvent::Slot { slot } => Some(*slot),
        }
    }
}

/// Source of state deltas
#[async_trait::async_trait]
pub trait FeedIngestor: Send {
    /// Next event, or `None` once the feed is exhausted
    async fn next_event(&mut self) -> Option<FeedEvent>;

    fn name(&self) -> &str;
}

/// Feed backed by an in-process channel
pub struct ChannelFeed {
    name: String,
    rx: mpsc::Receiver<FeedEvent>,
}

impl ChannelFeed {
    /// Create the feed and the sender a transport pushes into
    pub fn new(name: impl Into<String>, capacity: usize) -> (mpsc::Sender<FeedEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            tx,
            Self {
                name: name.into(),
                rx,
            },
        )
    }
}

#[async_trait::async_trait]
impl FeedIngestor for ChannelFeed {
    async fn next_event(&mut self) -> Option<FeedEvent> {
        self.rx.recv().await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Feed adapting any stream of events
pub struct StreamFeed {
    name: String,
    stream: Pin<Box<dyn Stream<Item = FeedEvent> + Send>>,
}

impl StreamFeed {
    pub fn new(name: impl Into<String>, stream: impl Stream<Item = FeedEvent> + Send + 'static) -> Self {
        Self {
            name: name.into(),
            stream: Box::pin(stream),
        }
    }
}

#[async_trait::async_trait]
impl FeedIngestor for StreamFeed {
    async fn next_event(&mut self) -> Option<FeedEvent> {
        self.stream.next().await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
