//! Structured pipeline events for external collectors

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::Slot;

/// Pipeline stage that produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Ingest,
    Detect,
    Score,
    Admit,
    Build,
    Submit,
}

/// One stage outcome
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum PipelineEvent {
    Detected {
        opportunity_id: String,
        detector: &'static str,
        dedup_key: String,
        slot: Slot,
    },
    Scored {
        opportunity_id: String,
        expected_profit: Decimal,
        confidence: f64,
        capital_required: Decimal,
    },
    Rejected {
        opportunity_id: String,
        stage: Stage,
        reason: String,
    },
    Submitted {
        opportunity_id: String,
        submission_id: String,
        dedup_key: String,
        slot: Slot,
        tip_lamports: u64,
    },
    Outcome {
        submission_id: String,
        outcome: String,
        latency_ms: i64,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct TimestampedEvent {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: PipelineEvent,
}

/// Fan-out of pipeline events. Emitting never blocks and never fails;
/// lagging subscribers lose the oldest events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<TimestampedEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimestampedEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: PipelineEvent) {
        debug!(?event, "pipeline event");
        // No subscribers is fine
        let _ = self.tx.send(TimestampedEvent { at: Utc::now(), event });
    }

    pub fn rejected(&self, opportunity_id: &str, stage: Stage, reason: impl ToString) {
        self.emit(PipelineEvent::Rejected {
            opportunity_id: opportunity_id.to_string(),
            stage,
            reason: reason.to_string(),
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(4_096)
    }
}
