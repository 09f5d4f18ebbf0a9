//! Bundle and submission record types

use alloy_primitives::Bytes;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::{DedupKey, Instruction, PoolAssumption, Slot};

/// Sizes the priority tip from expected profit
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TipPolicy {
    /// Share of expected profit offered to the block producer
    pub profit_fraction: Decimal,
    /// Hard cap as a share of expected profit
    pub max_fraction: Decimal,
    /// Smallest tip the relay accepts
    pub min_lamports: u64,
}

impl TipPolicy {
    /// Largest tip allowed for this profit
    pub fn cap(&self, expected_profit: Decimal) -> u64 {
        if expected_profit <= Decimal::ZERO {
            return 0;
        }
        (expected_profit * self.max_fraction).floor().to_u64().unwrap_or(u64::MAX)
    }

    /// Tip for a gross profit, or `None` when the cap is under the relay minimum
    pub fn tip_for(&self, expected_profit: Decimal) -> Option<u64> {
        let cap = self.cap(expected_profit);
        if cap < self.min_lamports {
            return None;
        }
        let desired = (expected_profit * self.profit_fraction)
            .floor()
            .to_u64()
            .unwrap_or(u64::MAX);
        Some(desired.clamp(self.min_lamports, cap))
    }

    /// Tip the scorer assumes when estimating net profit
    pub fn estimate(&self, expected_profit: Decimal) -> u64 {
        self.tip_for(expected_profit).unwrap_or(self.min_lamports)
    }
}

/// One signed transaction within a bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleTransaction {
    pub instructions: Vec<Instruction>,
    pub payload: Bytes,
}

/// Atomic, ordered group of transactions submitted as a unit
#[derive(Debug, Clone, Serialize)]
pub struct Bundle {
    pub id: Uuid,
    pub opportunity_id: String,
    pub detector: &'static str,
    pub dedup_key: DedupKey,
    /// Slot of the state the opportunity was computed against
    pub source_slot: Slot,
    pub target_slot: Slot,
    /// Last slot the bundle may land in
    pub expiry_slot: Slot,
    pub tip_lamports: u64,
    pub transactions: Vec<BundleTransaction>,
    pub assumptions: Vec<PoolAssumption>,
    pub expected_profit: Decimal,
    pub capital_required: Decimal,
    pub built_at: DateTime<Utc>,
    /// Half-open breaker probe this bundle was admitted as
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breaker_probe: Option<u64>,
}

impl Bundle {
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn is_expired_at(&self, slot: Slot) -> bool {
        slot > self.expiry_slot
    }
}

/// Lifecycle state of a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum SubmissionOutcome {
    Pending,
    Accepted { relay_id: String },
    Rejected { reason: String },
    Expired,
}

impl SubmissionOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, SubmissionOutcome::Pending)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, SubmissionOutcome::Accepted { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            SubmissionOutcome::Pending => "pending",
            SubmissionOutcome::Accepted { .. } => "accepted",
            SubmissionOutcome::Rejected { .. } => "rejected",
            SubmissionOutcome::Expired => "expired",
        }
    }
}

/// Bundle plus its outcome, kept for a bounded window
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionRecord {
    pub id: Uuid,
    pub bundle: std::sync::Arc<Bundle>,
    pub slot: Slot,
    pub outcome: SubmissionOutcome,
    pub submitted_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl SubmissionRecord {
    pub fn pending(bundle: std::sync::Arc<Bundle>, slot: Slot) -> Self {
        Self {
            id: Uuid::new_v4(),
            bundle,
            slot,
            outcome: SubmissionOutcome::Pending,
            submitted_at: Utc::now(),
            resolved_at: None,
        }
    }

    /// Terminal transition; a resolved record never changes again
    pub fn resolve(&mut self, outcome: SubmissionOutcome) -> bool {
        if !self.outcome.is_pending() || outcome.is_pending() {
            return false;
        }
        self.outcome = outcome;
        self.resolved_at = Some(Utc::now());
        true
    }
}
