//! Relay boundary

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::info;

use searcher_core::{short_id, Bundle, RelayError};

/// External bundle relay.
///
/// Acknowledgments may arrive in any order relative to submission order.
/// Timeouts are enforced by the caller.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Relay-assigned id on acceptance
    async fn submit_bundle(&self, bundle: &Bundle) -> Result<String, RelayError>;

    fn name(&self) -> &str;
}

/// Logs bundles and acknowledges them without sending anything
#[derive(Debug, Default)]
pub struct DryRunRelay {
    submitted: AtomicU64,
}

impl DryRunRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Relay for DryRunRelay {
    async fn submit_bundle(&self, bundle: &Bundle) -> Result<String, RelayError> {
        let n = self.submitted.fetch_add(1, Ordering::Relaxed) + 1;
        let markets: Vec<String> = bundle.dedup_key.accounts().iter().map(short_id).collect();
        info!(
            bundle = %bundle.id,
            detector = bundle.detector,
            markets = ?markets,
            transactions = bundle.len(),
            tip = bundle.tip_lamports,
            target_slot = bundle.target_slot,
            expected_profit = %bundle.expected_profit,
            "[dry-run] bundle not sent"
        );
        Ok(format!("dry-run-{}", n))
    }

    fn name(&self) -> &str {
        "dry-run"
    }
}
