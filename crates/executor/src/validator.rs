//! Pre-dispatch re-validation against the latest cache state

use std::sync::Arc;

use tracing::debug;

use searcher_core::{short_id, AccountId, Bundle, PipelineConfig, Slot, SubmitError, SubmitResult};
use searcher_state::StateCache;

/// Checks a built bundle against the world as it is now
pub struct BundleValidator {
    cache: Arc<StateCache>,
    staleness_tolerance: Slot,
    drift_tolerance_bps: u64,
}

impl BundleValidator {
    pub fn new(cache: Arc<StateCache>, config: &PipelineConfig) -> Self {
        Self {
            cache,
            staleness_tolerance: config.staleness_tolerance_slots,
            drift_tolerance_bps: config.revalidation_tolerance_bps,
        }
    }

    /// Current slot if the bundle still holds, `Stale` otherwise.
    ///
    /// Stale when the source slot fell out of tolerance, when an assumed
    /// market has no complete state, or when any assumed reserve drifted past
    /// the drift tolerance.
    pub fn validate(&self, bundle: &Bundle) -> SubmitResult<Slot> {
        let current = self.cache.latest_slot();
        let age = current.saturating_sub(bundle.source_slot);
        if age > self.staleness_tolerance {
            return Err(SubmitError::Stale(format!(
                "computed at slot {}, now {} ({} > {} slots)",
                bundle.source_slot, current, age, self.staleness_tolerance
            )));
        }

        if bundle.assumptions.is_empty() {
            return Ok(current);
        }

        let markets: Vec<AccountId> = bundle.assumptions.iter().map(|a| a.market).collect();
        let view = self
            .cache
            .snapshot_markets(&markets)
            .map_err(|e| SubmitError::Stale(e.to_string()))?;

        for assumption in &bundle.assumptions {
            let pool = view
                .pool(&assumption.market)
                .map_err(|e| SubmitError::Stale(e.to_string()))?;
            let (base, quote) = pool.reserve_pair().ok_or_else(|| {
                SubmitError::Stale(format!("{} has no reserves", short_id(&assumption.market)))
            })?;
            let drift = assumption.drift_bps(base, quote);
            if drift > self.drift_tolerance_bps {
                return Err(SubmitError::Stale(format!(
                    "{} drifted {} bps (> {})",
                    short_id(&assumption.market),
                    drift,
                    self.drift_tolerance_bps
                )));
            }
            debug!(market = %short_id(&assumption.market), drift, "assumption holds");
        }

        Ok(view.slot())
    }
}
