//! Bundle submission with per-resource in-flight dedup

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use searcher_core::{
    short_id, AccountId, Bundle, DedupKey, EventBus, PipelineConfig, PipelineEvent, Stage, SubmissionOutcome, SubmissionRecord,
    SubmitError, SubmitResult,
};
use searcher_state::StateCache;

use crate::relay::Relay;
use crate::risk::RiskGovernor;
use crate::validator::BundleValidator;

/// Submission configuration
#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    pub relay_timeout: Duration,
    pub history_limit: usize,
    pub retention: Duration,
}

impl SubmitterConfig {
    pub fn from_pipeline(config: &PipelineConfig) -> Self {
        Self {
            relay_timeout: config.relay_timeout(),
            history_limit: config.submission_history_limit.max(1),
            retention: config.submission_retention(),
        }
    }
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self::from_pipeline(&PipelineConfig::default())
    }
}

/// Releases every claimed account when the submission finishes, on every path
struct InFlightGuard<'a> {
    table: &'a DashMap<AccountId, Uuid>,
    accounts: Vec<AccountId>,
    record_id: Uuid,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        for account in &self.accounts {
            self.table.remove_if(account, |_, owner| *owner == self.record_id);
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    expired: AtomicU64,
    stale: AtomicU64,
    duplicates: AtomicU64,
}

/// Dispatches bundles to the relay, at most one in flight per contested
/// account
pub struct SubmissionManager {
    config: SubmitterConfig,
    cache: Arc<StateCache>,
    relay: Arc<dyn Relay>,
    validator: BundleValidator,
    governor: Option<Arc<RiskGovernor>>,
    events: EventBus,
    /// Contested account to the submission holding it
    in_flight: DashMap<AccountId, Uuid>,
    history: Mutex<VecDeque<SubmissionRecord>>,
    counters: Counters,
}

impl SubmissionManager {
    pub fn new(pipeline: &PipelineConfig, cache: Arc<StateCache>, relay: Arc<dyn Relay>) -> Self {
        Self {
            config: SubmitterConfig::from_pipeline(pipeline),
            validator: BundleValidator::new(Arc::clone(&cache), pipeline),
            cache,
            relay,
            governor: None,
            events: EventBus::default(),
            in_flight: DashMap::new(),
            history: Mutex::new(VecDeque::new()),
            counters: Counters::default(),
        }
    }

    /// Report dispatch outcomes to the governor's circuit breaker
    pub fn with_governor(mut self, governor: Arc<RiskGovernor>) -> Self {
        self.governor = Some(governor);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Submit one bundle.
    ///
    /// Claims every account of the bundle's dedup key, re-validates against the latest cache
    /// state, then dispatches once. The key is held until the outcome is
    /// recorded. Relay rejection and timeout are terminal and never retried.
    pub async fn submit(&self, bundle: Bundle) -> SubmitResult<SubmissionRecord> {
        let guard = self.claim(&bundle)?;
        self.dispatch(bundle, guard).await
    }

    /// Submit a batch in order of priority.
    ///
    /// Every key is claimed before anything is dispatched, so within a batch
    /// the first bundle per contested account wins and later ones are
    /// `DuplicateInFlight` regardless of relay latency. Claimed bundles then race freely.
    pub async fn submit_batch(&self, bundles: Vec<Bundle>) -> Vec<SubmitResult<SubmissionRecord>> {
        let mut results: Vec<Option<SubmitResult<SubmissionRecord>>> = Vec::with_capacity(bundles.len());
        let mut claimed = Vec::new();
        for (index, bundle) in bundles.into_iter().enumerate() {
            match self.claim(&bundle) {
                Ok(guard) => {
                    results.push(None);
                    claimed.push((index, bundle, guard));
                }
                Err(e) => results.push(Some(Err(e))),
            }
        }

        let dispatched = join_all(claimed.into_iter().map(|(index, bundle, guard)| async move {
            (index, self.dispatch(bundle, guard).await)
        }))
        .await;
        for (index, result) in dispatched {
            results[index] = Some(result);
        }

        results
            .into_iter()
            .map(|r| r.unwrap_or_else(|| Err(SubmitError::Stale("not dispatched".to_string()))))
            .collect()
    }

    async fn dispatch(&self, bundle: Bundle, guard: InFlightGuard<'_>) -> SubmitResult<SubmissionRecord> {
        let slot = match self.validator.validate(&bundle) {
            Ok(slot) => slot,
            Err(e) => {
                self.counters.stale.fetch_add(1, Ordering::Relaxed);
                warn!(bundle = %bundle.id, key = %bundle.dedup_key, "aborted before dispatch: {}", e);
                self.events.rejected(&bundle.opportunity_id, Stage::Submit, &e);
                return Err(e);
            }
        };

        let mut record = SubmissionRecord::pending(Arc::new(bundle), slot);
        record.id = guard.record_id;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.events.emit(PipelineEvent::Submitted {
            opportunity_id: record.bundle.opportunity_id.clone(),
            submission_id: record.id.to_string(),
            dedup_key: record.bundle.dedup_key.to_string(),
            slot,
            tip_lamports: record.bundle.tip_lamports,
        });
        info!(
            submission = %record.id,
            key = %record.bundle.dedup_key,
            relay = self.relay.name(),
            slot,
            "dispatching bundle"
        );

        let outcome = match tokio::time::timeout(self.config.relay_timeout, self.relay.submit_bundle(&record.bundle)).await
        {
            Ok(Ok(relay_id)) => SubmissionOutcome::Accepted { relay_id },
            Ok(Err(e)) => SubmissionOutcome::Rejected { reason: e.to_string() },
            Err(_) => SubmissionOutcome::Expired,
        };
        self.finish(&mut record, outcome);
        drop(guard);

        Ok(record)
    }

    /// Claim all of the key's accounts or none of them.
    ///
    /// Accounts are taken in sorted order and released again on the first
    /// conflict, so of two overlapping claims at least one succeeds.
    fn claim(&self, bundle: &Bundle) -> SubmitResult<InFlightGuard<'_>> {
        let mut guard = InFlightGuard {
            table: &self.in_flight,
            accounts: Vec::with_capacity(bundle.dedup_key.accounts().len()),
            record_id: Uuid::new_v4(),
        };

        for account in bundle.dedup_key.accounts() {
            match self.in_flight.entry(*account) {
                Entry::Occupied(existing) => {
                    let holder = *existing.get();
                    drop(existing);
                    // Dropping the guard gives back what was taken so far
                    drop(guard);

                    self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        key = %bundle.dedup_key,
                        account = %short_id(account),
                        pending = %holder,
                        "duplicate in flight"
                    );
                    let err = SubmitError::DuplicateInFlight(bundle.dedup_key.to_string());
                    self.events.rejected(&bundle.opportunity_id, Stage::Submit, &err);
                    return Err(err);
                }
                Entry::Vacant(slot) => {
                    slot.insert(guard.record_id);
                    guard.accounts.push(*account);
                }
            }
        }
        Ok(guard)
    }

    fn finish(&self, record: &mut SubmissionRecord, outcome: SubmissionOutcome) {
        let counter = match &outcome {
            SubmissionOutcome::Accepted { .. } => &self.counters.accepted,
            SubmissionOutcome::Rejected { .. } => &self.counters.rejected,
            SubmissionOutcome::Expired => &self.counters.expired,
            SubmissionOutcome::Pending => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let success = outcome.is_success();
        record.resolve(outcome);
        if let Some(governor) = &self.governor {
            governor.record_outcome(success, record.bundle.breaker_probe);
        }

        let latency_ms = record
            .resolved_at
            .unwrap_or_else(Utc::now)
            .signed_duration_since(record.submitted_at)
            .num_milliseconds();
        info!(
            submission = %record.id,
            outcome = record.outcome.label(),
            latency_ms,
            "submission finished"
        );
        self.events.emit(PipelineEvent::Outcome {
            submission_id: record.id.to_string(),
            outcome: record.outcome.label().to_string(),
            latency_ms,
        });

        self.remember(record.clone());
    }

    fn remember(&self, record: SubmissionRecord) {
        let mut history = self.history.lock();
        history.push_back(record);
        while history.len() > self.config.history_limit {
            history.pop_front();
        }
        let retention = chrono::Duration::from_std(self.config.retention).unwrap_or_else(|_| chrono::Duration::days(365));
        let cutoff = Utc::now() - retention;
        while history.front().is_some_and(|r| r.submitted_at < cutoff) {
            history.pop_front();
        }
    }

    /// Whether any account of `key` is held by a pending submission
    pub fn is_in_flight(&self, key: &DedupKey) -> bool {
        key.accounts().iter().any(|a| self.in_flight.contains_key(a))
    }

    /// Submissions currently holding accounts
    pub fn pending_count(&self) -> usize {
        self.in_flight.iter().map(|e| *e.value()).collect::<HashSet<_>>().len()
    }

    /// Finished submissions, oldest first
    pub fn history(&self) -> Vec<SubmissionRecord> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn current_slot(&self) -> u64 {
        self.cache.latest_slot()
    }

    pub fn stats(&self) -> SubmitterStats {
        SubmitterStats {
            pending: self.pending_count(),
            history: self.history.lock().len(),
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            stale: self.counters.stale.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
        }
    }
}

/// Submission statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubmitterStats {
    pub pending: usize,
    pub history: usize,
    pub submitted: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub expired: u64,
    pub stale: u64,
    pub duplicates: u64,
}
