//! One evaluation cycle end to end, and the loop that drives it

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use searcher_core::{
    EventBus, ExecutionIdentity, PipelineConfig, PipelineEvent, SchedulingPolicy, ScoredOpportunity, Slot, Stage,
    SubmissionRecord, SubmitError,
};
use searcher_detector::{DetectorStatus, EngineStats, OpportunityScorer, StrategyEngine};
use searcher_executor::{
    BundleBuilder, CapitalReservation, Relay, RiskGovernor, RiskStats, SubmissionManager, SubmitterStats,
};
use searcher_state::StateCache;

/// What happened in one cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub slot: Slot,
    pub detected: usize,
    pub score_failures: usize,
    pub rejected: usize,
    /// Admitted but over the per-cycle submission limit
    pub deferred: usize,
    pub unbuildable: usize,
    pub duplicates: usize,
    pub stale: usize,
    pub timed_out: Vec<&'static str>,
    pub submitted: Vec<SubmissionRecord>,
}

#[derive(Debug, Default)]
struct Counters {
    cycles: AtomicU64,
    detected: AtomicU64,
    submitted: AtomicU64,
}

/// Detection through submission over one shared cache
pub struct Pipeline {
    config: Arc<PipelineConfig>,
    cache: Arc<StateCache>,
    engine: StrategyEngine,
    scorer: OpportunityScorer,
    governor: Arc<RiskGovernor>,
    builder: BundleBuilder,
    submitter: SubmissionManager,
    events: EventBus,
    counters: Counters,
}

impl Pipeline {
    pub fn new(
        config: Arc<PipelineConfig>,
        cache: Arc<StateCache>,
        engine: StrategyEngine,
        scorer: OpportunityScorer,
        identity: ExecutionIdentity,
        relay: Arc<dyn Relay>,
    ) -> Self {
        let events = EventBus::default();
        let governor = Arc::new(RiskGovernor::new(&config));
        let submitter = SubmissionManager::new(&config, Arc::clone(&cache), relay)
            .with_governor(Arc::clone(&governor))
            .with_events(events.clone());

        Self {
            builder: BundleBuilder::new(&config, identity),
            config,
            cache,
            engine,
            scorer,
            governor,
            submitter,
            events,
            counters: Counters::default(),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn governor(&self) -> &Arc<RiskGovernor> {
        &self.governor
    }

    pub fn submitter(&self) -> &SubmissionManager {
        &self.submitter
    }

    /// Drive cycles on every slot change and on the evaluation interval
    pub async fn run(&self, mut slots: watch::Receiver<Slot>, mut shutdown: oneshot::Receiver<()>) {
        info!(
            detectors = ?self.engine.detector_names(),
            policy = ?self.config.scheduling_policy,
            "Starting pipeline"
        );

        let mut interval = tokio::time::interval(self.config.evaluation_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut slots_open = true;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_cycle().await;
                }
                changed = slots.changed(), if slots_open => {
                    if changed.is_err() {
                        info!("Slot feed closed, continuing on the interval");
                        slots_open = false;
                    } else {
                        self.run_cycle().await;
                    }
                }
                _ = &mut shutdown => {
                    info!("Pipeline shutting down");
                    break;
                }
            }
        }
    }

    /// Detect, score, admit, order, build, and submit once
    pub async fn run_cycle(&self) -> CycleReport {
        let start = Instant::now();
        self.counters.cycles.fetch_add(1, Ordering::Relaxed);

        let cycle = self.engine.evaluate().await;
        let mut report = CycleReport {
            slot: cycle.slot,
            detected: cycle.opportunities.len(),
            timed_out: cycle
                .reports
                .iter()
                .filter(|r| r.status == DetectorStatus::TimedOut)
                .map(|r| r.detector)
                .collect(),
            ..Default::default()
        };
        self.counters.detected.fetch_add(report.detected as u64, Ordering::Relaxed);

        // Scoring sees the newest slot, not the detection snapshot's
        let (view, _) = self.cache.snapshot_partial(&self.scorer.oracle_markets());

        let mut scored = Vec::with_capacity(cycle.opportunities.len());
        for opp in cycle.opportunities {
            self.events.emit(PipelineEvent::Detected {
                opportunity_id: opp.id.clone(),
                detector: opp.detector,
                dedup_key: opp.dedup_key.to_string(),
                slot: opp.slot,
            });
            let id = opp.id.clone();
            match self.scorer.score(opp, &view) {
                Ok(s) => {
                    self.events.emit(PipelineEvent::Scored {
                        opportunity_id: id,
                        expected_profit: s.expected_profit(),
                        confidence: s.confidence(),
                        capital_required: s.capital_required(),
                    });
                    scored.push(s);
                }
                Err(e) => {
                    report.score_failures += 1;
                    debug!(opportunity = %id, "dropped at scoring: {}", e);
                    self.events.rejected(&id, Stage::Score, &e);
                }
            }
        }

        schedule(&mut scored, self.config.scheduling_policy);

        let mut admitted: Vec<(ScoredOpportunity, CapitalReservation)> = Vec::new();
        for s in scored {
            if admitted.len() >= self.config.max_submissions_per_cycle {
                report.deferred += 1;
                continue;
            }
            match self.governor.admit(&s) {
                Ok(reservation) => admitted.push((s, reservation)),
                Err(reason) => {
                    report.rejected += 1;
                    self.events.rejected(&s.opportunity().id, Stage::Admit, reason);
                }
            }
        }

        let current_slot = self.cache.latest_slot();
        let mut bundles = Vec::with_capacity(admitted.len());
        let mut reservations = Vec::with_capacity(admitted.len());
        for (s, reservation) in admitted {
            match self.builder.build(&s, current_slot) {
                Ok(mut bundle) => {
                    bundle.breaker_probe = reservation.probe_id();
                    bundles.push(bundle);
                    reservations.push(reservation);
                }
                Err(e) => {
                    report.unbuildable += 1;
                    warn!(
                        opportunity = %s.opportunity().id,
                        detector = s.opportunity().detector,
                        "unbuildable: {}",
                        e
                    );
                    self.events.rejected(&s.opportunity().id, Stage::Build, &e);
                }
            }
        }

        let results = self.submitter.submit_batch(bundles).await;
        // Capital stays reserved until every outcome is in
        drop(reservations);

        for result in results {
            match result {
                Ok(record) => report.submitted.push(record),
                Err(SubmitError::DuplicateInFlight(_)) => report.duplicates += 1,
                Err(SubmitError::Stale(_)) => report.stale += 1,
            }
        }
        self.counters
            .submitted
            .fetch_add(report.submitted.len() as u64, Ordering::Relaxed);

        if report.detected > 0 || !report.timed_out.is_empty() {
            info!(
                slot = report.slot,
                detected = report.detected,
                rejected = report.rejected,
                submitted = report.submitted.len(),
                duplicates = report.duplicates,
                stale = report.stale,
                elapsed_us = start.elapsed().as_micros() as u64,
                "cycle complete"
            );
        }
        report
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            cycles: self.counters.cycles.load(Ordering::Relaxed),
            detected: self.counters.detected.load(Ordering::Relaxed),
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            engine: self.engine.stats(),
            risk: self.governor.stats(),
            submissions: self.submitter.stats(),
        }
    }
}

/// Order admitted candidates for the limited submission slots
fn schedule(scored: &mut [ScoredOpportunity], policy: SchedulingPolicy) {
    let by_profit = |a: &ScoredOpportunity, b: &ScoredOpportunity| b.expected_profit().cmp(&a.expected_profit());
    let by_confidence = |a: &ScoredOpportunity, b: &ScoredOpportunity| b.confidence().total_cmp(&a.confidence());

    match policy {
        SchedulingPolicy::HighestProfit => {
            scored.sort_by(|a, b| by_profit(a, b).then_with(|| by_confidence(a, b)));
        }
        SchedulingPolicy::HighestConfidence => {
            scored.sort_by(|a, b| match by_confidence(a, b) {
                CmpOrdering::Equal => by_profit(a, b),
                other => other,
            });
        }
        SchedulingPolicy::DetectionOrder => {}
    }
}

/// Pipeline statistics
#[derive(Debug, Clone)]
pub struct PipelineStats {
    pub cycles: u64,
    pub detected: u64,
    pub submitted: u64,
    pub engine: EngineStats,
    pub risk: RiskStats,
    pub submissions: SubmitterStats,
}
