//! Strategy engine: fans one snapshot out to every detector and fans the
//! results back in

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{debug, info, warn};

use searcher_core::{AccountId, Opportunity, PipelineConfig, Slot, StateError};
use searcher_state::{StateCache, StateView};

use crate::strategies::{Detector, EvalContext};

/// How one detector fared in a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorStatus {
    Completed,
    /// Budget exceeded; output discarded
    TimedOut,
    /// Required accounts have no state yet
    StaleDependency { missing: Vec<AccountId> },
    /// Watches a market the cache does not know
    UnknownMarket(AccountId),
    /// Evaluation panicked
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct DetectorReport {
    pub detector: &'static str,
    pub status: DetectorStatus,
    pub emitted: usize,
    pub elapsed: Duration,
}

/// Output of one evaluation cycle
#[derive(Debug, Clone)]
pub struct EngineCycle {
    pub slot: Slot,
    /// Registration order, then emission order
    pub opportunities: Vec<Opportunity>,
    pub reports: Vec<DetectorReport>,
    pub elapsed: Duration,
}

impl EngineCycle {
    pub fn report(&self, detector: &str) -> Option<&DetectorReport> {
        self.reports.iter().find(|r| r.detector == detector)
    }
}

/// What a detector needs from the snapshot
struct Plan {
    required: Vec<AccountId>,
    optional: Vec<AccountId>,
}

#[derive(Debug, Default)]
struct Counters {
    cycles: AtomicU64,
    evaluations: AtomicU64,
    timeouts: AtomicU64,
    stale: AtomicU64,
    failures: AtomicU64,
    emitted: AtomicU64,
}

/// Registry of detectors evaluated against shared snapshots
pub struct StrategyEngine {
    cache: Arc<StateCache>,
    detectors: Vec<Arc<dyn Detector>>,
    time_budget: Duration,
    counters: Counters,
}

impl StrategyEngine {
    pub fn new(cache: Arc<StateCache>, config: &PipelineConfig) -> Self {
        Self {
            cache,
            detectors: Vec::new(),
            time_budget: config.detector_time_budget(),
            counters: Counters::default(),
        }
    }

    /// Append a detector; registration order fixes output order
    pub fn register(&mut self, detector: Arc<dyn Detector>) {
        info!("Registered detector {}", detector.name());
        self.detectors.push(detector);
    }

    pub fn with_detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.register(detector);
        self
    }

    pub fn detector_names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Run every detector once against a fresh snapshot
    pub async fn evaluate(&self) -> EngineCycle {
        let start = Instant::now();
        self.counters.cycles.fetch_add(1, Ordering::Relaxed);

        let plans: Vec<Result<Plan, AccountId>> = self.detectors.iter().map(|d| self.plan(d.as_ref())).collect();

        let mut keys = Vec::new();
        let mut seen = HashSet::new();
        for plan in plans.iter().flatten() {
            for key in plan.required.iter().chain(plan.optional.iter()) {
                if seen.insert(*key) {
                    keys.push(*key);
                }
            }
        }

        let (view, missing) = self.cache.snapshot_partial(&keys);
        let view = Arc::new(view);
        let missing: HashSet<AccountId> = missing.into_iter().collect();

        let runs = self.detectors.iter().zip(plans).map(|(detector, plan)| {
            let view = Arc::clone(&view);
            let missing = &missing;
            async move {
                let plan = match plan {
                    Ok(plan) => plan,
                    Err(market) => return (skipped(detector.name(), DetectorStatus::UnknownMarket(market)), Vec::new()),
                };
                let absent: Vec<AccountId> = plan.required.iter().filter(|k| missing.contains(*k)).copied().collect();
                if !absent.is_empty() {
                    return (
                        skipped(detector.name(), DetectorStatus::StaleDependency { missing: absent }),
                        Vec::new(),
                    );
                }
                self.run_detector(Arc::clone(detector), view).await
            }
        });
        let results = join_all(runs).await;

        let mut opportunities = Vec::new();
        let mut reports = Vec::with_capacity(results.len());
        for (report, output) in results {
            self.count(&report);
            opportunities.extend(output);
            reports.push(report);
        }

        let elapsed = start.elapsed();
        debug!(
            slot = view.slot(),
            detectors = reports.len(),
            opportunities = opportunities.len(),
            ?elapsed,
            "evaluation cycle complete"
        );

        EngineCycle {
            slot: view.slot(),
            opportunities,
            reports,
            elapsed,
        }
    }

    fn plan(&self, detector: &dyn Detector) -> Result<Plan, AccountId> {
        let markets = detector.watched_markets();
        let required = self.cache.dependencies_of(&markets).map_err(|e| match e {
            StateError::UnknownMarket(market) => market,
            _ => AccountId::ZERO,
        })?;
        Ok(Plan {
            required,
            optional: detector.optional_accounts(),
        })
    }

    async fn run_detector(&self, detector: Arc<dyn Detector>, view: Arc<StateView>) -> (DetectorReport, Vec<Opportunity>) {
        let name = detector.name();
        let ctx = EvalContext::new(self.time_budget);
        let worker_ctx = ctx.clone();
        let start = Instant::now();

        let handle = tokio::task::spawn_blocking(move || {
            let output = detector.evaluate(&view, &worker_ctx);
            // Deadline or cancel flag seen at return means the budget ran out
            (output, worker_ctx.is_cancelled())
        });

        let (status, output) = match tokio::time::timeout(self.time_budget, handle).await {
            Ok(Ok((output, true))) => {
                warn!(
                    "Detector {} returned at its {:?} deadline, {} partial results discarded",
                    name,
                    self.time_budget,
                    output.len()
                );
                (DetectorStatus::TimedOut, Vec::new())
            }
            Ok(Ok((output, false))) => (DetectorStatus::Completed, output),
            Ok(Err(e)) => {
                warn!("Detector {} failed: {}", name, e);
                (DetectorStatus::Failed(e.to_string()), Vec::new())
            }
            Err(_) => {
                // The blocking task winds down on its own once it polls the flag
                ctx.cancel();
                warn!("Detector {} exceeded {:?}, output discarded", name, self.time_budget);
                (DetectorStatus::TimedOut, Vec::new())
            }
        };

        let report = DetectorReport {
            detector: name,
            status,
            emitted: output.len(),
            elapsed: start.elapsed(),
        };
        (report, output)
    }

    fn count(&self, report: &DetectorReport) {
        let counter = match report.status {
            DetectorStatus::Completed => {
                self.counters.emitted.fetch_add(report.emitted as u64, Ordering::Relaxed);
                &self.counters.evaluations
            }
            DetectorStatus::TimedOut => &self.counters.timeouts,
            DetectorStatus::StaleDependency { .. } => &self.counters.stale,
            DetectorStatus::UnknownMarket(_) | DetectorStatus::Failed(_) => &self.counters.failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            detector_count: self.detectors.len(),
            cycles: self.counters.cycles.load(Ordering::Relaxed),
            evaluations: self.counters.evaluations.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            stale: self.counters.stale.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            emitted: self.counters.emitted.load(Ordering::Relaxed),
        }
    }
}

fn skipped(detector: &'static str, status: DetectorStatus) -> DetectorReport {
    debug!(detector, ?status, "detector skipped");
    DetectorReport {
        detector,
        status,
        emitted: 0,
        elapsed: Duration::ZERO,
    }
}

/// Engine statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub detector_count: usize,
    pub cycles: u64,
    pub evaluations: u64,
    pub timeouts: u64,
    pub stale: u64,
    pub failures: u64,
    pub emitted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::MarketFixture;
    use searcher_core::{
        AccountMeta, Instruction, Mint, OpportunityBuilder, ProgramId, ProposedInstruction, TokenAmount,
        NATIVE_MINT,
    };

    /// Emits `count` opportunities touching its market
    struct Emitter {
        name: &'static str,
        market: AccountId,
        count: usize,
    }

    impl Detector for Emitter {
        fn name(&self) -> &'static str {
            self.name
        }

        fn watched_markets(&self) -> Vec<AccountId> {
            vec![self.market]
        }

        fn evaluate(&self, view: &StateView, _ctx: &EvalContext) -> Vec<Opportunity> {
            (0..self.count)
                .filter_map(|i| {
                    let mut builder = OpportunityBuilder::new(self.name);
                    builder.push(ProposedInstruction::new(Instruction::new(
                        ProgramId::ZERO,
                        vec![AccountMeta::writable(self.market)],
                        vec![i as u8],
                    )));
                    builder
                        .amounts(TokenAmount::new(NATIVE_MINT, 100), TokenAmount::new(NATIVE_MINT, 100 + i as u64))
                        .slot(view.slot(), false)
                        .touches(self.market)
                        .build()
                })
                .collect()
        }
    }

    /// Spins until cancelled
    struct Stuck {
        market: AccountId,
    }

    impl Detector for Stuck {
        fn name(&self) -> &'static str {
            "stuck"
        }

        fn watched_markets(&self) -> Vec<AccountId> {
            vec![self.market]
        }

        fn evaluate(&self, _view: &StateView, ctx: &EvalContext) -> Vec<Opportunity> {
            while !ctx.is_cancelled() {
                std::thread::sleep(Duration::from_millis(1));
            }
            vec![]
        }
    }

    /// Emits one opportunity every 5ms until told to stop
    struct Trickle {
        market: AccountId,
    }

    impl Detector for Trickle {
        fn name(&self) -> &'static str {
            "trickle"
        }

        fn watched_markets(&self) -> Vec<AccountId> {
            vec![self.market]
        }

        fn evaluate(&self, view: &StateView, ctx: &EvalContext) -> Vec<Opportunity> {
            let mut found = Vec::new();
            while !ctx.is_cancelled() {
                found.extend(
                    Emitter {
                        name: "trickle",
                        market: self.market,
                        count: 1,
                    }
                    .evaluate(view, &EvalContext::unbounded()),
                );
                std::thread::sleep(Duration::from_millis(5));
            }
            found
        }
    }

    /// Ignores cancellation entirely
    struct Hung {
        market: AccountId,
    }

    impl Detector for Hung {
        fn name(&self) -> &'static str {
            "hung"
        }

        fn watched_markets(&self) -> Vec<AccountId> {
            vec![self.market]
        }

        fn evaluate(&self, view: &StateView, _ctx: &EvalContext) -> Vec<Opportunity> {
            std::thread::sleep(Duration::from_millis(300));
            Emitter {
                name: "hung",
                market: self.market,
                count: 1,
            }
            .evaluate(view, &EvalContext::unbounded())
        }
    }

    fn cache_with_oracle() -> (Arc<StateCache>, AccountId) {
        let cache = Arc::new(StateCache::default());
        let oracle = MarketFixture::oracle(1, Mint::repeat_byte(0x31), 1, 0);
        oracle.install(&cache, 10);
        (cache, oracle.market)
    }

    fn config(budget_ms: u64) -> PipelineConfig {
        PipelineConfig {
            detector_time_budget_ms: budget_ms,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fan_in_order() {
        let (cache, market) = cache_with_oracle();
        let engine = StrategyEngine::new(cache, &config(500))
            .with_detector(Arc::new(Emitter { name: "second", market, count: 2 }))
            .with_detector(Arc::new(Emitter { name: "first", market, count: 3 }));

        let cycle = engine.evaluate().await;
        let order: Vec<(&str, u64)> = cycle
            .opportunities
            .iter()
            .map(|o| (o.detector, o.output.raw))
            .collect();
        assert_eq!(
            order,
            vec![("second", 100), ("second", 101), ("first", 100), ("first", 101), ("first", 102)]
        );
        assert_eq!(cycle.slot, 10);
        assert_eq!(engine.stats().emitted, 5);
    }

    #[tokio::test]
    async fn test_timed_out_detector_discarded() {
        let (cache, market) = cache_with_oracle();
        let engine = StrategyEngine::new(cache, &config(30))
            .with_detector(Arc::new(Stuck { market }))
            .with_detector(Arc::new(Hung { market }))
            .with_detector(Arc::new(Emitter { name: "healthy", market, count: 1 }));

        let cycle = engine.evaluate().await;
        assert_eq!(cycle.report("stuck").unwrap().status, DetectorStatus::TimedOut);
        assert_eq!(cycle.report("hung").unwrap().status, DetectorStatus::TimedOut);
        assert_eq!(cycle.report("healthy").unwrap().status, DetectorStatus::Completed);
        assert_eq!(cycle.opportunities.len(), 1);
        assert_eq!(cycle.opportunities[0].detector, "healthy");
        assert_eq!(engine.stats().timeouts, 2);
    }

    #[tokio::test]
    async fn test_partial_output_at_deadline_discarded() {
        let (cache, market) = cache_with_oracle();
        let engine = StrategyEngine::new(cache, &config(30)).with_detector(Arc::new(Trickle { market }));

        for _ in 0..5 {
            let cycle = engine.evaluate().await;
            let report = cycle.report("trickle").unwrap();
            assert_eq!(report.status, DetectorStatus::TimedOut);
            assert_eq!(report.emitted, 0);
            assert!(cycle.opportunities.is_empty());
        }
        assert_eq!(engine.stats().timeouts, 5);
        assert_eq!(engine.stats().emitted, 0);
    }

    #[tokio::test]
    async fn test_stale_and_unknown_markets_skipped() {
        let (cache, market) = cache_with_oracle();
        let pending = MarketFixture::oracle(2, Mint::repeat_byte(0x32), 1, 0);
        cache.register_pool(pending.definition.clone());

        let engine = StrategyEngine::new(Arc::clone(&cache), &config(500))
            .with_detector(Arc::new(Emitter { name: "waiting", market: pending.market, count: 1 }))
            .with_detector(Arc::new(Emitter { name: "lost", market: AccountId::repeat_byte(0x99), count: 1 }))
            .with_detector(Arc::new(Emitter { name: "ready", market, count: 1 }));

        let cycle = engine.evaluate().await;
        assert_eq!(
            cycle.report("waiting").unwrap().status,
            DetectorStatus::StaleDependency { missing: vec![pending.market] }
        );
        assert_eq!(
            cycle.report("lost").unwrap().status,
            DetectorStatus::UnknownMarket(AccountId::repeat_byte(0x99))
        );
        assert_eq!(cycle.opportunities.len(), 1);
        assert_eq!(cycle.opportunities[0].detector, "ready");
    }
}
