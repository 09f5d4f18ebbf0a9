//! End-to-end pipeline scenarios over synthetic markets

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use searcher_core::{
    AccountMeta, Bundle, Instruction, Mint, Opportunity, OpportunityBuilder, PipelineConfig, PipelineEvent,
    PoolAssumption, ProgramId, ProposedInstruction, RelayError, SchedulingPolicy, Stage, SubmitError, TokenAmount, NATIVE_MINT,
};
use searcher_detector::fixtures::{self, MarketFixture, PAYER};
use searcher_detector::{Detector, EvalContext, OpportunityScorer, ScorerConfig, StrategyEngine};
use searcher_executor::{BreakerState, BundleBuilder, DryRunRelay, Relay, RiskGovernor, SubmissionManager};
use searcher_node::Pipeline;
use searcher_state::{StateCache, StateView};

const TOKEN: Mint = Mint::repeat_byte(0x42);

/// Emits one SOL round trip across its markets every cycle
struct RoundTrip {
    name: &'static str,
    markets: Vec<MarketFixture>,
}

impl RoundTrip {
    fn on(name: &'static str, markets: &[&MarketFixture]) -> Self {
        Self {
            name,
            markets: markets.iter().map(|m| (*m).clone()).collect(),
        }
    }
}

impl Detector for RoundTrip {
    fn name(&self) -> &'static str {
        self.name
    }

    fn watched_markets(&self) -> Vec<searcher_core::AccountId> {
        self.markets.iter().map(|m| m.market).collect()
    }

    fn evaluate(&self, view: &StateView, _ctx: &EvalContext) -> Vec<Opportunity> {
        let mut accounts = Vec::new();
        let mut assumptions = Vec::new();
        for fixture in &self.markets {
            let Ok(pool) = view.pool(&fixture.market) else {
                return vec![];
            };
            let Some((base_reserve, quote_reserve)) = pool.reserve_pair() else {
                return vec![];
            };
            accounts.push(AccountMeta::writable(fixture.market));
            assumptions.push(PoolAssumption {
                market: fixture.market,
                base_reserve,
                quote_reserve,
            });
        }
        accounts.push(AccountMeta::signer(PAYER));

        let mut builder = OpportunityBuilder::new(self.name);
        builder.push(ProposedInstruction::new(Instruction::new(
            ProgramId::repeat_byte(0xa1),
            accounts,
            vec![9u8],
        )));
        let mut builder = builder
            .amounts(
                TokenAmount::new(NATIVE_MINT, 1_000_000),
                TokenAmount::new(NATIVE_MINT, 1_500_000),
            )
            .slot(view.slot(), view.is_mixed())
            .confidence(0.9);
        for assumption in assumptions {
            builder = builder.touches(assumption.market).assume(assumption);
        }
        builder.build().into_iter().collect()
    }
}

/// Never returns inside any reasonable budget
struct Hung {
    market: MarketFixture,
}

impl Detector for Hung {
    fn name(&self) -> &'static str {
        "hung"
    }

    fn watched_markets(&self) -> Vec<searcher_core::AccountId> {
        vec![self.market.market]
    }

    fn evaluate(&self, _view: &StateView, _ctx: &EvalContext) -> Vec<Opportunity> {
        std::thread::sleep(Duration::from_millis(200));
        vec![]
    }
}

#[derive(Default)]
struct RejectingRelay {
    calls: AtomicU64,
}

#[async_trait]
impl Relay for RejectingRelay {
    async fn submit_bundle(&self, _bundle: &Bundle) -> Result<String, RelayError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Err(RelayError::Rejected("simulation failed".to_string()))
    }

    fn name(&self) -> &str {
        "rejecting"
    }
}

fn market(cache: &StateCache, slot: u64) -> MarketFixture {
    seeded_market(cache, 1, slot)
}

fn seeded_market(cache: &StateCache, seed: u8, slot: u64) -> MarketFixture {
    let pool = MarketFixture::constant_product(seed, TOKEN, NATIVE_MINT, 1_000_000_000, 2_000_000_000);
    pool.install(cache, slot);
    pool
}

fn pipeline(
    config: PipelineConfig,
    cache: &Arc<StateCache>,
    detectors: Vec<Arc<dyn Detector>>,
    relay: Arc<dyn Relay>,
) -> Pipeline {
    let config = Arc::new(config);
    let mut engine = StrategyEngine::new(Arc::clone(cache), &config);
    for detector in detectors {
        engine.register(detector);
    }
    let scorer = OpportunityScorer::new(ScorerConfig::from_pipeline(&config, Default::default()));
    Pipeline::new(
        config,
        Arc::clone(cache),
        engine,
        scorer,
        fixtures::identity(&[NATIVE_MINT, TOKEN]),
        relay,
    )
}

#[tokio::test]
async fn test_same_market_reaches_relay_once() {
    let cache = Arc::new(StateCache::default());
    let pool = market(&cache, 100);
    let relay = Arc::new(DryRunRelay::new());
    let pipeline = pipeline(
        PipelineConfig::default(),
        &cache,
        vec![
            Arc::new(RoundTrip::on("first", &[&pool])) as Arc<dyn Detector>,
            Arc::new(RoundTrip::on("second", &[&pool])),
        ],
        relay.clone(),
    );

    let report = pipeline.run_cycle().await;

    assert_eq!(report.detected, 2);
    assert_eq!(report.submitted.len(), 1);
    assert_eq!(report.duplicates, 1);
    assert_eq!(relay.submitted(), 1);
    assert_eq!(pipeline.submitter().pending_count(), 0);
}

#[tokio::test]
async fn test_shared_market_through_different_account_sets() {
    let cache = Arc::new(StateCache::default());
    // `right` sorts before `shared`, so the loser claims it before conflicting
    let right = seeded_market(&cache, 1, 100);
    let left = seeded_market(&cache, 2, 100);
    let shared = seeded_market(&cache, 3, 100);
    let relay = Arc::new(DryRunRelay::new());
    let pipeline = pipeline(
        PipelineConfig {
            scheduling_policy: SchedulingPolicy::DetectionOrder,
            ..Default::default()
        },
        &cache,
        vec![
            Arc::new(RoundTrip::on("shared-left", &[&shared, &left])) as Arc<dyn Detector>,
            Arc::new(RoundTrip::on("shared-right", &[&shared, &right])),
            Arc::new(RoundTrip::on("right-only", &[&right])),
        ],
        relay.clone(),
    );

    let report = pipeline.run_cycle().await;

    // The loser's claim on `right` is released, so `right-only` still goes out
    assert_eq!(report.detected, 3);
    assert_eq!(report.duplicates, 1);
    let mut winners: Vec<&str> = report.submitted.iter().map(|r| r.bundle.detector).collect();
    winners.sort_unstable();
    assert_eq!(winners, vec!["right-only", "shared-left"]);
    assert_eq!(relay.submitted(), 2);
    assert_eq!(pipeline.submitter().pending_count(), 0);
}

#[tokio::test]
async fn test_state_moving_past_tolerance_is_never_submitted() {
    let cache = Arc::new(StateCache::default());
    let pool = market(&cache, 100);
    let config = PipelineConfig::default();
    assert_eq!(config.staleness_tolerance_slots, 5);

    let engine =
        StrategyEngine::new(Arc::clone(&cache), &config).with_detector(Arc::new(RoundTrip::on("round-trip", &[&pool])));
    let scorer = OpportunityScorer::new(ScorerConfig::from_pipeline(&config, Default::default()));
    let governor = RiskGovernor::new(&config);
    let builder = BundleBuilder::new(&config, fixtures::identity(&[NATIVE_MINT, TOKEN]));
    let relay = Arc::new(DryRunRelay::new());
    let submitter = SubmissionManager::new(&config, Arc::clone(&cache), relay.clone());

    let cycle = engine.evaluate().await;
    assert_eq!(cycle.slot, 100);
    let opp = cycle.opportunities.into_iter().next().unwrap();
    let (view, _) = cache.snapshot_partial(&[]);
    let scored = scorer.score(opp, &view).unwrap();
    let _reservation = governor.admit(&scored).unwrap();
    let bundle = builder.build(&scored, cache.latest_slot()).unwrap();

    // Seven slots pass before dispatch
    cache.advance_slot(107);
    let err = submitter.submit(bundle).await.unwrap_err();

    assert!(matches!(err, SubmitError::Stale(_)));
    assert_eq!(relay.submitted(), 0);
    assert_eq!(submitter.stats().stale, 1);
}

#[tokio::test]
async fn test_timed_out_detector_does_not_hold_back_others() {
    let cache = Arc::new(StateCache::default());
    let pool = market(&cache, 100);
    let relay = Arc::new(DryRunRelay::new());
    let config = PipelineConfig {
        detector_time_budget_ms: 20,
        ..Default::default()
    };
    let pipeline = pipeline(
        config,
        &cache,
        vec![
            Arc::new(Hung { market: pool.clone() }) as Arc<dyn Detector>,
            Arc::new(RoundTrip::on("round-trip", &[&pool])),
        ],
        relay.clone(),
    );

    let report = pipeline.run_cycle().await;

    assert_eq!(report.timed_out, vec!["hung"]);
    assert_eq!(report.submitted.len(), 1);
    assert_eq!(report.submitted[0].bundle.detector, "round-trip");
    assert_eq!(relay.submitted(), 1);
}

#[tokio::test]
async fn test_consecutive_rejections_open_the_breaker() {
    let cache = Arc::new(StateCache::default());
    let pool = market(&cache, 100);
    let relay = Arc::new(RejectingRelay::default());
    let config = PipelineConfig {
        circuit_breaker_failure_threshold: 2,
        circuit_breaker_cooldown_ms: 60_000,
        ..Default::default()
    };
    let pipeline = pipeline(
        config,
        &cache,
        vec![Arc::new(RoundTrip::on("round-trip", &[&pool]))],
        relay.clone(),
    );
    let mut events = pipeline.events().subscribe();

    for _ in 0..2 {
        let report = pipeline.run_cycle().await;
        assert_eq!(report.submitted.len(), 1);
        assert!(!report.submitted[0].outcome.is_success());
    }
    assert_eq!(pipeline.governor().breaker_state(), BreakerState::Open);

    let report = pipeline.run_cycle().await;
    assert_eq!(report.rejected, 1);
    assert!(report.submitted.is_empty());
    assert_eq!(relay.calls.load(Ordering::Relaxed), 2);

    let mut admit_rejections = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let PipelineEvent::Rejected { stage: Stage::Admit, reason, .. } = event.event {
            admit_rejections.push(reason);
        }
    }
    assert_eq!(admit_rejections.len(), 1);
    assert!(admit_rejections[0].to_lowercase().contains("circuit breaker"));
}
