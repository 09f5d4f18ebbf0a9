//! Opportunity detection
//!
//! Features:
//! - Pluggable detectors evaluated concurrently against one snapshot
//! - Per-detector time budgets with cooperative cancellation
//! - Cross-pool and bonding-curve arbitrage strategies
//! - Scoring in a single reference unit with staleness decay

pub mod engine;
#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixtures;
pub mod scorer;
pub mod strategies;

pub use engine::{DetectorReport, DetectorStatus, EngineCycle, EngineStats, StrategyEngine};
pub use scorer::{OpportunityScorer, ScorerConfig};
pub use strategies::{
    CrossPoolConfig, CrossPoolDetector, CurveArbConfig, CurveArbDetector, CurvePair, Detector, EvalContext,
};
