//! Configuration types

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{ConfigError, TipPolicy};

/// Order in which admitted opportunities compete for submission slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SchedulingPolicy {
    /// Highest expected profit first, confidence breaks ties
    #[default]
    HighestProfit,
    /// Highest confidence first, profit breaks ties
    HighestConfidence,
    /// Engine output order (registration, then emission)
    DetectionOrder,
}

/// Pipeline configuration, built once at startup and shared by reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    /// Minimum net profit in reference units (lamports)
    pub min_profit_threshold: Decimal,
    pub max_slippage_bps: u32,
    pub max_capital_per_opportunity: Decimal,
    /// Maximum transactions per bundle accepted by the relay
    pub max_bundle_size: usize,
    pub max_tip_fraction: Decimal,
    pub detector_time_budget_ms: u64,
    pub staleness_tolerance_slots: u64,
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_cooldown_ms: u64,

    pub tip_profit_fraction: Decimal,
    pub min_tip_lamports: u64,
    /// Signature fee per transaction
    pub base_fee_lamports: u64,
    /// Reserve drift tolerated between build and dispatch
    pub revalidation_tolerance_bps: u64,
    pub relay_timeout_ms: u64,
    pub circuit_breaker_window_ms: u64,
    pub max_total_capital_in_flight: Option<Decimal>,
    pub submission_history_limit: usize,
    pub submission_retention_ms: u64,
    pub max_submissions_per_cycle: usize,
    pub scheduling_policy: SchedulingPolicy,
    pub evaluation_interval_ms: u64,
    pub max_account_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_profit_threshold: dec!(10_000),                  // 0.00001 SOL
            max_slippage_bps: 100,                               // 1%
            max_capital_per_opportunity: dec!(10_000_000_000),   // 10 SOL
            max_bundle_size: 5,
            max_tip_fraction: dec!(0.8),
            detector_time_budget_ms: 50,
            staleness_tolerance_slots: 5,
            circuit_breaker_failure_threshold: 3,
            circuit_breaker_cooldown_ms: 30_000,

            tip_profit_fraction: dec!(0.5),
            min_tip_lamports: 1_000,
            base_fee_lamports: 5_000,
            revalidation_tolerance_bps: 50,
            relay_timeout_ms: 2_000,
            circuit_breaker_window_ms: 60_000,
            max_total_capital_in_flight: None,
            submission_history_limit: 1_024,
            submission_retention_ms: 300_000,
            max_submissions_per_cycle: 4,
            scheduling_policy: SchedulingPolicy::HighestProfit,
            evaluation_interval_ms: 400,                         // ~1 slot
            max_account_bytes: 10_240,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.max_bundle_size < 2 {
            return invalid("maxBundleSize must leave room for the tip transaction");
        }
        if self.max_tip_fraction < Decimal::ZERO || self.max_tip_fraction > Decimal::ONE {
            return invalid("maxTipFraction must be within [0, 1]");
        }
        if self.tip_profit_fraction < Decimal::ZERO || self.tip_profit_fraction > Decimal::ONE {
            return invalid("tipProfitFraction must be within [0, 1]");
        }
        if self.min_profit_threshold < Decimal::ZERO {
            return invalid("minProfitThreshold must not be negative");
        }
        if self.max_capital_per_opportunity <= Decimal::ZERO {
            return invalid("maxCapitalPerOpportunity must be positive");
        }
        if self.detector_time_budget_ms == 0 {
            return invalid("detectorTimeBudgetMs must be positive");
        }
        if self.circuit_breaker_failure_threshold == 0 {
            return invalid("circuitBreakerFailureThreshold must be positive");
        }
        if self.max_slippage_bps > 10_000 {
            return invalid("maxSlippageBps must be at most 10000");
        }
        if self.submission_history_limit == 0 {
            return invalid("submissionHistoryLimit must be positive");
        }
        Ok(())
    }

    pub fn detector_time_budget(&self) -> Duration {
        Duration::from_millis(self.detector_time_budget_ms)
    }

    pub fn circuit_breaker_cooldown(&self) -> Duration {
        Duration::from_millis(self.circuit_breaker_cooldown_ms)
    }

    pub fn circuit_breaker_window(&self) -> Duration {
        Duration::from_millis(self.circuit_breaker_window_ms)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_millis(self.relay_timeout_ms)
    }

    pub fn submission_retention(&self) -> Duration {
        Duration::from_millis(self.submission_retention_ms)
    }

    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_millis(self.evaluation_interval_ms)
    }

    pub fn tip_policy(&self) -> TipPolicy {
        TipPolicy {
            profit_fraction: self.tip_profit_fraction,
            max_fraction: self.max_tip_fraction,
            min_lamports: self.min_tip_lamports,
        }
    }
}
