//! Opportunity scoring
//!
//! Turns raw detector output into net economics in the reference unit,
//! decays confidence with age, and flags conditions the risk gate cares
//! about.

use std::collections::HashMap;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::trace;

use searcher_core::{
    short_id, AccountId, Mint, Opportunity, PipelineConfig, RiskFlag, ScoreError, ScoreResult,
    ScoredOpportunity, Slot, TipPolicy, TokenAmount, NATIVE_MINT,
};
use searcher_state::StateView;

/// Scorer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScorerConfig {
    /// Mint whose raw units are the reference unit
    pub reference_mint: Mint,
    /// Oracle market per non-reference mint
    pub oracles: HashMap<Mint, AccountId>,
    pub base_fee_lamports: u64,
    pub staleness_tolerance_slots: Slot,
    /// Profit below this share of the value at risk is flagged thin
    pub thin_margin: Decimal,
    /// Price impact above this is flagged high
    pub high_impact_bps: u32,
    /// Confidence multiplier for mixed-slot views
    pub mixed_slot_penalty: f64,
    #[serde(skip)]
    pub tip_policy: Option<TipPolicy>,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            reference_mint: NATIVE_MINT,
            oracles: HashMap::new(),
            base_fee_lamports: 5_000,
            staleness_tolerance_slots: 5,
            thin_margin: dec!(0.1),
            high_impact_bps: 50,
            mixed_slot_penalty: 0.8,
            tip_policy: None,
        }
    }
}

impl ScorerConfig {
    /// Scorer settings derived from the pipeline configuration
    pub fn from_pipeline(config: &PipelineConfig, oracles: HashMap<Mint, AccountId>) -> Self {
        Self {
            oracles,
            base_fee_lamports: config.base_fee_lamports,
            staleness_tolerance_slots: config.staleness_tolerance_slots,
            high_impact_bps: config.max_slippage_bps / 2,
            tip_policy: Some(config.tip_policy()),
            ..Default::default()
        }
    }
}

/// Computes net value, confidence, and risk flags for opportunities
pub struct OpportunityScorer {
    config: ScorerConfig,
    tip_policy: TipPolicy,
}

impl OpportunityScorer {
    pub fn new(config: ScorerConfig) -> Self {
        let tip_policy = config
            .tip_policy
            .unwrap_or_else(|| PipelineConfig::default().tip_policy());
        Self { config, tip_policy }
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Oracle markets that must be in the view for pricing
    pub fn oracle_markets(&self) -> Vec<AccountId> {
        let mut markets: Vec<AccountId> = self.config.oracles.values().copied().collect();
        markets.sort();
        markets.dedup();
        markets
    }

    /// Score one opportunity against the view of the current cycle
    pub fn score(&self, opp: Opportunity, view: &StateView) -> ScoreResult<ScoredOpportunity> {
        let tolerance = self.config.staleness_tolerance_slots;
        let age = view.slot().saturating_sub(opp.slot);
        if age > tolerance {
            return Err(ScoreError::Expired { age, max_age: tolerance });
        }

        let value_in = self.value_of(&opp.input, view)?;
        let value_out = self.value_of(&opp.output, view)?;
        // One signature per instruction transaction plus the tip transaction
        let fees = Decimal::from(self.config.base_fee_lamports) * Decimal::from(opp.instruction_count() as u64 + 1);
        let gross = value_out - value_in - fees;
        let tip = Decimal::from(self.tip_policy.estimate(gross));

        let confidence = self.confidence(&opp, age);
        let flags = self.flags(&opp, value_in, value_out - value_in - fees - tip);

        trace!(
            opportunity = %opp.id,
            detector = opp.detector,
            %value_in,
            %value_out,
            %fees,
            %tip,
            confidence,
            "scored"
        );

        Ok(ScoredOpportunity::new(opp, value_in, value_out, fees, tip, confidence, age, flags))
    }

    /// Base confidence decayed linearly with age; zero just past tolerance
    fn confidence(&self, opp: &Opportunity, age: Slot) -> f64 {
        let tolerance = self.config.staleness_tolerance_slots as f64;
        let decay = 1.0 - age as f64 / (tolerance + 1.0);
        let mut confidence = opp.base_confidence * decay.max(0.0);
        if opp.mixed_slot {
            confidence *= self.config.mixed_slot_penalty;
        }
        confidence.clamp(0.0, 1.0)
    }

    fn flags(&self, opp: &Opportunity, value_in: Decimal, profit: Decimal) -> Vec<RiskFlag> {
        let mut flags = Vec::new();
        if opp.mixed_slot {
            flags.push(RiskFlag::MixedSlot);
        }
        if profit < value_in * self.config.thin_margin {
            flags.push(RiskFlag::ThinMargin);
        }
        if opp.creates_accounts() {
            flags.push(RiskFlag::CreatesAccounts);
        }
        if opp.price_impact_bps > self.config.high_impact_bps {
            flags.push(RiskFlag::HighPriceImpact);
        }
        flags
    }

    /// Value of an amount in reference units
    fn value_of(&self, amount: &TokenAmount, view: &StateView) -> ScoreResult<Decimal> {
        if amount.mint == self.config.reference_mint {
            return Ok(Decimal::from(amount.raw));
        }
        let oracle_market = self.config.oracles.get(&amount.mint).ok_or_else(|| {
            ScoreError::Unpriceable(format!("no reference price source for mint {}", short_id(&amount.mint)))
        })?;
        let pool = view
            .pool(oracle_market)
            .map_err(|_| ScoreError::StaleDependency(amount.mint))?;
        let oracle = pool
            .as_oracle()
            .ok_or_else(|| ScoreError::Unpriceable(format!("{} is not an oracle", short_id(oracle_market))))?;
        let raw = Decimal::from_u64(amount.raw).unwrap_or(Decimal::MAX);
        raw.checked_mul(oracle.value())
            .ok_or_else(|| ScoreError::Unpriceable("value overflow".to_string()))
    }
}
