//! Opportunity types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

use crate::{short_id, AccountId, Instruction, Slot, TokenAmount};

/// Contested resource set an opportunity touches.
///
/// Normalized (sorted, deduplicated) so two detectors touching the same
/// markets in a different order produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DedupKey(Vec<AccountId>);

impl DedupKey {
    pub fn new(mut accounts: Vec<AccountId>) -> Self {
        accounts.sort();
        accounts.dedup();
        Self(accounts)
    }

    pub fn single(account: AccountId) -> Self {
        Self(vec![account])
    }

    pub fn accounts(&self) -> &[AccountId] {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(short_id).collect();
        write!(f, "{}", parts.join("+"))
    }
}

/// Instruction plus the indices (within the same opportunity) it must follow
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProposedInstruction {
    pub instruction: Instruction,
    pub depends_on: Vec<usize>,
    /// Creates an account that later instructions use
    pub opens_account: bool,
}

impl ProposedInstruction {
    pub fn new(instruction: Instruction) -> Self {
        Self {
            instruction,
            depends_on: Vec::new(),
            opens_account: false,
        }
    }

    pub fn after(mut self, index: usize) -> Self {
        self.depends_on.push(index);
        self
    }

    pub fn opening_account(mut self) -> Self {
        self.opens_account = true;
        self
    }
}

/// Reserves a detector priced against; checked again right before dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolAssumption {
    pub market: AccountId,
    pub base_reserve: u64,
    pub quote_reserve: u64,
}

impl PoolAssumption {
    /// Largest relative move of either reserve, in bps
    pub fn drift_bps(&self, base_reserve: u64, quote_reserve: u64) -> u64 {
        fn drift(expected: u64, actual: u64) -> u64 {
            if expected == 0 {
                return if actual == 0 { 0 } else { u64::MAX };
            }
            let diff = expected.abs_diff(actual) as u128;
            let bps = diff * 10_000 / expected as u128;
            u64::try_from(bps).unwrap_or(u64::MAX)
        }
        drift(self.base_reserve, base_reserve).max(drift(self.quote_reserve, quote_reserve))
    }
}

/// Candidate action produced by a detector
#[derive(Debug, Clone, Serialize)]
pub struct Opportunity {
    pub id: String,
    pub detector: &'static str,
    pub instructions: Vec<ProposedInstruction>,
    pub input: TokenAmount,
    pub output: TokenAmount,
    /// Slot of the view the computation ran against
    pub slot: Slot,
    /// The view mixed accounts from different slots
    pub mixed_slot: bool,
    pub dedup_key: DedupKey,
    pub price_impact_bps: u32,
    pub assumptions: Vec<PoolAssumption>,
    /// Detector's own confidence before staleness decay (0.0 - 1.0)
    pub base_confidence: f64,
    pub detected_at: DateTime<Utc>,
}

impl Opportunity {
    /// Instruction count, not counting the tip the builder appends
    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    /// Whether any instruction opens a new account
    pub fn creates_accounts(&self) -> bool {
        self.instructions.iter().any(|p| p.opens_account)
    }
}

/// Builder for Opportunity
#[derive(Debug, Default)]
pub struct OpportunityBuilder {
    detector: Option<&'static str>,
    instructions: Vec<ProposedInstruction>,
    input: Option<TokenAmount>,
    output: Option<TokenAmount>,
    slot: Option<Slot>,
    mixed_slot: bool,
    dedup_accounts: Vec<AccountId>,
    price_impact_bps: u32,
    assumptions: Vec<PoolAssumption>,
    base_confidence: Option<f64>,
}

impl OpportunityBuilder {
    pub fn new(detector: &'static str) -> Self {
        Self {
            detector: Some(detector),
            ..Self::default()
        }
    }

    /// Append an instruction; returns its index for dependency wiring
    pub fn push(&mut self, instruction: ProposedInstruction) -> usize {
        self.instructions.push(instruction);
        self.instructions.len() - 1
    }

    pub fn amounts(mut self, input: TokenAmount, output: TokenAmount) -> Self {
        self.input = Some(input);
        self.output = Some(output);
        self
    }

    pub fn slot(mut self, slot: Slot, mixed: bool) -> Self {
        self.slot = Some(slot);
        self.mixed_slot = mixed;
        self
    }

    pub fn touches(mut self, market: AccountId) -> Self {
        self.dedup_accounts.push(market);
        self
    }

    pub fn price_impact(mut self, bps: u32) -> Self {
        self.price_impact_bps = bps;
        self
    }

    pub fn assume(mut self, assumption: PoolAssumption) -> Self {
        self.assumptions.push(assumption);
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.base_confidence = Some(confidence);
        self
    }

    pub fn build(self) -> Option<Opportunity> {
        if self.instructions.is_empty() || self.dedup_accounts.is_empty() {
            return None;
        }

        Some(Opportunity {
            id: uuid::Uuid::new_v4().to_string(),
            detector: self.detector?,
            instructions: self.instructions,
            input: self.input?,
            output: self.output?,
            slot: self.slot?,
            mixed_slot: self.mixed_slot,
            dedup_key: DedupKey::new(self.dedup_accounts),
            price_impact_bps: self.price_impact_bps,
            assumptions: self.assumptions,
            base_confidence: self.base_confidence.unwrap_or(0.8).clamp(0.0, 1.0),
            detected_at: Utc::now(),
        })
    }
}

/// Conditions the scorer flags for the risk gate and for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RiskFlag {
    /// Computed against a view mixing several slots
    MixedSlot,
    /// Expected profit is under 10% of the value at risk
    ThinMargin,
    /// The bundle opens at least one new account
    CreatesAccounts,
    /// Price impact above half the slippage tolerance
    HighPriceImpact,
}

/// Opportunity with its economics. Immutable once produced.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredOpportunity {
    opportunity: Opportunity,
    value_in: Decimal,
    value_out: Decimal,
    fees: Decimal,
    tip: Decimal,
    expected_profit: Decimal,
    confidence: f64,
    capital_required: Decimal,
    age_slots: Slot,
    flags: Vec<RiskFlag>,
}

impl ScoredOpportunity {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        opportunity: Opportunity,
        value_in: Decimal,
        value_out: Decimal,
        fees: Decimal,
        tip: Decimal,
        confidence: f64,
        age_slots: Slot,
        flags: Vec<RiskFlag>,
    ) -> Self {
        Self {
            expected_profit: value_out - value_in - fees - tip,
            capital_required: value_in + fees + tip,
            opportunity,
            value_in,
            value_out,
            fees,
            tip,
            confidence,
            age_slots,
            flags,
        }
    }

    pub fn opportunity(&self) -> &Opportunity {
        &self.opportunity
    }

    pub fn value_in(&self) -> Decimal {
        self.value_in
    }

    pub fn value_out(&self) -> Decimal {
        self.value_out
    }

    pub fn fees(&self) -> Decimal {
        self.fees
    }

    pub fn tip(&self) -> Decimal {
        self.tip
    }

    /// Net of fees and tip, in reference units
    pub fn expected_profit(&self) -> Decimal {
        self.expected_profit
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn capital_required(&self) -> Decimal {
        self.capital_required
    }

    pub fn age_slots(&self) -> Slot {
        self.age_slots
    }

    pub fn flags(&self) -> &[RiskFlag] {
        &self.flags
    }

    pub fn has_flag(&self, flag: RiskFlag) -> bool {
        self.flags.contains(&flag)
    }
}
