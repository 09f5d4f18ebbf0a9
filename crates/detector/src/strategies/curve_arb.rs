//! Bonding curve against its migrated AMM pool
//!
//! Buys the token on the curve and sells it into the constant-product pool
//! when the pool quotes it higher than the curve's fee-inclusive cost.

use serde::{Deserialize, Serialize};
use tracing::trace;

use searcher_core::{
    amm_swap_base_in, amount_with_slippage, curve_buy, short_id, AccountId, ExecutionIdentity, Mint,
    Opportunity, OpportunityBuilder, PoolAssumption, ProposedInstruction, TokenAmount, NATIVE_MINT,
};
use searcher_state::StateView;

use super::{after_all, ensure_token_account, Detector, EvalContext};

pub const NAME: &str = "curve_arb";

/// A curve and the AMM pool that trades the same mint against SOL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurvePair {
    pub curve: AccountId,
    pub amm: AccountId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CurveArbConfig {
    pub pairs: Vec<CurvePair>,
    /// Lamports spent on the curve per attempt
    pub buy_lamports: u64,
    pub min_edge_bps: u64,
    pub slippage_bps: u64,
    /// Mint the AMM side is quoted in
    pub sol_mint: Mint,
}

impl Default for CurveArbConfig {
    fn default() -> Self {
        Self {
            pairs: Vec::new(),
            buy_lamports: 100_000_000, // 0.1 SOL
            min_edge_bps: 50,
            slippage_bps: 100,
            sol_mint: NATIVE_MINT,
        }
    }
}

pub struct CurveArbDetector {
    config: CurveArbConfig,
    identity: ExecutionIdentity,
}

impl CurveArbDetector {
    pub fn new(config: CurveArbConfig, identity: ExecutionIdentity) -> Self {
        Self { config, identity }
    }

    fn evaluate_pair(&self, pair: &CurvePair, view: &StateView) -> Option<Opportunity> {
        let curve_state = view.pool(&pair.curve).ok()?;
        let curve = curve_state.as_bonding_curve()?;
        if curve.complete {
            trace!(curve = %short_id(&curve.market), "curve completed, skipping");
            return None;
        }

        let amm_state = view.pool(&pair.amm).ok()?;
        let amm = amm_state.as_constant_product()?;
        if !amm.has_pair(&curve.mint, &self.config.sol_mint) {
            return None;
        }

        let lamports = self.config.buy_lamports;
        let tokens = curve.buy_quote(lamports)?;
        if tokens == 0 {
            return None;
        }
        let cost = curve.buy_cost_with_fee(lamports);
        let sell_dir = amm.direction_from(&curve.mint)?;
        let sol_out = amm.amount_out(tokens, sell_dir)?;
        if sol_out <= cost {
            return None;
        }
        let edge = (sol_out - cost) as u128 * 10_000 / cost as u128;
        if edge < self.config.min_edge_bps as u128 {
            return None;
        }

        let mut builder = OpportunityBuilder::new(NAME);
        let (token_account, token_create) = ensure_token_account(&mut builder, &self.identity, view, &curve.mint)?;
        let (sol_account, sol_create) =
            ensure_token_account(&mut builder, &self.identity, view, &self.config.sol_mint)?;

        let max_sol_cost = amount_with_slippage(cost, self.config.slippage_bps, true)?;
        let min_sol_out = amount_with_slippage(sol_out, self.config.slippage_bps, false)?;

        let buy = curve_buy(curve, token_account, self.identity.payer, tokens, max_sol_cost);
        let buy_index = builder.push(after_all(ProposedInstruction::new(buy), &[token_create]));

        let sell = amm_swap_base_in(amm, token_account, sol_account, self.identity.payer, tokens, min_sol_out);
        builder.push(after_all(ProposedInstruction::new(sell).after(buy_index), &[sol_create]));

        trace!(
            curve = %short_id(&curve.market),
            amm = %short_id(&amm.market),
            cost,
            sol_out,
            "curve edge"
        );

        let deps = [curve.market, amm.market, amm.coin_vault, amm.pc_vault];
        builder
            .amounts(
                TokenAmount::new(self.config.sol_mint, cost),
                TokenAmount::new(self.config.sol_mint, sol_out),
            )
            .slot(view.slot(), view.is_mixed_over(&deps))
            .touches(curve.market)
            .touches(amm.market)
            .price_impact(amm.price_impact_bps(tokens, sell_dir))
            .assume(PoolAssumption {
                market: curve.market,
                base_reserve: curve.virtual_token_reserves,
                quote_reserve: curve.virtual_sol_reserves,
            })
            .assume(PoolAssumption {
                market: amm.market,
                base_reserve: amm.coin_reserve,
                quote_reserve: amm.pc_reserve,
            })
            .confidence(0.7)
            .build()
    }
}

impl Detector for CurveArbDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn watched_markets(&self) -> Vec<AccountId> {
        self.config
            .pairs
            .iter()
            .flat_map(|p| [p.curve, p.amm])
            .collect()
    }

    fn optional_accounts(&self) -> Vec<AccountId> {
        self.identity.token_accounts.values().copied().collect()
    }

    fn evaluate(&self, view: &StateView, ctx: &EvalContext) -> Vec<Opportunity> {
        let mut found = Vec::new();
        for pair in &self.config.pairs {
            if ctx.is_cancelled() {
                break;
            }
            if let Some(opp) = self.evaluate_pair(pair, view) {
                found.push(opp);
            }
        }
        found
    }
}
