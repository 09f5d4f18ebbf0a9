//! Cross-pool arbitrage: buy on the cheap constant-product pool, sell on the
//! dear one

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::trace;

use searcher_core::{
    amm_swap_base_in, amount_with_slippage, short_id, AccountId, ConstantProductPool, ExecutionIdentity,
    Mint, Opportunity, OpportunityBuilder, PoolAssumption, ProposedInstruction, TokenAmount,
};
use searcher_state::StateView;

use super::{after_all, ensure_token_account, Detector, EvalContext};

pub const NAME: &str = "cross_pool";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CrossPoolConfig {
    /// Constant-product markets to compare
    pub markets: Vec<AccountId>,
    /// Trade size as a share of the shallower quote reserve, in bps
    pub trade_fraction_bps: u64,
    /// Minimum round-trip edge before fees, in bps
    pub min_edge_bps: u64,
    /// Slippage allowance written into each swap's minimum output
    pub slippage_bps: u64,
}

impl Default for CrossPoolConfig {
    fn default() -> Self {
        Self {
            markets: Vec::new(),
            trade_fraction_bps: 100, // 1%
            min_edge_bps: 10,
            slippage_bps: 50,
        }
    }
}

/// Same mint pair quoted by two pools at different prices
pub struct CrossPoolDetector {
    config: CrossPoolConfig,
    identity: ExecutionIdentity,
}

/// Priced round trip through two pools
#[derive(Debug, Clone)]
struct RoundTrip<'a> {
    buy: &'a ConstantProductPool,
    sell: &'a ConstantProductPool,
    base: Mint,
    quote: Mint,
    quote_in: u64,
    base_mid: u64,
    quote_out: u64,
}

impl CrossPoolDetector {
    pub fn new(config: CrossPoolConfig, identity: ExecutionIdentity) -> Self {
        Self { config, identity }
    }

    /// Best profitable direction for one pool pair, if any
    fn price_pair<'a>(
        &self,
        a: &'a ConstantProductPool,
        b: &'a ConstantProductPool,
    ) -> Option<RoundTrip<'a>> {
        let quote = a.pc_mint;
        let base = a.coin_mint;

        let shallower = quote_reserve(a, &quote)?.min(quote_reserve(b, &quote)?);
        let quote_in = (shallower as u128 * self.config.trade_fraction_bps as u128 / 10_000) as u64;
        if quote_in == 0 {
            return None;
        }

        [(a, b), (b, a)]
            .into_iter()
            .filter_map(|(buy, sell)| {
                let base_mid = buy.amount_out(quote_in, buy.direction_from(&quote)?)?;
                let quote_out = sell.amount_out(base_mid, sell.direction_from(&base)?)?;
                Some(RoundTrip {
                    buy,
                    sell,
                    base,
                    quote,
                    quote_in,
                    base_mid,
                    quote_out,
                })
            })
            .filter(|trip| trip.quote_out > trip.quote_in)
            .max_by_key(|trip| trip.quote_out)
            .filter(|trip| {
                let edge = (trip.quote_out - trip.quote_in) as u128 * 10_000 / trip.quote_in as u128;
                edge >= self.config.min_edge_bps as u128
            })
    }

    fn to_opportunity(&self, trip: &RoundTrip<'_>, view: &StateView) -> Option<Opportunity> {
        let mut builder = OpportunityBuilder::new(NAME);
        let (quote_account, quote_create) = ensure_token_account(&mut builder, &self.identity, view, &trip.quote)?;
        let (base_account, base_create) = ensure_token_account(&mut builder, &self.identity, view, &trip.base)?;

        let buy_dir = trip.buy.direction_from(&trip.quote)?;
        let sell_dir = trip.sell.direction_from(&trip.base)?;
        let buy_min = amount_with_slippage(trip.base_mid, self.config.slippage_bps, false)?;
        let sell_min = amount_with_slippage(trip.quote_out, self.config.slippage_bps, false)?;

        let buy = amm_swap_base_in(
            trip.buy,
            quote_account,
            base_account,
            self.identity.payer,
            trip.quote_in,
            buy_min,
        );
        let buy_index = builder.push(after_all(ProposedInstruction::new(buy), &[quote_create, base_create]));

        let sell = amm_swap_base_in(
            trip.sell,
            base_account,
            quote_account,
            self.identity.payer,
            trip.base_mid,
            sell_min,
        );
        builder.push(ProposedInstruction::new(sell).after(buy_index));

        let deps = [
            trip.buy.market,
            trip.buy.coin_vault,
            trip.buy.pc_vault,
            trip.sell.market,
            trip.sell.coin_vault,
            trip.sell.pc_vault,
        ];
        let impact = trip
            .buy
            .price_impact_bps(trip.quote_in, buy_dir)
            .max(trip.sell.price_impact_bps(trip.base_mid, sell_dir));

        builder
            .amounts(
                TokenAmount::new(trip.quote, trip.quote_in),
                TokenAmount::new(trip.quote, trip.quote_out),
            )
            .slot(view.slot(), view.is_mixed_over(&deps))
            .touches(trip.buy.market)
            .touches(trip.sell.market)
            .price_impact(impact)
            .assume(assumption(trip.buy))
            .assume(assumption(trip.sell))
            .confidence(0.9)
            .build()
    }
}

fn quote_reserve(pool: &ConstantProductPool, quote: &Mint) -> Option<u64> {
    if pool.pc_mint == *quote {
        Some(pool.pc_reserve)
    } else if pool.coin_mint == *quote {
        Some(pool.coin_reserve)
    } else {
        None
    }
}

fn assumption(pool: &ConstantProductPool) -> PoolAssumption {
    PoolAssumption {
        market: pool.market,
        base_reserve: pool.coin_reserve,
        quote_reserve: pool.pc_reserve,
    }
}

impl Detector for CrossPoolDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn watched_markets(&self) -> Vec<AccountId> {
        self.config.markets.clone()
    }

    fn optional_accounts(&self) -> Vec<AccountId> {
        self.identity.token_accounts.values().copied().collect()
    }

    fn evaluate(&self, view: &StateView, ctx: &EvalContext) -> Vec<Opportunity> {
        let pools: Vec<ConstantProductPool> = self
            .config
            .markets
            .iter()
            .filter_map(|m| view.pool(m).ok())
            .filter_map(|p| p.as_constant_product().cloned())
            .collect();

        let pairs: Vec<(usize, usize)> = (0..pools.len())
            .flat_map(|i| ((i + 1)..pools.len()).map(move |j| (i, j)))
            .filter(|(i, j)| pools[*i].has_pair(&pools[*j].coin_mint, &pools[*j].pc_mint))
            .collect();

        // Indexed collect keeps pair order deterministic
        let found: Vec<Option<Opportunity>> = pairs
            .par_iter()
            .map(|(i, j)| {
                if ctx.is_cancelled() {
                    return None;
                }
                let trip = self.price_pair(&pools[*i], &pools[*j])?;
                trace!(
                    buy = %short_id(&trip.buy.market),
                    sell = %short_id(&trip.sell.market),
                    quote_in = trip.quote_in,
                    quote_out = trip.quote_out,
                    "cross-pool edge"
                );
                self.to_opportunity(&trip, view)
            })
            .collect();

        found.into_iter().flatten().collect()
    }
}
