//! Synthetic markets for tests and benchmarks

use std::collections::HashMap;

use searcher_core::{
    AccountId, AmmPoolInfo, BondingCurve, ExecutionIdentity, Mint, OraclePrice, PoolDefinition, PoolKind,
    ProgramId, Slot, StateDelta, TokenAccount,
};
use searcher_state::StateCache;

pub const AMM_PROGRAM: ProgramId = ProgramId::repeat_byte(0xa1);
pub const CURVE_PROGRAM: ProgramId = ProgramId::repeat_byte(0xc1);
pub const TOKEN_PROGRAM: ProgramId = ProgramId::repeat_byte(0x70);
pub const ASSOCIATED_TOKEN_PROGRAM: ProgramId = ProgramId::repeat_byte(0x71);
pub const PAYER: AccountId = AccountId::repeat_byte(0xfe);
pub const TIP_ACCOUNT: AccountId = AccountId::repeat_byte(0x7b);

/// Deterministic id: `tag` in the first byte, `seed` in the rest
pub fn account(tag: u8, seed: u8) -> AccountId {
    let mut bytes = [seed; 32];
    bytes[0] = tag;
    AccountId::from(bytes)
}

/// Payer-owned token account for a mint
pub fn token_account_for(mint: &Mint) -> AccountId {
    let mut bytes = [0u8; 32];
    bytes[0] = 0x7a;
    bytes[1..].copy_from_slice(&mint.as_slice()[1..]);
    AccountId::from(bytes)
}

/// Execution identity holding a token account address for every mint
pub fn identity(mints: &[Mint]) -> ExecutionIdentity {
    ExecutionIdentity {
        payer: PAYER,
        token_accounts: mints.iter().map(|m| (*m, token_account_for(m))).collect::<HashMap<_, _>>(),
        token_program: TOKEN_PROGRAM,
        associated_token_program: ASSOCIATED_TOKEN_PROGRAM,
        tip_account: TIP_ACCOUNT,
    }
}

/// Give the payer existing token accounts for `mints`
pub fn fund(cache: &StateCache, identity: &ExecutionIdentity, mints: &[Mint], slot: Slot) {
    for mint in mints {
        if let Some(account) = identity.token_account(mint) {
            cache.track(account);
            let data = TokenAccount {
                mint: *mint,
                owner: identity.payer,
                amount: 0,
            }
            .encode();
            cache.apply(StateDelta::new(account, TOKEN_PROGRAM, data, slot));
        }
    }
}

/// One market and the deltas that describe it
#[derive(Debug, Clone)]
pub struct MarketFixture {
    pub market: AccountId,
    pub definition: PoolDefinition,
    pub coin_vault: AccountId,
    pub pc_vault: AccountId,
    kind: FixtureKind,
}

#[derive(Debug, Clone)]
enum FixtureKind {
    ConstantProduct {
        info: AmmPoolInfo,
        coin_reserve: u64,
        pc_reserve: u64,
    },
    BondingCurve(BondingCurve),
    Oracle(OraclePrice),
}

impl MarketFixture {
    /// Constant-product pool with a 0.25% fee
    pub fn constant_product(seed: u8, coin_mint: Mint, pc_mint: Mint, coin_reserve: u64, pc_reserve: u64) -> Self {
        let market = account(0xa0, seed);
        let coin_vault = account(0xa2, seed);
        let pc_vault = account(0xa3, seed);
        let info = AmmPoolInfo {
            status: 6,
            fee_numerator: 25,
            fee_denominator: 10_000,
            need_take_pnl_coin: 0,
            need_take_pnl_pc: 0,
            coin_mint,
            pc_mint,
            coin_vault,
            pc_vault,
        };
        Self {
            market,
            definition: PoolDefinition {
                market,
                program: AMM_PROGRAM,
                kind: PoolKind::ConstantProduct { coin_vault, pc_vault },
            },
            coin_vault,
            pc_vault,
            kind: FixtureKind::ConstantProduct {
                info,
                coin_reserve,
                pc_reserve,
            },
        }
    }

    /// Fresh bonding curve with the launch reserves
    pub fn bonding_curve(seed: u8, mint: Mint, virtual_token_reserves: u64, virtual_sol_reserves: u64) -> Self {
        let market = account(0xc0, seed);
        let curve = BondingCurve {
            market,
            program: CURVE_PROGRAM,
            mint,
            virtual_token_reserves,
            virtual_sol_reserves,
            real_token_reserves: virtual_token_reserves / 4 * 3,
            real_sol_reserves: 0,
            token_total_supply: virtual_token_reserves,
            complete: false,
        };
        Self {
            market,
            definition: PoolDefinition {
                market,
                program: CURVE_PROGRAM,
                kind: PoolKind::BondingCurve { mint },
            },
            coin_vault: market,
            pc_vault: market,
            kind: FixtureKind::BondingCurve(curve),
        }
    }

    /// Oracle quoting `mint` at `price * 10^expo` reference units
    pub fn oracle(seed: u8, mint: Mint, price: i64, expo: i32) -> Self {
        let market = account(0x0c, seed);
        Self {
            market,
            definition: PoolDefinition {
                market,
                program: ProgramId::ZERO,
                kind: PoolKind::Oracle { mint },
            },
            coin_vault: market,
            pc_vault: market,
            kind: FixtureKind::Oracle(OraclePrice {
                account: market,
                mint,
                price,
                expo,
                confidence: 0,
                publish_slot: 0,
            }),
        }
    }

    /// Mark a bonding curve as migrated
    pub fn completed(mut self) -> Self {
        if let FixtureKind::BondingCurve(curve) = &mut self.kind {
            curve.complete = true;
        }
        self
    }

    /// Deltas describing the market at `slot`
    pub fn deltas(&self, slot: Slot) -> Vec<StateDelta> {
        match &self.kind {
            FixtureKind::ConstantProduct {
                info,
                coin_reserve,
                pc_reserve,
            } => {
                let coin = TokenAccount {
                    mint: info.coin_mint,
                    owner: self.market,
                    amount: *coin_reserve,
                };
                let pc = TokenAccount {
                    mint: info.pc_mint,
                    owner: self.market,
                    amount: *pc_reserve,
                };
                vec![
                    StateDelta::new(self.market, AMM_PROGRAM, info.encode(), slot),
                    StateDelta::new(self.coin_vault, TOKEN_PROGRAM, coin.encode(), slot),
                    StateDelta::new(self.pc_vault, TOKEN_PROGRAM, pc.encode(), slot),
                ]
            }
            FixtureKind::BondingCurve(curve) => {
                vec![StateDelta::new(self.market, CURVE_PROGRAM, curve.encode(), slot)]
            }
            FixtureKind::Oracle(oracle) => {
                let oracle = OraclePrice {
                    publish_slot: slot,
                    ..oracle.clone()
                };
                vec![StateDelta::new(self.market, ProgramId::ZERO, oracle.encode(), slot)]
            }
        }
    }

    /// Same pool with different vault balances
    pub fn with_reserves(&self, coin: u64, pc: u64) -> Self {
        let mut next = self.clone();
        if let FixtureKind::ConstantProduct {
            coin_reserve,
            pc_reserve,
            ..
        } = &mut next.kind
        {
            *coin_reserve = coin;
            *pc_reserve = pc;
        }
        next
    }

    /// Register the market and apply its state at `slot`
    pub fn install(&self, cache: &StateCache, slot: Slot) {
        cache.register_pool(self.definition.clone());
        cache.apply_batch(self.deltas(slot));
    }
}
