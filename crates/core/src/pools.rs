//! Pool definitions and decoders for the supported market layouts
//!
//! All layouts are little endian. Swap math runs in `u128` and returns
//! `None` instead of panicking on overflow or empty reserves.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AccountId, DecodeError, Mint, ProgramId, Slot};

/// Serialized size of an AMM pool account
pub const AMM_POOL_LEN: usize = 168;
/// Minimum size of a token account (mint, owner, amount)
pub const TOKEN_ACCOUNT_LEN: usize = 72;
/// Serialized size of a bonding curve account
pub const BONDING_CURVE_LEN: usize = 49;
/// Serialized size of an oracle price account
pub const ORACLE_PRICE_LEN: usize = 28;

/// Fee charged by the bonding curve on both sides, in bps
pub const CURVE_FEE_BPS: u64 = 100;

const BPS: u64 = 10_000;

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], expected: usize) -> Result<Self, DecodeError> {
        if data.len() < expected {
            return Err(DecodeError::TooShort {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { data, offset: 0 })
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.offset..self.offset + N]);
        self.offset += N;
        out
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take::<8>())
    }

    fn i64(&mut self) -> i64 {
        i64::from_le_bytes(self.take::<8>())
    }

    fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take::<4>())
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn id(&mut self) -> AccountId {
        AccountId::from(self.take::<32>())
    }
}

/// Constant-product AMM pool account (no vault balances)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmmPoolInfo {
    pub status: u64,
    pub fee_numerator: u64,
    pub fee_denominator: u64,
    pub need_take_pnl_coin: u64,
    pub need_take_pnl_pc: u64,
    pub coin_mint: Mint,
    pub pc_mint: Mint,
    pub coin_vault: AccountId,
    pub pc_vault: AccountId,
}

impl AmmPoolInfo {
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data, AMM_POOL_LEN)?;
        let info = Self {
            status: r.u64(),
            fee_numerator: r.u64(),
            fee_denominator: r.u64(),
            need_take_pnl_coin: r.u64(),
            need_take_pnl_pc: r.u64(),
            coin_mint: r.id(),
            pc_mint: r.id(),
            coin_vault: r.id(),
            pc_vault: r.id(),
        };

        if info.fee_denominator == 0 || info.fee_numerator >= info.fee_denominator {
            return Err(DecodeError::InvalidValue("fee fraction"));
        }
        Ok(info)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(AMM_POOL_LEN);
        out.extend_from_slice(&self.status.to_le_bytes());
        out.extend_from_slice(&self.fee_numerator.to_le_bytes());
        out.extend_from_slice(&self.fee_denominator.to_le_bytes());
        out.extend_from_slice(&self.need_take_pnl_coin.to_le_bytes());
        out.extend_from_slice(&self.need_take_pnl_pc.to_le_bytes());
        out.extend_from_slice(self.coin_mint.as_slice());
        out.extend_from_slice(self.pc_mint.as_slice());
        out.extend_from_slice(self.coin_vault.as_slice());
        out.extend_from_slice(self.pc_vault.as_slice());
        out
    }
}

/// Token account (mint, owner, amount prefix)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAccount {
    pub mint: Mint,
    pub owner: AccountId,
    pub amount: u64,
}

impl TokenAccount {
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data, TOKEN_ACCOUNT_LEN)?;
        Ok(Self {
            mint: r.id(),
            owner: r.id(),
            amount: r.u64(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(TOKEN_ACCOUNT_LEN);
        out.extend_from_slice(self.mint.as_slice());
        out.extend_from_slice(self.owner.as_slice());
        out.extend_from_slice(&self.amount.to_le_bytes());
        out
    }
}

/// Trade direction through a constant-product pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SwapDirection {
    /// Pay coin, receive pc
    CoinToPc,
    /// Pay pc, receive coin
    PcToCoin,
}

/// Decoded constant-product pool with effective reserves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantProductPool {
    pub market: AccountId,
    pub program: ProgramId,
    pub coin_mint: Mint,
    pub pc_mint: Mint,
    pub coin_vault: AccountId,
    pub pc_vault: AccountId,
    pub coin_reserve: u64,
    pub pc_reserve: u64,
    pub fee_numerator: u64,
    pub fee_denominator: u64,
}

impl ConstantProductPool {
    /// Combine the pool account with its two vault balances.
    ///
    /// Pending pnl is owed to the protocol and excluded from the reserves.
    pub fn from_parts(
        market: AccountId,
        program: ProgramId,
        info: &AmmPoolInfo,
        coin_vault: &TokenAccount,
        pc_vault: &TokenAccount,
    ) -> Result<Self, DecodeError> {
        if coin_vault.mint != info.coin_mint || pc_vault.mint != info.pc_mint {
            return Err(DecodeError::InvalidValue("vault mint mismatch"));
        }
        let coin_reserve = coin_vault
            .amount
            .checked_sub(info.need_take_pnl_coin)
            .ok_or(DecodeError::InvalidValue("coin pnl exceeds vault"))?;
        let pc_reserve = pc_vault
            .amount
            .checked_sub(info.need_take_pnl_pc)
            .ok_or(DecodeError::InvalidValue("pc pnl exceeds vault"))?;

        Ok(Self {
            market,
            program,
            coin_mint: info.coin_mint,
            pc_mint: info.pc_mint,
            coin_vault: info.coin_vault,
            pc_vault: info.pc_vault,
            coin_reserve,
            pc_reserve,
            fee_numerator: info.fee_numerator,
            fee_denominator: info.fee_denominator,
        })
    }

    fn reserves(&self, direction: SwapDirection) -> (u128, u128) {
        match direction {
            SwapDirection::CoinToPc => (self.coin_reserve as u128, self.pc_reserve as u128),
            SwapDirection::PcToCoin => (self.pc_reserve as u128, self.coin_reserve as u128),
        }
    }

    /// Direction that spends `mint`
    pub fn direction_from(&self, mint: &Mint) -> Option<SwapDirection> {
        if *mint == self.coin_mint {
            Some(SwapDirection::CoinToPc)
        } else if *mint == self.pc_mint {
            Some(SwapDirection::PcToCoin)
        } else {
            None
        }
    }

    pub fn has_pair(&self, a: &Mint, b: &Mint) -> bool {
        (self.coin_mint == *a && self.pc_mint == *b) || (self.coin_mint == *b && self.pc_mint == *a)
    }

    /// Output for an exact input, fee deducted from the input side
    pub fn amount_out(&self, amount_in: u64, direction: SwapDirection) -> Option<u64> {
        if amount_in == 0 {
            return Some(0);
        }
        let (reserve_in, reserve_out) = self.reserves(direction);
        if reserve_in == 0 || reserve_out == 0 {
            return None;
        }

        let amount_in = amount_in as u128;
        let fee = amount_in
            .checked_mul(self.fee_numerator as u128)?
            .checked_div(self.fee_denominator as u128)?;
        let in_after_fee = amount_in.checked_sub(fee)?;

        // (x + dx) * (y - dy) = x * y  =>  dy = y * dx / (x + dx)
        let out = reserve_out
            .checked_mul(in_after_fee)?
            .checked_div(reserve_in.checked_add(in_after_fee)?)?;
        u64::try_from(out).ok()
    }

    /// Input required for an exact output, fee grossed up
    pub fn amount_in_for(&self, amount_out: u64, direction: SwapDirection) -> Option<u64> {
        let (reserve_in, reserve_out) = self.reserves(direction);
        let amount_out = amount_out as u128;
        if reserve_in == 0 || amount_out >= reserve_out {
            return None;
        }

        // dx = x * dy / (y - dy)
        let before_fee = reserve_in
            .checked_mul(amount_out)?
            .checked_div(reserve_out - amount_out)?;
        let after_fee = before_fee
            .checked_mul(self.fee_denominator as u128)?
            .checked_div((self.fee_denominator - self.fee_numerator) as u128)?;
        u64::try_from(after_fee).ok()
    }

    /// Spot price, pc per coin
    pub fn spot_price(&self) -> f64 {
        if self.coin_reserve == 0 {
            return 0.0;
        }
        self.pc_reserve as f64 / self.coin_reserve as f64
    }

    /// Price impact of a trade relative to spot, in bps
    pub fn price_impact_bps(&self, amount_in: u64, direction: SwapDirection) -> u32 {
        let out = match self.amount_out(amount_in, direction) {
            Some(out) if out > 0 && amount_in > 0 => out,
            _ => return BPS as u32,
        };
        let (reserve_in, reserve_out) = self.reserves(direction);
        let spot = reserve_out as f64 / reserve_in as f64;
        let effective = out as f64 / amount_in as f64;
        let impact = (1.0 - effective / spot).max(0.0);
        (impact * BPS as f64).round() as u32
    }
}

/// Bonding curve launch market, priced against lamports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BondingCurve {
    pub market: AccountId,
    pub program: ProgramId,
    pub mint: Mint,
    pub virtual_token_reserves: u64,
    pub virtual_sol_reserves: u64,
    pub real_token_reserves: u64,
    pub real_sol_reserves: u64,
    pub token_total_supply: u64,
    pub complete: bool,
}

impl BondingCurve {
    pub fn decode(
        market: AccountId,
        program: ProgramId,
        mint: Mint,
        data: &[u8],
    ) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data, BONDING_CURVE_LEN)?;
        let _discriminator = r.take::<8>();
        Ok(Self {
            market,
            program,
            mint,
            virtual_token_reserves: r.u64(),
            virtual_sol_reserves: r.u64(),
            real_token_reserves: r.u64(),
            real_sol_reserves: r.u64(),
            token_total_supply: r.u64(),
            complete: r.u8() != 0,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BONDING_CURVE_LEN);
        out.extend_from_slice(&[0u8; 8]);
        out.extend_from_slice(&self.virtual_token_reserves.to_le_bytes());
        out.extend_from_slice(&self.virtual_sol_reserves.to_le_bytes());
        out.extend_from_slice(&self.real_token_reserves.to_le_bytes());
        out.extend_from_slice(&self.real_sol_reserves.to_le_bytes());
        out.extend_from_slice(&self.token_total_supply.to_le_bytes());
        out.push(self.complete as u8);
        out
    }

    /// Tokens received for `lamports` spent (before the curve fee)
    pub fn buy_quote(&self, lamports: u64) -> Option<u64> {
        if self.complete {
            return None;
        }
        if lamports == 0 {
            return Some(0);
        }
        let vsr = self.virtual_sol_reserves as u128;
        let vtr = self.virtual_token_reserves as u128;
        let product = vsr.checked_mul(vtr)?;
        let new_sol = vsr.checked_add(lamports as u128)?;
        let new_tokens = product.checked_div(new_sol)?.checked_add(1)?;
        let tokens = vtr.checked_sub(new_tokens)?;
        Some(u64::try_from(tokens).ok()?.min(self.real_token_reserves))
    }

    /// Lamports received for selling `tokens`, net of the curve fee
    pub fn sell_quote(&self, tokens: u64) -> Option<u64> {
        if self.complete {
            return None;
        }
        if tokens == 0 {
            return Some(0);
        }
        let vsr = self.virtual_sol_reserves as u128;
        let vtr = self.virtual_token_reserves as u128;
        let gross = (tokens as u128)
            .checked_mul(vsr)?
            .checked_div(vtr.checked_add(tokens as u128)?)?;
        let fee = gross * CURVE_FEE_BPS as u128 / BPS as u128;
        u64::try_from(gross - fee).ok()
    }

    /// Total lamports debited for a buy of `lamports`, fee included
    pub fn buy_cost_with_fee(&self, lamports: u64) -> u64 {
        lamports.saturating_add(lamports.saturating_mul(CURVE_FEE_BPS) / BPS)
    }

    /// Spot price, lamports per token
    pub fn spot_price(&self) -> f64 {
        if self.virtual_token_reserves == 0 {
            return 0.0;
        }
        self.virtual_sol_reserves as f64 / self.virtual_token_reserves as f64
    }
}

/// Oracle price for one mint in the reference unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OraclePrice {
    pub account: AccountId,
    pub mint: Mint,
    pub price: i64,
    pub expo: i32,
    pub confidence: u64,
    pub publish_slot: Slot,
}

impl OraclePrice {
    pub fn decode(account: AccountId, mint: Mint, data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data, ORACLE_PRICE_LEN)?;
        let oracle = Self {
            account,
            mint,
            price: r.i64(),
            expo: r.i32(),
            confidence: r.u64(),
            publish_slot: r.u64(),
        };
        if oracle.price <= 0 {
            return Err(DecodeError::InvalidValue("non-positive oracle price"));
        }
        if !(-28..=0).contains(&oracle.expo) {
            return Err(DecodeError::InvalidValue("oracle exponent"));
        }
        Ok(oracle)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ORACLE_PRICE_LEN);
        out.extend_from_slice(&self.price.to_le_bytes());
        out.extend_from_slice(&self.expo.to_le_bytes());
        out.extend_from_slice(&self.confidence.to_le_bytes());
        out.extend_from_slice(&self.publish_slot.to_le_bytes());
        out
    }

    /// Reference units per raw unit of the mint
    pub fn value(&self) -> Decimal {
        if self.expo < 0 {
            Decimal::new(self.price, self.expo.unsigned_abs())
        } else {
            Decimal::from(self.price) * Decimal::from(10i64.pow(self.expo as u32))
        }
    }
}

/// Shape of a registered market and the accounts it is derived from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PoolKind {
    ConstantProduct {
        coin_vault: AccountId,
        pc_vault: AccountId,
    },
    BondingCurve {
        mint: Mint,
    },
    Oracle {
        mint: Mint,
    },
}

/// Registration of one market with the state cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDefinition {
    /// Primary account; doubles as the market id
    pub market: AccountId,
    pub program: ProgramId,
    pub kind: PoolKind,
}

impl PoolDefinition {
    /// Every account the decoded pool depends on, primary first
    pub fn dependencies(&self) -> Vec<AccountId> {
        match &self.kind {
            PoolKind::ConstantProduct { coin_vault, pc_vault } => {
                vec![self.market, *coin_vault, *pc_vault]
            }
            PoolKind::BondingCurve { .. } | PoolKind::Oracle { .. } => vec![self.market],
        }
    }
}

/// Generic pool enum for unified handling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolState {
    ConstantProduct(ConstantProductPool),
    BondingCurve(BondingCurve),
    Oracle(OraclePrice),
}

impl PoolState {
    pub fn market(&self) -> AccountId {
        match self {
            PoolState::ConstantProduct(p) => p.market,
            PoolState::BondingCurve(p) => p.market,
            PoolState::Oracle(p) => p.account,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            PoolState::ConstantProduct(_) => "constant_product",
            PoolState::BondingCurve(_) => "bonding_curve",
            PoolState::Oracle(_) => "oracle",
        }
    }

    /// The reserve pair a trade against this pool is priced from
    pub fn reserve_pair(&self) -> Option<(u64, u64)> {
        match self {
            PoolState::ConstantProduct(p) => Some((p.coin_reserve, p.pc_reserve)),
            PoolState::BondingCurve(p) => Some((p.virtual_token_reserves, p.virtual_sol_reserves)),
            PoolState::Oracle(_) => None,
        }
    }

    pub fn as_constant_product(&self) -> Option<&ConstantProductPool> {
        match self {
            PoolState::ConstantProduct(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_bonding_curve(&self) -> Option<&BondingCurve> {
        match self {
            PoolState::BondingCurve(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_oracle(&self) -> Option<&OraclePrice> {
        match self {
            PoolState::Oracle(p) => Some(p),
            _ => None,
        }
    }
}

/// Widen (`up`) or shrink an amount by a slippage allowance in bps
pub fn amount_with_slippage(amount: u64, slippage_bps: u64, up: bool) -> Option<u64> {
    let factor = if up {
        BPS.checked_add(slippage_bps)?
    } else {
        BPS.checked_sub(slippage_bps)?
    };
    let scaled = (amount as u128).checked_mul(factor as u128)? / BPS as u128;
    u64::try_from(scaled).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(coin: u64, pc: u64) -> ConstantProductPool {
        ConstantProductPool {
            market: AccountId::repeat_byte(1),
            program: ProgramId::repeat_byte(2),
            coin_mint: Mint::repeat_byte(3),
            pc_mint: Mint::repeat_byte(4),
            coin_vault: AccountId::repeat_byte(5),
            pc_vault: AccountId::repeat_byte(6),
            coin_reserve: coin,
            pc_reserve: pc,
            fee_numerator: 25,
            fee_denominator: 10_000,
        }
    }

    #[test]
    fn test_constant_product_output() {
        let p = pool(1_000_000_000, 2_000_000_000);
        let out = p.amount_out(1_000_000, SwapDirection::CoinToPc).unwrap();

        // Roughly 2x minus fee and impact
        assert!(out < 2_000_000);
        assert!(out > 1_990_000);
        assert_eq!(p.amount_out(0, SwapDirection::CoinToPc), Some(0));
    }

    #[test]
    fn test_base_out_covers_base_in() {
        let p = pool(5_000_000_000, 7_000_000_000);
        let needed = p.amount_in_for(10_000_000, SwapDirection::PcToCoin).unwrap();
        let got = p.amount_out(needed + 1, SwapDirection::PcToCoin).unwrap();
        assert!(got + 10 >= 10_000_000, "got {got}");
        assert_eq!(p.amount_in_for(5_000_000_000, SwapDirection::PcToCoin), None);
    }

    #[test]
    fn test_empty_pool_returns_none() {
        let p = pool(0, 1_000);
        assert_eq!(p.amount_out(10, SwapDirection::CoinToPc), None);
        assert_eq!(p.price_impact_bps(10, SwapDirection::CoinToPc), 10_000);
    }

    #[test]
    fn test_price_impact_grows_with_size() {
        let p = pool(1_000_000_000, 1_000_000_000);
        let small = p.price_impact_bps(1_000, SwapDirection::CoinToPc);
        let large = p.price_impact_bps(100_000_000, SwapDirection::CoinToPc);
        assert!(large > small);
    }

    #[test]
    fn test_amm_info_layout() {
        let info = AmmPoolInfo {
            status: 6,
            fee_numerator: 25,
            fee_denominator: 10_000,
            need_take_pnl_coin: 10,
            need_take_pnl_pc: 20,
            coin_mint: Mint::repeat_byte(3),
            pc_mint: Mint::repeat_byte(4),
            coin_vault: AccountId::repeat_byte(5),
            pc_vault: AccountId::repeat_byte(6),
        };
        let bytes = info.encode();
        assert_eq!(bytes.len(), AMM_POOL_LEN);
        assert_eq!(AmmPoolInfo::decode(&bytes).unwrap(), info);
        assert!(matches!(
            AmmPoolInfo::decode(&bytes[..100]),
            Err(DecodeError::TooShort { expected: AMM_POOL_LEN, actual: 100 })
        ));
    }

    #[test]
    fn test_pnl_excluded_from_reserves() {
        let info = AmmPoolInfo {
            status: 6,
            fee_numerator: 25,
            fee_denominator: 10_000,
            need_take_pnl_coin: 100,
            need_take_pnl_pc: 50,
            coin_mint: Mint::repeat_byte(3),
            pc_mint: Mint::repeat_byte(4),
            coin_vault: AccountId::repeat_byte(5),
            pc_vault: AccountId::repeat_byte(6),
        };
        let coin = TokenAccount { mint: info.coin_mint, owner: AccountId::ZERO, amount: 1_100 };
        let pc = TokenAccount { mint: info.pc_mint, owner: AccountId::ZERO, amount: 2_050 };

        let p = ConstantProductPool::from_parts(AccountId::repeat_byte(1), ProgramId::ZERO, &info, &coin, &pc)
            .unwrap();
        assert_eq!((p.coin_reserve, p.pc_reserve), (1_000, 2_000));

        let wrong = TokenAccount { mint: Mint::repeat_byte(9), ..coin };
        assert!(ConstantProductPool::from_parts(p.market, ProgramId::ZERO, &info, &wrong, &pc).is_err());
    }

    #[test]
    fn test_bonding_curve_quotes() {
        let curve = BondingCurve {
            market: AccountId::repeat_byte(7),
            program: ProgramId::repeat_byte(8),
            mint: Mint::repeat_byte(9),
            virtual_token_reserves: 1_073_000_000_000_000,
            virtual_sol_reserves: 30_000_000_000,
            real_token_reserves: 793_100_000_000_000,
            real_sol_reserves: 0,
            token_total_supply: 1_000_000_000_000_000,
            complete: false,
        };
        let decoded = BondingCurve::decode(curve.market, curve.program, curve.mint, &curve.encode()).unwrap();
        assert_eq!(decoded, curve);

        let tokens = curve.buy_quote(1_000_000_000).unwrap();
        assert!(tokens > 0);
        let back = curve.sell_quote(tokens).unwrap();
        assert!(back < 1_000_000_000);
        assert_eq!(curve.buy_cost_with_fee(1_000), 1_010);

        let done = BondingCurve { complete: true, ..curve };
        assert_eq!(done.buy_quote(1), None);
    }

    #[test]
    fn test_oracle_value() {
        let oracle = OraclePrice {
            account: AccountId::repeat_byte(1),
            mint: Mint::repeat_byte(2),
            price: 150_000,
            expo: -3,
            confidence: 10,
            publish_slot: 5,
        };
        let decoded = OraclePrice::decode(oracle.account, oracle.mint, &oracle.encode()).unwrap();
        assert_eq!(decoded.value(), Decimal::new(150, 0));

        let negative = OraclePrice { price: -1, ..oracle };
        assert!(OraclePrice::decode(negative.account, negative.mint, &negative.encode()).is_err());
    }

    #[test]
    fn test_slippage() {
        assert_eq!(amount_with_slippage(10_000, 50, true), Some(10_050));
        assert_eq!(amount_with_slippage(10_000, 50, false), Some(9_950));
        assert_eq!(amount_with_slippage(10_000, 20_000, false), None);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn amount_out_never_drains_the_pool(
                coin in 1_000u64..u64::MAX / 4,
                pc in 1_000u64..u64::MAX / 4,
                amount_in in 0u64..u64::MAX / 4,
            ) {
                let p = pool(coin, pc);
                if let Some(out) = p.amount_out(amount_in, SwapDirection::CoinToPc) {
                    prop_assert!(out < pc);
                }
            }

            #[test]
            fn amount_out_is_monotone(
                coin in 1_000_000u64..1_000_000_000_000,
                pc in 1_000_000u64..1_000_000_000_000,
                small in 1u64..1_000_000,
                extra in 0u64..1_000_000,
            ) {
                let p = pool(coin, pc);
                let a = p.amount_out(small, SwapDirection::PcToCoin).unwrap();
                let b = p.amount_out(small + extra, SwapDirection::PcToCoin).unwrap();
                prop_assert!(b >= a);
            }

            #[test]
            fn round_trip_loses_value(
                reserve in 1_000_000u64..1_000_000_000_000,
                amount_in in 1u64..1_000_000,
            ) {
                let p = pool(reserve, reserve);
                let out = p.amount_out(amount_in, SwapDirection::CoinToPc).unwrap();
                let back = p.amount_out(out, SwapDirection::PcToCoin).unwrap();
                prop_assert!(back <= amount_in);
            }
        }
    }
}
