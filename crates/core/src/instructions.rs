//! Instruction encoders for the supported programs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{AccountId, AccountMeta, BondingCurve, ConstantProductPool, Instruction, Mint, ProgramId};

/// The system program lives at the all-zero address
pub const SYSTEM_PROGRAM: ProgramId = ProgramId::ZERO;

/// Wrapped SOL; the reference unit for scoring (lamports)
pub const NATIVE_MINT: Mint = Mint::new([
    6, 155, 136, 87, 254, 171, 129, 132, 251, 104, 127, 99, 70, 24, 192, 53, 218, 196, 57, 220, 26,
    235, 59, 85, 152, 160, 240, 0, 0, 0, 0, 1,
]);

pub const AMM_SWAP_BASE_IN_TAG: u8 = 9;
pub const CURVE_BUY_DISCRIMINATOR: [u8; 8] = [102, 6, 61, 18, 1, 218, 235, 234];
pub const CURVE_SELL_DISCRIMINATOR: [u8; 8] = [51, 230, 133, 164, 1, 127, 131, 173];
pub const CREATE_IDEMPOTENT_TAG: u8 = 1;
pub const SYSTEM_TRANSFER_TAG: u32 = 2;

/// Accounts the searcher trades from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionIdentity {
    /// Fee payer and signer of every transaction
    pub payer: AccountId,
    /// Payer-owned token account per mint
    #[serde(default)]
    pub token_accounts: HashMap<Mint, AccountId>,
    pub token_program: ProgramId,
    pub associated_token_program: ProgramId,
    /// Block producer account that receives the priority tip
    pub tip_account: AccountId,
}

impl ExecutionIdentity {
    pub fn token_account(&self, mint: &Mint) -> Option<AccountId> {
        self.token_accounts.get(mint).copied()
    }
}

/// Exact-input swap through a constant-product pool
pub fn amm_swap_base_in(
    pool: &ConstantProductPool,
    user_source: AccountId,
    user_destination: AccountId,
    owner: AccountId,
    amount_in: u64,
    minimum_out: u64,
) -> Instruction {
    let mut data = Vec::with_capacity(17);
    data.push(AMM_SWAP_BASE_IN_TAG);
    data.extend_from_slice(&amount_in.to_le_bytes());
    data.extend_from_slice(&minimum_out.to_le_bytes());

    Instruction::new(
        pool.program,
        vec![
            AccountMeta::writable(pool.market),
            AccountMeta::writable(pool.coin_vault),
            AccountMeta::writable(pool.pc_vault),
            AccountMeta::writable(user_source),
            AccountMeta::writable(user_destination),
            AccountMeta::signer(owner),
        ],
        data,
    )
}

/// Buy `token_amount` from a bonding curve paying at most `max_sol_cost`
pub fn curve_buy(
    curve: &BondingCurve,
    user_token_account: AccountId,
    payer: AccountId,
    token_amount: u64,
    max_sol_cost: u64,
) -> Instruction {
    let mut data = Vec::with_capacity(24);
    data.extend_from_slice(&CURVE_BUY_DISCRIMINATOR);
    data.extend_from_slice(&token_amount.to_le_bytes());
    data.extend_from_slice(&max_sol_cost.to_le_bytes());

    Instruction::new(
        curve.program,
        vec![
            AccountMeta::writable(curve.market),
            AccountMeta::readonly(curve.mint),
            AccountMeta::writable(user_token_account),
            AccountMeta::signer(payer),
            AccountMeta::readonly(SYSTEM_PROGRAM),
        ],
        data,
    )
}

/// Sell `token_amount` into a bonding curve for at least `min_sol_output`
pub fn curve_sell(
    curve: &BondingCurve,
    user_token_account: AccountId,
    payer: AccountId,
    token_amount: u64,
    min_sol_output: u64,
) -> Instruction {
    let mut data = Vec::with_capacity(24);
    data.extend_from_slice(&CURVE_SELL_DISCRIMINATOR);
    data.extend_from_slice(&token_amount.to_le_bytes());
    data.extend_from_slice(&min_sol_output.to_le_bytes());

    Instruction::new(
        curve.program,
        vec![
            AccountMeta::writable(curve.market),
            AccountMeta::readonly(curve.mint),
            AccountMeta::writable(user_token_account),
            AccountMeta::signer(payer),
            AccountMeta::readonly(SYSTEM_PROGRAM),
        ],
        data,
    )
}

/// Create the payer's token account for `mint` if it does not exist yet
pub fn create_token_account_idempotent(identity: &ExecutionIdentity, account: AccountId, mint: Mint) -> Instruction {
    Instruction::new(
        identity.associated_token_program,
        vec![
            AccountMeta::signer(identity.payer),
            AccountMeta::writable(account),
            AccountMeta::readonly(identity.payer),
            AccountMeta::readonly(mint),
            AccountMeta::readonly(SYSTEM_PROGRAM),
            AccountMeta::readonly(identity.token_program),
        ],
        vec![CREATE_IDEMPOTENT_TAG],
    )
}

/// Lamport transfer from the payer to the tip account
pub fn tip_transfer(payer: AccountId, tip_account: AccountId, lamports: u64) -> Instruction {
    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&SYSTEM_TRANSFER_TAG.to_le_bytes());
    data.extend_from_slice(&lamports.to_le_bytes());

    Instruction::new(
        SYSTEM_PROGRAM,
        vec![AccountMeta::signer(payer), AccountMeta::writable(tip_account)],
        data,
    )
}
