//! Shared test helpers

use rust_decimal::Decimal;

use searcher_core::{
    AccountId, AccountMeta, Instruction, Opportunity, OpportunityBuilder, ProgramId, ProposedInstruction,
    ScoredOpportunity, TokenAmount, NATIVE_MINT,
};

pub const MARKET: AccountId = AccountId::repeat_byte(0x0a);

/// Instruction writing `accounts`, tagged with `tag` in its data
pub fn writes(tag: u8, accounts: &[AccountId]) -> Instruction {
    Instruction::new(
        ProgramId::repeat_byte(0xee),
        accounts.iter().map(|a| AccountMeta::writable(*a)).collect(),
        vec![tag],
    )
}

pub fn opportunity(instructions: Vec<ProposedInstruction>, slot: u64) -> Opportunity {
    let mut builder = OpportunityBuilder::new("test");
    for instruction in instructions {
        builder.push(instruction);
    }
    builder
        .amounts(TokenAmount::new(NATIVE_MINT, 1_000_000), TokenAmount::new(NATIVE_MINT, 1_100_000))
        .slot(slot, false)
        .touches(MARKET)
        .confidence(0.9)
        .build()
        .unwrap()
}

/// Scored candidate with 10_000 lamports of fees and no tip
pub fn scored_opportunity(mut opp: Opportunity, value_in: u64, value_out: u64, impact_bps: u32) -> ScoredOpportunity {
    opp.price_impact_bps = impact_bps;
    ScoredOpportunity::new(
        opp,
        Decimal::from(value_in),
        Decimal::from(value_out),
        Decimal::from(10_000),
        Decimal::ZERO,
        0.9,
        0,
        vec![],
    )
}

pub fn scored(value_in: u64, value_out: u64, impact_bps: u32) -> ScoredOpportunity {
    let opp = opportunity(vec![ProposedInstruction::new(writes(0, &[MARKET]))], 100);
    scored_opportunity(opp, value_in, value_out, impact_bps)
}
