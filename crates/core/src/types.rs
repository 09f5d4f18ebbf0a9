//! Core type definitions

use alloy_primitives::{hex, Bytes, B256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ledger checkpoint. Strictly increasing on a healthy feed.
pub type Slot = u64;

/// 32-byte on-chain account address
pub type AccountId = B256;

/// Address of an executable program (same shape as an account)
pub type ProgramId = B256;

/// Token mint address
pub type Mint = B256;

/// Short, log-friendly rendering of an account id (first four bytes).
pub fn short_id(id: &AccountId) -> String {
    hex::encode(&id.as_slice()[..4])
}

/// Raw account contents as last confirmed by the feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub id: AccountId,
    pub owner: ProgramId,
    pub data: Bytes,
    pub slot: Slot,
}

impl AccountState {
    pub fn new(id: AccountId, owner: ProgramId, data: impl Into<Bytes>, slot: Slot) -> Self {
        Self {
            id,
            owner,
            data: data.into(),
            slot,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A single account update delivered by the ingestion boundary.
///
/// Deliveries are at-least-once, so the same `(account, slot)` pair may
/// arrive more than once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDelta {
    pub account: AccountId,
    pub owner: ProgramId,
    pub data: Bytes,
    pub slot: Slot,
}

impl StateDelta {
    pub fn new(account: AccountId, owner: ProgramId, data: impl Into<Bytes>, slot: Slot) -> Self {
        Self {
            account,
            owner,
            data: data.into(),
            slot,
        }
    }

    pub fn into_state(self) -> AccountState {
        AccountState {
            id: self.account,
            owner: self.owner,
            data: self.data,
            slot: self.slot,
        }
    }
}

/// Account reference inside an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountMeta {
    pub pubkey: AccountId,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    pub fn writable(pubkey: AccountId) -> Self {
        Self { pubkey, is_signer: false, is_writable: true }
    }

    pub fn readonly(pubkey: AccountId) -> Self {
        Self { pubkey, is_signer: false, is_writable: false }
    }

    pub fn signer(pubkey: AccountId) -> Self {
        Self { pubkey, is_signer: true, is_writable: true }
    }
}

/// Unsigned on-chain instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub program_id: ProgramId,
    pub accounts: Vec<AccountMeta>,
    pub data: Bytes,
}

impl Instruction {
    pub fn new(program_id: ProgramId, accounts: Vec<AccountMeta>, data: impl Into<Bytes>) -> Self {
        Self {
            program_id,
            accounts,
            data: data.into(),
        }
    }

    /// Accounts this instruction mutates
    pub fn writable_accounts(&self) -> impl Iterator<Item = &AccountId> {
        self.accounts
            .iter()
            .filter(|meta| meta.is_writable)
            .map(|meta| &meta.pubkey)
    }

    pub fn writes(&self, account: &AccountId) -> bool {
        self.writable_accounts().any(|a| a == account)
    }
}

/// Raw token quantity tagged with its mint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenAmount {
    pub mint: Mint,
    pub raw: u64,
}

impl TokenAmount {
    pub fn new(mint: Mint, raw: u64) -> Self {
        Self { mint, raw }
    }

    pub fn is_zero(&self) -> bool {
        self.raw == 0
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.raw, short_id(&self.mint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writable_accounts() {
        let a = AccountId::repeat_byte(1);
        let b = AccountId::repeat_byte(2);
        let ix = Instruction::new(
            ProgramId::repeat_byte(9),
            vec![AccountMeta::writable(a), AccountMeta::readonly(b)],
            vec![1u8, 2, 3],
        );

        assert!(ix.writes(&a));
        assert!(!ix.writes(&b));
        assert_eq!(ix.writable_accounts().count(), 1);
    }

    #[test]
    fn test_delta_into_state() {
        let delta = StateDelta::new(AccountId::repeat_byte(3), ProgramId::ZERO, vec![7u8; 4], 42);
        let state = delta.into_state();
        assert_eq!(state.slot, 42);
        assert_eq!(state.len(), 4);
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id(&AccountId::repeat_byte(0xab)), "abababab");
    }
}
