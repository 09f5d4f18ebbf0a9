//! Immutable point-in-time views handed to detectors, the scorer and
//! re-validation

use std::collections::HashMap;
use std::sync::Arc;

use searcher_core::{
    AccountId, AccountState, PoolDefinition, PoolState, Slot, StateError, StateResult, TokenAccount,
};

use crate::registry::PoolRegistry;

/// Consistent read view over a subset of the cache.
///
/// Cloning is cheap: account payloads are shared, never copied.
#[derive(Debug, Clone)]
pub struct StateView {
    slot: Slot,
    accounts: HashMap<AccountId, Arc<AccountState>>,
    registry: Arc<PoolRegistry>,
}

impl StateView {
    pub(crate) fn new(
        slot: Slot,
        accounts: HashMap<AccountId, Arc<AccountState>>,
        registry: Arc<PoolRegistry>,
    ) -> Self {
        Self {
            slot,
            accounts,
            registry,
        }
    }

    /// Cache slot at the moment the view was taken
    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// Accounts in the view were last confirmed at different slots
    pub fn is_mixed(&self) -> bool {
        let mut slots = self.accounts.values().map(|a| a.slot);
        match slots.next() {
            Some(first) => slots.any(|s| s != first),
            None => false,
        }
    }

    /// Like `is_mixed`, restricted to `keys` (absent keys are ignored)
    pub fn is_mixed_over(&self, keys: &[AccountId]) -> bool {
        let mut slots = keys.iter().filter_map(|k| self.accounts.get(k)).map(|a| a.slot);
        match slots.next() {
            Some(first) => slots.any(|s| s != first),
            None => false,
        }
    }

    pub fn account(&self, id: &AccountId) -> Option<&AccountState> {
        self.accounts.get(id).map(|a| a.as_ref())
    }

    pub fn contains(&self, id: &AccountId) -> bool {
        self.accounts.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn accounts(&self) -> impl Iterator<Item = &AccountState> {
        self.accounts.values().map(|a| a.as_ref())
    }

    /// Decoded token account, if present and well formed
    pub fn token_account(&self, id: &AccountId) -> Option<TokenAccount> {
        self.account(id).and_then(|a| TokenAccount::decode(&a.data).ok())
    }

    /// Decoded pool for a registered market
    pub fn pool(&self, market: &AccountId) -> StateResult<Arc<PoolState>> {
        let definition = self
            .registry
            .definition(market)
            .ok_or(StateError::UnknownMarket(*market))?;
        self.registry.resolve(&definition, &self.accounts)
    }

    /// Registered markets whose every dependency is in this view
    pub fn markets(&self) -> Vec<PoolDefinition> {
        self.registry
            .definitions()
            .into_iter()
            .filter(|d| d.dependencies().iter().all(|dep| self.accounts.contains_key(dep)))
            .collect()
    }

    /// Every decodable pool in the view, in market order
    pub fn pools(&self) -> Vec<Arc<PoolState>> {
        self.markets()
            .iter()
            .filter_map(|d| self.registry.resolve(d, &self.accounts).ok())
            .collect()
    }
}
