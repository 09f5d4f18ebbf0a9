//! Registered markets and memoised pool derivation
//!
//! A decoded `PoolState` is cached together with the slot of every account it
//! was derived from. An entry is served only while those slots still match,
//! and is dropped when the cache applies a newer slot for any dependency.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use searcher_core::{
    short_id, AccountId, AccountState, AmmPoolInfo, BondingCurve, ConstantProductPool, DecodeError,
    OraclePrice, PoolDefinition, PoolKind, PoolState, Slot, StateError, StateResult, TokenAccount,
};

/// Slot of each dependency at derivation time, in dependency order
type Versions = Vec<(AccountId, Slot)>;

#[derive(Debug)]
struct MemoEntry {
    versions: Versions,
    pool: Arc<PoolState>,
}

impl MemoEntry {
    fn version_of(&self, account: &AccountId) -> Option<Slot> {
        self.versions
            .iter()
            .find(|(id, _)| id == account)
            .map(|(_, slot)| *slot)
    }

    /// True when every dependency of `self` is at least as new as in `other`
    fn supersedes(&self, other: &Versions) -> bool {
        self.versions
            .iter()
            .zip(other.iter())
            .all(|((_, mine), (_, theirs))| mine >= theirs)
    }
}

/// Market definitions plus the derived-pool memo
#[derive(Debug, Default)]
pub struct PoolRegistry {
    definitions: DashMap<AccountId, PoolDefinition>,
    /// account -> markets derived from it
    dependents: DashMap<AccountId, Vec<AccountId>>,
    memo: DashMap<AccountId, MemoEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a market definition
    pub fn register(&self, definition: PoolDefinition) {
        let market = definition.market;
        if let Some(previous) = self.definitions.get(&market) {
            for dep in previous.dependencies() {
                if let Some(mut markets) = self.dependents.get_mut(&dep) {
                    markets.retain(|m| *m != market);
                }
            }
        }
        for dep in definition.dependencies() {
            let mut markets = self.dependents.entry(dep).or_default();
            if !markets.contains(&market) {
                markets.push(market);
            }
        }
        self.memo.remove(&market);
        self.definitions.insert(market, definition);
    }

    pub fn definition(&self, market: &AccountId) -> Option<PoolDefinition> {
        self.definitions.get(market).map(|d| d.value().clone())
    }

    pub fn definitions(&self) -> Vec<PoolDefinition> {
        let mut all: Vec<PoolDefinition> = self.definitions.iter().map(|d| d.value().clone()).collect();
        all.sort_by_key(|d| d.market);
        all
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Markets derived from `account`
    pub fn dependents_of(&self, account: &AccountId) -> Vec<AccountId> {
        self.dependents
            .get(account)
            .map(|m| m.value().clone())
            .unwrap_or_default()
    }

    /// Drop memo entries built from an older slot of `account`.
    ///
    /// Returns the number of entries invalidated.
    pub fn invalidate(&self, account: &AccountId, slot: Slot) -> usize {
        let Some(markets) = self.dependents.get(account).map(|m| m.value().clone()) else {
            return 0;
        };

        let mut dropped = 0;
        for market in markets {
            let removed = self
                .memo
                .remove_if(&market, |_, entry| {
                    entry.version_of(account).map_or(false, |built| built < slot)
                })
                .is_some();
            if removed {
                trace!(market = %short_id(&market), account = %short_id(account), "pool memo invalidated");
                dropped += 1;
            }
        }
        self.invalidations.fetch_add(dropped as u64, Ordering::Relaxed);
        dropped
    }

    /// Whether a memo entry is currently held for `market`
    pub fn is_memoized(&self, market: &AccountId) -> bool {
        self.memo.contains_key(market)
    }

    /// Decoded pool for `definition` as of `accounts`, served from the memo
    /// when every dependency is at the slot it was derived from.
    pub fn resolve(
        &self,
        definition: &PoolDefinition,
        accounts: &HashMap<AccountId, Arc<AccountState>>,
    ) -> StateResult<Arc<PoolState>> {
        let deps = definition.dependencies();
        let missing: Vec<AccountId> = deps.iter().filter(|d| !accounts.contains_key(*d)).copied().collect();
        if !missing.is_empty() {
            return Err(StateError::StaleDependency { missing });
        }
        let versions: Versions = deps
            .iter()
            .filter_map(|d| accounts.get(d).map(|a| (*d, a.slot)))
            .collect();

        if let Some(entry) = self.memo.get(&definition.market) {
            if entry.versions == versions {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::clone(&entry.pool));
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let pool = Arc::new(derive(definition, accounts)?);

        // A reader holding an older view must not evict a newer derivation
        let keep_existing = self
            .memo
            .get(&definition.market)
            .map_or(false, |existing| existing.supersedes(&versions));
        if !keep_existing {
            self.memo.insert(
                definition.market,
                MemoEntry {
                    versions,
                    pool: Arc::clone(&pool),
                },
            );
        }
        Ok(pool)
    }

    pub fn stats(&self) -> MemoStats {
        MemoStats {
            markets: self.definitions.len(),
            memoized: self.memo.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

/// Pool memo statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoStats {
    pub markets: usize,
    pub memoized: usize,
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

fn account<'a>(
    accounts: &'a HashMap<AccountId, Arc<AccountState>>,
    id: &AccountId,
) -> StateResult<&'a AccountState> {
    accounts
        .get(id)
        .map(|a| a.as_ref())
        .ok_or_else(|| StateError::StaleDependency { missing: vec![*id] })
}

fn decode_err(account: AccountId) -> impl FnOnce(DecodeError) -> StateError {
    move |source| StateError::Decode { account, source }
}

fn derive(
    definition: &PoolDefinition,
    accounts: &HashMap<AccountId, Arc<AccountState>>,
) -> StateResult<PoolState> {
    let market = definition.market;
    let primary = account(accounts, &market)?;

    match &definition.kind {
        PoolKind::ConstantProduct { coin_vault, pc_vault } => {
            let info = AmmPoolInfo::decode(&primary.data).map_err(decode_err(market))?;
            if info.coin_vault != *coin_vault || info.pc_vault != *pc_vault {
                return Err(StateError::Decode {
                    account: market,
                    source: DecodeError::InvalidValue("vaults differ from registration"),
                });
            }
            let coin = TokenAccount::decode(&account(accounts, coin_vault)?.data)
                .map_err(decode_err(*coin_vault))?;
            let pc = TokenAccount::decode(&account(accounts, pc_vault)?.data)
                .map_err(decode_err(*pc_vault))?;
            let pool = ConstantProductPool::from_parts(market, definition.program, &info, &coin, &pc)
                .map_err(decode_err(market))?;
            Ok(PoolState::ConstantProduct(pool))
        }
        PoolKind::BondingCurve { mint } => {
            let curve = BondingCurve::decode(market, definition.program, *mint, &primary.data)
                .map_err(decode_err(market))?;
            Ok(PoolState::BondingCurve(curve))
        }
        PoolKind::Oracle { mint } => {
            let oracle = OraclePrice::decode(market, *mint, &primary.data).map_err(decode_err(market))?;
            Ok(PoolState::Oracle(oracle))
        }
    }
}
