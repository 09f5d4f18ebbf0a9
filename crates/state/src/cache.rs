//! Versioned account cache
//!
//! One writer (the ingestion path) and many readers. Every delta, or batch of
//! deltas, is applied under the write lock, and snapshots copy account handles
//! under the read lock, so a view never observes a half-applied update.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use searcher_core::{
    short_id, AccountId, AccountState, PipelineConfig, PoolDefinition, Slot, StateDelta, StateError,
    StateResult,
};

use crate::registry::{MemoStats, PoolRegistry};
use crate::view::StateView;

/// What `apply` did with a delta
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Same `(account, slot)` already applied (redelivery)
    Duplicate,
    /// Older than the state already held
    Outdated,
    /// Account is not tracked by any strategy
    Unknown,
    /// Payload rejected before decoding
    Malformed,
}

/// Per-outcome tally of one `apply_batch`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSummary {
    pub applied: usize,
    pub duplicate: usize,
    pub outdated: usize,
    pub unknown: usize,
    pub malformed: usize,
}

impl BatchSummary {
    pub(crate) fn record(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied => self.applied += 1,
            ApplyOutcome::Duplicate => self.duplicate += 1,
            ApplyOutcome::Outdated => self.outdated += 1,
            ApplyOutcome::Unknown => self.unknown += 1,
            ApplyOutcome::Malformed => self.malformed += 1,
        }
    }
}

#[derive(Debug, Default)]
struct Accounts {
    states: HashMap<AccountId, Arc<AccountState>>,
    tracked: HashSet<AccountId>,
}

#[derive(Debug, Default)]
struct Counters {
    applied: AtomicU64,
    duplicate: AtomicU64,
    outdated: AtomicU64,
    unknown: AtomicU64,
    malformed: AtomicU64,
}

/// Authoritative in-memory account state
#[derive(Debug)]
pub struct StateCache {
    accounts: RwLock<Accounts>,
    registry: Arc<PoolRegistry>,
    current_slot: AtomicU64,
    max_account_bytes: usize,
    counters: Counters,
}

impl StateCache {
    pub fn new(max_account_bytes: usize) -> Self {
        Self {
            accounts: RwLock::new(Accounts::default()),
            registry: Arc::new(PoolRegistry::new()),
            current_slot: AtomicU64::new(0),
            max_account_bytes,
            counters: Counters::default(),
        }
    }

    pub fn with_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_account_bytes)
    }

    /// Start accepting deltas for `account`
    pub fn track(&self, account: AccountId) {
        self.accounts.write().tracked.insert(account);
    }

    pub fn track_all(&self, accounts: impl IntoIterator<Item = AccountId>) {
        let mut guard = self.accounts.write();
        guard.tracked.extend(accounts);
    }

    pub fn is_tracked(&self, account: &AccountId) -> bool {
        self.accounts.read().tracked.contains(account)
    }

    /// Register a market and track every account it is derived from
    pub fn register_pool(&self, definition: PoolDefinition) {
        debug!(
            market = %short_id(&definition.market),
            deps = definition.dependencies().len(),
            "registering pool"
        );
        self.track_all(definition.dependencies());
        self.registry.register(definition);
    }

    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    /// Apply one delta atomically. Never fails; the outcome is counted.
    pub fn apply(&self, delta: StateDelta) -> ApplyOutcome {
        let mut guard = self.accounts.write();
        let outcome = self.apply_locked(&mut guard, delta);
        self.count(outcome);
        outcome
    }

    /// Apply several deltas as one atomic step
    pub fn apply_batch(&self, deltas: impl IntoIterator<Item = StateDelta>) -> BatchSummary {
        let mut summary = BatchSummary::default();
        let mut guard = self.accounts.write();
        for delta in deltas {
            let outcome = self.apply_locked(&mut guard, delta);
            self.count(outcome);
            summary.record(outcome);
        }
        summary
    }

    fn apply_locked(&self, accounts: &mut Accounts, delta: StateDelta) -> ApplyOutcome {
        if !accounts.tracked.contains(&delta.account) {
            debug!(account = %short_id(&delta.account), slot = delta.slot, "delta for unknown account");
            return ApplyOutcome::Unknown;
        }
        if delta.data.len() > self.max_account_bytes {
            let err = StateError::Malformed {
                account: delta.account,
                reason: format!("{} bytes exceeds {}", delta.data.len(), self.max_account_bytes),
            };
            warn!(slot = delta.slot, "skipping delta: {}", err);
            return ApplyOutcome::Malformed;
        }
        if let Some(existing) = accounts.states.get(&delta.account) {
            if existing.slot == delta.slot {
                trace!(account = %short_id(&delta.account), slot = delta.slot, "redelivered delta");
                return ApplyOutcome::Duplicate;
            }
            if existing.slot > delta.slot {
                trace!(
                    account = %short_id(&delta.account),
                    held = existing.slot,
                    slot = delta.slot,
                    "outdated delta"
                );
                return ApplyOutcome::Outdated;
            }
        }

        let account = delta.account;
        let slot = delta.slot;
        accounts.states.insert(account, Arc::new(delta.into_state()));
        self.registry.invalidate(&account, slot);
        self.current_slot.fetch_max(slot, Ordering::AcqRel);
        ApplyOutcome::Applied
    }

    fn count(&self, outcome: ApplyOutcome) {
        let counter = match outcome {
            ApplyOutcome::Applied => &self.counters.applied,
            ApplyOutcome::Duplicate => &self.counters.duplicate,
            ApplyOutcome::Outdated => &self.counters.outdated,
            ApplyOutcome::Unknown => &self.counters.unknown,
            ApplyOutcome::Malformed => &self.counters.malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a slot notification without account data. Returns the current slot.
    pub fn advance_slot(&self, slot: Slot) -> Slot {
        self.current_slot.fetch_max(slot, Ordering::AcqRel).max(slot)
    }

    /// Highest slot observed so far
    pub fn latest_slot(&self) -> Slot {
        self.current_slot.load(Ordering::Acquire)
    }

    pub fn get(&self, account: &AccountId) -> Option<Arc<AccountState>> {
        self.accounts.read().states.get(account).cloned()
    }

    /// Consistent view over `keys`; every key must already have state
    pub fn snapshot(&self, keys: &[AccountId]) -> StateResult<StateView> {
        let (view, missing) = self.snapshot_partial(keys);
        if missing.is_empty() {
            Ok(view)
        } else {
            Err(StateError::StaleDependency { missing })
        }
    }

    /// Consistent view over the subset of `keys` that have state, plus the
    /// keys that do not
    pub fn snapshot_partial(&self, keys: &[AccountId]) -> (StateView, Vec<AccountId>) {
        let guard = self.accounts.read();
        let slot = self.current_slot.load(Ordering::Acquire);

        let mut states = HashMap::with_capacity(keys.len());
        let mut missing = Vec::new();
        for key in keys {
            match guard.states.get(key) {
                Some(state) => {
                    states.insert(*key, Arc::clone(state));
                }
                None if !missing.contains(key) => missing.push(*key),
                None => {}
            }
        }
        drop(guard);

        (StateView::new(slot, states, Arc::clone(&self.registry)), missing)
    }

    /// Every account the given markets derive from
    pub fn dependencies_of(&self, markets: &[AccountId]) -> StateResult<Vec<AccountId>> {
        let mut keys = Vec::new();
        for market in markets {
            let definition = self
                .registry
                .definition(market)
                .ok_or(StateError::UnknownMarket(*market))?;
            for dep in definition.dependencies() {
                if !keys.contains(&dep) {
                    keys.push(dep);
                }
            }
        }
        Ok(keys)
    }

    /// Strict snapshot covering every dependency of `markets`
    pub fn snapshot_markets(&self, markets: &[AccountId]) -> StateResult<StateView> {
        let keys = self.dependencies_of(markets)?;
        self.snapshot(&keys)
    }

    pub fn stats(&self) -> CacheStats {
        let (accounts, tracked) = {
            let guard = self.accounts.read();
            (guard.states.len(), guard.tracked.len())
        };
        CacheStats {
            accounts,
            tracked,
            current_slot: self.latest_slot(),
            applied: self.counters.applied.load(Ordering::Relaxed),
            duplicate: self.counters.duplicate.load(Ordering::Relaxed),
            outdated: self.counters.outdated.load(Ordering::Relaxed),
            unknown: self.counters.unknown.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
            memo: self.registry.stats(),
        }
    }
}

impl Default for StateCache {
    fn default() -> Self {
        Self::with_config(&PipelineConfig::default())
    }
}

/// Statistics about cache state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub accounts: usize,
    pub tracked: usize,
    pub current_slot: Slot,
    pub applied: u64,
    pub duplicate: u64,
    pub outdated: u64,
    pub unknown: u64,
    pub malformed: u64,
    pub memo: MemoStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use searcher_core::{Mint, OraclePrice, PoolKind, ProgramId};

    fn id(byte: u8) -> AccountId {
        AccountId::repeat_byte(byte)
    }

    fn delta(account: AccountId, slot: Slot) -> StateDelta {
        let mut data = slot.to_le_bytes().to_vec();
        data.extend_from_slice(account.as_slice());
        StateDelta::new(account, ProgramId::ZERO, data, slot)
    }

    fn oracle_definition(market: AccountId) -> PoolDefinition {
        PoolDefinition {
            market,
            program: ProgramId::ZERO,
            kind: PoolKind::Oracle {
                mint: Mint::repeat_byte(0xaa),
            },
        }
    }

    fn oracle_delta(market: AccountId, price: i64, slot: Slot) -> StateDelta {
        let data = OraclePrice {
            account: market,
            mint: Mint::repeat_byte(0xaa),
            price,
            expo: 0,
            confidence: 0,
            publish_slot: slot,
        }
        .encode();
        StateDelta::new(market, ProgramId::ZERO, data, slot)
    }

    #[test]
    fn test_unknown_account_counted() {
        let cache = StateCache::default();
        assert_eq!(cache.apply(delta(id(1), 10)), ApplyOutcome::Unknown);
        assert_eq!(cache.stats().unknown, 1);
        assert!(cache.get(&id(1)).is_none());
        // Slot clock only moves on applied state
        assert_eq!(cache.latest_slot(), 0);
    }

    #[test]
    fn test_redelivery_and_reordering() {
        let cache = StateCache::default();
        cache.track(id(1));

        assert_eq!(cache.apply(delta(id(1), 10)), ApplyOutcome::Applied);
        assert_eq!(cache.apply(delta(id(1), 10)), ApplyOutcome::Duplicate);
        assert_eq!(cache.apply(delta(id(1), 9)), ApplyOutcome::Outdated);
        assert_eq!(cache.apply(delta(id(1), 11)), ApplyOutcome::Applied);

        let stats = cache.stats();
        assert_eq!((stats.applied, stats.duplicate, stats.outdated), (2, 1, 1));
        assert_eq!(cache.get(&id(1)).unwrap().slot, 11);
        assert_eq!(cache.latest_slot(), 11);
    }

    #[test]
    fn test_oversized_payload_skipped() {
        let cache = StateCache::new(16);
        cache.track(id(1));

        let big = StateDelta::new(id(1), ProgramId::ZERO, vec![0u8; 17], 3);
        assert_eq!(cache.apply(big), ApplyOutcome::Malformed);
        assert_eq!(cache.stats().malformed, 1);
        assert!(cache.get(&id(1)).is_none());
    }

    #[test]
    fn test_snapshot_requires_every_key() {
        let cache = StateCache::default();
        cache.track_all([id(1), id(2)]);
        cache.apply(delta(id(1), 5));

        match cache.snapshot(&[id(1), id(2)]) {
            Err(StateError::StaleDependency { missing }) => assert_eq!(missing, vec![id(2)]),
            other => panic!("expected stale dependency, got {other:?}"),
        }

        let (view, missing) = cache.snapshot_partial(&[id(1), id(2)]);
        assert_eq!(missing, vec![id(2)]);
        assert!(view.contains(&id(1)));
        assert_eq!(view.slot(), 5);
    }

    #[test]
    fn test_mixed_slot_view() {
        let cache = StateCache::default();
        cache.track_all([id(1), id(2)]);
        cache.apply_batch([delta(id(1), 5), delta(id(2), 5)]);
        assert!(!cache.snapshot(&[id(1), id(2)]).unwrap().is_mixed());

        cache.apply(delta(id(2), 6));
        let view = cache.snapshot(&[id(1), id(2)]).unwrap();
        assert!(view.is_mixed());
        assert!(!view.is_mixed_over(&[id(2)]));
    }

    #[test]
    fn test_advance_slot_is_monotone() {
        let cache = StateCache::default();
        assert_eq!(cache.advance_slot(7), 7);
        assert_eq!(cache.advance_slot(3), 7);
        assert_eq!(cache.latest_slot(), 7);
    }

    #[test]
    fn test_pool_memo_follows_slots() {
        let cache = StateCache::default();
        let market = id(9);
        cache.register_pool(oracle_definition(market));
        assert!(cache.is_tracked(&market));

        cache.apply(oracle_delta(market, 100, 1));
        let view = cache.snapshot_markets(&[market]).unwrap();
        assert_eq!(view.pool(&market).unwrap().as_oracle().unwrap().price, 100);
        assert!(cache.registry().is_memoized(&market));

        // Redelivery leaves the memo alone
        cache.apply(oracle_delta(market, 100, 1));
        assert!(cache.registry().is_memoized(&market));

        cache.apply(oracle_delta(market, 200, 2));
        assert!(!cache.registry().is_memoized(&market));

        // The old view still resolves its own state
        assert_eq!(view.pool(&market).unwrap().as_oracle().unwrap().price, 100);
        let fresh = cache.snapshot_markets(&[market]).unwrap();
        assert_eq!(fresh.pool(&market).unwrap().as_oracle().unwrap().price, 200);
    }

    #[test]
    fn test_unknown_market() {
        let cache = StateCache::default();
        assert!(matches!(
            cache.snapshot_markets(&[id(4)]),
            Err(StateError::UnknownMarket(_))
        ));
    }

    #[test]
    fn test_concurrent_batches_never_torn() {
        use std::thread;

        let cache = Arc::new(StateCache::default());
        cache.track_all([id(1), id(2)]);
        cache.apply_batch([delta(id(1), 1), delta(id(2), 1)]);

        let writer = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for slot in 2..2_000 {
                    cache.apply_batch([delta(id(1), slot), delta(id(2), slot)]);
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        let view = cache.snapshot(&[id(1), id(2)]).unwrap();
                        let a = view.account(&id(1)).unwrap().slot;
                        let b = view.account(&id(2)).unwrap().slot;
                        assert_eq!(a, b, "observed a partially applied batch");
                        assert!(view.slot() >= a);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(cache.latest_slot(), 1_999);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;
        use std::collections::HashMap;

        proptest! {
            #[test]
            fn snapshot_reflects_whole_deltas(
                deltas in proptest::collection::vec((0u8..4, 0u64..50), 1..80)
            ) {
                let cache = StateCache::default();
                let ids: Vec<AccountId> = (1..=4).map(id).collect();
                cache.track_all(ids.iter().copied());

                let mut newest: HashMap<AccountId, Slot> = HashMap::new();
                for (idx, slot) in deltas {
                    let account = ids[idx as usize];
                    cache.apply(delta(account, slot));
                    let held = newest.entry(account).or_insert(slot);
                    *held = (*held).max(slot);
                }

                let keys: Vec<AccountId> = newest.keys().copied().collect();
                let view = cache.snapshot(&keys).unwrap();
                for (account, slot) in &newest {
                    let state = view.account(account).unwrap();
                    prop_assert_eq!(state.slot, *slot);
                    // Payload belongs to the same delta as the slot tag
                    prop_assert_eq!(&state.data[..8], &slot.to_le_bytes()[..]);
                    prop_assert_eq!(&state.data[8..], account.as_slice());
                }
                prop_assert_eq!(view.slot(), newest.values().copied().max().unwrap_or(0));
            }

            #[test]
            fn memo_invalidated_iff_slot_advanced(first in 0u64..100, second in 0u64..100) {
                let cache = StateCache::default();
                let market = id(7);
                cache.register_pool(oracle_definition(market));

                cache.apply(oracle_delta(market, 10, first));
                let view = cache.snapshot_markets(&[market]).unwrap();
                view.pool(&market).unwrap();
                prop_assert!(cache.registry().is_memoized(&market));

                cache.apply(oracle_delta(market, 20, second));
                prop_assert_eq!(cache.registry().is_memoized(&market), second <= first);
            }
        }
    }
}
