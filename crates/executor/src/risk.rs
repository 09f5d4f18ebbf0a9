//! Admission gate: profit, slippage, and capital limits plus a circuit
//! breaker over submission outcomes

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use searcher_core::{PipelineConfig, RejectReason, ScoredOpportunity};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BreakerState {
    /// Admitting normally
    Closed,
    /// Rejecting everything until the cooldown elapses
    Open,
    /// One probe admitted; its outcome decides the next state
    HalfOpen,
}

#[derive(Debug)]
struct Breaker {
    state: BreakerState,
    /// Consecutive failures, oldest first
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    /// Id of the outstanding probe while half-open
    probe: Option<u64>,
    next_probe: u64,
    trips: u64,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failures: VecDeque::new(),
            opened_at: None,
            probe: None,
            next_probe: 0,
            trips: 0,
        }
    }

    fn trip(&mut self, now: Instant) {
        self.state = BreakerState::Open;
        self.opened_at = Some(now);
        self.probe = None;
        self.failures.clear();
        self.trips += 1;
    }

    fn close(&mut self) {
        self.state = BreakerState::Closed;
        self.opened_at = None;
        self.probe = None;
        self.failures.clear();
    }

    fn cooled_down(&self, now: Instant, cooldown: Duration) -> bool {
        self.opened_at
            .map_or(true, |opened| now.saturating_duration_since(opened) >= cooldown)
    }
}

/// Shared between the governor and outstanding reservations
#[derive(Debug)]
struct Ledger {
    breaker: Mutex<Breaker>,
    capital_in_flight: Mutex<Decimal>,
}

/// Capital held for one admitted candidate; released on drop.
///
/// A reservation admitted as the half-open probe that is dropped without an
/// outcome being recorded frees the probe slot for the next candidate.
#[derive(Debug)]
pub struct CapitalReservation {
    ledger: Arc<Ledger>,
    amount: Decimal,
    probe: Option<u64>,
}

impl CapitalReservation {
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn is_probe(&self) -> bool {
        self.probe.is_some()
    }

    /// Probe id to carry with the submission so its outcome can be matched
    pub fn probe_id(&self) -> Option<u64> {
        self.probe
    }
}

impl Drop for CapitalReservation {
    fn drop(&mut self) {
        {
            let mut in_flight = self.ledger.capital_in_flight.lock();
            *in_flight = (*in_flight - self.amount).max(Decimal::ZERO);
        }
        if let Some(id) = self.probe {
            let mut breaker = self.ledger.breaker.lock();
            if breaker.state == BreakerState::HalfOpen && breaker.probe == Some(id) {
                debug!(probe = id, "probe released without an outcome");
                breaker.probe = None;
            }
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    admitted: AtomicU64,
    below_profit: AtomicU64,
    slippage: AtomicU64,
    capital: AtomicU64,
    breaker_open: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

/// Gate between scoring and bundle building
pub struct RiskGovernor {
    min_profit: Decimal,
    max_slippage_bps: u32,
    max_capital_per_opportunity: Decimal,
    max_total_capital: Option<Decimal>,
    failure_threshold: u32,
    window: Duration,
    cooldown: Duration,
    ledger: Arc<Ledger>,
    counters: Counters,
}

impl RiskGovernor {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            min_profit: config.min_profit_threshold,
            max_slippage_bps: config.max_slippage_bps,
            max_capital_per_opportunity: config.max_capital_per_opportunity,
            max_total_capital: config.max_total_capital_in_flight,
            failure_threshold: config.circuit_breaker_failure_threshold.max(1),
            window: config.circuit_breaker_window(),
            cooldown: config.circuit_breaker_cooldown(),
            ledger: Arc::new(Ledger {
                breaker: Mutex::new(Breaker::new()),
                capital_in_flight: Mutex::new(Decimal::ZERO),
            }),
            counters: Counters::default(),
        }
    }

    pub fn admit(&self, scored: &ScoredOpportunity) -> Result<CapitalReservation, RejectReason> {
        self.admit_at(scored, Instant::now())
    }

    /// Admit or reject a scored candidate.
    ///
    /// Checks run in a fixed order: breaker, profit, slippage, capital. A
    /// rejected candidate never consumes the half-open probe.
    pub fn admit_at(&self, scored: &ScoredOpportunity, now: Instant) -> Result<CapitalReservation, RejectReason> {
        let mut breaker = self.ledger.breaker.lock();

        let becomes_probe = match breaker.state {
            BreakerState::Closed => false,
            BreakerState::Open if breaker.cooled_down(now, self.cooldown) => true,
            BreakerState::HalfOpen if breaker.probe.is_none() => true,
            BreakerState::Open | BreakerState::HalfOpen => {
                return Err(self.reject(scored, RejectReason::CircuitBreakerOpen));
            }
        };

        if scored.expected_profit() < self.min_profit {
            return Err(self.reject(scored, RejectReason::BelowProfitThreshold));
        }
        if scored.opportunity().price_impact_bps > self.max_slippage_bps {
            return Err(self.reject(scored, RejectReason::ExceedsSlippageTolerance));
        }

        let amount = scored.capital_required();
        if amount > self.max_capital_per_opportunity {
            return Err(self.reject(scored, RejectReason::ExceedsCapitalLimit));
        }
        {
            let mut in_flight = self.ledger.capital_in_flight.lock();
            if let Some(limit) = self.max_total_capital {
                if *in_flight + amount > limit {
                    return Err(self.reject(scored, RejectReason::ExceedsCapitalLimit));
                }
            }
            *in_flight += amount;
        }

        let probe = if becomes_probe {
            let id = breaker.next_probe;
            breaker.next_probe += 1;
            breaker.state = BreakerState::HalfOpen;
            breaker.probe = Some(id);
            info!(opportunity = %scored.opportunity().id, "circuit breaker half-open, admitting probe");
            Some(id)
        } else {
            None
        };

        self.counters.admitted.fetch_add(1, Ordering::Relaxed);
        debug!(
            opportunity = %scored.opportunity().id,
            profit = %scored.expected_profit(),
            capital = %amount,
            "admitted"
        );

        Ok(CapitalReservation {
            ledger: Arc::clone(&self.ledger),
            amount,
            probe,
        })
    }

    fn reject(&self, scored: &ScoredOpportunity, reason: RejectReason) -> RejectReason {
        let counter = match reason {
            RejectReason::BelowProfitThreshold => &self.counters.below_profit,
            RejectReason::ExceedsSlippageTolerance => &self.counters.slippage,
            RejectReason::ExceedsCapitalLimit => &self.counters.capital,
            RejectReason::CircuitBreakerOpen => &self.counters.breaker_open,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        debug!(opportunity = %scored.opportunity().id, %reason, "rejected");
        reason
    }

    pub fn record_outcome(&self, success: bool, probe: Option<u64>) {
        self.record_outcome_at(success, probe, Instant::now());
    }

    /// Feed one dispatched submission's outcome into the breaker.
    ///
    /// While half-open only the outcome carrying the outstanding probe id
    /// decides the next state; anything else was dispatched before the trip.
    pub fn record_outcome_at(&self, success: bool, probe: Option<u64>, now: Instant) {
        let mut breaker = self.ledger.breaker.lock();
        if success {
            self.counters.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
        }

        match (breaker.state, success) {
            (BreakerState::HalfOpen, _) if probe.is_none() || probe != breaker.probe => {
                debug!(?probe, outstanding = ?breaker.probe, "outcome is not the probe's, breaker unchanged");
            }
            (BreakerState::HalfOpen, true) => {
                info!("probe succeeded, circuit breaker closed");
                breaker.close();
            }
            (BreakerState::HalfOpen, false) => {
                warn!("probe failed, circuit breaker re-opened");
                breaker.trip(now);
            }
            (BreakerState::Closed, true) => breaker.failures.clear(),
            (BreakerState::Closed, false) => {
                breaker.failures.push_back(now);
                while let Some(first) = breaker.failures.front() {
                    if now.saturating_duration_since(*first) > self.window {
                        breaker.failures.pop_front();
                    } else {
                        break;
                    }
                }
                if breaker.failures.len() >= self.failure_threshold as usize {
                    warn!(
                        failures = breaker.failures.len(),
                        cooldown_ms = self.cooldown.as_millis() as u64,
                        "circuit breaker opened"
                    );
                    breaker.trip(now);
                }
            }
            // Late outcomes from before the trip do not move an open breaker
            (BreakerState::Open, _) => {}
        }
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.ledger.breaker.lock().state
    }

    pub fn capital_in_flight(&self) -> Decimal {
        *self.ledger.capital_in_flight.lock()
    }

    pub fn stats(&self) -> RiskStats {
        let breaker = self.ledger.breaker.lock();
        RiskStats {
            breaker: breaker.state,
            consecutive_failures: breaker.failures.len(),
            trips: breaker.trips,
            capital_in_flight: *self.ledger.capital_in_flight.lock(),
            admitted: self.counters.admitted.load(Ordering::Relaxed),
            rejected_below_profit: self.counters.below_profit.load(Ordering::Relaxed),
            rejected_slippage: self.counters.slippage.load(Ordering::Relaxed),
            rejected_capital: self.counters.capital.load(Ordering::Relaxed),
            rejected_breaker_open: self.counters.breaker_open.load(Ordering::Relaxed),
            successes: self.counters.successes.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }
}

/// Governor statistics
#[derive(Debug, Clone, Serialize)]
pub struct RiskStats {
    pub breaker: BreakerState,
    pub consecutive_failures: usize,
    pub trips: u64,
    pub capital_in_flight: Decimal,
    pub admitted: u64,
    pub rejected_below_profit: u64,
    pub rejected_slippage: u64,
    pub rejected_capital: u64,
    pub rejected_breaker_open: u64,
    pub successes: u64,
    pub failures: u64,
}
