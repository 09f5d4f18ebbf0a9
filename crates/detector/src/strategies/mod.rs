//! Detector contract and the built-in strategy families

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use searcher_core::{
    create_token_account_idempotent, AccountId, ExecutionIdentity, Mint, Opportunity, OpportunityBuilder,
    ProposedInstruction,
};
use searcher_state::StateView;

pub mod cross_pool;
pub mod curve_arb;

pub use cross_pool::{CrossPoolConfig, CrossPoolDetector};
pub use curve_arb::{CurveArbConfig, CurveArbDetector, CurvePair};

/// Budget and cancellation signal for one evaluation
#[derive(Debug, Clone)]
pub struct EvalContext {
    deadline: Instant,
    cancelled: Arc<AtomicBool>,
}

impl EvalContext {
    pub fn new(budget: Duration) -> Self {
        Self {
            deadline: Instant::now() + budget,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Context that never expires on its own
    pub fn unbounded() -> Self {
        Self::new(Duration::from_secs(60 * 60))
    }

    /// Detectors poll this between units of work and return early when set
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) || Instant::now() >= self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }
}

/// A strategy family.
///
/// Implementations read only the view they are given and must not hold
/// shared mutable state; the engine may run several of them at once on the
/// same view.
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Registered markets the detector needs. A cycle in which any of their
    /// accounts has no state yet skips the detector.
    fn watched_markets(&self) -> Vec<AccountId>;

    /// Extra accounts read when present; absence is meaningful, not stale
    fn optional_accounts(&self) -> Vec<AccountId> {
        Vec::new()
    }

    /// Candidate opportunities against `view`, in emission order
    fn evaluate(&self, view: &StateView, ctx: &EvalContext) -> Vec<Opportunity>;
}

/// Resolve the payer's token account for `mint`, queueing an idempotent
/// create instruction when the account has no state yet.
///
/// Returns the account and the index of the create instruction, if any.
pub(crate) fn ensure_token_account(
    builder: &mut OpportunityBuilder,
    identity: &ExecutionIdentity,
    view: &StateView,
    mint: &Mint,
) -> Option<(AccountId, Option<usize>)> {
    let account = identity.token_account(mint)?;
    if view.contains(&account) {
        return Some((account, None));
    }
    let create = create_token_account_idempotent(identity, account, *mint);
    let index = builder.push(ProposedInstruction::new(create).opening_account());
    Some((account, Some(index)))
}

/// Chain `instruction` after every index in `deps`
pub(crate) fn after_all(mut instruction: ProposedInstruction, deps: &[Option<usize>]) -> ProposedInstruction {
    for dep in deps.iter().flatten() {
        instruction = instruction.after(*dep);
    }
    instruction
}
