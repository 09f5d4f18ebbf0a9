//! Error types

use thiserror::Error;

use crate::{short_id, AccountId, Slot};

/// Account payload could not be decoded into a pool model
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Account too short: expected {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("Invalid field value: {0}")]
    InvalidValue(&'static str),
}

/// State cache errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("Stale dependency: no state yet for {} account(s)", .missing.len())]
    StaleDependency { missing: Vec<AccountId> },

    #[error("Unknown account {}", short_id(.0))]
    UnknownAccount(AccountId),

    #[error("Malformed delta for {}: {reason}", short_id(.account))]
    Malformed { account: AccountId, reason: String },

    #[error("Unknown market {}", short_id(.0))]
    UnknownMarket(AccountId),

    #[error("Failed to decode {}: {source}", short_id(.account))]
    Decode {
        account: AccountId,
        #[source]
        source: DecodeError,
    },
}

/// Scoring failures; the candidate is dropped
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScoreError {
    #[error("Opportunity expired: {age} slots old > {max_age} tolerated")]
    Expired { age: Slot, max_age: Slot },

    #[error("Stale dependency: no reference price for mint {}", short_id(.0))]
    StaleDependency(AccountId),

    #[error("Cannot price opportunity: {0}")]
    Unpriceable(String),
}

/// RiskGovernor rejection reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, serde::Serialize)]
pub enum RejectReason {
    #[error("Below profit threshold")]
    BelowProfitThreshold,

    #[error("Exceeds slippage tolerance")]
    ExceedsSlippageTolerance,

    #[error("Exceeds capital limit")]
    ExceedsCapitalLimit,

    #[error("Circuit breaker open")]
    CircuitBreakerOpen,
}

/// Why a bundle could not be assembled
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnbuildableReason {
    #[error("{required} transactions exceed max bundle size {max}")]
    TooManyTransactions { required: usize, max: usize },

    #[error("Instructions {first} and {second} both write {} without ordering", short_id(.account))]
    ConflictingWrites {
        first: usize,
        second: usize,
        account: AccountId,
    },

    #[error("Instruction {index} depends on missing instruction {missing}")]
    MissingDependency { index: usize, missing: usize },

    #[error("Dependency cycle between instructions")]
    DependencyCycle,

    #[error("Opportunity has no instructions")]
    Empty,

    #[error("Tip cap {cap} lamports below relay minimum {min}")]
    TipBelowMinimum { cap: u64, min: u64 },

    #[error("Signing failed: {0}")]
    Signing(String),
}

/// Bundle construction errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("Unbuildable: {0}")]
    Unbuildable(#[from] UnbuildableReason),
}

/// Submission errors that abort before the relay is contacted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("Duplicate in flight for {0}")]
    DuplicateInFlight(String),

    #[error("Stale at re-validation: {0}")]
    Stale(String),
}

/// Relay boundary errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("Relay rejected bundle: {0}")]
    Rejected(String),

    #[error("Relay transport error: {0}")]
    Transport(String),
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type alias
pub type StateResult<T> = Result<T, StateError>;
pub type ScoreResult<T> = Result<T, ScoreError>;
pub type BuildResult<T> = Result<T, BuildError>;
pub type SubmitResult<T> = Result<T, SubmitError>;
