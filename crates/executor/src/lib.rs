//! Admission, bundle assembly, and submission
//!
//! Features:
//! - Risk gate with a circuit breaker and a capital ledger
//! - Dependency-ordered bundles with self-conflict checks and bounded tips
//! - Re-validation against the latest state right before dispatch
//! - At most one in-flight submission per contested resource

pub mod builder;
pub mod relay;
pub mod risk;
pub mod submitter;
pub mod validator;

#[cfg(test)]
pub(crate) mod testing;

pub use builder::{BundleBuilder, TransactionSigner, UnsignedEncoder};
pub use relay::{DryRunRelay, Relay};
pub use risk::{BreakerState, CapitalReservation, RiskGovernor, RiskStats};
pub use submitter::{SubmissionManager, SubmitterConfig, SubmitterStats};
pub use validator::BundleValidator;
