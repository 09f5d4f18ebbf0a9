//! Core types shared by every searcher component
//!
//! - Account, slot and instruction primitives
//! - Pool layouts and swap math
//! - Opportunity, bundle and submission types
//! - Pipeline configuration, errors and events

pub mod types;
pub mod pools;
pub mod instructions;
pub mod opportunities;
pub mod bundle;
pub mod config;
pub mod errors;
pub mod events;

pub use types::*;
pub use pools::*;
pub use instructions::*;
pub use opportunities::*;
pub use bundle::*;
pub use config::*;
pub use errors::*;
pub use events::*;
