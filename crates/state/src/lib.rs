//! Versioned on-chain state for the searcher
//!
//! Features:
//! - Single-writer account cache with atomic batch application
//! - Point-in-time snapshots shared with concurrent readers
//! - Memoised pool decoding, invalidated by slot advance
//! - Ingestion boundary and feed loop

pub mod cache;
pub mod feed;
pub mod ingestor;
pub mod registry;
pub mod view;

pub use cache::{ApplyOutcome, BatchSummary, CacheStats, StateCache};
pub use feed::{ChannelFeed, FeedEvent, FeedIngestor, StreamFeed};
pub use ingestor::{IngestStats, Ingestor};
pub use registry::{MemoStats, PoolRegistry};
pub use view::StateView;
