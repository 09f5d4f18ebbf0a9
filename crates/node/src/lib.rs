//! Searcher node
//!
//! Features:
//! - Pipeline orchestration: detect, score, admit, build, submit
//! - Slot-driven and interval-driven evaluation cycles
//! - Layered settings from defaults, TOML and environment

pub mod pipeline;
pub mod settings;

pub use pipeline::{CycleReport, Pipeline, PipelineStats};
pub use settings::{LogFormat, Settings};
