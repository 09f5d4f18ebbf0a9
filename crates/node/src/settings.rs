//! Node settings: built-in defaults, then an optional TOML file, then
//! `SEARCHER__*` environment variables

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use searcher_core::{AccountId, ExecutionIdentity, Mint, PipelineConfig, PoolDefinition};
use searcher_detector::{CrossPoolConfig, CrossPoolDetector, CurveArbConfig, CurveArbDetector, Detector};

pub const DEFAULT_PATH: &str = "searcher.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub log_format: LogFormat,
    /// Buffered feed events before the reader blocks
    pub feed_capacity: usize,
    pub pipeline: PipelineConfig,
    pub identity: Option<ExecutionIdentity>,
    /// Markets registered with the cache at startup
    pub pools: Vec<PoolDefinition>,
    /// Price oracle market per mint, for scoring non-SOL legs
    pub oracles: HashMap<Mint, AccountId>,
    pub cross_pool: Option<CrossPoolConfig>,
    pub curve_arb: Option<CurveArbConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Text,
            feed_capacity: 4096,
            pipeline: PipelineConfig::default(),
            identity: None,
            pools: Vec::new(),
            oracles: HashMap::new(),
            cross_pool: None,
            curve_arb: None,
        }
    }
}

impl Settings {
    /// Load from `path` (or `searcher.toml` if it exists) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_PATH).required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("SEARCHER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("reading settings")?
            .try_deserialize()
            .context("parsing settings")?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml(source: &str) -> Result<Self> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.pipeline.validate().context("invalid pipeline settings")?;
        if self.feed_capacity == 0 {
            bail!("feed_capacity must be positive");
        }
        if self.has_detectors() && self.identity.is_none() {
            bail!("an execution identity is required when detectors are configured");
        }
        for (mint, oracle) in &self.oracles {
            if !self.pools.iter().any(|p| p.market == *oracle) {
                bail!("oracle {} for mint {} is not in the pool list", oracle, mint);
            }
        }
        Ok(())
    }

    pub fn has_detectors(&self) -> bool {
        self.cross_pool.is_some() || self.curve_arb.is_some()
    }

    /// Detectors in registration order
    pub fn detectors(&self, identity: &ExecutionIdentity) -> Vec<Arc<dyn Detector>> {
        let mut detectors: Vec<Arc<dyn Detector>> = Vec::new();
        if let Some(config) = &self.cross_pool {
            detectors.push(Arc::new(CrossPoolDetector::new(config.clone(), identity.clone())));
        }
        if let Some(config) = &self.curve_arb {
            detectors.push(Arc::new(CurveArbDetector::new(config.clone(), identity.clone())));
        }
        detectors
    }
}
