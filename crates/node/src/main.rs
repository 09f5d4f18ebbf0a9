//! Searcher node
//!
//! Reads account updates as JSON lines on stdin and runs the pipeline
//! against a dry-run relay.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use searcher_detector::{OpportunityScorer, ScorerConfig, StrategyEngine};
use searcher_executor::DryRunRelay;
use searcher_node::{LogFormat, Pipeline, Settings};
use searcher_state::{ChannelFeed, FeedEvent, Ingestor, StateCache};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    let path = std::env::args().nth(1).map(PathBuf::from);
    let settings = Settings::load(path.as_deref())?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);
    match settings.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }

    info!("Starting searcher v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(settings.pipeline.clone());
    let cache = Arc::new(StateCache::with_config(&config));
    for pool in &settings.pools {
        cache.register_pool(pool.clone());
    }
    info!(pools = settings.pools.len(), "Markets registered");

    let identity = match &settings.identity {
        Some(identity) => identity.clone(),
        None => {
            warn!("No execution identity configured, nothing to detect");
            return Ok(());
        }
    };
    cache.track_all(identity.token_accounts.values().copied());

    let mut engine = StrategyEngine::new(Arc::clone(&cache), &config);
    for detector in settings.detectors(&identity) {
        engine.register(detector);
    }
    let scorer = OpportunityScorer::new(ScorerConfig::from_pipeline(&config, settings.oracles.clone()));
    let relay = Arc::new(DryRunRelay::new());

    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&config),
        Arc::clone(&cache),
        engine,
        scorer,
        identity,
        relay,
    ));

    let ingestor = Arc::new(Ingestor::new(Arc::clone(&cache)));
    let slots = ingestor.subscribe_slots();

    let (feed_tx, feed) = ChannelFeed::new("stdin", settings.feed_capacity);
    tokio::spawn(async move {
        let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) if line.trim().is_empty() => continue,
                Ok(line) => line,
                Err(e) => {
                    error!("stdin read failed: {}", e);
                    break;
                }
            };
            match serde_json::from_str::<FeedEvent>(&line) {
                Ok(event) => {
                    if feed_tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Skipping malformed feed line: {}", e),
            }
        }
    });

    // Setup shutdown channels
    let (ingest_tx, ingest_rx) = tokio::sync::oneshot::channel();
    let (pipeline_tx, pipeline_rx) = tokio::sync::oneshot::channel();

    let mut ingest = {
        let ingestor = Arc::clone(&ingestor);
        tokio::spawn(async move { ingestor.run(feed, ingest_rx).await })
    };
    let pipeline_task = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.run(slots, pipeline_rx).await })
    };

    tokio::select! {
        _ = shutdown_signal() => {
            let _ = ingest_tx.send(());
            (&mut ingest).await.context("ingest task")?;
        }
        res = &mut ingest => {
            res.context("ingest task")?;
            info!("Feed ended");
        }
    }

    let _ = pipeline_tx.send(());
    pipeline_task.await.context("pipeline task")?;

    let stats = pipeline.stats();
    info!(
        cycles = stats.cycles,
        detected = stats.detected,
        submitted = stats.submitted,
        timeouts = stats.engine.timeouts,
        breaker_trips = stats.risk.trips,
        "Pipeline stopped"
    );
    info!(submissions = ?stats.submissions, ingest = ?ingestor.stats(), cache = ?cache.stats(), "Final statistics");
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        }
        _ = terminate => {
            info!("Received termination signal");
        }
    }
}
