//! Argus Server - Main Entry Point
//!
//! Wires storage, the rule cache, the filter, the detector and the
//! alerter together and serves the ingestion port.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use argus_server::alerter::notifier::NotifierRegistry;
use argus_server::alerter::Alerter;
use argus_server::config::Config;
use argus_server::detector::Detector;
use argus_server::directory::Directory;
use argus_server::filter::Filter;
use argus_server::health::Health;
use argus_server::rules::RuleCache;
use argus_server::storage::{Options, Storage};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "argus_server=debug".into()),
        )
        .init();

    // Load configuration
    let cfg = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)?,
        None => {
            warn!("no config specified, using defaults");
            Config::default()
        }
    };
    cfg.validate()?;
    let cfg = Arc::new(cfg);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = cfg.detector.port,
        "Starting Argus Server"
    );

    // Open storage
    let storage = Arc::new(Storage::open(
        &cfg.storage.path,
        Options {
            period: cfg.period,
            expiration: cfg.expiration,
            enable_cache: cfg.storage.enable_cache,
            cache_percentage: cfg.storage.cache_percentage,
        },
    )?);

    let health = Arc::new(Health::new());

    // Rules and recipients arrive through the cache and directory APIs;
    // the admin surface feeding them lives outside this binary.
    let rules = Arc::new(RuleCache::new());
    let directory = Arc::new(Directory::new());

    // Filter follows the rule cache.
    let filter = Arc::new(Filter::new(&cfg));
    filter.init(&rules);

    // Alerter consumes detection events.
    let notifiers = Arc::new(NotifierRegistry::with_builtins());
    let alerter = Arc::new(Alerter::new(
        Arc::clone(&cfg),
        Arc::clone(&storage),
        directory,
        notifiers,
        Arc::clone(&health),
    ));
    alerter.start();

    // Detector feeds the alerter.
    let detector = Arc::new(Detector::new(cfg, storage, filter, health));
    detector.out(alerter.input());
    detector.serve().await
}
