//! Integration tests for the detection pipeline.
//!
//! Build the full stack (storage, rule cache, filter, detector) over a
//! temporary directory and drive samples through `process` and over TCP.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use argus_server::config::Config;
use argus_server::detector::{Detector, ProcessOptions};
use argus_server::filter::Filter;
use argus_server::health::Health;
use argus_server::models::{Event, Metric, Rule};
use argus_server::rules::RuleCache;
use argus_server::storage::{Options, Storage};

/// A stamp safely past the validation horizon, aligned inside one slab.
const BASE_STAMP: u32 = 1_600_000_200;

fn test_config(dir: &std::path::Path) -> Config {
    let mut cfg = Config::default();
    cfg.interval = 10;
    cfg.period = 3600;
    cfg.expiration = 5 * 3600;
    cfg.storage.path = dir.join("storage").to_string_lossy().into_owned();
    cfg.detector.filter_offset = 0.02;
    cfg.detector.filter_times = 4;
    cfg.detector.least_count = 2;
    cfg
}

struct Stack {
    storage: Arc<Storage>,
    cache: Arc<RuleCache>,
    detector: Arc<Detector>,
    events: mpsc::Receiver<Event>,
}

async fn build_stack(cfg: Config) -> Stack {
    cfg.validate().expect("test config should validate");
    let cfg = Arc::new(cfg);
    let storage = Arc::new(
        Storage::open(
            &cfg.storage.path,
            Options {
                period: cfg.period,
                expiration: cfg.expiration,
                enable_cache: false,
                cache_percentage: 0.0,
            },
        )
        .expect("open storage"),
    );
    let cache = Arc::new(RuleCache::new());
    let filter = Arc::new(Filter::new(&cfg));
    filter.init(&cache);
    let detector = Arc::new(Detector::new(
        Arc::clone(&cfg),
        Arc::clone(&storage),
        filter,
        Arc::new(Health::new()),
    ));
    let (tx, events) = mpsc::channel(64);
    detector.out(tx);
    Stack {
        storage,
        cache,
        detector,
        events,
    }
}

/// Wait for the filter's subscription task to apply pending changes.
async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_threshold_rule_fires_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let mut stack = build_stack(test_config(dir.path())).await;
    stack
        .cache
        .put(Rule {
            id: 1,
            project_id: 1,
            pattern: "api.*.errors".into(),
            threshold_max: 100.0,
            comment: "errors of $1".into(),
            ..Rule::default()
        })
        .unwrap();
    settle().await;

    let m = Metric::new("api.gateway.errors", BASE_STAMP, 150.0);
    stack.detector.process(m, ProcessOptions::default()).await;

    let ev = stack.events.try_recv().expect("event should fire");
    assert_eq!(ev.rule.id, 1);
    assert_eq!(ev.metric.value, 150.0);
    assert_eq!(ev.rule_translated_comment, "errors of gateway");

    // Index and sample were persisted with a fresh link.
    let idx = stack.storage.index.get("api.gateway.errors").unwrap();
    assert_eq!(idx.link, 1);
    let ms = stack
        .storage
        .metric
        .get("api.gateway.errors", idx.link, BASE_STAMP, BASE_STAMP + 1)
        .unwrap();
    assert_eq!(ms.len(), 1);
    assert_eq!(ms[0].link, idx.link);
}

#[tokio::test]
async fn test_below_threshold_is_quiet() {
    let dir = tempfile::tempdir().unwrap();
    let mut stack = build_stack(test_config(dir.path())).await;
    stack
        .cache
        .put(Rule {
            id: 1,
            project_id: 1,
            pattern: "api.*".into(),
            threshold_max: 100.0,
            ..Rule::default()
        })
        .unwrap();
    settle().await;

    let m = Metric::new("api.latency", BASE_STAMP, 50.0);
    stack.detector.process(m, ProcessOptions::default()).await;
    assert!(stack.events.try_recv().is_err());
    // The sample is still persisted for future baselines.
    assert!(stack.storage.index.has("api.latency"));
}

#[tokio::test]
async fn test_unmatched_metric_is_dropped_entirely() {
    let dir = tempfile::tempdir().unwrap();
    let mut stack = build_stack(test_config(dir.path())).await;
    stack
        .cache
        .put(Rule {
            id: 1,
            project_id: 1,
            pattern: "api.*".into(),
            threshold_max: 1.0,
            ..Rule::default()
        })
        .unwrap();
    settle().await;

    let m = Metric::new("db.queries", BASE_STAMP, 9000.0);
    stack.detector.process(m, ProcessOptions::default()).await;
    assert!(stack.events.try_recv().is_err());
    assert!(!stack.storage.index.has("db.queries"));
}

#[tokio::test]
async fn test_blacklisted_metric_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = test_config(dir.path());
    cfg.detector.blacklist = vec!["api.internal.*".into()];
    let mut stack = build_stack(cfg).await;
    stack
        .cache
        .put(Rule {
            id: 1,
            project_id: 1,
            pattern: "api.*.*".into(),
            threshold_max: 1.0,
            ..Rule::default()
        })
        .unwrap();
    settle().await;

    let m = Metric::new("api.internal.errors", BASE_STAMP, 9000.0);
    stack.detector.process(m, ProcessOptions::default()).await;
    assert!(stack.events.try_recv().is_err());
    assert!(!stack.storage.index.has("api.internal.errors"));
}

#[tokio::test]
async fn test_trend_rule_fires_on_spike() {
    let dir = tempfile::tempdir().unwrap();
    let mut stack = build_stack(test_config(dir.path())).await;
    stack
        .cache
        .put(Rule {
            id: 1,
            project_id: 1,
            pattern: "api.*".into(),
            trend_up: true,
            ..Rule::default()
        })
        .unwrap();
    settle().await;

    // A steady baseline within the current period's window.
    for (i, value) in [100.0, 102.0, 98.0, 100.0].iter().enumerate() {
        let m = Metric::new("api.qps", BASE_STAMP + 10 * i as u32, *value);
        stack.detector.process(m, ProcessOptions::default()).await;
        assert!(stack.events.try_recv().is_err(), "baseline should not fire");
    }

    // A spike far outside three sigmas trends the index over 1.
    let spike = Metric::new("api.qps", BASE_STAMP + 40, 10_000.0);
    stack.detector.process(spike, ProcessOptions::default()).await;
    let ev = stack.events.try_recv().expect("spike should fire");
    assert!(ev.index.score > 1.0, "index score {}", ev.index.score);
    assert!(ev.metric.score > 10.0, "metric score {}", ev.metric.score);
}

#[tokio::test]
async fn test_tcp_ingestion_skips_bad_lines() {
    let dir = tempfile::tempdir().unwrap();
    let mut stack = build_stack(test_config(dir.path())).await;
    stack
        .cache
        .put(Rule {
            id: 1,
            project_id: 1,
            pattern: "api.*".into(),
            threshold_max: 1.0,
            ..Rule::default()
        })
        .unwrap();
    settle().await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let detector = Arc::clone(&stack.detector);
    tokio::spawn(async move {
        let _ = detector.serve_with(listener).await;
    });

    let mut conn = TcpStream::connect(addr).await.unwrap();
    let lines = format!(
        "api.a {stamp} 5.0\nthis is garbage\napi.b {stamp} 7.5\n",
        stamp = BASE_STAMP
    );
    conn.write_all(lines.as_bytes()).await.unwrap();
    conn.shutdown().await.unwrap();

    // Both valid samples fire; the garbage line is skipped silently.
    let first = tokio::time::timeout(Duration::from_secs(5), stack.events.recv())
        .await
        .expect("timed out")
        .expect("event");
    let second = tokio::time::timeout(Duration::from_secs(5), stack.events.recv())
        .await
        .expect("timed out")
        .expect("event");
    let mut names = vec![first.metric.name, second.metric.name];
    names.sort();
    assert_eq!(names, vec!["api.a".to_owned(), "api.b".to_owned()]);
}
