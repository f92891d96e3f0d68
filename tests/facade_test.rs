//! Start-up through the root facade.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use delayq::{Error, MsgMeta, TimerId, TimerService};

#[tokio::test]
async fn test_load_engine_from_file_and_recover() {
    delayq::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("timers.log");
    let config_path = dir.path().join("delayq.toml");
    std::fs::write(
        &config_path,
        format!(
            "tick_interval_ms = 20\n\n[pipeline]\nmax_batch_size = 16\n\n[log]\nbackend = \"file\"\npath = \"{}\"\n",
            log_path.display()
        ),
    )
    .unwrap();

    let engine = delayq::load_engine(&config_path).await.unwrap();
    let driver = delayq::spawn_driver(&engine);
    engine
        .start_timer(TimerId::from("rh-1"), 3_600, MsgMeta::new("dlq", "queue", 2))
        .await
        .unwrap();
    engine
        .start_timer(TimerId::from("rh-2"), 3_600, MsgMeta::new("dlq", "queue", 2))
        .await
        .unwrap();
    engine.stop_timer(&TimerId::from("rh-2")).await.unwrap();
    engine.close_timer().await;
    tokio::time::timeout(Duration::from_secs(2), driver)
        .await
        .unwrap()
        .unwrap();

    let lines = std::fs::read_to_string(&log_path).unwrap();
    assert_eq!(lines.lines().count(), 3);

    let engine = delayq::load_engine(&config_path).await.unwrap();
    let report = engine.print_timer().await;
    assert_eq!(report.pending.len(), 1);
    assert_eq!(report.pending[0].id, TimerId::from("rh-1"));
    engine.close_timer().await;
}

#[tokio::test]
async fn test_load_engine_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = delayq::load_engine(dir.path().join("absent.toml")).await;
    assert!(matches!(result, Err(Error::ConfigRead { .. })));
}

#[tokio::test]
async fn test_build_engine_rejects_invalid_config() {
    let config = delayq::EngineConfig {
        tick_interval_ms: 0,
        ..delayq::EngineConfig::default()
    };
    let result = delayq::build_engine(config).await;
    assert!(matches!(result, Err(Error::Config { .. })));
}

#[test]
fn test_init_tracing_is_idempotent() {
    delayq::init_tracing();
    assert!(!delayq::init_tracing());
}
