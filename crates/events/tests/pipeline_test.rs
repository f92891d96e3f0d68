//! Persistence pipeline behaviour against the in-memory log.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use delayq_core::{AckMode, BreakerConfig, Error, PipelineConfig, RetryConfig, TimerId};
use delayq_events::{CircuitState, MemoryLog, PersistEvent, Pipeline, Shutdown};

fn fast_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

fn config(ack_mode: AckMode) -> PipelineConfig {
    PipelineConfig {
        max_batch_size: 1024,
        ack_mode,
        retry: fast_retry(2),
        breaker: BreakerConfig::default(),
    }
}

fn stop(id: impl Into<String>) -> PersistEvent {
    PersistEvent::stop(TimerId::from(id.into()))
}

fn spawn(log: &Arc<MemoryLog>, config: &PipelineConfig) -> (Pipeline, Shutdown) {
    let shutdown = Shutdown::new();
    let pipeline = Pipeline::spawn(log.clone(), config, shutdown.clone(), 1);
    (pipeline, shutdown)
}

#[tokio::test]
async fn test_records_follow_submission_order() {
    let log = MemoryLog::new_arc();
    let (pipeline, shutdown) = spawn(&log, &config(AckMode::OnAppend));
    let handle = pipeline.handle();

    let commits: Vec<_> = (0..100).map(|i| handle.submit(stop(format!("t-{i}")))).collect();
    for commit in commits {
        commit.wait().await.unwrap();
    }

    let records = log.records().await;
    assert_eq!(records.len(), 100);
    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.seq, i as u64 + 1);
        assert_eq!(record.event.timer_id().as_str(), format!("t-{i}"));
    }
    shutdown.trigger();
}

#[tokio::test]
async fn test_batches_are_capped() {
    let log = MemoryLog::new_arc();
    let mut cfg = config(AckMode::OnAppend);
    cfg.max_batch_size = 4;
    let (pipeline, shutdown) = spawn(&log, &cfg);
    let handle = pipeline.handle();

    let commits: Vec<_> = (0..10).map(|i| handle.submit(stop(format!("t-{i}")))).collect();
    for commit in commits {
        commit.wait().await.unwrap();
    }

    assert_eq!(log.records().await.len(), 10);
    assert!(log.append_calls() >= 3);
    shutdown.trigger();
}

#[tokio::test]
async fn test_sequence_continues_from_given_start() {
    let log = MemoryLog::new_arc();
    let shutdown = Shutdown::new();
    let pipeline = Pipeline::spawn(log.clone(), &config(AckMode::OnAppend), shutdown.clone(), 42);

    pipeline.handle().submit(stop("a")).wait().await.unwrap();
    pipeline.handle().submit(stop("b")).wait().await.unwrap();

    let seqs: Vec<u64> = log.records().await.iter().map(|r| r.seq).collect();
    assert_eq!(seqs, vec![42, 43]);
    shutdown.trigger();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_per_caller_order_under_concurrency() {
    let log = MemoryLog::new_arc();
    let (pipeline, shutdown) = spawn(&log, &config(AckMode::OnAppend));

    let mut tasks = Vec::new();
    for caller in 0..4 {
        let handle = pipeline.handle().clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..25 {
                handle.submit(stop(format!("c{caller}-{i:02}"))).wait().await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let records = log.records().await;
    assert_eq!(records.len(), 100);
    for caller in 0..4 {
        let prefix = format!("c{caller}-");
        let ids: Vec<String> = records
            .iter()
            .map(|r| r.event.timer_id().to_string())
            .filter(|id| id.starts_with(&prefix))
            .collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
    shutdown.trigger();
}

#[tokio::test]
async fn test_on_enqueue_releases_before_append() {
    let log = MemoryLog::new_arc();
    log.stall();
    let (pipeline, shutdown) = spawn(&log, &config(AckMode::OnEnqueue));

    let result =
        tokio::time::timeout(Duration::from_secs(1), pipeline.handle().submit(stop("a")).wait()).await;

    assert!(matches!(result, Ok(Ok(()))));
    assert!(log.records().await.is_empty());
    shutdown.trigger();
}

#[tokio::test]
async fn test_on_append_waits_for_log() {
    let log = MemoryLog::new_arc();
    log.stall();
    let (pipeline, shutdown) = spawn(&log, &config(AckMode::OnAppend));

    let result =
        tokio::time::timeout(Duration::from_millis(100), pipeline.handle().submit(stop("a")).wait()).await;

    assert!(result.is_err(), "commit must not resolve while the log is stalled");
    shutdown.trigger();
}

#[tokio::test]
async fn test_shutdown_cancels_waiters() {
    let log = MemoryLog::new_arc();
    log.stall();
    let (pipeline, shutdown) = spawn(&log, &config(AckMode::OnAppend));

    let commit = pipeline.handle().submit(stop("a"));
    let waiter = tokio::spawn(commit.wait());
    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.trigger();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(Error::Cancelled)));
}

#[tokio::test]
async fn test_submit_after_shutdown_is_cancelled() {
    let log = MemoryLog::new_arc();
    let (pipeline, shutdown) = spawn(&log, &config(AckMode::OnAppend));
    shutdown.trigger();

    let (handle, tasks) = pipeline.into_parts();
    for task in tasks {
        task.await.unwrap();
    }

    let err = handle.submit(stop("late")).wait().await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(log.records().await.is_empty());
}

#[tokio::test]
async fn test_retry_then_success() {
    let log = MemoryLog::new_arc();
    log.fail_next(2);
    let (pipeline, shutdown) = spawn(&log, &config(AckMode::OnAppend));

    pipeline.handle().submit(stop("a")).wait().await.unwrap();

    assert_eq!(log.append_calls(), 3);
    assert_eq!(log.records().await.len(), 1);
    shutdown.trigger();
}

#[tokio::test]
async fn test_exhausted_retries_fail_every_waiter() {
    let log = MemoryLog::new_arc();
    log.fail_next(100);
    let mut cfg = config(AckMode::OnAppend);
    cfg.retry = fast_retry(1);
    let (pipeline, shutdown) = spawn(&log, &cfg);
    let handle = pipeline.handle();

    let first = handle.submit(stop("a"));
    let second = handle.submit(stop("b"));

    for commit in [first, second] {
        let err = commit.wait().await.unwrap_err();
        assert!(matches!(err, Error::PersistFailed { attempts: 2, .. }), "{err}");
        let message = err.to_string();
        assert!(message.contains("injected failure"), "{message}");
        assert_eq!(message.matches("attempts").count(), 1, "{message}");
    }
    assert!(log.records().await.is_empty());
    shutdown.trigger();
}

#[tokio::test]
async fn test_breaker_fails_fast_when_open() {
    let log = MemoryLog::new_arc();
    log.fail_next(1);
    let cfg = PipelineConfig {
        retry: RetryConfig::no_retry(),
        breaker: BreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            cooldown_ms: 60_000,
        },
        ..config(AckMode::OnAppend)
    };
    let (pipeline, shutdown) = spawn(&log, &cfg);
    let handle = pipeline.handle();

    let err = handle.submit(stop("a")).wait().await.unwrap_err();
    assert!(matches!(err, Error::PersistFailed { attempts: 1, .. }));
    assert_eq!(handle.circuit_state(), CircuitState::Open);

    let err = handle.submit(stop("b")).wait().await.unwrap_err();
    assert!(matches!(err, Error::CircuitOpen { .. }));
    assert!(err.is_retryable());
    assert_eq!(log.append_calls(), 1);
    shutdown.trigger();
}

#[tokio::test(start_paused = true)]
async fn test_breaker_recovers_after_cooldown() {
    let log = MemoryLog::new_arc();
    log.fail_next(1);
    let cfg = PipelineConfig {
        retry: RetryConfig::no_retry(),
        breaker: BreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            cooldown_ms: 1000,
        },
        ..config(AckMode::OnAppend)
    };
    let (pipeline, shutdown) = spawn(&log, &cfg);
    let handle = pipeline.handle();

    assert!(handle.submit(stop("a")).wait().await.is_err());
    assert_eq!(handle.circuit_state(), CircuitState::Open);

    tokio::time::advance(Duration::from_millis(1001)).await;

    handle.submit(stop("b")).wait().await.unwrap();
    assert_eq!(handle.circuit_state(), CircuitState::Closed);
    assert_eq!(log.records().await.len(), 1);
    shutdown.trigger();
}
