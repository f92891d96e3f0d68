//! Model-based properties of the wheel and concurrent use of the engine.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;

use delayq_core::{EngineConfig, MsgMeta, TimerId, TimerService};
use delayq_events::{MemoryLog, PersistEvent};
use delayq_wheel::{ManualClock, RecordingExpiryHook, Started, Wheel, WheelEngine};
use proptest::prelude::*;

const T0: i64 = 1_700_000_000;

#[derive(Debug, Clone)]
enum Op {
    Start { id: u8, timeout: i64 },
    Stop { id: u8 },
    Advance { secs: u16 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..12, prop_oneof![-3i64..5, 5i64..120, 120i64..7_200, 7_200i64..43_200])
            .prop_map(|(id, timeout)| Op::Start { id, timeout }),
        2 => (0u8..12).prop_map(|id| Op::Stop { id }),
        3 => (1u16..4_000).prop_map(|secs| Op::Advance { secs }),
    ]
}

fn name(id: u8) -> TimerId {
    TimerId::from(format!("timer-{id}"))
}

fn with_deadline(deadline: i64) -> MsgMeta {
    MsgMeta {
        deadline,
        ..MsgMeta::default()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_wheel_matches_model(ops in prop::collection::vec(op(), 1..60)) {
        let mut wheel = Wheel::new(T0);
        let mut model: HashMap<TimerId, i64> = HashMap::new();
        let mut expired = 0u64;

        for op in ops {
            match op {
                Op::Start { id, timeout } => {
                    let id = name(id);
                    let deadline = wheel.cur() + timeout;
                    let started = wheel.start(id.clone(), with_deadline(deadline));
                    prop_assert_eq!(started.replaced(), model.contains_key(&id));
                    if deadline <= wheel.cur() {
                        prop_assert!(
                            matches!(started, Started::Elapsed { .. }),
                            "deadline {} at cur {} should expire on start",
                            deadline,
                            wheel.cur()
                        );
                        model.remove(&id);
                        expired += 1;
                    } else {
                        model.insert(id, deadline);
                    }
                }
                Op::Stop { id } => {
                    let id = name(id);
                    prop_assert_eq!(wheel.stop(&id), model.remove(&id).is_some());
                }
                Op::Advance { secs } => {
                    for _ in 0..secs {
                        let fired = wheel.step();
                        let now = wheel.cur();
                        for f in &fired {
                            prop_assert_eq!(model.remove(&f.id), Some(now));
                            prop_assert_eq!(f.metadata.deadline, now);
                        }
                        expired += fired.len() as u64;
                        prop_assert!(model.values().all(|&d| d > now));
                    }
                }
            }

            prop_assert!(wheel.check_invariants().is_ok(), "{:?}", wheel.check_invariants());
            prop_assert_eq!(wheel.len(), model.len());
            prop_assert_eq!(wheel.counters().2, expired);
            for (id, deadline) in &model {
                prop_assert_eq!(wheel.deadline_of(id), Some(*deadline));
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_keep_per_timer_order() {
    let clock = Arc::new(ManualClock::new(T0));
    let log = MemoryLog::new_arc();
    let engine = Arc::new(
        WheelEngine::builder(EngineConfig::default())
            .clock(clock.clone())
            .hook(Arc::new(RecordingExpiryHook::new()))
            .log(log.clone())
            .build()
            .await
            .unwrap(),
    );

    let mut callers = Vec::new();
    for caller in 0..8 {
        let engine = Arc::clone(&engine);
        callers.push(tokio::spawn(async move {
            for i in 0..25i64 {
                let id = TimerId::from(format!("c{caller}-{}", i % 5));
                engine
                    .start_timer(id.clone(), 60 + i * 37, MsgMeta::new("dlq", "q", 1))
                    .await
                    .unwrap();
                if i % 3 == 0 {
                    engine.stop_timer(&id).await.unwrap();
                }
            }
        }));
    }
    for caller in callers {
        caller.await.unwrap();
    }

    engine.check_invariants().await.unwrap();

    let records = log.records().await;
    assert!(records.windows(2).all(|w| w[0].seq < w[1].seq));

    // Replaying each timer's records in log order must land on the wheel's view.
    let mut last: HashMap<TimerId, &PersistEvent> = HashMap::new();
    for record in &records {
        last.insert(record.event.timer_id().clone(), &record.event);
    }
    for (id, event) in last {
        let pending = engine.contains(&id).await;
        match event {
            PersistEvent::Start { .. } => assert!(pending, "{id} should be pending"),
            _ => assert!(!pending, "{id} should not be pending"),
        }
    }

    let report = engine.print_timer().await;
    assert_eq!(report.started, 200);
    assert_eq!(report.started, report.stopped + report.expired + report.pending.len() as u64);
    engine.close_timer().await;
}
