use flowgate::{Admission, AdmissionEngine, ManualClock, Rule, ValidationError};
use std::sync::Arc;
use std::time::Duration;

fn orders_engine(threshold: f64, window_ms: u64) -> AdmissionEngine {
    AdmissionEngine::builder()
        .rules(vec![Rule::new("POST:/orders", threshold).with_window_ms(window_ms)])
        .build()
        .expect("valid rules")
}

#[tokio::test]
async fn sixth_call_blocked_then_quota_returns_after_window() {
    let engine = orders_engine(5.0, 1000);

    let mut outcomes = Vec::new();
    for _ in 0..6 {
        outcomes.push(engine.enter("POST:/orders").is_admitted());
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(outcomes, vec![true, true, true, true, true, false]);

    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert!(engine.enter("POST:/orders").is_admitted(), "7th call should open a new window");
}

#[test]
fn update_rule_to_one_blocks_the_second_call() {
    let engine = orders_engine(5.0, 1000);
    engine.update_rule("POST:/orders", 1.0).unwrap();

    assert!(engine.enter("POST:/orders").is_admitted());
    assert!(engine.enter("POST:/orders").is_blocked());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_batch_admits_exactly_threshold() {
    let threshold = 25;
    let engine = orders_engine(threshold as f64, 60_000);
    let barrier = Arc::new(tokio::sync::Barrier::new(threshold * 2));

    let mut handles = vec![];
    for _ in 0..threshold * 2 {
        let engine = engine.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            match engine.enter("POST:/orders") {
                Admission::Admitted(entry) => {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    engine.exit(entry);
                    true
                }
                Admission::Blocked(_) => false,
            }
        }));
    }

    let results: Vec<bool> =
        futures::future::join_all(handles).await.into_iter().map(|r| r.unwrap()).collect();
    let admitted = results.iter().filter(|ok| **ok).count();
    assert_eq!(admitted, threshold);
    assert_eq!(results.len() - admitted, threshold);

    let snap = engine.stats("POST:/orders").unwrap();
    assert_eq!(snap.admitted, threshold as u64);
    assert_eq!(snap.blocked, threshold as u64);
    assert_eq!(snap.in_flight, 0);
}

#[test]
fn admitted_count_never_exceeds_threshold_within_a_window() {
    let clock = ManualClock::new();
    let engine = AdmissionEngine::builder()
        .clock(clock.clone())
        .rules(vec![Rule::new("GET:/products", 7.0).with_window_ms(100)])
        .build()
        .unwrap();

    for window in 0..5 {
        let admitted = (0..20)
            .filter(|i| {
                clock.set(window * 100 + i * 4);
                engine.enter("GET:/products").is_admitted()
            })
            .count();
        assert_eq!(admitted, 7, "window {window}");
    }
}

#[test]
fn rejected_updates_leave_prior_rules() {
    let engine = orders_engine(5.0, 1000);
    let before = engine.rules();

    for bad in [0.0, -5.0, f64::NAN] {
        let err = engine.update_rule("POST:/orders", bad).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidThreshold { .. }));
    }
    assert_eq!(engine.update_rule("", 3.0).unwrap_err(), ValidationError::EmptyResource);
    assert!(engine.load_rules(vec![Rule::new("POST:/orders", -1.0)]).is_err());
    assert!(engine.load_rules(vec![Rule::new("POST:/orders", 1.0).with_window_ms(0)]).is_err());

    assert_eq!(engine.rules(), before);
}

#[test]
fn unmanaged_resources_are_always_admitted() {
    let engine = orders_engine(1.0, 1000);
    let entries: Vec<_> = (0..1_000).map(|_| engine.enter("GET:/health")).collect();
    assert!(entries.iter().all(Admission::is_admitted));
}

#[test]
fn concurrent_updates_on_different_resources_are_not_lost() {
    let engine = AdmissionEngine::new();
    std::thread::scope(|s| {
        for i in 0..8 {
            let engine = engine.clone();
            s.spawn(move || {
                for _ in 0..100 {
                    engine.update_rule(&format!("POST:/r{i}"), (i + 1) as f64).unwrap();
                }
            });
        }
    });
    let rules = engine.rules();
    assert_eq!(rules.len(), 8);
    for (i, rule) in rules.iter().enumerate() {
        assert_eq!(rule.resource, format!("POST:/r{i}"));
        assert_eq!(rule.threshold, (i + 1) as f64);
    }
}

#[test]
fn updates_racing_admissions_never_expose_a_broken_rule() {
    let engine = orders_engine(1_000_000.0, 60_000);
    std::thread::scope(|s| {
        let writer = engine.clone();
        s.spawn(move || {
            for t in 1..=500 {
                writer.update_rule("POST:/orders", 1_000_000.0 + t as f64).unwrap();
            }
        });
        for _ in 0..4 {
            let reader = engine.clone();
            s.spawn(move || {
                for _ in 0..500 {
                    let rule = reader.rule("POST:/orders").expect("rule stays managed");
                    assert_eq!(rule.window_ms, 60_000);
                    assert!(rule.threshold >= 1_000_000.0);
                    assert!(reader.enter("POST:/orders").is_admitted());
                }
            });
        }
    });
    assert_eq!(engine.rule("POST:/orders").unwrap().threshold, 1_000_500.0);
}

#[test]
fn sweep_forgets_idle_resources() {
    let clock = ManualClock::new();
    let engine = AdmissionEngine::builder()
        .clock(clock.clone())
        .rules(vec![Rule::new("GET:/a", 10.0), Rule::new("GET:/b", 10.0)])
        .build()
        .unwrap();
    drop(engine.enter("GET:/a"));
    let held = engine.enter("GET:/b");
    clock.advance(10_000);

    assert_eq!(engine.sweep_idle(5_000), 1);
    assert!(engine.stats("GET:/a").is_none());
    assert!(engine.stats("GET:/b").is_some());
    drop(held);
}

#[test]
fn sweep_shorter_than_the_window_keeps_its_quota() {
    let clock = ManualClock::new();
    let engine = AdmissionEngine::builder()
        .clock(clock.clone())
        .rules(vec![Rule::new("POST:/orders", 1.0).with_window_ms(10_000)])
        .build()
        .unwrap();

    assert!(engine.enter("POST:/orders").is_admitted());
    clock.advance(100);
    assert_eq!(engine.sweep_idle(50), 0);
    assert!(engine.enter("POST:/orders").is_blocked());

    clock.advance(10_000);
    assert_eq!(engine.sweep_idle(50), 1);
    assert!(engine.enter("POST:/orders").is_admitted());
}

#[test]
fn unmanaged_traffic_leaves_no_windows_behind() {
    let engine = AdmissionEngine::new();
    for i in 0..50_000 {
        assert!(engine.enter(&format!("GET:/random-404-{i}")).is_admitted());
    }
    assert!(engine.all_stats().is_empty());
}
