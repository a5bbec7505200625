use flowgate::{
    presets, AdminCommand, AdminError, AdminResponse, AdmissionEngine, AdmissionEvent, EngineConfig,
    LogSink, MemorySink, Rule, RuleAdmin,
};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone)]
struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedGuard;
    fn make_writer(&'a self) -> Self::Writer {
        SharedGuard(self.0.clone())
    }
}

struct SharedGuard(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for SharedGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn capture_logs() -> (Arc<Mutex<Vec<u8>>>, tracing::subscriber::DefaultGuard) {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::fmt()
        .with_writer(BoxMakeWriter::new(SharedWriter(buffer.clone())))
        .with_target(true)
        .with_max_level(tracing::Level::DEBUG)
        .without_time()
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (buffer, guard)
}

fn logs(buffer: &Arc<Mutex<Vec<u8>>>) -> String {
    String::from_utf8(buffer.lock().unwrap().clone()).unwrap()
}

#[test]
fn duplicate_rules_warn_and_last_wins() {
    let (buffer, _guard) = capture_logs();

    let engine = AdmissionEngine::new();
    engine
        .load_rules(vec![Rule::new("POST:/orders", 5.0), Rule::new("POST:/orders", 9.0)])
        .unwrap();

    assert_eq!(engine.rule("POST:/orders").unwrap().threshold, 9.0);
    let logs = logs(&buffer);
    assert!(logs.contains("duplicate rule in load"), "duplicate should be logged: {logs}");
    assert!(logs.contains("flowgate::repository"));
}

#[test]
fn blocked_requests_are_logged_at_debug() {
    let (buffer, _guard) = capture_logs();

    let engine = AdmissionEngine::builder()
        .rules(vec![Rule::new("POST:/orders", 1.0)])
        .build()
        .unwrap();
    let _first = engine.enter("POST:/orders");
    assert!(engine.enter("POST:/orders").is_blocked());

    let logs = logs(&buffer);
    assert!(logs.contains("DEBUG"));
    assert!(logs.contains("POST:/orders"));
}

#[test]
fn log_sink_forwards_events_by_severity() {
    let (buffer, _guard) = capture_logs();

    let engine = AdmissionEngine::builder().sink(LogSink).build().unwrap();
    engine.update_rule("POST:/orders", 1.0).unwrap();
    let _first = engine.enter("POST:/orders");
    assert!(engine.enter("POST:/orders").is_blocked());

    let logs = logs(&buffer);
    assert!(logs.contains("flowgate::telemetry"), "{logs}");
    assert!(logs.contains("RuleUpdated(POST:/orders, threshold=1)"), "{logs}");
    assert!(logs.contains("Blocked(POST:/orders, threshold=1)"), "{logs}");
    // Admissions are traced below the captured level.
    assert!(!logs.contains("Admitted(POST:/orders)"), "{logs}");
}

#[tokio::test]
async fn admin_update_applies_to_next_admission() {
    let sink = MemorySink::new();
    let engine = AdmissionEngine::builder()
        .sink(sink.clone())
        .config(EngineConfig::default())
        .build()
        .unwrap();
    let admin = RuleAdmin::new(engine.clone());

    let res = admin
        .clone()
        .oneshot(br#"{"resource":"POST:/orders","threshold":1}"#.to_vec())
        .await
        .unwrap();
    assert_eq!(res, AdminResponse::Ack);

    assert!(engine.enter("POST:/orders").is_admitted());
    assert!(engine.enter("POST:/orders").is_blocked());

    let events = sink.events();
    assert!(events.contains(&AdmissionEvent::RuleUpdated {
        resource: "POST:/orders".into(),
        threshold: 1.0
    }));
    assert!(events.contains(&AdmissionEvent::Blocked {
        resource: "POST:/orders".into(),
        threshold: 1.0
    }));
}

#[tokio::test]
async fn admin_rejections_keep_the_rule() {
    let engine = AdmissionEngine::from_config(EngineConfig::default()).unwrap();
    let admin = RuleAdmin::new(engine.clone());

    for body in [
        &b"not json"[..],
        br#"{"resource":"POST:/orders"}"#,
        br#"{"resource":"","threshold":3}"#,
        br#"{"resource":"POST:/orders","threshold":0}"#,
        br#"{"resource":"POST:/orders","threshold":-2}"#,
    ] {
        let err = admin.clone().oneshot(body.to_vec()).await.unwrap_err();
        assert!(
            matches!(err, AdminError::Malformed(_) | AdminError::InvalidRequest(_)),
            "unexpected {err:?}"
        );
    }
    assert_eq!(engine.rules(), presets::default_rules());
}

#[tokio::test]
async fn commands_from_json_drive_the_engine() {
    let engine = AdmissionEngine::from_config(EngineConfig::empty()).unwrap();
    let admin = RuleAdmin::new(engine.clone());

    let load: AdminCommand = serde_json::from_value(serde_json::json!({
        "op": "load_rules",
        "rules": [
            { "resource": "GET:/products", "threshold": 200 },
            { "resource": "POST:/seckill", "threshold": 50, "window_ms": 500 }
        ]
    }))
    .unwrap();
    admin.clone().oneshot(load).await.unwrap();

    let listed = admin.oneshot(AdminCommand::ListRules).await.unwrap();
    assert_eq!(
        listed,
        AdminResponse::Rules(vec![
            Rule::new("GET:/products", 200.0),
            Rule::new("POST:/seckill", 50.0).with_window_ms(500),
        ])
    );
}

#[test]
fn config_document_builds_an_engine() {
    let raw = r#"{
        "default_window_ms": 2000,
        "rules": [
            { "resource": "POST:/orders", "threshold": 5, "strategy": "direct", "behavior": "reject" }
        ]
    }"#;
    let engine = AdmissionEngine::from_config(EngineConfig::from_json_str(raw).unwrap()).unwrap();
    assert_eq!(engine.rule("POST:/orders").unwrap().window_ms, 1000);

    // Rules created at runtime take the configured default window.
    engine.update_rule("GET:/products", 10.0).unwrap();
    assert_eq!(engine.rule("GET:/products").unwrap().window_ms, 2000);
}

#[test]
fn invalid_config_documents_are_rejected() {
    assert!(EngineConfig::from_json_str("{").is_err());
    assert!(EngineConfig::from_json_str(r#"{"rules":[{"resource":"x","threshold":0}]}"#).is_err());
    assert!(
        EngineConfig::from_json_str(r#"{"rules":[{"resource":"x","threshold":1,"strategy":"warm_up"}]}"#)
            .is_err()
    );
}
