//! Burst of orders against the demo storefront, then a live quota change.
//!
//! Admission decisions are logged at debug level.

use flowgate::{presets, AdmissionEngine, MemorySink};
use flowgate_cookbook::{app, handle, DemoRequest};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("=== flowgate: order service ===\n");

    let events = MemorySink::new();
    let engine = AdmissionEngine::builder()
        .rules(presets::storefront_rules())
        .sink(events.clone())
        .build()?;
    let svc = app(engine.clone(), true);

    println!("Burst of 8 orders against POST:/orders (5 per second):");
    for i in 1..=8 {
        let res = handle(&svc, DemoRequest::post("/orders", json!({ "item": i }))).await;
        println!("  #{i}: {} {}", res.status, res.message().unwrap_or_default());
    }

    println!("\nTightening GET:/orders/:id to 1 per second via the admin route");
    let res = handle(
        &svc,
        DemoRequest::post("/admin/rule", json!({ "resource": "GET:/orders/:id", "threshold": 1 })),
    )
    .await;
    println!("  admin: {} {}", res.status, res.body);

    for id in 1..=3 {
        let res = handle(&svc, DemoRequest::get(format!("/orders/{id}"))).await;
        println!("  GET /orders/{id}: {}", res.status);
    }

    println!("\nWindow counters:");
    for snap in engine.all_stats() {
        println!(
            "  {:<20} admitted={} blocked={} in_flight={}",
            snap.resource, snap.admitted, snap.blocked, snap.in_flight
        );
    }

    println!("\nCaptured {} events, last few:", events.len());
    let all = events.events();
    for event in all.iter().rev().take(5) {
        println!("  - {event}");
    }
    Ok(())
}
