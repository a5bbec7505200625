#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # flowgate
//!
//! Per-resource admission control for request handlers: decide for every
//! incoming request whether it may proceed or must be short-circuited, based on
//! fixed-window quotas that can be changed while the process runs.
//!
//! ## Features
//!
//! - **Rule repository** with lock-free lookups and atomic whole-set replacement
//! - **Fixed-window statistic** with exact per-resource counting under contention
//! - **Admission engine** returning explicit entries, released exactly once
//! - **Live rule updates** that never lose a concurrent change
//! - **Tower middleware** with fail-fast or fallback responses
//! - **Telemetry** via `tracing` and pluggable event sinks
//!
//! ## Quick Start
//!
//! ```rust
//! use flowgate::{Admission, AdmissionEngine, Rule};
//!
//! let engine = AdmissionEngine::builder()
//!     .rules(vec![Rule::new("POST:/orders", 5.0).with_window_ms(1000)])
//!     .build()
//!     .expect("valid rules");
//!
//! match engine.enter("POST:/orders") {
//!     Admission::Admitted(entry) => {
//!         // handle the request, then release the entry
//!         engine.exit(entry);
//!     }
//!     Admission::Blocked(blocked) => {
//!         // answer 429 or run a fallback
//!         eprintln!("{blocked}");
//!     }
//! }
//!
//! // Operators can tighten the quota at runtime.
//! engine.update_rule("POST:/orders", 1.0).unwrap();
//! ```

pub mod adaptive;
pub mod admin;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod middleware;
pub mod presets;
pub mod repository;
pub mod resource;
pub mod rule;
pub mod statistic;
pub mod telemetry;

// Re-exports
pub use adaptive::DynamicConfig;
pub use admin::{AdminCommand, AdminError, AdminResponse, RuleAdmin, UpdateRuleRequest};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{ConfigError, EngineConfig};
pub use engine::{Admission, AdmissionEngine, AdmissionEngineBuilder, Entry};
pub use error::{AdmissionError, Blocked, ValidationError};
pub use middleware::{AdmissionLayer, AdmissionService, Fallback, FallbackFn, NoFallback};
pub use repository::RuleRepository;
pub use resource::ResourceExtractor;
pub use rule::{ControlBehavior, Rule, TokenStrategy};
pub use statistic::{TrafficStatistic, WindowSnapshot};
pub use telemetry::{AdmissionEvent, EventSink, LogSink, MemorySink, NullSink};
