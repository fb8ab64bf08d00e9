//! Observability for the retrieval planner
//!
//! This module provides:
//! - Typed planner events, emitted as the `event` field of `tracing` records
//! - Passive counters of planning decisions
//! - A `plan` span with begin/complete logging
//!
//! # Principles
//!
//! 1. Observability is read-only
//! 2. Nothing here influences a planning decision
//! 3. No async or background threads
//!
//! # Usage
//!
//! ```ignore
//! use aeroplan::observability::{PlannerEvent, PlannerMetrics, ObservationScope};
//!
//! tracing::info!(event = PlannerEvent::NaturalScan.as_str(), stream = 1);
//!
//! let metrics = PlannerMetrics::new();
//! metrics.increment_plans_built();
//!
//! let scope = ObservationScope::plan(1);
//! // ... plan inside scope.span() ...
//! scope.complete("natural", 100.0);
//! ```

mod events;
mod metrics;
mod scope;

pub use events::PlannerEvent;
pub use metrics::{MetricsSnapshot, PlannerMetrics};
pub use scope::ObservationScope;
