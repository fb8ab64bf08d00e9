//! Planner metrics
//!
//! - Counters only, monotonic
//! - Passive: nothing reads them back while planning
//! - Thread-safe; one registry may be shared by concurrent compilations

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters of planning decisions
///
/// All counters use Relaxed ordering; readers only need eventual values.
#[derive(Debug, Default)]
pub struct PlannerMetrics {
    /// Plans produced
    plans_built: AtomicU64,
    /// Plans without any index or record-id restriction
    natural_scans: AtomicU64,
    navigations_chosen: AtomicU64,
    navigations_rejected: AtomicU64,
    /// Indexes dropped before matching
    indexes_excluded: AtomicU64,
    /// Selections ended by a unique candidate
    unique_lookups: AtomicU64,
    candidates_evaluated: AtomicU64,
    /// Requests rejected with a planner error
    planning_errors: AtomicU64,
}

impl PlannerMetrics {
    /// Create a new registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_plans_built(&self) {
        self.plans_built.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_natural_scans(&self) {
        self.natural_scans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_navigations_chosen(&self) {
        self.navigations_chosen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_navigations_rejected(&self) {
        self.navigations_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_indexes_excluded(&self) {
        self.indexes_excluded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_unique_lookups(&self) {
        self.unique_lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_candidates_evaluated(&self) {
        self.candidates_evaluated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_planning_errors(&self) {
        self.planning_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            plans_built: self.plans_built.load(Ordering::Relaxed),
            natural_scans: self.natural_scans.load(Ordering::Relaxed),
            navigations_chosen: self.navigations_chosen.load(Ordering::Relaxed),
            navigations_rejected: self.navigations_rejected.load(Ordering::Relaxed),
            indexes_excluded: self.indexes_excluded.load(Ordering::Relaxed),
            unique_lookups: self.unique_lookups.load(Ordering::Relaxed),
            candidates_evaluated: self.candidates_evaluated.load(Ordering::Relaxed),
            planning_errors: self.planning_errors.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub plans_built: u64,
    pub natural_scans: u64,
    pub navigations_chosen: u64,
    pub navigations_rejected: u64,
    pub indexes_excluded: u64,
    pub unique_lookups: u64,
    pub candidates_evaluated: u64,
    pub planning_errors: u64,
}

impl MetricsSnapshot {
    /// Renders the snapshot as a JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
