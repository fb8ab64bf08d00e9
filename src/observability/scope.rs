//! ObservationScope for span-scoped begin/complete logging
//!
//! - Opens a `plan` span carrying the stream and logs `PLAN_BEGIN`
//! - Records the outcome on the span and logs `PLAN_COMPLETE` on `complete()`
//! - Logs `PLAN_REJECTED` on `fail()`
//! - Logs `PLAN_ABANDONED` when dropped without an outcome

use tracing::{debug, error, field, info_span, warn, Span};

use super::events::PlannerEvent;

/// A scope that logs the start and outcome of one planning pass
///
/// # Usage
///
/// ```ignore
/// let scope = ObservationScope::plan(1);
/// let result = scope.span().in_scope(|| build());
/// scope.complete("indexed", 10.0); // logs PLAN_COMPLETE
/// ```
pub struct ObservationScope {
    span: Span,
    completed: bool,
}

impl ObservationScope {
    /// Opens the span of one stream's planning pass.
    ///
    /// Logs `PLAN_BEGIN` immediately.
    pub fn plan(stream: u32) -> Self {
        let span = info_span!("plan", stream, access = field::Empty, rows = field::Empty);
        debug!(parent: &span, event = PlannerEvent::PlanBegin.as_str());
        Self {
            span,
            completed: false,
        }
    }

    /// The span planning events nest under
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Mark the pass as completed with its access kind and estimated rows
    pub fn complete(mut self, access: &str, rows: f64) {
        self.completed = true;
        self.span.record("access", access);
        self.span.record("rows", rows);
        debug!(
            parent: &self.span,
            event = PlannerEvent::PlanComplete.as_str(),
            access,
            rows,
        );
    }

    /// Mark the pass as rejected
    pub fn fail(mut self, code: &str, reason: &str) {
        self.completed = true;
        error!(
            parent: &self.span,
            event = PlannerEvent::PlanRejected.as_str(),
            code,
            reason,
        );
    }

    /// Check if the scope has an outcome
    pub fn is_completed(&self) -> bool {
        self.completed
    }
}

impl Drop for ObservationScope {
    fn drop(&mut self) {
        if !self.completed {
            warn!(parent: &self.span, event = PlannerEvent::PlanAbandoned.as_str());
        }
    }
}
