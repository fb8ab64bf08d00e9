//! Observable planner events
//!
//! Events are explicit and typed. Every decision the planner makes that
//! changes the shape of a retrieval has an event.

use std::fmt;

/// Observable events of a planning pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannerEvent {
    /// Planning of one stream begins
    PlanBegin,
    /// A retrieval plan was produced
    PlanComplete,
    /// The request violated an input invariant
    PlanRejected,
    /// A planning pass ended without an outcome
    PlanAbandoned,

    /// An index was dropped before matching
    IndexExcluded,
    /// A scratch was turned into a candidate
    CandidateEvaluated,
    /// Both branches of an OR were composed into one candidate
    OrBranchComposed,

    /// An index replaces the explicit sort
    NavigationChosen,
    /// An index could deliver the order but sorting is cheaper
    NavigationRejected,

    /// Nothing restricts the stream
    NaturalScan,
    /// A unique candidate ended the selection
    UniqueShortCircuit,
}

impl PlannerEvent {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            PlannerEvent::PlanBegin => "PLAN_BEGIN",
            PlannerEvent::PlanComplete => "PLAN_COMPLETE",
            PlannerEvent::PlanRejected => "PLAN_REJECTED",
            PlannerEvent::PlanAbandoned => "PLAN_ABANDONED",

            PlannerEvent::IndexExcluded => "INDEX_EXCLUDED",
            PlannerEvent::CandidateEvaluated => "CANDIDATE_EVALUATED",
            PlannerEvent::OrBranchComposed => "OR_BRANCH_COMPOSED",

            PlannerEvent::NavigationChosen => "NAVIGATION_CHOSEN",
            PlannerEvent::NavigationRejected => "NAVIGATION_REJECTED",

            PlannerEvent::NaturalScan => "NATURAL_SCAN",
            PlannerEvent::UniqueShortCircuit => "UNIQUE_SHORT_CIRCUIT",
        }
    }
}

impl fmt::Display for PlannerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_events_have_string_representation() {
        let events = [
            PlannerEvent::PlanBegin,
            PlannerEvent::PlanComplete,
            PlannerEvent::PlanRejected,
            PlannerEvent::PlanAbandoned,
            PlannerEvent::IndexExcluded,
            PlannerEvent::CandidateEvaluated,
            PlannerEvent::OrBranchComposed,
            PlannerEvent::NavigationChosen,
            PlannerEvent::NavigationRejected,
            PlannerEvent::NaturalScan,
            PlannerEvent::UniqueShortCircuit,
        ];

        for event in events {
            let s = event.as_str();
            assert!(!s.is_empty());
            assert!(s.chars().all(|c| c.is_uppercase() || c == '_'));
        }
    }

    #[test]
    fn test_event_display() {
        assert_eq!(format!("{}", PlannerEvent::NavigationChosen), "NAVIGATION_CHOSEN");
    }
}
