//! Candidate selector
//!
//! Greedy composition of the final retrieval out of the candidates of one
//! scope. The loop is deterministic: candidates are visited in the order
//! they were produced and a candidate only displaces the current best if
//! [`better_candidate`] says it is strictly better.
//!
//! # Rules
//!
//! 1. A navigation candidate, if any, seeds the running totals.
//! 2. A unique candidate with join dependencies and no runtime guard wins
//!    outright.
//! 3. A candidate sharing a predicate with what was already selected is
//!    dropped; its predicates still count as seen.
//! 4. A pick is accepted if it is the first, if the stream is small, the
//!    request internal or the plan explicit, or if it lowers the running
//!    total cost while the running selectivity is above `1 / cardinality`.
//! 5. Selection stops after a unique candidate.
//!
//! An explicit plan disables rules 3 and 5 and the cost cutoff of rule 4.

use std::collections::BTreeSet;

use tracing::{debug, trace};

use super::ast::PredicateId;
use super::candidate::InversionCandidate;
use super::cost::CostModel;
use super::retrieval::PlanContext;
use crate::observability::PlannerEvent;

/// Outcome of one selection
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Composed filtering candidates, excluding the navigation seed
    pub inversion: Option<InversionCandidate>,
    /// Running selectivity including the navigation seed
    pub selectivity: f64,
    /// Running index cost including the navigation seed
    pub cost: f64,
    /// Predicates enforced by the selection
    pub matches: BTreeSet<PredicateId>,
    pub unique: bool,
}

impl Selection {
    /// A selection that restricts nothing: the natural scan
    pub fn natural() -> Self {
        Self {
            inversion: None,
            selectivity: 1.0,
            cost: 0.0,
            matches: BTreeSet::new(),
            unique: false,
        }
    }

    /// Cost plus one fetch per selected row
    pub fn total_cost(&self, cardinality: f64) -> f64 {
        self.cost + self.selectivity * cardinality
    }

    /// Returns true if nothing restricts the stream
    pub fn is_empty(&self) -> bool {
        self.inversion.is_none() && self.matches.is_empty()
    }
}

/// Returns true if `candidate` should replace `best`.
///
/// In order: unique beats non-unique; more join dependencies win; within
/// the cost tolerance fewer indexes, then more matched segments, then fewer
/// partially matched segments, then lower index cost win; otherwise the
/// lower total cost wins.
pub fn better_candidate(
    candidate: &InversionCandidate,
    best: &InversionCandidate,
    model: &CostModel<'_>,
    cardinality: f64,
) -> bool {
    if candidate.unique != best.unique {
        return candidate.unique;
    }
    if candidate.dependencies.len() != best.dependencies.len() {
        return candidate.dependencies.len() > best.dependencies.len();
    }
    let candidate_total = candidate.total_cost(cardinality);
    let best_total = best.total_cost(cardinality);
    if model.similar_cost(candidate_total, best_total) {
        if candidate.indexes != best.indexes {
            return candidate.indexes < best.indexes;
        }
        if candidate.matched_segments != best.matched_segments {
            return candidate.matched_segments > best.matched_segments;
        }
        if candidate.non_full_matched_segments != best.non_full_matched_segments {
            return candidate.non_full_matched_segments < best.non_full_matched_segments;
        }
        return candidate.cost < best.cost;
    }
    candidate_total < best_total
}

/// Composes candidates into one retrieval
pub struct CandidateSelector<'c, 'a> {
    ctx: &'c PlanContext<'a>,
}

impl<'c, 'a> CandidateSelector<'c, 'a> {
    pub fn new(ctx: &'c PlanContext<'a>) -> Self {
        Self { ctx }
    }

    /// Greedily composes `candidates`, seeded by an optional navigation
    pub fn make_inversion(
        &self,
        candidates: Vec<InversionCandidate>,
        navigation: Option<&InversionCandidate>,
    ) -> Selection {
        let ctx = self.ctx;
        let model = &ctx.model;
        let cardinality = ctx.cardinality;
        let explicit = ctx.explicit_plan;
        let relaxed = ctx.small_table() || ctx.system_request || explicit;
        let min_selectivity = 1.0 / cardinality;

        let mut selection = Selection::natural();
        let mut seen: BTreeSet<PredicateId> = BTreeSet::new();
        if let Some(nav) = navigation {
            selection.selectivity = nav.selectivity;
            selection.cost = nav.cost;
            selection.matches.extend(nav.matches.iter().copied());
            selection.unique = nav.unique;
            seen.extend(nav.matches.iter().copied());
        }
        let mut previous_total = selection.total_cost(cardinality);
        let mut pool: Vec<Option<InversionCandidate>> = candidates.into_iter().map(Some).collect();

        while !(selection.unique && !explicit) {
            let mut best: Option<usize> = None;
            let mut immediate = false;
            for pos in 0..pool.len() {
                let Some(candidate) = &pool[pos] else {
                    continue;
                };
                let same_as_navigation = navigation
                    .is_some_and(|nav| nav.index_id.is_some() && nav.index_id == candidate.index_id);
                let reused = !explicit && !candidate.matches.is_disjoint(&seen);
                if same_as_navigation || reused {
                    seen.extend(candidate.matches.iter().copied());
                    pool[pos] = None;
                    continue;
                }
                if candidate.unique && !candidate.dependencies.is_empty() && candidate.condition.is_none() {
                    best = Some(pos);
                    immediate = true;
                    break;
                }
                let replaces = match best.and_then(|b| pool[b].as_ref()) {
                    Some(current) => better_candidate(candidate, current, model, cardinality),
                    None => true,
                };
                if replaces {
                    best = Some(pos);
                }
            }

            let Some(candidate) = best.and_then(|pos| pool[pos].take()) else {
                break;
            };
            let selectivity = selection.selectivity * candidate.selectivity;
            let cost = selection.cost + candidate.cost;
            let total = cost + selectivity * cardinality;
            let first = selection.inversion.is_none() && navigation.is_none();
            let accepted = first
                || immediate
                || relaxed
                || (total < previous_total && selection.selectivity > min_selectivity);
            if !accepted {
                trace!(
                    stream = ctx.stream,
                    index = ?candidate.index_id,
                    total,
                    previous_total,
                    "candidate does not lower the running cost"
                );
                break;
            }

            seen.extend(candidate.matches.iter().copied());
            selection.matches.extend(candidate.matches.iter().copied());
            selection.unique |= candidate.unique;
            selection.selectivity = selectivity;
            selection.cost = cost;
            previous_total = total;
            selection.inversion = Some(match selection.inversion.take() {
                Some(composed) => composed.and(candidate),
                None => candidate,
            });

            if immediate || (selection.unique && !explicit) {
                ctx.count(|m| m.increment_unique_lookups());
                debug!(
                    event = PlannerEvent::UniqueShortCircuit.as_str(),
                    stream = ctx.stream,
                    dependent = immediate,
                );
                break;
            }
        }
        selection
    }
}
