//! Navigation analyzer
//!
//! Decides whether an index can deliver the stream in the requested order
//! and whether walking it is cheaper than sorting the filtered rows.
//!
//! An index qualifies if the sort keys map, in order, onto its segments.
//! Leading segments bound by an equality may be skipped, since they hold
//! a single value for the whole scan. A sort key maps onto a segment if it
//! reads the segment's key, or if a top-level `=` conjunct equates the two.

use tracing::trace;

use super::ast::{BoolExpr, CompareKind, CompareOp, Expr, SortDirection, SortItem};
use super::candidate::{CandidateEvaluator, InversionCandidate};
use super::catalog::IndexId;
use super::inversion::{IndexRetrieval, InversionNode};
use super::matcher::{is_key, segment_key};
use super::retrieval::PlanContext;
use super::scratch::{IndexScratch, ScanType};
use super::selector::{better_candidate, Selection};

/// An index able to replace the explicit sort
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationCandidate {
    pub index: IndexId,
    /// Ordered scan, restricted by whatever the index also filters
    pub retrieval: IndexRetrieval,
    /// Cost and selectivity of the ordered scan
    pub candidate: InversionCandidate,
    pub navigation_cost: f64,
    pub sort_cost: f64,
    /// Walking the index beats sorting
    pub better_than_sort: bool,
}

/// Matches sort requests against the scratches of one stream
pub struct NavigationAnalyzer<'c, 'a> {
    ctx: &'c PlanContext<'a>,
}

impl<'c, 'a> NavigationAnalyzer<'c, 'a> {
    pub fn new(ctx: &'c PlanContext<'a>) -> Self {
        Self { ctx }
    }

    /// Picks the best index delivering `sort` and weighs it against sorting
    /// the rows `filter` selects.
    ///
    /// `candidates` are the evaluated single-index candidates; an index
    /// without one is walked in full.
    pub fn analyze(
        &self,
        sort: &[SortItem],
        scratches: &[IndexScratch],
        candidates: &[InversionCandidate],
        filter: &Selection,
    ) -> Option<NavigationCandidate> {
        if sort.is_empty() {
            return None;
        }
        let model = &self.ctx.model;
        let cardinality = self.ctx.cardinality;
        let evaluator = CandidateEvaluator::new(self.ctx);

        let mut best: Option<(&IndexScratch, InversionCandidate)> = None;
        for scratch in scratches {
            if scratch.index.segments.len() < sort.len() {
                continue;
            }
            let candidate = match own_candidate(scratch, candidates) {
                Some(candidate) if !has_list(scratch) => candidate.clone(),
                _ => {
                    let mut full = evaluator.full_scan(scratch);
                    if scratch.condition_exact {
                        full.matches = scratch.condition_matches.clone();
                    }
                    full
                }
            };
            if !self.delivers(scratch, sort, candidate.unique) {
                continue;
            }
            let replaces = match &best {
                Some((_, current)) => better_candidate(&candidate, current, model, cardinality),
                None => true,
            };
            if replaces {
                best = Some((scratch, candidate));
            }
        }

        let (scratch, candidate) = best?;
        let retrieval = match &candidate.inversion {
            Some(InversionNode::IndexScan(retrieval)) => retrieval.clone(),
            _ => scratch.retrieval(),
        };

        let filtered = !filter.is_empty();
        let rows = (cardinality * filter.selectivity).max(1.0);
        let sort_cost = model.sort_cost(rows);
        let navigation_cost = model.navigation_cost(candidate.cost, candidate.selectivity, cardinality);
        let better_than_sort = if model.at_floor(cardinality) && !filtered {
            true
        } else if self.ctx.favor_first_rows {
            !filtered
                || model.first_row_navigation_cost(filter.selectivity, cardinality)
                    < filter.cost + rows + sort_cost
        } else {
            navigation_cost < sort_cost
        };

        trace!(
            stream = self.ctx.stream,
            index = scratch.index.id,
            navigation_cost,
            sort_cost,
            better_than_sort,
            "navigation weighed against sort"
        );
        Some(NavigationCandidate {
            index: scratch.index.id,
            retrieval,
            candidate,
            navigation_cost,
            sort_cost,
            better_than_sort,
        })
    }

    /// Returns true if walking the scratch's index yields the sort order
    fn delivers(&self, scratch: &IndexScratch, sort: &[SortItem], unique: bool) -> bool {
        let index = &scratch.index;
        let prefix = scratch.usable_prefix();
        let mut pos = 0;
        for item in sort {
            loop {
                if pos >= index.segments.len() {
                    return false;
                }
                let key = segment_key(self.ctx.stream, index, pos);
                if self.maps(&item.expr, &key) {
                    break;
                }
                if pos < prefix && scratch.segments[pos].scan.is_equality() {
                    pos += 1;
                    continue;
                }
                return false;
            }

            let descending = item.direction == SortDirection::Desc;
            if descending != index.descending || item.nulls_first() == index.descending {
                return false;
            }
            let segment = &index.segments[pos];
            if segment.ty.is_text() && !segment.collation.binary_order && !unique {
                return false;
            }
            pos += 1;
        }
        true
    }

    /// Returns true if ordering by `expr` is ordering by `key`
    fn maps(&self, expr: &Expr, key: &Expr) -> bool {
        if is_key(expr, key) {
            return true;
        }
        self.ctx.conjuncts.iter().any(|conjunct| match conjunct {
            BoolExpr::Compare(cmp) => match &cmp.kind {
                CompareKind::Binary {
                    op: CompareOp::Eq,
                    left,
                    right,
                } => (left == expr && is_key(right, key)) || (right == expr && is_key(left, key)),
                _ => false,
            },
            _ => false,
        })
    }
}

/// The plain single-index candidate evaluated for this scratch
fn own_candidate<'x>(scratch: &IndexScratch, candidates: &'x [InversionCandidate]) -> Option<&'x InversionCandidate> {
    candidates.iter().find(|c| {
        c.index_id == Some(scratch.index.id) && c.boolean.is_none() && c.condition.is_none()
    })
}

/// A list scan visits its values one after another, not in key order
fn has_list(scratch: &IndexScratch) -> bool {
    scratch.segments[..scratch.usable_prefix()]
        .iter()
        .any(|s| s.scan == ScanType::List)
}
