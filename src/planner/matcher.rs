//! Boolean matcher
//!
//! Binds comparison leaves to index segments. Conjuncts are matched in two
//! passes: plain comparisons first, OR nodes second, so that an OR branch
//! can extend an equality prefix bound outside of it. Each OR branch runs
//! against its own copy of the scratches under a fresh scope and is reduced
//! to its best candidate locally.

use std::collections::BTreeSet;

use tracing::trace;

use super::ast::{BoolExpr, CompareKind, CompareOp, Comparison, Expr, PredicateId, StreamId};
use super::candidate::{CandidateEvaluator, InversionCandidate};
use super::catalog::IndexDescriptor;
use super::inversion::Bound;
use super::retrieval::PlanContext;
use super::rowid::match_rowid;
use super::scratch::{IndexScratch, SegmentProbe};
use super::selector::CandidateSelector;
use crate::observability::PlannerEvent;

/// Walks predicate trees against the scratches of one stream
pub struct BooleanMatcher<'c, 'a> {
    ctx: &'c PlanContext<'a>,
    /// Last OR scope handed out; 0 is the top level
    scope: u32,
}

impl<'c, 'a> BooleanMatcher<'c, 'a> {
    pub fn new(ctx: &'c PlanContext<'a>) -> Self {
        Self { ctx, scope: 0 }
    }

    /// Matches every top-level conjunct of the stream.
    ///
    /// Returns the candidates that do not live in a scratch: record-id
    /// matches and composed OR candidates. Index candidates are read from
    /// the scratches afterwards.
    pub fn match_conjuncts(&mut self, scratches: &mut [IndexScratch]) -> Vec<InversionCandidate> {
        let ctx = self.ctx;
        let (ors, plain): (Vec<&BoolExpr>, Vec<&BoolExpr>) =
            ctx.conjuncts.iter().copied().partition(|c| c.is_or());
        plain
            .into_iter()
            .chain(ors)
            .filter_map(|conjunct| self.match_boolean(scratches, conjunct, 0))
            .collect()
    }

    /// Matches one predicate tree in `scope`
    pub fn match_boolean(
        &mut self,
        scratches: &mut [IndexScratch],
        boolean: &BoolExpr,
        scope: u32,
    ) -> Option<InversionCandidate> {
        match boolean {
            BoolExpr::And { left, right, .. } => {
                let left = self.match_boolean(scratches, left, scope);
                let right = self.match_boolean(scratches, right, scope);
                match (left, right) {
                    (Some(l), Some(r)) => Some(l.and(r)),
                    (l, r) => l.or(r),
                }
            }
            BoolExpr::Or { id, left, right } => self.match_or(scratches, *id, left, right),
            BoolExpr::Compare(cmp) => {
                if let Some(candidate) = match_rowid(self.ctx, cmp) {
                    return Some(candidate);
                }
                for scratch in scratches.iter_mut() {
                    self.match_index(scratch, cmp, scope);
                }
                None
            }
            BoolExpr::Opaque { .. } => None,
        }
    }

    fn match_or(
        &mut self,
        scratches: &[IndexScratch],
        id: PredicateId,
        left: &BoolExpr,
        right: &BoolExpr,
    ) -> Option<InversionCandidate> {
        let left_best = self.match_branch(scratches, left);
        let right_best = self.match_branch(scratches, right);
        let model = &self.ctx.model;

        let composed = match (left_best, right_best) {
            (Some(l), Some(r)) => {
                let enforced = enforces(left, &l.matches) && enforces(right, &r.matches);
                l.or(r, id, enforced, model)
            }
            (Some(c), None) if self.residual_allowed(right) => {
                let enforced = enforces(left, &c.matches);
                c.with_residual(id, right.clone(), enforced)
            }
            (None, Some(c)) if self.residual_allowed(left) => {
                let enforced = enforces(right, &c.matches);
                c.with_residual(id, left.clone(), enforced)
            }
            _ => None,
        };

        if let Some(candidate) = &composed {
            trace!(
                event = PlannerEvent::OrBranchComposed.as_str(),
                stream = self.ctx.stream,
                predicate = id,
                selectivity = candidate.selectivity,
                cost = candidate.cost,
                residual = candidate.condition.is_some(),
            );
        }
        composed
    }

    /// Best candidate for one OR branch, matched on a private copy
    fn match_branch(&mut self, scratches: &[IndexScratch], branch: &BoolExpr) -> Option<InversionCandidate> {
        self.scope += 1;
        let scope = self.scope;
        let mut local = scratches.to_vec();
        let mut candidates: Vec<InversionCandidate> =
            self.match_boolean(&mut local, branch, scope).into_iter().collect();
        candidates.extend(CandidateEvaluator::new(self.ctx).evaluate_all(&mut local, Some(scope)));
        CandidateSelector::new(self.ctx)
            .make_inversion(candidates, None)
            .inversion
    }

    /// A one-sided OR may only keep the other side as a runtime guard if that
    /// side can be decided before reading the stream.
    fn residual_allowed(&self, side: &BoolExpr) -> bool {
        let mut streams = BTreeSet::new();
        side.collect_streams(&mut streams);
        !matches!(side, BoolExpr::Opaque { .. })
            && streams
                .iter()
                .all(|s| *s != self.ctx.stream && self.ctx.outer_streams.contains(s))
    }

    /// Applies `cmp` to every segment of the scratch it restricts
    fn match_index(&self, scratch: &mut IndexScratch, cmp: &Comparison, scope: u32) -> bool {
        let mut matched = false;
        for pos in 0..scratch.segments.len() {
            let Some(probe) = self.probe(&scratch.index, pos, cmp) else {
                continue;
            };
            if let SegmentProbe::Starting(_) = probe {
                let segment = &scratch.index.segments[pos];
                // Several key prefixes cannot be combined with further segments
                if segment.collation.multi_starting_key && scratch.index.segments.len() > 1 {
                    continue;
                }
            }
            let ty = scratch.index.segments[pos].ty;
            let segment = &mut scratch.segments[pos];
            if segment.apply(probe, cmp.id, scope) {
                if ty.is_exact_numeric() {
                    segment.scale = ty.scale();
                }
                matched = true;
            }
        }
        if matched {
            trace!(
                stream = self.ctx.stream,
                index = scratch.index.id,
                predicate = cmp.id,
                scope,
                "predicate bound to index"
            );
        }
        matched
    }

    /// Restriction `cmp` offers to segment `pos` of `index`, if any
    fn probe(&self, index: &IndexDescriptor, pos: usize, cmp: &Comparison) -> Option<SegmentProbe> {
        let key = self.segment_key(index, pos);
        let segment = &index.segments[pos];
        let comparable = |value: &Expr| {
            self.ctx.computable(value)
                && value
                    .data_type()
                    .map_or(true, |ty| segment.ty.index_comparable(&ty))
        };

        match &cmp.kind {
            CompareKind::Binary { op, left, right } => {
                let (op, value) = if is_key(left, &key) && comparable(right) {
                    (*op, right)
                } else if is_key(right, &key) && comparable(left) {
                    (op.reversed()?, left)
                } else {
                    return None;
                };
                Some(match op {
                    CompareOp::Eq => SegmentProbe::Equal(value.clone()),
                    CompareOp::Equiv => SegmentProbe::Equivalent(value.clone()),
                    // b <> v  is  b = NOT v
                    CompareOp::NotEq if segment.ty.is_boolean() => {
                        SegmentProbe::Equal(Expr::Not(Box::new(value.clone())))
                    }
                    CompareOp::NotEq => return None,
                    CompareOp::Gt => SegmentProbe::Lower(Bound::exclusive(value.clone())),
                    CompareOp::Geq => SegmentProbe::Lower(Bound::inclusive(value.clone())),
                    CompareOp::Lt => SegmentProbe::Upper(Bound::exclusive(value.clone())),
                    CompareOp::Leq => SegmentProbe::Upper(Bound::inclusive(value.clone())),
                    CompareOp::StartingWith => {
                        // Every string starts with ''
                        if !segment.ty.is_text() || value.is_empty_string() {
                            return None;
                        }
                        SegmentProbe::Starting(value.clone())
                    }
                })
            }
            CompareKind::Between {
                operand,
                lower,
                upper,
            } => {
                if !is_key(operand, &key) || !comparable(lower) || !comparable(upper) {
                    return None;
                }
                Some(SegmentProbe::Between(
                    Bound::inclusive(lower.clone()),
                    Bound::inclusive(upper.clone()),
                ))
            }
            CompareKind::InList { operand, values } => {
                if !is_key(operand, &key) || values.is_empty() || !values.iter().all(comparable) {
                    return None;
                }
                Some(match values.as_slice() {
                    [single] => SegmentProbe::Equal(single.clone()),
                    _ => SegmentProbe::List(values.clone()),
                })
            }
            CompareKind::IsNull(operand) => is_key(operand, &key).then_some(SegmentProbe::Missing),
            CompareKind::IsNotNull(_) => None,
        }
    }

    fn segment_key(&self, index: &IndexDescriptor, pos: usize) -> Expr {
        segment_key(self.ctx.stream, index, pos)
    }
}

/// The value segment `pos` of `index` is built from, bound to `stream`
pub(super) fn segment_key(stream: StreamId, index: &IndexDescriptor, pos: usize) -> Expr {
    match &index.expression {
        Some(expression) => expression.rebind(stream),
        None => {
            let segment = &index.segments[pos];
            Expr::field(stream, segment.column, segment.ty)
        }
    }
}

/// Returns true if `expr` reads the same key as `key`; column types are ignored
pub(super) fn is_key(expr: &Expr, key: &Expr) -> bool {
    match (expr, key) {
        (
            Expr::Field { stream, column, .. },
            Expr::Field {
                stream: key_stream,
                column: key_column,
                ..
            },
        ) => stream == key_stream && column == key_column,
        _ => expr == key,
    }
}

/// Returns true if `matches` covers every leaf of `boolean`
fn enforces(boolean: &BoolExpr, matches: &BTreeSet<PredicateId>) -> bool {
    match boolean {
        BoolExpr::And { left, right, .. } => enforces(left, matches) && enforces(right, matches),
        other => matches.contains(&other.id()),
    }
}
