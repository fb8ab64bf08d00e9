//! Inversion candidates and the candidate evaluator
//!
//! The evaluator walks the usable key prefix of a matched scratch, turning
//! it into selectivity, cost and the set of predicates the scan enforces.
//! Candidates are transient: the selector consumes them and only the
//! composed winner escapes into the retrieval plan.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use super::ast::{BoolExpr, PredicateId, StreamId};
use super::catalog::{IndexDescriptor, IndexId};
use super::cost::CostModel;
use super::inversion::InversionNode;
use super::retrieval::PlanContext;
use super::rowid::RowIdRange;
use super::scratch::{IndexScratch, ScanType};
use crate::observability::PlannerEvent;

/// One way of restricting the rows of a stream
#[derive(Debug, Clone, PartialEq)]
pub struct InversionCandidate {
    /// Fraction of the stream's rows delivered, in (0, 1]
    pub selectivity: f64,
    /// Index page-access cost, excluding row fetches
    pub cost: f64,
    /// Number of index scans in the tree
    pub indexes: usize,
    pub matched_segments: usize,
    /// Segments restricted by a range or STARTING WITH
    pub non_full_matched_segments: usize,
    /// At most one row is delivered
    pub unique: bool,
    /// Predicates enforced by this retrieval
    pub matches: BTreeSet<PredicateId>,
    /// Other streams the key values reference
    pub dependencies: BTreeSet<StreamId>,
    /// OR node this candidate was composed for
    pub boolean: Option<PredicateId>,
    /// Runtime guard; when it holds the retrieval is skipped
    pub condition: Option<BoolExpr>,
    pub inversion: Option<InversionNode>,
    pub rowid_ranges: Vec<RowIdRange>,
    /// Set for a scan of a single index
    pub index_id: Option<IndexId>,
}

impl InversionCandidate {
    /// A candidate that restricts nothing
    pub fn empty() -> Self {
        Self {
            selectivity: 1.0,
            cost: 0.0,
            indexes: 0,
            matched_segments: 0,
            non_full_matched_segments: 0,
            unique: false,
            matches: BTreeSet::new(),
            dependencies: BTreeSet::new(),
            boolean: None,
            condition: None,
            inversion: None,
            rowid_ranges: Vec::new(),
            index_id: None,
        }
    }

    /// Index cost plus one fetch per delivered row
    pub fn total_cost(&self, cardinality: f64) -> f64 {
        self.cost + self.selectivity * cardinality
    }

    /// Combines two candidates that must both hold
    pub fn and(self, other: InversionCandidate) -> Self {
        let mut matches = self.matches;
        matches.extend(other.matches);
        let mut dependencies = self.dependencies;
        dependencies.extend(other.dependencies);
        let mut rowid_ranges = self.rowid_ranges;
        rowid_ranges.extend(other.rowid_ranges);
        Self {
            selectivity: self.selectivity * other.selectivity,
            cost: self.cost + other.cost,
            indexes: self.indexes + other.indexes,
            matched_segments: self.matched_segments + other.matched_segments,
            non_full_matched_segments: self.non_full_matched_segments
                + other.non_full_matched_segments,
            unique: self.unique || other.unique,
            matches,
            dependencies,
            boolean: None,
            condition: self.condition.or(other.condition),
            inversion: InversionNode::conjoin(self.inversion, other.inversion),
            rowid_ranges,
            index_id: None,
        }
    }

    /// Combines the best candidates of the two branches of OR node `id`.
    ///
    /// Only predicates matched on both sides stay matched; `enforced` adds the
    /// OR node itself when each side fully enforces its branch. Record-id
    /// ranges cannot be united, so such branches are not composable.
    pub fn or(
        self,
        other: InversionCandidate,
        id: PredicateId,
        enforced: bool,
        model: &CostModel<'_>,
    ) -> Option<Self> {
        if !self.rowid_ranges.is_empty() || !other.rowid_ranges.is_empty() {
            return None;
        }
        let (Some(left), Some(right)) = (self.inversion, other.inversion) else {
            return None;
        };
        let same_index = single_index(&left).filter(|index| right.only_scans(*index));
        let inversion = match same_index {
            Some(_) => InversionNode::in_list(left, right),
            None => InversionNode::or(left, right),
        };

        let mut matches: BTreeSet<PredicateId> =
            self.matches.intersection(&other.matches).copied().collect();
        if enforced {
            matches.insert(id);
        }
        let mut dependencies = self.dependencies;
        dependencies.extend(other.dependencies);

        Some(Self {
            selectivity: model.or_selectivity(self.selectivity, other.selectivity),
            cost: self.cost + other.cost,
            indexes: same_index.map_or(self.indexes + other.indexes, |_| 1),
            matched_segments: self.matched_segments.min(other.matched_segments),
            non_full_matched_segments: self
                .non_full_matched_segments
                .max(other.non_full_matched_segments),
            unique: false,
            matches,
            dependencies,
            boolean: Some(id),
            condition: None,
            inversion: Some(inversion),
            rowid_ranges: Vec::new(),
            index_id: same_index,
        })
    }

    /// Guards this branch candidate with the other, non-indexable branch of
    /// OR node `id`: when `condition` holds every row qualifies.
    pub fn with_residual(self, id: PredicateId, condition: BoolExpr, enforced: bool) -> Option<Self> {
        if !self.rowid_ranges.is_empty() {
            return None;
        }
        let inversion = self.inversion?;
        let matches = if enforced {
            BTreeSet::from([id])
        } else {
            BTreeSet::new()
        };
        Some(Self {
            unique: false,
            matches,
            boolean: Some(id),
            inversion: Some(InversionNode::conditional(condition.clone(), inversion)),
            condition: Some(condition),
            index_id: None,
            ..self
        })
    }
}

fn single_index(node: &InversionNode) -> Option<IndexId> {
    match node {
        InversionNode::IndexScan(retrieval) => Some(retrieval.index),
        InversionNode::In(left, right) => {
            single_index(left).filter(|index| right.only_scans(*index))
        }
        _ => None,
    }
}

/// Turns matched scratches into candidates
pub struct CandidateEvaluator<'c, 'a> {
    ctx: &'c PlanContext<'a>,
}

impl<'c, 'a> CandidateEvaluator<'c, 'a> {
    pub fn new(ctx: &'c PlanContext<'a>) -> Self {
        Self { ctx }
    }

    /// Evaluates every scratch; with a scope, only those strengthened in it
    pub fn evaluate_all(
        &self,
        scratches: &mut [IndexScratch],
        scope: Option<u32>,
    ) -> Vec<InversionCandidate> {
        scratches
            .iter_mut()
            .filter(|s| scope.map_or(true, |scope| s.matched_in_scope(scope)))
            .filter_map(|s| self.evaluate(s))
            .collect()
    }

    /// Evaluates one scratch; `None` if it restricts nothing
    pub fn evaluate(&self, scratch: &mut IndexScratch) -> Option<InversionCandidate> {
        scratch.normalize();
        let prefix = scratch.usable_prefix();
        if prefix == 0 {
            if !scratch.condition_exact {
                return None;
            }
            let mut candidate = self.full_scan(scratch);
            candidate.matches = scratch.condition_matches.clone();
            self.record(&candidate);
            return Some(candidate);
        }

        let model = &self.ctx.model;
        let cardinality = self.ctx.cardinality;
        let index = Arc::clone(&scratch.index);
        let pages = self.index_pages(&index);

        // `point` is the prefix as if every list were a single value; the list
        // length scales every segment from the list onwards.
        let mut selectivity = 1.0;
        let mut point_prefix = 1.0;
        let mut multiplier = 1.0;
        let mut full_segments = 0;
        let mut non_full_segments = 0;
        let mut list: Option<(usize, f64)> = None;
        for pos in 0..prefix {
            let segment = &scratch.segments[pos];
            let point = self.point_selectivity(&index, pos, point_prefix);
            match segment.scan {
                scan if scan.is_equality() => {
                    point_prefix = point;
                    selectivity = (point * multiplier).min(selectivity);
                    full_segments += 1;
                }
                ScanType::List => {
                    let values = segment.list.len();
                    list = Some((values, selectivity));
                    point_prefix = point;
                    multiplier *= values as f64;
                    selectivity = (point * multiplier).min(selectivity);
                    full_segments += 1;
                }
                scan => {
                    selectivity = (selectivity * model.reduce_factor(scan)).max(point * multiplier);
                    non_full_segments += 1;
                }
            }
        }
        selectivity = model.clamp_selectivity(selectivity * index.fraction);

        let unique = prefix == index.segments.len()
            && scratch.segments.iter().zip(&index.segments).all(|(m, s)| {
                let kind = match m.scan {
                    ScanType::Equal => index.unique,
                    ScanType::Equivalent | ScanType::Missing => index.primary,
                    _ => false,
                };
                kind && (!s.ty.is_text() || s.collation.binary_order)
            });

        let cost = if unique {
            selectivity = model.clamp_selectivity(1.0 / cardinality);
            model.unique_lookup_cost(1)
        } else if let Some((values, before)) = list {
            let probes = model.list_probe_cost(values, selectivity, pages);
            let root = model.index_scan_cost(before * index.fraction, pages);
            scratch.root_list_scan = root < probes;
            probes.min(root)
        } else {
            model.index_scan_cost(selectivity, pages)
        };

        scratch.selectivity = selectivity;
        scratch.cardinality = cardinality * selectivity;
        scratch.cost = cost;

        let candidate = InversionCandidate {
            selectivity,
            cost,
            indexes: 1,
            matched_segments: full_segments + non_full_segments,
            non_full_matched_segments: non_full_segments,
            unique,
            matches: scratch.matches(),
            dependencies: scratch.dependencies(self.ctx.stream),
            boolean: None,
            condition: None,
            inversion: Some(InversionNode::IndexScan(scratch.retrieval())),
            rowid_ranges: Vec::new(),
            index_id: Some(index.id),
        };
        self.record(&candidate);
        Some(candidate)
    }

    /// Walk of the whole index without key restriction
    pub fn full_scan(&self, scratch: &IndexScratch) -> InversionCandidate {
        let model = &self.ctx.model;
        let index = &scratch.index;
        let selectivity = model.clamp_selectivity(index.fraction);
        let pages = self.index_pages(index);
        let retrieval = IndexScratch::new(Arc::clone(index)).retrieval();
        InversionCandidate {
            selectivity,
            cost: model.index_scan_cost(selectivity, pages),
            indexes: 1,
            inversion: Some(InversionNode::IndexScan(retrieval)),
            index_id: Some(index.id),
            ..InversionCandidate::empty()
        }
    }

    fn index_pages(&self, index: &IndexDescriptor) -> f64 {
        let model = &self.ctx.model;
        let key_length = index.avg_key_length(model.config().key_overhead);
        model.index_pages(self.ctx.cardinality, key_length)
    }

    /// Selectivity of the key prefix ending at an equality on segment `pos`.
    ///
    /// Stored statistics already describe the prefix; without them each
    /// segment scales the previous prefix by a type default.
    fn point_selectivity(&self, index: &IndexDescriptor, pos: usize, previous: f64) -> f64 {
        let segment = &index.segments[pos];
        if segment.selectivity > 0.0 {
            segment.selectivity.min(previous)
        } else {
            previous * self.ctx.model.segment_selectivity(segment)
        }
    }

    fn record(&self, candidate: &InversionCandidate) {
        self.ctx.count(|m| m.increment_candidates_evaluated());
        debug!(
            event = PlannerEvent::CandidateEvaluated.as_str(),
            stream = self.ctx.stream,
            index = ?candidate.index_id,
            selectivity = candidate.selectivity,
            cost = candidate.cost,
            unique = candidate.unique,
        );
    }
}
