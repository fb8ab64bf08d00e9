//! Index scratch
//!
//! Per-index matching state for one stream. Every usable index gets an
//! [`IndexScratch`] holding one [`SegmentMatch`] per key segment; the boolean
//! matcher strengthens those matches and the evaluator turns the result into
//! a candidate. OR branches work on clones, so a match made in one branch
//! never leaks into the other.
//!
//! # Scan-type precedence
//!
//! `None < Greater = Less < Between < Starting < List < Equivalent = Missing = Equal`
//!
//! Equality-class matches and lists are terminal: a weaker probe on the same
//! segment leaves them untouched. An equality may still replace a list.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::ast::{BoolExpr, CompareKind, Expr, PredicateId, StreamId};
use super::catalog::{DataType, IndexDescriptor, IndexId};
use super::errors::{PlannerError, PlannerResult};
use super::inversion::{Bound, IndexRetrieval, KeyRange, ListScan};

/// How a segment is restricted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanType {
    None,
    Greater,
    Less,
    Between,
    Starting,
    List,
    Equivalent,
    Missing,
    Equal,
}

impl ScanType {
    /// Strength of the restriction; higher never yields to lower
    pub fn rank(&self) -> u8 {
        match self {
            ScanType::None => 0,
            ScanType::Greater | ScanType::Less => 1,
            ScanType::Between => 2,
            ScanType::Starting => 3,
            ScanType::List => 4,
            ScanType::Equivalent | ScanType::Missing | ScanType::Equal => 5,
        }
    }

    /// `=`, `IS NOT DISTINCT FROM` or `IS NULL`
    pub fn is_equality(&self) -> bool {
        matches!(self, ScanType::Equal | ScanType::Equivalent | ScanType::Missing)
    }

    /// Fully restricts the segment; later segments may still be used
    pub fn is_terminal(&self) -> bool {
        self.is_equality() || *self == ScanType::List
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::None => "NONE",
            ScanType::Greater => "GREATER",
            ScanType::Less => "LESS",
            ScanType::Between => "BETWEEN",
            ScanType::Starting => "STARTING",
            ScanType::List => "LIST",
            ScanType::Equivalent => "EQUIVALENT",
            ScanType::Missing => "MISSING",
            ScanType::Equal => "EQUAL",
        }
    }
}

/// A restriction offered by one comparison to one segment
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentProbe {
    Equal(Expr),
    Equivalent(Expr),
    Missing,
    List(Vec<Expr>),
    /// `>` / `>=`
    Lower(Bound),
    /// `<` / `<=`
    Upper(Bound),
    Between(Bound, Bound),
    Starting(Expr),
}

impl SegmentProbe {
    /// Every value expression the probe needs at runtime
    pub fn values(&self) -> Vec<&Expr> {
        match self {
            SegmentProbe::Equal(v) | SegmentProbe::Equivalent(v) | SegmentProbe::Starting(v) => {
                vec![v]
            }
            SegmentProbe::Missing => Vec::new(),
            SegmentProbe::List(values) => values.iter().collect(),
            SegmentProbe::Lower(b) | SegmentProbe::Upper(b) => vec![&b.value],
            SegmentProbe::Between(lo, hi) => vec![&lo.value, &hi.value],
        }
    }
}

/// Matching state of one index segment
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentMatch {
    pub scan: ScanType,
    pub lower: Option<Bound>,
    pub upper: Option<Bound>,
    pub list: Vec<Expr>,
    /// Predicates whose restriction this segment currently carries
    pub matches: BTreeSet<PredicateId>,
    /// Decimal scale for exact-numeric key conversion
    pub scale: Option<i8>,
    /// OR scope in which the segment was last strengthened
    pub scope: u32,
}

impl Default for SegmentMatch {
    fn default() -> Self {
        Self {
            scan: ScanType::None,
            lower: None,
            upper: None,
            list: Vec::new(),
            matches: BTreeSet::new(),
            scale: None,
            scope: 0,
        }
    }
}

impl SegmentMatch {
    fn reset(&mut self, scan: ScanType) {
        self.scan = scan;
        self.lower = None;
        self.upper = None;
        self.list.clear();
        self.matches.clear();
    }

    fn point(&mut self, scan: ScanType, value: Expr) {
        self.reset(scan);
        self.lower = Some(Bound::inclusive(value.clone()));
        self.upper = Some(Bound::inclusive(value));
    }

    /// Applies a probe if it strengthens the segment.
    ///
    /// Returns false when the probe was ignored; the predicate is then not
    /// recorded and must still be checked by a residual filter.
    pub fn apply(&mut self, probe: SegmentProbe, id: PredicateId, scope: u32) -> bool {
        match probe {
            SegmentProbe::Equal(value) => {
                if self.scan.is_equality() {
                    return false;
                }
                self.point(ScanType::Equal, value);
            }
            SegmentProbe::Equivalent(value) => {
                if self.scan.is_equality() {
                    return false;
                }
                self.point(ScanType::Equivalent, value);
            }
            SegmentProbe::Missing => {
                if self.scan.is_terminal() {
                    return false;
                }
                self.point(ScanType::Missing, Expr::literal(serde_json::Value::Null));
            }
            SegmentProbe::List(values) => {
                if self.scan.is_terminal() {
                    return false;
                }
                self.reset(ScanType::List);
                self.list = values;
            }
            SegmentProbe::Starting(prefix) => {
                if self.scan.rank() >= ScanType::Starting.rank() {
                    return false;
                }
                self.point(ScanType::Starting, prefix);
            }
            SegmentProbe::Between(lower, upper) => {
                if self.scan.rank() >= ScanType::Between.rank() {
                    return false;
                }
                self.reset(ScanType::Between);
                self.lower = Some(lower);
                self.upper = Some(upper);
            }
            SegmentProbe::Lower(bound) => match self.scan {
                ScanType::None => {
                    self.scan = ScanType::Greater;
                    self.lower = Some(bound);
                }
                ScanType::Less => {
                    self.scan = ScanType::Between;
                    self.lower = Some(bound);
                }
                _ => return false,
            },
            SegmentProbe::Upper(bound) => match self.scan {
                ScanType::None => {
                    self.scan = ScanType::Less;
                    self.upper = Some(bound);
                }
                ScanType::Greater => {
                    self.scan = ScanType::Between;
                    self.upper = Some(bound);
                }
                _ => return false,
            },
        }
        self.matches.insert(id);
        self.scope = scope;
        true
    }

    /// Every runtime value the segment's restriction depends on
    pub fn values(&self) -> impl Iterator<Item = &Expr> {
        self.lower
            .iter()
            .chain(self.upper.iter())
            .map(|b| &b.value)
            .chain(self.list.iter())
    }
}

/// Matching state of one index for one stream and OR scope
#[derive(Debug, Clone, PartialEq)]
pub struct IndexScratch {
    pub index: Arc<IndexDescriptor>,
    pub segments: Vec<SegmentMatch>,
    /// Set by the evaluator
    pub selectivity: f64,
    /// Set by the evaluator
    pub cardinality: f64,
    /// Set by the evaluator
    pub cost: f64,
    /// The last key value is a STARTING WITH prefix
    pub partial_key: bool,
    pub multi_starting_keys: bool,
    pub root_list_scan: bool,
    /// Conjuncts identical to a term of the index condition
    pub condition_matches: BTreeSet<PredicateId>,
    /// Every condition term has an identical conjunct
    pub condition_exact: bool,
}

impl IndexScratch {
    pub fn new(index: Arc<IndexDescriptor>) -> Self {
        let segments = vec![SegmentMatch::default(); index.segments.len()];
        Self {
            index,
            segments,
            selectivity: 1.0,
            cardinality: 0.0,
            cost: 0.0,
            partial_key: false,
            multi_starting_keys: false,
            root_list_scan: false,
            condition_matches: BTreeSet::new(),
            condition_exact: false,
        }
    }

    pub fn id(&self) -> IndexId {
        self.index.id
    }

    /// Checks that the scratch still mirrors its descriptor
    pub fn validate(&self) -> PlannerResult<()> {
        if self.segments.len() != self.index.segments.len() {
            return Err(PlannerError::ScratchMismatch {
                index: self.index.id,
                expected: self.index.segments.len(),
                actual: self.segments.len(),
            });
        }
        Ok(())
    }

    /// Returns true if the first segment is matched
    pub fn has_match(&self) -> bool {
        self.segments
            .first()
            .is_some_and(|s| s.scan != ScanType::None)
    }

    /// Returns true if a usable segment was strengthened in the given OR scope
    pub fn matched_in_scope(&self, scope: u32) -> bool {
        self.segments[..self.usable_prefix()]
            .iter()
            .any(|s| s.scope == scope)
    }

    /// Number of leading segments a key can be built from.
    ///
    /// Terminal matches extend the prefix; a range or STARTING match is
    /// included but ends it, as does a gap. Only one list is allowed.
    pub fn usable_prefix(&self) -> usize {
        let mut list_seen = false;
        for (pos, segment) in self.segments.iter().enumerate() {
            match segment.scan {
                ScanType::None => return pos,
                ScanType::List if list_seen => return pos,
                ScanType::List => list_seen = true,
                scan if scan.is_equality() => {}
                _ => return pos + 1,
            }
        }
        self.segments.len()
    }

    /// Clears every segment past the usable prefix and derives the key flags
    pub fn normalize(&mut self) {
        let prefix = self.usable_prefix();
        for segment in self.segments.iter_mut().skip(prefix) {
            *segment = SegmentMatch::default();
        }
        let last = prefix.checked_sub(1);
        self.partial_key = last.is_some_and(|pos| self.segments[pos].scan == ScanType::Starting);
        self.multi_starting_keys = self.partial_key
            && last.is_some_and(|pos| self.index.segments[pos].collation.multi_starting_key);
    }

    /// Number of leading segments with a lower bound
    pub fn lower_count(&self) -> usize {
        self.segments[..self.usable_prefix()]
            .iter()
            .take_while(|s| s.lower.is_some() || s.scan == ScanType::List)
            .count()
    }

    /// Number of leading segments with an upper bound
    pub fn upper_count(&self) -> usize {
        self.segments[..self.usable_prefix()]
            .iter()
            .take_while(|s| s.upper.is_some() || s.scan == ScanType::List)
            .count()
    }

    /// Predicates enforced by a scan over the usable prefix
    pub fn matches(&self) -> BTreeSet<PredicateId> {
        let mut out = self.condition_matches.clone();
        for segment in &self.segments[..self.usable_prefix()] {
            out.extend(segment.matches.iter().copied());
        }
        out
    }

    /// Streams other than `stream` that the key values reference
    pub fn dependencies(&self, stream: StreamId) -> BTreeSet<StreamId> {
        let mut out = BTreeSet::new();
        for segment in &self.segments[..self.usable_prefix()] {
            for value in segment.values() {
                value.collect_streams(&mut out);
            }
        }
        out.remove(&stream);
        out
    }

    /// Builds the executor-facing scan over the usable prefix
    pub fn retrieval(&self) -> IndexRetrieval {
        let prefix = self.usable_prefix();
        let mut keys = Vec::with_capacity(prefix);
        let mut list = None;
        for (pos, segment) in self.segments[..prefix].iter().enumerate() {
            if segment.scan == ScanType::List {
                list = Some(ListScan {
                    segment: pos,
                    values: segment.list.clone(),
                });
            }
            keys.push(KeyRange {
                lower: segment.lower.clone(),
                upper: segment.upper.clone(),
            });
        }
        IndexRetrieval {
            index: self.index.id,
            name: self.index.name.clone(),
            descending: self.index.descending,
            keys,
            list,
            partial_key: self.partial_key,
            multi_starting_keys: self.multi_starting_keys,
            root_list_scan: self.root_list_scan,
        }
    }
}

/// Why an index was dropped for the statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    /// A term of the partial-index condition is not implied by the predicates
    UnmetCondition,
    /// A key segment cannot be compared (BLOB)
    UnindexableType,
}

impl ExclusionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionReason::UnmetCondition => "unmet_condition",
            ExclusionReason::UnindexableType => "unindexable_type",
        }
    }
}

/// Scratches of one stream plus the indexes left out
#[derive(Debug, Clone, Default)]
pub struct ScratchSet {
    pub scratches: Vec<IndexScratch>,
    pub excluded: Vec<(IndexId, ExclusionReason)>,
}

/// Seeds one scratch per usable index of `stream`.
///
/// A partial index is usable only if every term of its condition is matched
/// by the available conjuncts; there is no partial use of an unmet condition.
pub fn build_scratches(
    stream: StreamId,
    indexes: &[Arc<IndexDescriptor>],
    conjuncts: &[&BoolExpr],
) -> ScratchSet {
    let mut set = ScratchSet::default();
    for index in indexes {
        if index.segments.iter().any(|s| s.ty == DataType::Blob) {
            set.excluded.push((index.id, ExclusionReason::UnindexableType));
            continue;
        }
        let mut scratch = IndexScratch::new(Arc::clone(index));
        if let Some(condition) = &index.condition {
            match match_condition(stream, condition, conjuncts) {
                Some((matches, exact)) => {
                    scratch.condition_exact = exact && !matches.is_empty();
                    scratch.condition_matches = matches;
                }
                None => {
                    set.excluded.push((index.id, ExclusionReason::UnmetCondition));
                    continue;
                }
            }
        }
        set.scratches.push(scratch);
    }
    set
}

/// Matches every term of a partial-index condition.
///
/// Returns the conjuncts identical to a term and whether all terms were
/// matched that way, or `None` if some term is not implied at all.
fn match_condition(
    stream: StreamId,
    condition: &BoolExpr,
    conjuncts: &[&BoolExpr],
) -> Option<(BTreeSet<PredicateId>, bool)> {
    let condition = condition.rebind(stream);
    let mut matches = BTreeSet::new();
    let mut exact = true;
    for term in condition.conjuncts() {
        if let Some(conjunct) = conjuncts.iter().find(|c| c.same_shape(term)) {
            matches.insert(conjunct.id());
            continue;
        }
        exact = false;
        if !conjuncts.iter().any(|c| implies(c, term)) {
            return None;
        }
    }
    Some((matches, exact))
}

/// Returns true if `predicate` holding guarantees `term` holds
fn implies(predicate: &BoolExpr, term: &BoolExpr) -> bool {
    match term {
        BoolExpr::Or { .. } => {
            let alternatives = term.disjuncts();
            predicate
                .disjuncts()
                .iter()
                .all(|d| alternatives.iter().any(|a| a.same_shape(d) || implies(d, a)))
        }
        BoolExpr::Compare(cmp) => match (&cmp.kind, predicate) {
            (CompareKind::IsNotNull(operand), BoolExpr::Compare(pred)) => {
                pred.rejects_null_of(operand)
            }
            _ => false,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lit(v: i64) -> Expr {
        Expr::literal(json!(v))
    }

    fn col(column: u16) -> Expr {
        Expr::field(1, column, DataType::Integer)
    }

    #[test]
    fn test_equal_is_terminal() {
        let mut seg = SegmentMatch::default();
        assert!(seg.apply(SegmentProbe::Equal(lit(5)), 1, 0));
        assert!(!seg.apply(SegmentProbe::Lower(Bound::exclusive(lit(1))), 2, 0));
        assert!(!seg.apply(SegmentProbe::Equal(lit(6)), 3, 0));
        assert!(!seg.apply(SegmentProbe::List(vec![lit(1), lit(2)]), 4, 0));
        assert_eq!(seg.scan, ScanType::Equal);
        assert_eq!(seg.matches.iter().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_range_halves_combine() {
        let mut seg = SegmentMatch::default();
        assert!(seg.apply(SegmentProbe::Lower(Bound::exclusive(lit(1))), 1, 0));
        assert_eq!(seg.scan, ScanType::Greater);
        // A second lower bound neither replaces the first nor gets recorded
        assert!(!seg.apply(SegmentProbe::Lower(Bound::inclusive(lit(3))), 2, 0));
        assert!(seg.apply(SegmentProbe::Upper(Bound::inclusive(lit(9))), 3, 0));
        assert_eq!(seg.scan, ScanType::Between);
        assert_eq!(seg.matches.iter().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(seg.lower, Some(Bound::exclusive(lit(1))));
    }

    #[test]
    fn test_equality_upgrade_drops_range_matches() {
        let mut seg = SegmentMatch::default();
        seg.apply(SegmentProbe::Upper(Bound::exclusive(lit(10))), 1, 0);
        seg.apply(SegmentProbe::List(vec![lit(1), lit(2)]), 2, 0);
        assert_eq!(seg.scan, ScanType::List);
        assert!(seg.upper.is_none());
        assert!(seg.apply(SegmentProbe::Equal(lit(2)), 3, 4));
        assert_eq!(seg.scan, ScanType::Equal);
        assert!(seg.list.is_empty());
        assert_eq!(seg.matches.iter().copied().collect::<Vec<_>>(), vec![3]);
        assert_eq!(seg.scope, 4);
    }

    #[test]
    fn test_starting_dominates_between() {
        let mut seg = SegmentMatch::default();
        seg.apply(
            SegmentProbe::Between(Bound::inclusive(lit(1)), Bound::inclusive(lit(2))),
            1,
            0,
        );
        assert!(seg.apply(SegmentProbe::Starting(Expr::literal(json!("ab"))), 2, 0));
        assert!(!seg.apply(
            SegmentProbe::Between(Bound::inclusive(lit(1)), Bound::inclusive(lit(2))),
            3,
            0
        ));
        assert_eq!(seg.scan, ScanType::Starting);
    }

    #[test]
    fn test_usable_prefix() {
        let index = Arc::new(
            IndexDescriptor::new(1, "IDX_ABC")
                .segment(0, DataType::Integer, 0.0)
                .segment(1, DataType::Integer, 0.0)
                .segment(2, DataType::Integer, 0.0),
        );
        let mut scratch = IndexScratch::new(index);
        scratch.segments[1].apply(SegmentProbe::Equal(lit(1)), 2, 0);
        assert_eq!(scratch.usable_prefix(), 0);
        assert!(!scratch.has_match());

        scratch.segments[0].apply(SegmentProbe::Lower(Bound::exclusive(lit(1))), 1, 0);
        assert_eq!(scratch.usable_prefix(), 1);
        assert_eq!(scratch.matches().len(), 1);

        scratch.segments[0].apply(SegmentProbe::Equal(lit(3)), 3, 0);
        scratch.segments[2].apply(SegmentProbe::Upper(Bound::inclusive(lit(4))), 4, 0);
        assert_eq!(scratch.usable_prefix(), 3);
        assert_eq!(scratch.lower_count(), 2);
        assert_eq!(scratch.upper_count(), 3);

        scratch.segments[1] = SegmentMatch::default();
        scratch.normalize();
        assert_eq!(scratch.segments[2].scan, ScanType::None);
    }

    #[test]
    fn test_single_list_per_key() {
        let index = Arc::new(
            IndexDescriptor::new(1, "IDX_AB")
                .segment(0, DataType::Integer, 0.0)
                .segment(1, DataType::Integer, 0.0),
        );
        let mut scratch = IndexScratch::new(index);
        scratch.segments[0].apply(SegmentProbe::List(vec![lit(1), lit(2)]), 1, 0);
        scratch.segments[1].apply(SegmentProbe::List(vec![lit(3), lit(4)]), 2, 0);
        assert_eq!(scratch.usable_prefix(), 1);
        let retrieval = scratch.retrieval();
        assert_eq!(retrieval.list.as_ref().map(|l| l.segment), Some(0));
        assert_eq!(retrieval.keys.len(), 1);
    }

    #[test]
    fn test_dependencies_exclude_own_stream() {
        let index = Arc::new(IndexDescriptor::new(1, "IDX_A").segment(0, DataType::Integer, 0.0));
        let mut scratch = IndexScratch::new(index);
        scratch.segments[0].apply(SegmentProbe::Equal(Expr::field(2, 0, DataType::Integer)), 1, 0);
        assert_eq!(scratch.dependencies(1).into_iter().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_conditional_index_implied_by_comparison() {
        let condition = BoolExpr::is_not_null(100, Expr::field(0, 3, DataType::Integer));
        let index = Arc::new(
            IndexDescriptor::new(7, "IDX_D")
                .segment(3, DataType::Integer, 0.01)
                .condition(condition, 0.4),
        );
        let gt = BoolExpr::gt(1, col(3), lit(10));
        let set = build_scratches(1, &[Arc::clone(&index)], &[&gt]);
        assert_eq!(set.scratches.len(), 1);
        assert!(!set.scratches[0].condition_exact);
        assert!(set.scratches[0].condition_matches.is_empty());

        let other = BoolExpr::gt(2, col(4), lit(10));
        let set = build_scratches(1, &[index], &[&other]);
        assert!(set.scratches.is_empty());
        assert_eq!(set.excluded, vec![(7, ExclusionReason::UnmetCondition)]);
    }

    #[test]
    fn test_conditional_index_exact_and_or_subset() {
        let stored = BoolExpr::or(
            100,
            BoolExpr::eq(101, Expr::field(0, 2, DataType::Integer), lit(1)),
            BoolExpr::eq(102, Expr::field(0, 2, DataType::Integer), lit(2)),
        );
        let index = Arc::new(
            IndexDescriptor::new(3, "IDX_STATUS")
                .segment(0, DataType::Integer, 0.0)
                .condition(stored, 0.2),
        );

        let exact = BoolExpr::or(
            10,
            BoolExpr::eq(11, col(2), lit(1)),
            BoolExpr::eq(12, col(2), lit(2)),
        );
        let set = build_scratches(1, &[Arc::clone(&index)], &[&exact]);
        assert!(set.scratches[0].condition_exact);
        assert_eq!(set.scratches[0].condition_matches.iter().copied().collect::<Vec<_>>(), vec![10]);

        // A single alternative implies the disjunction
        let subset = BoolExpr::eq(20, col(2), lit(2));
        let set = build_scratches(1, &[Arc::clone(&index)], &[&subset]);
        assert_eq!(set.scratches.len(), 1);
        assert!(!set.scratches[0].condition_exact);

        let outside = BoolExpr::eq(30, col(2), lit(3));
        assert!(build_scratches(1, &[index], &[&outside]).scratches.is_empty());
    }

    #[test]
    fn test_blob_index_excluded() {
        let index = Arc::new(IndexDescriptor::new(9, "IDX_BLOB").segment(0, DataType::Blob, 0.0));
        let set = build_scratches(1, &[index], &[]);
        assert_eq!(set.excluded, vec![(9, ExclusionReason::UnindexableType)]);
    }

    #[test]
    fn test_scratch_mismatch_detected() {
        let index = Arc::new(IndexDescriptor::new(1, "IDX_A").segment(0, DataType::Integer, 0.0));
        let mut scratch = IndexScratch::new(index);
        assert!(scratch.validate().is_ok());
        scratch.segments.push(SegmentMatch::default());
        assert_eq!(
            scratch.validate(),
            Err(PlannerError::ScratchMismatch {
                index: 1,
                expected: 1,
                actual: 2
            })
        );
    }
}
