//! Retrieval planning for one stream
//!
//! Entry point of the planner. Runs matching, evaluation, selection and the
//! navigation analysis over one stream and produces an immutable
//! [`RetrievalPlan`].
//!
//! Planning is deterministic: same request and configuration, same plan.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use super::ast::{BoolExpr, Expr, PredicateId, SortItem, StreamId};
use super::candidate::CandidateEvaluator;
use super::catalog::IndexDescriptor;
use super::config::PlannerConfig;
use super::cost::CostModel;
use super::errors::{PlannerError, PlannerResult};
use super::inversion::{IndexRetrieval, InversionNode};
use super::matcher::BooleanMatcher;
use super::navigation::NavigationAnalyzer;
use super::rowid::RowIdRange;
use super::scratch::build_scratches;
use super::selector::{CandidateSelector, Selection};
use crate::observability::{ObservationScope, PlannerEvent, PlannerMetrics};

/// Shared state of one planning pass
pub struct PlanContext<'a> {
    pub stream: StreamId,
    /// Clamped cardinality estimate
    pub cardinality: f64,
    pub model: CostModel<'a>,
    /// Streams whose values are known before this one is read
    pub outer_streams: BTreeSet<StreamId>,
    /// Top-level conjuncts, ANDs flattened
    pub conjuncts: Vec<&'a BoolExpr>,
    pub favor_first_rows: bool,
    pub explicit_plan: bool,
    pub system_request: bool,
    pub metrics: Option<&'a PlannerMetrics>,
}

impl<'a> PlanContext<'a> {
    pub fn new(stream: StreamId, cardinality: f64, model: CostModel<'a>) -> Self {
        Self {
            stream,
            cardinality,
            model,
            outer_streams: BTreeSet::new(),
            conjuncts: Vec::new(),
            favor_first_rows: false,
            explicit_plan: false,
            system_request: false,
            metrics: None,
        }
    }

    pub fn with_conjuncts(mut self, conjuncts: Vec<&'a BoolExpr>) -> Self {
        self.conjuncts = conjuncts;
        self
    }

    pub fn with_outer_streams(mut self, streams: impl IntoIterator<Item = StreamId>) -> Self {
        self.outer_streams.extend(streams);
        self
    }

    /// Returns true if `expr` can be evaluated before the stream is read
    pub fn computable(&self, expr: &Expr) -> bool {
        expr.streams()
            .iter()
            .all(|s| *s != self.stream && self.outer_streams.contains(s))
    }

    pub fn small_table(&self) -> bool {
        self.model.is_small_table(self.cardinality)
    }

    /// Updates the metrics registry, if one is attached
    pub fn count(&self, update: impl FnOnce(&PlannerMetrics)) {
        if let Some(metrics) = self.metrics {
            update(metrics);
        }
    }
}

/// Everything the compiler hands over for one stream
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalRequest {
    pub stream: StreamId,
    /// Estimated row count, clamped to the statistical floor when planning
    pub cardinality: f64,
    pub indexes: Vec<Arc<IndexDescriptor>>,
    /// Predicates of the query block; nested ANDs are flattened
    pub conjuncts: Vec<BoolExpr>,
    /// Requested order, empty if none
    pub sort: Vec<SortItem>,
    pub outer_streams: BTreeSet<StreamId>,
    pub favor_first_rows: bool,
    /// Disables the cost cutoffs; every usable index is combined
    pub explicit_plan: bool,
    /// Internal metadata request
    pub system_request: bool,
}

impl RetrievalRequest {
    pub fn new(stream: StreamId, cardinality: f64) -> Self {
        Self {
            stream,
            cardinality,
            indexes: Vec::new(),
            conjuncts: Vec::new(),
            sort: Vec::new(),
            outer_streams: BTreeSet::new(),
            favor_first_rows: false,
            explicit_plan: false,
            system_request: false,
        }
    }

    pub fn with_index(mut self, index: IndexDescriptor) -> Self {
        self.indexes.push(Arc::new(index));
        self
    }

    /// Adds a descriptor shared with the catalog
    pub fn with_shared_index(mut self, index: Arc<IndexDescriptor>) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_conjunct(mut self, conjunct: BoolExpr) -> Self {
        self.conjuncts.push(conjunct);
        self
    }

    pub fn order_by(mut self, item: SortItem) -> Self {
        self.sort.push(item);
        self
    }

    pub fn with_outer_stream(mut self, stream: StreamId) -> Self {
        self.outer_streams.insert(stream);
        self
    }

    pub fn favor_first_rows(mut self) -> Self {
        self.favor_first_rows = true;
        self
    }

    pub fn explicit_plan(mut self) -> Self {
        self.explicit_plan = true;
        self
    }

    pub fn system_request(mut self) -> Self {
        self.system_request = true;
        self
    }
}

/// Immutable retrieval plan (no planning state)
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalPlan {
    pub stream: StreamId,
    /// Filtering index tree; `None` with no record-id ranges is a natural scan
    pub inversion: Option<InversionNode>,
    pub rowid_ranges: Vec<RowIdRange>,
    /// Ordered scan replacing the sort, if navigated
    pub navigation: Option<IndexRetrieval>,
    pub selectivity: f64,
    /// Index page cost; row fetches excluded
    pub cost: f64,
    pub cardinality: f64,
    /// At most one row is delivered
    pub unique: bool,
    /// Predicates the retrieval enforces; the rest must still be filtered
    pub matches: BTreeSet<PredicateId>,
}

impl RetrievalPlan {
    /// Returns true if the stream is read in storage order, unrestricted
    pub fn is_natural(&self) -> bool {
        self.inversion.is_none() && self.rowid_ranges.is_empty() && self.navigation.is_none()
    }

    pub fn navigated(&self) -> bool {
        self.navigation.is_some()
    }

    pub fn estimated_rows(&self) -> f64 {
        self.cardinality * self.selectivity
    }

    /// Index cost plus one fetch per delivered row
    pub fn total_cost(&self) -> f64 {
        self.cost + self.estimated_rows()
    }

    /// Names of the filtering indexes, in tree order
    pub fn index_names(&self) -> Vec<String> {
        self.inversion
            .as_ref()
            .map(InversionNode::index_names)
            .unwrap_or_default()
    }

    /// Returns true if the predicate no longer needs a residual filter
    pub fn enforces(&self, predicate: PredicateId) -> bool {
        self.matches.contains(&predicate)
    }
}

/// Plans the retrieval of single streams
pub struct RetrievalPlanner<'a> {
    config: &'a PlannerConfig,
    metrics: Option<&'a PlannerMetrics>,
}

impl<'a> RetrievalPlanner<'a> {
    /// Creates a new planner
    pub fn new(config: &'a PlannerConfig) -> Self {
        Self {
            config,
            metrics: None,
        }
    }

    /// Counts planning decisions into `metrics`
    pub fn with_metrics(mut self, metrics: &'a PlannerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Plans one stream, returning an immutable plan or error.
    ///
    /// Errors are invariant violations of the request; a stream no index
    /// can serve yields a natural-scan plan, not an error.
    pub fn plan(&self, request: &RetrievalRequest) -> PlannerResult<RetrievalPlan> {
        let scope = ObservationScope::plan(request.stream);
        match scope.span().in_scope(|| self.build(request)) {
            Ok(plan) => {
                let access = if plan.is_natural() { "natural" } else { "indexed" };
                scope.complete(access, plan.estimated_rows());
                Ok(plan)
            }
            Err(err) => {
                if let Some(metrics) = self.metrics {
                    metrics.increment_planning_errors();
                }
                scope.fail(err.code().code(), &err.to_string());
                Err(err)
            }
        }
    }

    fn build(&self, request: &RetrievalRequest) -> PlannerResult<RetrievalPlan> {
        // 1. Reject inconsistent input before touching it
        self.validate(request)?;

        let model = CostModel::new(self.config);
        let cardinality = model.clamp_cardinality(request.cardinality);
        let conjuncts: Vec<&BoolExpr> = request.conjuncts.iter().flat_map(BoolExpr::conjuncts).collect();
        let mut ctx = PlanContext::new(request.stream, cardinality, model)
            .with_conjuncts(conjuncts)
            .with_outer_streams(request.outer_streams.iter().copied());
        ctx.favor_first_rows = request.favor_first_rows;
        ctx.explicit_plan = request.explicit_plan;
        ctx.system_request = request.system_request;
        ctx.metrics = self.metrics;

        // 2. One scratch per usable index
        let set = build_scratches(ctx.stream, &request.indexes, &ctx.conjuncts);
        for (index, reason) in &set.excluded {
            ctx.count(|m| m.increment_indexes_excluded());
            debug!(
                event = PlannerEvent::IndexExcluded.as_str(),
                stream = ctx.stream,
                index,
                reason = reason.as_str(),
            );
        }
        let mut scratches = set.scratches;
        for scratch in &scratches {
            scratch.validate()?;
        }

        // 3. Match predicates, then evaluate every scratch
        let composed = BooleanMatcher::new(&ctx).match_conjuncts(&mut scratches);
        let index_candidates = CandidateEvaluator::new(&ctx).evaluate_all(&mut scratches, None);
        let mut candidates = index_candidates.clone();
        candidates.extend(composed);

        // 4. Filtering selection
        let selector = CandidateSelector::new(&ctx);
        let mut selection = selector.make_inversion(candidates.clone(), None);
        if !self.worth_indexing(&ctx, &selection) {
            debug!(
                stream = ctx.stream,
                total = selection.total_cost(cardinality),
                "index retrieval not cheaper than a natural scan"
            );
            selection = Selection::natural();
        }

        // 5. Sort avoidance
        let mut navigation = None;
        let analyzed = NavigationAnalyzer::new(&ctx).analyze(&request.sort, &scratches, &index_candidates, &selection);
        if let Some(nav) = analyzed {
            if nav.better_than_sort {
                ctx.count(|m| m.increment_navigations_chosen());
                debug!(
                    event = PlannerEvent::NavigationChosen.as_str(),
                    stream = ctx.stream,
                    index = nav.index,
                    navigation_cost = nav.navigation_cost,
                    sort_cost = nav.sort_cost,
                );
                selection = selector.make_inversion(candidates, Some(&nav.candidate));
                navigation = Some(nav.retrieval);
            } else {
                ctx.count(|m| m.increment_navigations_rejected());
                debug!(
                    event = PlannerEvent::NavigationRejected.as_str(),
                    stream = ctx.stream,
                    index = nav.index,
                    navigation_cost = nav.navigation_cost,
                    sort_cost = nav.sort_cost,
                );
            }
        }

        // 6. Build immutable plan
        let (inversion, rowid_ranges) = match selection.inversion {
            Some(candidate) => (candidate.inversion, candidate.rowid_ranges),
            None => (None, Vec::new()),
        };
        let plan = RetrievalPlan {
            stream: request.stream,
            inversion,
            rowid_ranges,
            navigation,
            selectivity: selection.selectivity,
            cost: selection.cost,
            cardinality,
            unique: selection.unique,
            matches: selection.matches,
        };

        ctx.count(|m| m.increment_plans_built());
        if plan.is_natural() {
            ctx.count(|m| m.increment_natural_scans());
            debug!(
                event = PlannerEvent::NaturalScan.as_str(),
                stream = plan.stream,
                cost = plan.total_cost(),
            );
        }
        Ok(plan)
    }

    /// A filtering selection is kept only if it beats reading every row,
    /// unless the heuristics are relaxed or the selection is unique.
    fn worth_indexing(&self, ctx: &PlanContext<'_>, selection: &Selection) -> bool {
        selection.inversion.is_none()
            || selection.unique
            || ctx.explicit_plan
            || ctx.system_request
            || ctx.small_table()
            || selection.total_cost(ctx.cardinality) < ctx.model.natural_scan_cost(ctx.cardinality)
    }

    fn validate(&self, request: &RetrievalRequest) -> PlannerResult<()> {
        self.config.validate()?;

        if !request.cardinality.is_finite() || request.cardinality < 0.0 {
            return Err(PlannerError::InvalidCardinality(request.cardinality));
        }

        let mut index_ids = BTreeSet::new();
        for index in &request.indexes {
            index.validate()?;
            if !index_ids.insert(index.id) {
                return Err(PlannerError::DuplicateIndexId(index.id));
            }
        }

        let mut predicate_ids = BTreeSet::new();
        for conjunct in &request.conjuncts {
            let mut ids = Vec::new();
            conjunct.collect_ids(&mut ids);
            for id in ids {
                if !predicate_ids.insert(id) {
                    return Err(PlannerError::DuplicatePredicateId(id));
                }
            }
        }
        Ok(())
    }
}
