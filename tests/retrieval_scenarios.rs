//! Retrieval Planning Scenarios
//!
//! End-to-end tests of the planner over whole requests:
//! - Unique lookups, OR composition, partial indexes
//! - Sort avoidance through index navigation
//! - Record-id access, join dependencies, plan modes
//! - Rejected requests and explain output

use aeroplan::observability::PlannerMetrics;
use aeroplan::planner::{
    BoolExpr, DataType, ExplainPlan, Expr, IndexDescriptor, InversionNode, PlannerConfig,
    PlannerError, RetrievalPlan, RetrievalPlanner, RetrievalRequest, SortItem, StreamId,
};
use serde_json::json;

// =============================================================================
// Helper Functions
// =============================================================================

const T: StreamId = 1;
const J: StreamId = 2;

fn col(column: u16) -> Expr {
    Expr::field(T, column, DataType::Integer)
}

fn text(column: u16) -> Expr {
    Expr::field(T, column, DataType::Varchar)
}

fn lit(v: i64) -> Expr {
    Expr::literal(json!(v))
}

fn plan(request: &RetrievalRequest) -> RetrievalPlan {
    let config = PlannerConfig::default();
    RetrievalPlanner::new(&config).plan(request).unwrap()
}

fn plan_with_metrics(request: &RetrievalRequest, metrics: &PlannerMetrics) -> RetrievalPlan {
    let config = PlannerConfig::default();
    RetrievalPlanner::new(&config)
        .with_metrics(metrics)
        .plan(request)
        .unwrap()
}

fn access(plan: &RetrievalPlan) -> String {
    ExplainPlan::from_plan(plan).access.unwrap_or_default()
}

fn approx(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-12,
        "expected {}, got {}",
        expected,
        actual
    );
}

// =============================================================================
// Scenario A: Unique Equality
// =============================================================================

/// A fully bound unique index is used alone.
#[test_log::test]
fn test_unique_equality_used_alone() {
    let request = RetrievalRequest::new(T, 100_000.0)
        .with_index(
            IndexDescriptor::new(1, "IDX_A")
                .segment(0, DataType::Integer, 0.00001)
                .unique(),
        )
        .with_index(IndexDescriptor::new(2, "IDX_X").segment(1, DataType::Integer, 0.0001))
        .with_conjunct(BoolExpr::eq(1, col(0), lit(5)))
        .with_conjunct(BoolExpr::eq(2, col(1), lit(9)));

    let metrics = PlannerMetrics::new();
    let plan = plan_with_metrics(&request, &metrics);

    assert!(plan.unique);
    assert_eq!(plan.index_names(), vec!["IDX_A".to_string()]);
    approx(plan.selectivity, 1e-5);
    // One descent plus one fetch
    approx(plan.cost, PlannerConfig::default().default_index_cost + 1.0);
    assert!(plan.enforces(1));
    assert!(!plan.enforces(2));
    assert_eq!(metrics.snapshot().unique_lookups, 1);
}

/// A unique index bound by an outer stream is picked immediately.
#[test_log::test]
fn test_unique_join_lookup_wins() {
    let request = RetrievalRequest::new(T, 100_000.0)
        .with_index(
            IndexDescriptor::new(1, "IDX_PK")
                .segment(0, DataType::Integer, 0.0)
                .primary()
                .unique(),
        )
        .with_index(IndexDescriptor::new(2, "IDX_X").segment(1, DataType::Integer, 0.00001))
        .with_conjunct(BoolExpr::eq(1, col(0), Expr::field(J, 0, DataType::Integer)))
        .with_conjunct(BoolExpr::eq(2, col(1), lit(3)))
        .with_outer_stream(J);

    let plan = plan(&request);
    assert!(plan.unique);
    assert_eq!(plan.index_names(), vec!["IDX_PK".to_string()]);
    assert!(plan.enforces(1));
    assert!(!plan.enforces(2));
}

/// Without the outer stream bound, the join key cannot drive the index.
#[test]
fn test_unbound_join_key_not_usable() {
    let request = RetrievalRequest::new(T, 100_000.0)
        .with_index(
            IndexDescriptor::new(1, "IDX_PK")
                .segment(0, DataType::Integer, 0.0)
                .unique(),
        )
        .with_index(IndexDescriptor::new(2, "IDX_X").segment(1, DataType::Integer, 0.00001))
        .with_conjunct(BoolExpr::eq(1, col(0), Expr::field(J, 0, DataType::Integer)))
        .with_conjunct(BoolExpr::eq(2, col(1), lit(3)));

    let plan = plan(&request);
    assert!(!plan.unique);
    assert_eq!(plan.index_names(), vec!["IDX_X".to_string()]);
    assert!(!plan.enforces(1));
}

// =============================================================================
// Scenario B: OR Composition
// =============================================================================

/// Two equalities on one index become an IN of two scans.
#[test_log::test]
fn test_or_on_same_index_becomes_in() {
    let request = RetrievalRequest::new(T, 100_000.0)
        .with_index(IndexDescriptor::new(1, "IDX_B").segment(1, DataType::Integer, 0.01))
        .with_conjunct(BoolExpr::or(
            3,
            BoolExpr::eq(1, col(1), lit(5)),
            BoolExpr::eq(2, col(1), lit(7)),
        ));

    let plan = plan(&request);
    approx(plan.selectivity, 0.01 + 0.01 - 0.0001);
    assert!(matches!(plan.inversion, Some(InversionNode::In(..))));
    assert!(plan.enforces(3));
    assert_eq!(access(&plan), "INDEX (IDX_B)");
}

/// Branches served by different indexes are united by a generic OR.
#[test]
fn test_or_across_indexes() {
    let request = RetrievalRequest::new(T, 100_000.0)
        .with_index(IndexDescriptor::new(1, "IDX_B").segment(1, DataType::Integer, 0.01))
        .with_index(IndexDescriptor::new(2, "IDX_C").segment(2, DataType::Integer, 0.02))
        .with_conjunct(BoolExpr::or(
            3,
            BoolExpr::eq(1, col(1), lit(5)),
            BoolExpr::eq(2, col(2), lit(7)),
        ));

    let plan = plan(&request);
    assert!(matches!(plan.inversion, Some(InversionNode::Or(..))));
    approx(plan.selectivity, 0.01 + 0.02 - 0.0002);
    assert_eq!(plan.index_names(), vec!["IDX_B".to_string(), "IDX_C".to_string()]);
}

/// An OR with one unindexable side does not restrict the stream.
#[test]
fn test_or_with_unindexable_branch_is_natural() {
    let request = RetrievalRequest::new(T, 100_000.0)
        .with_index(IndexDescriptor::new(1, "IDX_B").segment(1, DataType::Integer, 0.01))
        .with_conjunct(BoolExpr::or(
            3,
            BoolExpr::eq(1, col(1), lit(5)),
            BoolExpr::opaque(2, [T]),
        ));

    let plan = plan(&request);
    assert!(plan.is_natural());
    assert!(!plan.enforces(3));
}

// =============================================================================
// Scenario C: Empty STARTING WITH
// =============================================================================

/// Every string starts with '', so the predicate restricts nothing.
#[test]
fn test_starting_with_empty_string_not_indexed() {
    let request = RetrievalRequest::new(T, 100_000.0)
        .with_index(IndexDescriptor::new(1, "IDX_C").segment(2, DataType::Varchar, 0.01))
        .with_conjunct(BoolExpr::starting(1, text(2), Expr::literal(json!(""))));

    let plan = plan(&request);
    assert!(plan.is_natural());
    assert!(!plan.enforces(1));
}

#[test]
fn test_starting_with_prefix_indexed() {
    let request = RetrievalRequest::new(T, 100_000.0)
        .with_index(IndexDescriptor::new(1, "IDX_C").segment(2, DataType::Varchar, 0.01))
        .with_conjunct(BoolExpr::starting(1, text(2), Expr::literal(json!("ab"))));

    let plan = plan(&request);
    assert_eq!(plan.index_names(), vec!["IDX_C".to_string()]);
    assert!(plan.enforces(1));
}

// =============================================================================
// Scenario D: Partial Indexes
// =============================================================================

/// A comparison on the column implies the index's NOT NULL condition.
#[test_log::test]
fn test_partial_index_implied_by_comparison() {
    let request = RetrievalRequest::new(T, 100_000.0)
        .with_index(
            IndexDescriptor::new(4, "IDX_D")
                .segment(3, DataType::Integer, 0.001)
                .condition(BoolExpr::is_not_null(100, col(3)), 0.3),
        )
        .with_conjunct(BoolExpr::gt(1, col(3), lit(10)));

    let plan = plan(&request);
    assert_eq!(plan.index_names(), vec!["IDX_D".to_string()]);
    // Open range factor, then the condition fraction
    approx(plan.selectivity, 0.05 * 0.3);
    assert!(plan.enforces(1));
}

/// An unmet condition drops the index before matching.
#[test]
fn test_partial_index_excluded() {
    let request = RetrievalRequest::new(T, 100_000.0)
        .with_index(
            IndexDescriptor::new(4, "IDX_D")
                .segment(3, DataType::Integer, 0.001)
                .condition(BoolExpr::is_not_null(100, col(5)), 0.3),
        )
        .with_conjunct(BoolExpr::eq(1, col(3), lit(10)));

    let metrics = PlannerMetrics::new();
    let plan = plan_with_metrics(&request, &metrics);

    assert!(plan.is_natural());
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.indexes_excluded, 1);
    assert_eq!(snapshot.natural_scans, 1);
}

// =============================================================================
// Scenario E: Sort Avoidance
// =============================================================================

/// Sorting every row of a large table beats walking the index.
#[test_log::test]
fn test_unfiltered_sort_beats_navigation() {
    for cardinality in [10_000.0, 100_000.0, 1_000_000.0] {
        let request = RetrievalRequest::new(T, cardinality)
            .with_index(IndexDescriptor::new(5, "IDX_E").segment(4, DataType::Integer, 0.0))
            .order_by(SortItem::asc(col(4)));

        let metrics = PlannerMetrics::new();
        let plan = plan_with_metrics(&request, &metrics);

        assert!(!plan.navigated(), "navigated at cardinality {}", cardinality);
        assert!(plan.is_natural());
        assert_eq!(metrics.snapshot().navigations_rejected, 1);
    }
}

/// Statistics at the floor are not trusted; the index is walked.
#[test]
fn test_floor_cardinality_navigates() {
    let request = RetrievalRequest::new(T, 0.0)
        .with_index(IndexDescriptor::new(5, "IDX_E").segment(4, DataType::Integer, 0.0))
        .order_by(SortItem::asc(col(4)));

    let plan = plan(&request);
    assert!(plan.navigated());
    assert_eq!(access(&plan), "ORDER IDX_E");
}

/// First-rows mode walks the order index and filters through another.
#[test_log::test]
fn test_first_rows_navigation_with_filter() {
    let request = RetrievalRequest::new(T, 1_000_000.0)
        .with_index(IndexDescriptor::new(1, "IDX_A").segment(0, DataType::Integer, 0.001))
        .with_index(IndexDescriptor::new(5, "IDX_S").segment(4, DataType::Integer, 0.0))
        .with_conjunct(BoolExpr::eq(1, col(0), lit(1)))
        .order_by(SortItem::asc(col(4)))
        .favor_first_rows();

    let metrics = PlannerMetrics::new();
    let plan = plan_with_metrics(&request, &metrics);

    assert!(plan.navigated());
    assert_eq!(access(&plan), "ORDER IDX_S INDEX (IDX_A)");
    assert!(plan.enforces(1));
    assert_eq!(metrics.snapshot().navigations_chosen, 1);
}

/// A descending sort needs a descending index.
#[test]
fn test_direction_mismatch_not_navigated() {
    let request = RetrievalRequest::new(T, 0.0)
        .with_index(IndexDescriptor::new(5, "IDX_E").segment(4, DataType::Integer, 0.0))
        .order_by(SortItem::desc(col(4)));
    assert!(!plan(&request).navigated());

    let request = RetrievalRequest::new(T, 0.0)
        .with_index(
            IndexDescriptor::new(5, "IDX_E_DESC")
                .segment(4, DataType::Integer, 0.0)
                .descending(),
        )
        .order_by(SortItem::desc(col(4)));
    let plan = plan(&request);
    assert!(plan.navigated());
    assert!(plan.navigation.as_ref().is_some_and(|n| n.descending));
}

// =============================================================================
// Record-Id Access
// =============================================================================

#[test]
fn test_record_id_lookup() {
    let request = RetrievalRequest::new(T, 100_000.0)
        .with_index(IndexDescriptor::new(1, "IDX_A").segment(0, DataType::Integer, 0.001))
        .with_conjunct(BoolExpr::eq(1, Expr::db_key(T), Expr::param(0)))
        .with_conjunct(BoolExpr::eq(2, col(0), lit(1)));

    let plan = plan(&request);
    assert!(plan.unique);
    assert!(matches!(plan.inversion, Some(InversionNode::RowIdLookup(_))));
    assert_eq!(access(&plan), "DBKEY");
    assert_eq!(plan.cost, 0.0);
    assert!(!plan.enforces(2));
}

#[test]
fn test_record_id_range() {
    let request = RetrievalRequest::new(T, 100_000.0)
        .with_conjunct(BoolExpr::gt(1, Expr::db_key(T), Expr::param(0)));

    let plan = plan(&request);
    assert!(!plan.is_natural());
    assert!(plan.inversion.is_none());
    assert_eq!(plan.rowid_ranges.len(), 1);
    approx(plan.selectivity, PlannerConfig::default().reduce_factor_greater);
}

// =============================================================================
// Plan Modes
// =============================================================================

/// An index reading most of the table is replaced by a natural scan.
#[test]
fn test_unselective_index_falls_back_to_natural() {
    let request = RetrievalRequest::new(T, 100_000.0)
        .with_index(IndexDescriptor::new(1, "IDX_FLAG").segment(0, DataType::Integer, 1.0))
        .with_conjunct(BoolExpr::eq(1, col(0), lit(1)));

    assert!(plan(&request).is_natural());
    // Explicit plans and system requests keep the index
    assert!(!plan(&request.clone().explicit_plan()).is_natural());
    assert!(!plan(&request.system_request()).is_natural());
}

/// Explicit plans combine indexes the cost cutoff would stop at.
#[test]
fn test_explicit_plan_combines_all_indexes() {
    let request = RetrievalRequest::new(T, 100_000.0)
        .with_index(IndexDescriptor::new(1, "IDX_A").segment(0, DataType::Integer, 0.00001))
        .with_index(IndexDescriptor::new(2, "IDX_B").segment(1, DataType::Integer, 0.001))
        .with_conjunct(BoolExpr::eq(1, col(0), lit(1)))
        .with_conjunct(BoolExpr::eq(2, col(1), lit(2)));

    assert_eq!(plan(&request).index_names(), vec!["IDX_A".to_string()]);
    assert_eq!(
        plan(&request.explicit_plan()).index_names(),
        vec!["IDX_A".to_string(), "IDX_B".to_string()]
    );
}

/// A lower small-table threshold in JSON changes nothing else.
#[test]
fn test_config_from_json() {
    let config = PlannerConfig::from_json_str(r#"{"threshold_cardinality": 1000000.0}"#).unwrap();
    let request = RetrievalRequest::new(T, 100_000.0)
        .with_index(IndexDescriptor::new(1, "IDX_FLAG").segment(0, DataType::Integer, 1.0))
        .with_conjunct(BoolExpr::eq(1, col(0), lit(1)));

    // Small tables keep any usable index
    let plan = RetrievalPlanner::new(&config).plan(&request).unwrap();
    assert_eq!(plan.index_names(), vec!["IDX_FLAG".to_string()]);
    assert_eq!(config.page_size, PlannerConfig::default().page_size);
}

// =============================================================================
// Rejections and Determinism
// =============================================================================

#[test]
fn test_invalid_config_rejects_request() {
    let config = PlannerConfig {
        page_size: 100,
        ..PlannerConfig::default()
    };
    let err = RetrievalPlanner::new(&config)
        .plan(&RetrievalRequest::new(T, 10.0))
        .unwrap_err();
    assert!(matches!(err, PlannerError::InvalidConfig { .. }));
    assert!(err.is_fatal());

    let explain = ExplainPlan::from_error(&err);
    assert!(format!("{}", explain).contains("AERO_PLAN_INVALID_CONFIG"));
}

#[test]
fn test_invalid_selectivity_rejected() {
    let request = RetrievalRequest::new(T, 10.0)
        .with_index(IndexDescriptor::new(3, "IDX_BAD").segment(0, DataType::Integer, 1.5));
    let config = PlannerConfig::default();
    let err = RetrievalPlanner::new(&config).plan(&request).unwrap_err();
    assert_eq!(
        err,
        PlannerError::InvalidSelectivity {
            index: 3,
            segment: 0,
            value: 1.5
        }
    );
}

/// Same request, same plan.
#[test]
fn test_planning_is_deterministic() {
    let request = RetrievalRequest::new(T, 250_000.0)
        .with_index(IndexDescriptor::new(1, "IDX_A").segment(0, DataType::Integer, 0.01))
        .with_index(IndexDescriptor::new(2, "IDX_B").segment(1, DataType::Integer, 0.01))
        .with_index(
            IndexDescriptor::new(3, "IDX_AB")
                .segment(0, DataType::Integer, 0.01)
                .segment(1, DataType::Integer, 0.0005),
        )
        .with_conjunct(BoolExpr::eq(1, col(0), lit(1)))
        .with_conjunct(BoolExpr::or(
            4,
            BoolExpr::eq(2, col(1), lit(2)),
            BoolExpr::eq(3, col(1), lit(3)),
        ))
        .order_by(SortItem::asc(col(1)));

    let first = plan(&request);
    for _ in 0..10 {
        assert_eq!(plan(&request), first);
    }
    assert_eq!(
        format!("{}", ExplainPlan::from_plan(&first)),
        format!("{}", ExplainPlan::from_plan(&plan(&request)))
    );
}
