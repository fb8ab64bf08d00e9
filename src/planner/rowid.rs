//! Record-id matcher
//!
//! Recognizes comparisons that bound the physical record id of the stream
//! directly. A record-id seek touches no index pages, so every candidate
//! built here costs nothing; only its selectivity differs.

use std::collections::BTreeSet;

use super::ast::{CompareKind, CompareOp, Comparison, Expr, StreamId};
use super::candidate::InversionCandidate;
use super::inversion::{Bound, InversionNode};
use super::retrieval::PlanContext;

/// A record-id interval handed straight to the executor
#[derive(Debug, Clone, PartialEq)]
pub struct RowIdRange {
    pub lower: Option<Bound>,
    pub upper: Option<Bound>,
    /// Position of this stream's id inside a concatenated join key
    pub component: usize,
}

enum RowIdMatch {
    /// Direct fetch of each value
    Lookup(Vec<Expr>),
    /// Equality on one component of a concatenated key
    Point(RowIdRange),
    Range(RowIdRange),
}

/// Builds a candidate if `cmp` restricts the record id of the stream
pub fn match_rowid(ctx: &PlanContext<'_>, cmp: &Comparison) -> Option<InversionCandidate> {
    let found = match &cmp.kind {
        CompareKind::Binary { op, left, right } => {
            let (op, component, value) = if let Some(c) = component(ctx, left) {
                (*op, c, right)
            } else if let Some(c) = component(ctx, right) {
                (op.reversed()?, c, left)
            } else {
                return None;
            };
            if !ctx.computable(value) {
                return None;
            }
            let concatenated = [left, right]
                .iter()
                .any(|e| matches!(e, Expr::DbKey { streams } if streams.len() > 1));
            binary_match(op, component, value, concatenated)?
        }
        CompareKind::Between {
            operand,
            lower,
            upper,
        } => {
            let component = component(ctx, operand)?;
            if !ctx.computable(lower) || !ctx.computable(upper) {
                return None;
            }
            RowIdMatch::Range(RowIdRange {
                lower: Some(Bound::inclusive(lower.clone())),
                upper: Some(Bound::inclusive(upper.clone())),
                component,
            })
        }
        CompareKind::InList { operand, values } => {
            // Lookups address whole record ids only
            if !matches!(operand, Expr::DbKey { streams } if streams.as_slice() == [ctx.stream]) {
                return None;
            }
            if values.is_empty() || !values.iter().all(|v| ctx.computable(v)) {
                return None;
            }
            RowIdMatch::Lookup(values.clone())
        }
        CompareKind::IsNull(_) | CompareKind::IsNotNull(_) => return None,
    };

    let model = &ctx.model;
    let config = model.config();
    let cardinality = ctx.cardinality;
    let mut candidate = InversionCandidate {
        cost: 0.0,
        matches: BTreeSet::from([cmp.id]),
        dependencies: dependencies(ctx.stream, cmp),
        ..InversionCandidate::empty()
    };
    match found {
        RowIdMatch::Lookup(values) => {
            candidate.unique = values.len() == 1;
            candidate.selectivity = model.clamp_selectivity(values.len() as f64 / cardinality);
            candidate.inversion = Some(InversionNode::RowIdLookup(values));
        }
        RowIdMatch::Point(range) => {
            candidate.unique = true;
            candidate.selectivity = model.clamp_selectivity(1.0 / cardinality);
            candidate.rowid_ranges.push(range);
        }
        RowIdMatch::Range(range) => {
            let factor = match (&range.lower, &range.upper) {
                (Some(_), Some(_)) => config.reduce_factor_between,
                (Some(_), None) => config.reduce_factor_greater,
                _ => config.reduce_factor_less,
            };
            candidate.selectivity = model.clamp_selectivity(factor);
            candidate.rowid_ranges.push(range);
        }
    }
    Some(candidate)
}

fn binary_match(op: CompareOp, component: usize, value: &Expr, concatenated: bool) -> Option<RowIdMatch> {
    let range = |lower: Option<Bound>, upper: Option<Bound>| RowIdRange {
        lower,
        upper,
        component,
    };
    Some(match op {
        // A join key compares the whole concatenation; keep this stream's part
        CompareOp::Eq | CompareOp::Equiv if concatenated => RowIdMatch::Point(range(
            Some(Bound::inclusive(value.clone())),
            Some(Bound::inclusive(value.clone())),
        )),
        CompareOp::Eq | CompareOp::Equiv => RowIdMatch::Lookup(vec![value.clone()]),
        CompareOp::Gt => RowIdMatch::Range(range(Some(Bound::exclusive(value.clone())), None)),
        CompareOp::Geq => RowIdMatch::Range(range(Some(Bound::inclusive(value.clone())), None)),
        CompareOp::Lt => RowIdMatch::Range(range(None, Some(Bound::exclusive(value.clone())))),
        CompareOp::Leq => RowIdMatch::Range(range(None, Some(Bound::inclusive(value.clone())))),
        CompareOp::NotEq | CompareOp::StartingWith => return None,
    })
}

/// Position of the stream inside a record-id expression
fn component(ctx: &PlanContext<'_>, expr: &Expr) -> Option<usize> {
    match expr {
        Expr::DbKey { streams } => streams.iter().position(|s| *s == ctx.stream),
        _ => None,
    }
}

fn dependencies(stream: StreamId, cmp: &Comparison) -> BTreeSet<StreamId> {
    let mut out = BTreeSet::new();
    for operand in cmp.operands() {
        operand.collect_streams(&mut out);
    }
    out.remove(&stream);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::ast::BoolExpr;
    use crate::planner::catalog::DataType;
    use crate::planner::config::PlannerConfig;
    use crate::planner::cost::CostModel;
    use serde_json::json;

    fn comparison(expr: BoolExpr) -> Comparison {
        match expr {
            BoolExpr::Compare(cmp) => cmp,
            other => panic!("not a comparison: {:?}", other),
        }
    }

    #[test]
    fn test_equality_lookup_is_unique() {
        let config = PlannerConfig::default();
        let ctx = PlanContext::new(1, 1000.0, CostModel::new(&config));
        let cmp = comparison(BoolExpr::eq(4, Expr::db_key(1), Expr::param(0)));

        let candidate = match_rowid(&ctx, &cmp).unwrap();
        assert!(candidate.unique);
        assert_eq!(candidate.selectivity, 0.001);
        assert_eq!(candidate.cost, 0.0);
        assert_eq!(candidate.matches, BTreeSet::from([4]));
        assert!(matches!(candidate.inversion, Some(InversionNode::RowIdLookup(ref v)) if v.len() == 1));
    }

    #[test]
    fn test_reversed_range() {
        let config = PlannerConfig::default();
        let ctx = PlanContext::new(1, 1000.0, CostModel::new(&config));
        // 10 < RDB$DB_KEY  is  RDB$DB_KEY > 10
        let cmp = comparison(BoolExpr::lt(2, Expr::literal(json!(10)), Expr::db_key(1)));

        let candidate = match_rowid(&ctx, &cmp).unwrap();
        assert!(candidate.inversion.is_none());
        assert_eq!(candidate.selectivity, config.reduce_factor_greater);
        let range = &candidate.rowid_ranges[0];
        assert_eq!(range.lower, Some(Bound::exclusive(Expr::literal(json!(10)))));
        assert!(range.upper.is_none());
    }

    #[test]
    fn test_in_list_and_between() {
        let config = PlannerConfig::default();
        let ctx = PlanContext::new(1, 1000.0, CostModel::new(&config));
        let cmp = comparison(BoolExpr::in_list(
            3,
            Expr::db_key(1),
            vec![Expr::param(0), Expr::param(1), Expr::param(2)],
        ));
        let candidate = match_rowid(&ctx, &cmp).unwrap();
        assert!(!candidate.unique);
        assert!((candidate.selectivity - 0.003).abs() < 1e-12);

        let cmp = comparison(BoolExpr::between(5, Expr::db_key(1), Expr::param(0), Expr::param(1)));
        let candidate = match_rowid(&ctx, &cmp).unwrap();
        assert_eq!(candidate.selectivity, config.reduce_factor_between);
    }

    #[test]
    fn test_join_key_component() {
        let config = PlannerConfig::default();
        let ctx = PlanContext::new(2, 1000.0, CostModel::new(&config));
        let joined = Expr::DbKey { streams: vec![1, 2] };
        let cmp = comparison(BoolExpr::eq(6, joined, Expr::param(0)));

        let candidate = match_rowid(&ctx, &cmp).unwrap();
        assert!(candidate.unique);
        assert_eq!(candidate.rowid_ranges[0].component, 1);
        assert_eq!(candidate.dependencies, BTreeSet::from([1]));
    }

    #[test]
    fn test_foreign_or_unbound_keys_ignored() {
        let config = PlannerConfig::default();
        let ctx = PlanContext::new(1, 1000.0, CostModel::new(&config));
        let other_stream = comparison(BoolExpr::eq(1, Expr::db_key(2), Expr::param(0)));
        assert!(match_rowid(&ctx, &other_stream).is_none());

        let self_reference = comparison(BoolExpr::eq(
            2,
            Expr::db_key(1),
            Expr::field(1, 0, DataType::Bigint),
        ));
        assert!(match_rowid(&ctx, &self_reference).is_none());

        let not_eq = comparison(BoolExpr::not_eq(3, Expr::db_key(1), Expr::param(0)));
        assert!(match_rowid(&ctx, &not_eq).is_none());
    }
}
