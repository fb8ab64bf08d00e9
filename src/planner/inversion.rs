//! Inversion tree
//!
//! The composed retrieval handed to the execution-plan builder: index-scan
//! leaves and record-id lookups combined with AND / OR / IN, optionally
//! guarded by a runtime condition. Once planning finishes the tree is
//! immutable and may be read by many executors concurrently.

use std::fmt;

use super::ast::{BoolExpr, Expr};
use super::catalog::IndexId;

/// One end of a key range
#[derive(Debug, Clone, PartialEq)]
pub struct Bound {
    pub value: Expr,
    /// `>` / `<` rather than `>=` / `<=`
    pub exclusive: bool,
}

impl Bound {
    pub fn inclusive(value: Expr) -> Self {
        Self {
            value,
            exclusive: false,
        }
    }

    pub fn exclusive(value: Expr) -> Self {
        Self {
            value,
            exclusive: true,
        }
    }
}

/// Key range of one index segment, in value order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeyRange {
    pub lower: Option<Bound>,
    pub upper: Option<Bound>,
}

/// Segment probed once per list value
#[derive(Debug, Clone, PartialEq)]
pub struct ListScan {
    pub segment: usize,
    pub values: Vec<Expr>,
}

/// Scan of one index over a key range
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRetrieval {
    pub index: IndexId,
    pub name: String,
    /// Physical key order of the index
    pub descending: bool,
    /// Usable key prefix; `keys[i]` bounds segment `i`
    pub keys: Vec<KeyRange>,
    pub list: Option<ListScan>,
    /// The last key value is a STARTING WITH prefix
    pub partial_key: bool,
    /// The collation needs several STARTING WITH key prefixes
    pub multi_starting_keys: bool,
    /// Serve the list from one scan started at the root
    pub root_list_scan: bool,
}

impl IndexRetrieval {
    /// Number of leading segments with a lower bound
    pub fn lower_count(&self) -> usize {
        self.leading(|k| k.lower.is_some())
    }

    /// Number of leading segments with an upper bound
    pub fn upper_count(&self) -> usize {
        self.leading(|k| k.upper.is_some())
    }

    fn leading(&self, bounded: impl Fn(&KeyRange) -> bool) -> usize {
        self.keys
            .iter()
            .enumerate()
            .take_while(|(pos, key)| {
                bounded(key) || self.list.as_ref().is_some_and(|l| l.segment == *pos)
            })
            .count()
    }

    /// Returns true if the scan walks the whole index
    pub fn is_full_scan(&self) -> bool {
        self.keys.is_empty() && self.list.is_none()
    }
}

/// Composed retrieval tree
#[derive(Debug, Clone, PartialEq)]
pub enum InversionNode {
    IndexScan(IndexRetrieval),
    /// Direct fetch of the given record ids
    RowIdLookup(Vec<Expr>),
    And(Box<InversionNode>, Box<InversionNode>),
    Or(Box<InversionNode>, Box<InversionNode>),
    /// OR of two scans over the same index
    In(Box<InversionNode>, Box<InversionNode>),
    /// Skipped (full scan) when `condition` holds at runtime
    Conditional {
        condition: BoolExpr,
        inversion: Box<InversionNode>,
    },
}

impl InversionNode {
    pub fn and(left: InversionNode, right: InversionNode) -> Self {
        InversionNode::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: InversionNode, right: InversionNode) -> Self {
        InversionNode::Or(Box::new(left), Box::new(right))
    }

    pub fn in_list(left: InversionNode, right: InversionNode) -> Self {
        InversionNode::In(Box::new(left), Box::new(right))
    }

    pub fn conditional(condition: BoolExpr, inversion: InversionNode) -> Self {
        InversionNode::Conditional {
            condition,
            inversion: Box::new(inversion),
        }
    }

    /// ANDs two optional trees
    pub fn conjoin(left: Option<InversionNode>, right: Option<InversionNode>) -> Option<InversionNode> {
        match (left, right) {
            (Some(l), Some(r)) => Some(InversionNode::and(l, r)),
            (l, r) => l.or(r),
        }
    }

    /// Index of the leaf if this is a single index scan
    pub fn scanned_index(&self) -> Option<IndexId> {
        match self {
            InversionNode::IndexScan(retrieval) => Some(retrieval.index),
            _ => None,
        }
    }

    /// Returns true if every leaf scans the given index
    pub fn only_scans(&self, index: IndexId) -> bool {
        match self {
            InversionNode::IndexScan(retrieval) => retrieval.index == index,
            InversionNode::In(l, r) => l.only_scans(index) && r.only_scans(index),
            _ => false,
        }
    }

    /// Names of the scanned indexes in tree order, without repeats
    pub fn index_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names(&self, out: &mut Vec<String>) {
        match self {
            InversionNode::IndexScan(retrieval) => {
                if !out.contains(&retrieval.name) {
                    out.push(retrieval.name.clone());
                }
            }
            InversionNode::RowIdLookup(_) => {}
            InversionNode::And(l, r) | InversionNode::Or(l, r) | InversionNode::In(l, r) => {
                l.collect_names(out);
                r.collect_names(out);
            }
            InversionNode::Conditional { inversion, .. } => inversion.collect_names(out),
        }
    }

    /// Number of index-scan leaves
    pub fn leaf_count(&self) -> usize {
        match self {
            InversionNode::IndexScan(_) | InversionNode::RowIdLookup(_) => 1,
            InversionNode::And(l, r) | InversionNode::Or(l, r) | InversionNode::In(l, r) => {
                l.leaf_count() + r.leaf_count()
            }
            InversionNode::Conditional { inversion, .. } => inversion.leaf_count(),
        }
    }

    /// Operator name for explain output
    pub fn kind(&self) -> &'static str {
        match self {
            InversionNode::IndexScan(_) => "INDEX",
            InversionNode::RowIdLookup(_) => "DBKEY",
            InversionNode::And(..) => "AND",
            InversionNode::Or(..) => "OR",
            InversionNode::In(..) => "IN",
            InversionNode::Conditional { .. } => "CONDITIONAL",
        }
    }
}

impl fmt::Display for InversionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InversionNode::IndexScan(retrieval) => write!(f, "{}", retrieval.name),
            InversionNode::RowIdLookup(values) => write!(f, "DBKEY[{}]", values.len()),
            InversionNode::And(l, r) => write!(f, "({} AND {})", l, r),
            InversionNode::Or(l, r) => write!(f, "({} OR {})", l, r),
            InversionNode::In(l, r) => write!(f, "({} IN {})", l, r),
            InversionNode::Conditional { inversion, .. } => write!(f, "CONDITIONAL {}", inversion),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scan(index: IndexId, name: &str, keys: Vec<KeyRange>) -> InversionNode {
        InversionNode::IndexScan(IndexRetrieval {
            index,
            name: name.to_string(),
            descending: false,
            keys,
            list: None,
            partial_key: false,
            multi_starting_keys: false,
            root_list_scan: false,
        })
    }

    fn eq_key(v: i64) -> KeyRange {
        KeyRange {
            lower: Some(Bound::inclusive(Expr::literal(json!(v)))),
            upper: Some(Bound::inclusive(Expr::literal(json!(v)))),
        }
    }

    #[test]
    fn test_bound_counts() {
        let InversionNode::IndexScan(mut retrieval) = scan(
            1,
            "IDX",
            vec![
                eq_key(1),
                KeyRange {
                    lower: Some(Bound::exclusive(Expr::literal(json!(5)))),
                    upper: None,
                },
            ],
        ) else {
            unreachable!()
        };
        assert_eq!(retrieval.lower_count(), 2);
        assert_eq!(retrieval.upper_count(), 1);

        retrieval.keys.insert(0, KeyRange::default());
        retrieval.list = Some(ListScan {
            segment: 0,
            values: vec![Expr::param(0), Expr::param(1)],
        });
        assert_eq!(retrieval.lower_count(), 3);
        assert!(!retrieval.is_full_scan());
    }

    #[test]
    fn test_index_names_dedup() {
        let tree = InversionNode::and(
            InversionNode::in_list(scan(1, "IDX_B", vec![eq_key(5)]), scan(1, "IDX_B", vec![eq_key(7)])),
            scan(2, "IDX_C", vec![eq_key(1)]),
        );
        assert_eq!(tree.index_names(), vec!["IDX_B".to_string(), "IDX_C".to_string()]);
        assert_eq!(tree.leaf_count(), 3);
        assert_eq!(tree.to_string(), "((IDX_B IN IDX_B) AND IDX_C)");
    }

    #[test]
    fn test_conjoin() {
        assert!(InversionNode::conjoin(None, None).is_none());
        let single = InversionNode::conjoin(Some(scan(1, "A", vec![])), None).unwrap();
        assert_eq!(single.scanned_index(), Some(1));
        let both = InversionNode::conjoin(Some(scan(1, "A", vec![])), Some(scan(2, "B", vec![]))).unwrap();
        assert_eq!(both.kind(), "AND");
        assert!(!both.only_scans(1));
    }
}
