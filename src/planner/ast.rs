//! Predicate and sort structures handed over by the SQL compiler
//!
//! The planner only reads these trees. Every boolean node carries a
//! compiler-assigned [`PredicateId`]; the planner reports the ids it considers
//! enforced by the chosen retrieval instead of tagging the nodes in place.

use std::collections::BTreeSet;

use super::catalog::DataType;

/// Identifier of a stream (one relation occurrence in a query block)
pub type StreamId = u32;

/// Identifier of a boolean node in the predicate tree
pub type PredicateId = u32;

/// Column position within a relation
pub type ColumnId = u16;

/// A value expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference into a stream
    Field {
        stream: StreamId,
        column: ColumnId,
        ty: DataType,
    },
    /// Physical record identifier; several streams for a join concatenation
    DbKey { streams: Vec<StreamId> },
    /// Constant value
    Literal(serde_json::Value),
    /// Statement parameter, bound at execution time
    Parameter { index: u32, ty: Option<DataType> },
    /// Computed expression (function call, arithmetic, cast)
    Function {
        name: String,
        args: Vec<Expr>,
        ty: Option<DataType>,
    },
    /// Boolean negation of a value
    Not(Box<Expr>),
}

impl Expr {
    /// Column reference
    pub fn field(stream: StreamId, column: ColumnId, ty: DataType) -> Self {
        Expr::Field { stream, column, ty }
    }

    /// Constant value
    pub fn literal(value: serde_json::Value) -> Self {
        Expr::Literal(value)
    }

    /// Untyped statement parameter
    pub fn param(index: u32) -> Self {
        Expr::Parameter { index, ty: None }
    }

    /// Record identifier of a single stream
    pub fn db_key(stream: StreamId) -> Self {
        Expr::DbKey {
            streams: vec![stream],
        }
    }

    /// Function call with a declared result type
    pub fn function(name: impl Into<String>, args: Vec<Expr>, ty: Option<DataType>) -> Self {
        Expr::Function {
            name: name.into(),
            args,
            ty,
        }
    }

    /// Collects every stream referenced by this expression
    pub fn collect_streams(&self, out: &mut BTreeSet<StreamId>) {
        match self {
            Expr::Field { stream, .. } => {
                out.insert(*stream);
            }
            Expr::DbKey { streams } => out.extend(streams.iter().copied()),
            Expr::Literal(_) | Expr::Parameter { .. } => {}
            Expr::Function { args, .. } => {
                for arg in args {
                    arg.collect_streams(out);
                }
            }
            Expr::Not(inner) => inner.collect_streams(out),
        }
    }

    /// Returns the set of referenced streams
    pub fn streams(&self) -> BTreeSet<StreamId> {
        let mut out = BTreeSet::new();
        self.collect_streams(&mut out);
        out
    }

    /// Returns true if the expression references the given stream
    pub fn references(&self, stream: StreamId) -> bool {
        match self {
            Expr::Field { stream: s, .. } => *s == stream,
            Expr::DbKey { streams } => streams.contains(&stream),
            Expr::Literal(_) | Expr::Parameter { .. } => false,
            Expr::Function { args, .. } => args.iter().any(|a| a.references(stream)),
            Expr::Not(inner) => inner.references(stream),
        }
    }

    /// Static type of the expression, `None` when unknown or NULL
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Expr::Field { ty, .. } => Some(*ty),
            Expr::DbKey { .. } => None,
            Expr::Literal(value) => match value {
                serde_json::Value::Bool(_) => Some(DataType::Boolean),
                serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => Some(DataType::Bigint),
                serde_json::Value::Number(_) => Some(DataType::Double),
                serde_json::Value::String(_) => Some(DataType::Varchar),
                _ => None,
            },
            Expr::Parameter { ty, .. } => *ty,
            Expr::Function { ty, .. } => *ty,
            Expr::Not(_) => Some(DataType::Boolean),
        }
    }

    /// Returns a copy with every column reference moved onto `stream`.
    ///
    /// Expression-index definitions are stored against stream 0 by the catalog.
    pub fn rebind(&self, stream: StreamId) -> Expr {
        match self {
            Expr::Field { column, ty, .. } => Expr::Field {
                stream,
                column: *column,
                ty: *ty,
            },
            Expr::DbKey { .. } => Expr::db_key(stream),
            Expr::Literal(_) | Expr::Parameter { .. } => self.clone(),
            Expr::Function { name, args, ty } => Expr::Function {
                name: name.clone(),
                args: args.iter().map(|a| a.rebind(stream)).collect(),
                ty: *ty,
            },
            Expr::Not(inner) => Expr::Not(Box::new(inner.rebind(stream))),
        }
    }

    /// A literal empty string
    pub fn is_empty_string(&self) -> bool {
        matches!(self, Expr::Literal(serde_json::Value::String(s)) if s.is_empty())
    }

    /// A literal NULL
    pub fn is_null_literal(&self) -> bool {
        matches!(self, Expr::Literal(serde_json::Value::Null))
    }
}

/// Binary comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `IS NOT DISTINCT FROM`, matches NULL with NULL
    Equiv,
    /// `<>`
    NotEq,
    /// `>`
    Gt,
    /// `>=`
    Geq,
    /// `<`
    Lt,
    /// `<=`
    Leq,
    /// `STARTING WITH`
    StartingWith,
}

impl CompareOp {
    /// Operator to use once the operands are swapped, `None` if not reversible
    pub fn reversed(self) -> Option<CompareOp> {
        match self {
            CompareOp::Eq | CompareOp::Equiv | CompareOp::NotEq => Some(self),
            CompareOp::Gt => Some(CompareOp::Lt),
            CompareOp::Geq => Some(CompareOp::Leq),
            CompareOp::Lt => Some(CompareOp::Gt),
            CompareOp::Leq => Some(CompareOp::Geq),
            CompareOp::StartingWith => None,
        }
    }

    /// Returns the operator name for explain output
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Equiv => "IS NOT DISTINCT FROM",
            CompareOp::NotEq => "<>",
            CompareOp::Gt => ">",
            CompareOp::Geq => ">=",
            CompareOp::Lt => "<",
            CompareOp::Leq => "<=",
            CompareOp::StartingWith => "STARTING WITH",
        }
    }
}

/// The comparison-like leaf forms
#[derive(Debug, Clone, PartialEq)]
pub enum CompareKind {
    Binary {
        op: CompareOp,
        left: Expr,
        right: Expr,
    },
    Between {
        operand: Expr,
        lower: Expr,
        upper: Expr,
    },
    InList {
        operand: Expr,
        values: Vec<Expr>,
    },
    IsNull(Expr),
    IsNotNull(Expr),
}

/// A comparison leaf with its compiler-assigned id
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub id: PredicateId,
    pub kind: CompareKind,
}

impl Comparison {
    /// Every operand expression of the comparison
    pub fn operands(&self) -> Vec<&Expr> {
        match &self.kind {
            CompareKind::Binary { left, right, .. } => vec![left, right],
            CompareKind::Between {
                operand,
                lower,
                upper,
            } => vec![operand, lower, upper],
            CompareKind::InList { operand, values } => {
                let mut all = vec![operand];
                all.extend(values.iter());
                all
            }
            CompareKind::IsNull(operand) | CompareKind::IsNotNull(operand) => vec![operand],
        }
    }

    /// True if a row satisfying this comparison has a non-NULL `operand`
    pub fn rejects_null_of(&self, operand: &Expr) -> bool {
        match &self.kind {
            CompareKind::Binary { op, left, right } => {
                *op != CompareOp::Equiv && (left == operand || right == operand)
            }
            CompareKind::Between {
                operand: o,
                lower,
                upper,
            } => o == operand || lower == operand || upper == operand,
            CompareKind::InList { operand: o, .. } => o == operand,
            CompareKind::IsNull(_) => false,
            CompareKind::IsNotNull(o) => o == operand,
        }
    }
}

/// A boolean predicate tree
#[derive(Debug, Clone, PartialEq)]
pub enum BoolExpr {
    And {
        id: PredicateId,
        left: Box<BoolExpr>,
        right: Box<BoolExpr>,
    },
    Or {
        id: PredicateId,
        left: Box<BoolExpr>,
        right: Box<BoolExpr>,
    },
    Compare(Comparison),
    /// A boolean the planner cannot look into (UDF call, LIKE, subquery, ...)
    Opaque {
        id: PredicateId,
        streams: BTreeSet<StreamId>,
    },
}

impl BoolExpr {
    fn binary(id: PredicateId, op: CompareOp, left: Expr, right: Expr) -> Self {
        BoolExpr::Compare(Comparison {
            id,
            kind: CompareKind::Binary { op, left, right },
        })
    }

    /// `left = right`
    pub fn eq(id: PredicateId, left: Expr, right: Expr) -> Self {
        Self::binary(id, CompareOp::Eq, left, right)
    }

    /// `left IS NOT DISTINCT FROM right`
    pub fn equiv(id: PredicateId, left: Expr, right: Expr) -> Self {
        Self::binary(id, CompareOp::Equiv, left, right)
    }

    /// `left <> right`
    pub fn not_eq(id: PredicateId, left: Expr, right: Expr) -> Self {
        Self::binary(id, CompareOp::NotEq, left, right)
    }

    /// `left > right`
    pub fn gt(id: PredicateId, left: Expr, right: Expr) -> Self {
        Self::binary(id, CompareOp::Gt, left, right)
    }

    /// `left >= right`
    pub fn geq(id: PredicateId, left: Expr, right: Expr) -> Self {
        Self::binary(id, CompareOp::Geq, left, right)
    }

    /// `left < right`
    pub fn lt(id: PredicateId, left: Expr, right: Expr) -> Self {
        Self::binary(id, CompareOp::Lt, left, right)
    }

    /// `left <= right`
    pub fn leq(id: PredicateId, left: Expr, right: Expr) -> Self {
        Self::binary(id, CompareOp::Leq, left, right)
    }

    /// `left STARTING WITH right`
    pub fn starting(id: PredicateId, left: Expr, right: Expr) -> Self {
        Self::binary(id, CompareOp::StartingWith, left, right)
    }

    /// `operand BETWEEN lower AND upper`
    pub fn between(id: PredicateId, operand: Expr, lower: Expr, upper: Expr) -> Self {
        BoolExpr::Compare(Comparison {
            id,
            kind: CompareKind::Between {
                operand,
                lower,
                upper,
            },
        })
    }

    /// `operand IN (values...)`
    pub fn in_list(id: PredicateId, operand: Expr, values: Vec<Expr>) -> Self {
        BoolExpr::Compare(Comparison {
            id,
            kind: CompareKind::InList { operand, values },
        })
    }

    /// `operand IS NULL`
    pub fn is_null(id: PredicateId, operand: Expr) -> Self {
        BoolExpr::Compare(Comparison {
            id,
            kind: CompareKind::IsNull(operand),
        })
    }

    /// `operand IS NOT NULL`
    pub fn is_not_null(id: PredicateId, operand: Expr) -> Self {
        BoolExpr::Compare(Comparison {
            id,
            kind: CompareKind::IsNotNull(operand),
        })
    }

    /// `left AND right`
    pub fn and(id: PredicateId, left: BoolExpr, right: BoolExpr) -> Self {
        BoolExpr::And {
            id,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// `left OR right`
    pub fn or(id: PredicateId, left: BoolExpr, right: BoolExpr) -> Self {
        BoolExpr::Or {
            id,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// A boolean the planner treats as a black box
    pub fn opaque(id: PredicateId, streams: impl IntoIterator<Item = StreamId>) -> Self {
        BoolExpr::Opaque {
            id,
            streams: streams.into_iter().collect(),
        }
    }

    /// Returns the node's id
    pub fn id(&self) -> PredicateId {
        match self {
            BoolExpr::And { id, .. } | BoolExpr::Or { id, .. } | BoolExpr::Opaque { id, .. } => {
                *id
            }
            BoolExpr::Compare(cmp) => cmp.id,
        }
    }

    /// Returns true for an OR node
    pub fn is_or(&self) -> bool {
        matches!(self, BoolExpr::Or { .. })
    }

    /// Collects every stream referenced anywhere in the tree
    pub fn collect_streams(&self, out: &mut BTreeSet<StreamId>) {
        match self {
            BoolExpr::And { left, right, .. } | BoolExpr::Or { left, right, .. } => {
                left.collect_streams(out);
                right.collect_streams(out);
            }
            BoolExpr::Compare(cmp) => {
                for operand in cmp.operands() {
                    operand.collect_streams(out);
                }
            }
            BoolExpr::Opaque { streams, .. } => out.extend(streams.iter().copied()),
        }
    }

    /// Returns true if the tree references the given stream
    pub fn references(&self, stream: StreamId) -> bool {
        let mut streams = BTreeSet::new();
        self.collect_streams(&mut streams);
        streams.contains(&stream)
    }

    /// Collects the ids of every node in the tree, in pre-order
    pub fn collect_ids(&self, out: &mut Vec<PredicateId>) {
        out.push(self.id());
        if let BoolExpr::And { left, right, .. } | BoolExpr::Or { left, right, .. } = self {
            left.collect_ids(out);
            right.collect_ids(out);
        }
    }

    /// Flattens nested ANDs into their conjuncts
    pub fn conjuncts(&self) -> Vec<&BoolExpr> {
        let mut out = Vec::new();
        self.flatten(&mut out, false);
        out
    }

    /// Flattens nested ORs into their disjuncts
    pub fn disjuncts(&self) -> Vec<&BoolExpr> {
        let mut out = Vec::new();
        self.flatten(&mut out, true);
        out
    }

    fn flatten<'a>(&'a self, out: &mut Vec<&'a BoolExpr>, or: bool) {
        match self {
            BoolExpr::And { left, right, .. } if !or => {
                left.flatten(out, or);
                right.flatten(out, or);
            }
            BoolExpr::Or { left, right, .. } if or => {
                left.flatten(out, or);
                right.flatten(out, or);
            }
            _ => out.push(self),
        }
    }

    /// Returns a copy with every column reference moved onto `stream`
    pub fn rebind(&self, stream: StreamId) -> BoolExpr {
        match self {
            BoolExpr::And { id, left, right } => BoolExpr::and(*id, left.rebind(stream), right.rebind(stream)),
            BoolExpr::Or { id, left, right } => BoolExpr::or(*id, left.rebind(stream), right.rebind(stream)),
            BoolExpr::Compare(cmp) => {
                let kind = match &cmp.kind {
                    CompareKind::Binary { op, left, right } => CompareKind::Binary {
                        op: *op,
                        left: left.rebind(stream),
                        right: right.rebind(stream),
                    },
                    CompareKind::Between {
                        operand,
                        lower,
                        upper,
                    } => CompareKind::Between {
                        operand: operand.rebind(stream),
                        lower: lower.rebind(stream),
                        upper: upper.rebind(stream),
                    },
                    CompareKind::InList { operand, values } => CompareKind::InList {
                        operand: operand.rebind(stream),
                        values: values.iter().map(|v| v.rebind(stream)).collect(),
                    },
                    CompareKind::IsNull(operand) => CompareKind::IsNull(operand.rebind(stream)),
                    CompareKind::IsNotNull(operand) => CompareKind::IsNotNull(operand.rebind(stream)),
                };
                BoolExpr::Compare(Comparison { id: cmp.id, kind })
            }
            BoolExpr::Opaque { id, .. } => BoolExpr::opaque(*id, [stream]),
        }
    }

    /// Structural equality ignoring node ids
    pub fn same_shape(&self, other: &BoolExpr) -> bool {
        match (self, other) {
            (
                BoolExpr::And {
                    left: l1,
                    right: r1,
                    ..
                },
                BoolExpr::And {
                    left: l2,
                    right: r2,
                    ..
                },
            )
            | (
                BoolExpr::Or {
                    left: l1,
                    right: r1,
                    ..
                },
                BoolExpr::Or {
                    left: l2,
                    right: r2,
                    ..
                },
            ) => l1.same_shape(l2) && r1.same_shape(r2),
            (BoolExpr::Compare(a), BoolExpr::Compare(b)) => a.kind == b.kind,
            (BoolExpr::Opaque { id: a, .. }, BoolExpr::Opaque { id: b, .. }) => a == b,
            _ => false,
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// Where NULLs go in the requested order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullsPlacement {
    /// First for ascending, last for descending
    Default,
    First,
    Last,
}

/// One key of a requested sort order
#[derive(Debug, Clone, PartialEq)]
pub struct SortItem {
    pub expr: Expr,
    pub direction: SortDirection,
    pub nulls: NullsPlacement,
}

impl SortItem {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            direction: SortDirection::Asc,
            nulls: NullsPlacement::Default,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            direction: SortDirection::Desc,
            nulls: NullsPlacement::Default,
        }
    }

    /// Sets an explicit NULL placement
    pub fn with_nulls(mut self, nulls: NullsPlacement) -> Self {
        self.nulls = nulls;
        self
    }

    /// Returns true if NULLs must come first in the delivered order
    pub fn nulls_first(&self) -> bool {
        match self.nulls {
            NullsPlacement::Default => self.direction == SortDirection::Asc,
            NullsPlacement::First => true,
            NullsPlacement::Last => false,
        }
    }
}
