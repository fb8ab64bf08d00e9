//! Index metadata provided by the catalog
//!
//! Descriptors are loaded and refreshed by the metadata layer and shared
//! read-only between concurrent compilations; the planner never mutates them.

use super::ast::{BoolExpr, ColumnId, Expr};
use super::errors::{PlannerError, PlannerResult};

/// Identifier of an index
pub type IndexId = u32;

/// Storage type of a key segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Smallint,
    Integer,
    Bigint,
    Numeric { scale: i8 },
    Double,
    Char,
    Varchar,
    Date,
    Time,
    Timestamp,
    Boolean,
    Blob,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeFamily {
    Numeric,
    Text,
    Temporal,
    Boolean,
    Blob,
}

impl DataType {
    fn family(&self) -> TypeFamily {
        match self {
            DataType::Smallint
            | DataType::Integer
            | DataType::Bigint
            | DataType::Numeric { .. }
            | DataType::Double => TypeFamily::Numeric,
            DataType::Char | DataType::Varchar => TypeFamily::Text,
            DataType::Date | DataType::Time | DataType::Timestamp => TypeFamily::Temporal,
            DataType::Boolean => TypeFamily::Boolean,
            DataType::Blob => TypeFamily::Blob,
        }
    }

    /// Average bytes this type contributes to an index key
    pub fn key_length(&self) -> u32 {
        match self {
            DataType::Boolean => 1,
            DataType::Smallint => 2,
            DataType::Integer | DataType::Date | DataType::Time => 4,
            DataType::Bigint
            | DataType::Numeric { .. }
            | DataType::Double
            | DataType::Timestamp => 8,
            DataType::Char | DataType::Varchar => 32,
            DataType::Blob => 0,
        }
    }

    /// Returns true for integer-backed types with a fixed decimal scale
    pub fn is_exact_numeric(&self) -> bool {
        matches!(
            self,
            DataType::Smallint | DataType::Integer | DataType::Bigint | DataType::Numeric { .. }
        )
    }

    /// Decimal scale of exact numerics
    pub fn scale(&self) -> Option<i8> {
        match self {
            DataType::Numeric { scale } => Some(*scale),
            DataType::Smallint | DataType::Integer | DataType::Bigint => Some(0),
            _ => None,
        }
    }

    pub fn is_text(&self) -> bool {
        self.family() == TypeFamily::Text
    }

    pub fn is_boolean(&self) -> bool {
        self.family() == TypeFamily::Boolean
    }

    /// Returns true if a value of `bound` can be turned into a key of this type
    /// without changing comparison semantics.
    pub fn index_comparable(&self, bound: &DataType) -> bool {
        match (self.family(), bound.family()) {
            (TypeFamily::Blob, _) | (_, TypeFamily::Blob) => false,
            (a, b) if a == b => true,
            // String literals are converted to dates/timestamps before keying
            (TypeFamily::Temporal, TypeFamily::Text) => true,
            _ => false,
        }
    }
}

/// Collation of a text segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collation {
    pub name: String,
    /// Keys of this collation sort like the collation compares values
    pub binary_order: bool,
    /// STARTING WITH needs several key prefixes (contractions, ignorable units)
    pub multi_starting_key: bool,
}

impl Collation {
    /// Plain byte-order collation
    pub fn binary() -> Self {
        Self {
            name: "OCTETS".to_string(),
            binary_order: true,
            multi_starting_key: false,
        }
    }

    /// A linguistic collation whose keys do not follow byte order
    pub fn linguistic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            binary_order: false,
            multi_starting_key: false,
        }
    }

    /// Marks the collation as needing multi-prefix STARTING WITH keys
    pub fn with_multi_starting_key(mut self) -> Self {
        self.multi_starting_key = true;
        self
    }
}

impl Default for Collation {
    fn default() -> Self {
        Self::binary()
    }
}

/// One key position of an index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSegment {
    /// Source column (unused for expression indexes)
    pub column: ColumnId,
    /// Storage type of the key part
    pub ty: DataType,
    /// Selectivity of the key prefix ending at this segment; 0 when unknown
    pub selectivity: f64,
    pub collation: Collation,
}

impl IndexSegment {
    pub fn new(column: ColumnId, ty: DataType, selectivity: f64) -> Self {
        Self {
            column,
            ty,
            selectivity,
            collation: Collation::binary(),
        }
    }

    pub fn with_collation(mut self, collation: Collation) -> Self {
        self.collation = collation;
        self
    }
}

/// Catalog description of an index
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDescriptor {
    pub id: IndexId,
    pub name: String,
    pub segments: Vec<IndexSegment>,
    pub unique: bool,
    pub primary: bool,
    pub foreign: bool,
    pub descending: bool,
    /// Key expression of an expression index, stored against stream 0
    pub expression: Option<Expr>,
    /// Condition of a partial index, stored against stream 0
    pub condition: Option<BoolExpr>,
    /// Fraction of the table's rows that satisfy `condition`
    pub fraction: f64,
}

impl IndexDescriptor {
    /// Creates an ascending, non-unique index without segments
    pub fn new(id: IndexId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            segments: Vec::new(),
            unique: false,
            primary: false,
            foreign: false,
            descending: false,
            expression: None,
            condition: None,
            fraction: 1.0,
        }
    }

    /// Appends a column segment
    pub fn segment(mut self, column: ColumnId, ty: DataType, selectivity: f64) -> Self {
        self.segments.push(IndexSegment::new(column, ty, selectivity));
        self
    }

    /// Appends a fully described segment
    pub fn with_segment(mut self, segment: IndexSegment) -> Self {
        self.segments.push(segment);
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Primary key indexes are unique and reject NULLs
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self.unique = true;
        self
    }

    pub fn foreign(mut self) -> Self {
        self.foreign = true;
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    /// Turns this into an expression index with a single key segment
    pub fn expression(mut self, expr: Expr, ty: DataType, selectivity: f64) -> Self {
        self.expression = Some(expr);
        self.segments = vec![IndexSegment::new(0, ty, selectivity)];
        self
    }

    /// Turns this into a partial index covering `fraction` of the rows
    pub fn condition(mut self, condition: BoolExpr, fraction: f64) -> Self {
        self.condition = Some(condition);
        self.fraction = fraction;
        self
    }

    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }

    pub fn is_expression(&self) -> bool {
        self.expression.is_some()
    }

    /// Average key length including per-entry overhead
    pub fn avg_key_length(&self, key_overhead: u32) -> u32 {
        self.segments.iter().map(|s| s.ty.key_length()).sum::<u32>() + key_overhead
    }

    /// Checks the descriptor's internal consistency.
    ///
    /// A `segment` equal to the segment count in
    /// [`PlannerError::InvalidSelectivity`] refers to the condition fraction.
    pub fn validate(&self) -> PlannerResult<()> {
        if self.segments.is_empty() {
            return Err(PlannerError::EmptyIndex { index: self.id });
        }
        if self.is_expression() && self.segments.len() != 1 {
            return Err(PlannerError::ExpressionArity {
                index: self.id,
                segments: self.segments.len(),
            });
        }
        for (pos, segment) in self.segments.iter().enumerate() {
            if !(0.0..=1.0).contains(&segment.selectivity) {
                return Err(PlannerError::InvalidSelectivity {
                    index: self.id,
                    segment: pos,
                    value: segment.selectivity,
                });
            }
        }
        if !(self.fraction > 0.0 && self.fraction <= 1.0) {
            return Err(PlannerError::InvalidSelectivity {
                index: self.id,
                segment: self.segments.len(),
                value: self.fraction,
            });
        }
        Ok(())
    }
}
