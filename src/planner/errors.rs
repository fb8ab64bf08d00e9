//! Planner error types
//!
//! Error codes:
//! - AERO_PLAN_INVALID_CARDINALITY (FATAL)
//! - AERO_PLAN_INVALID_SELECTIVITY (FATAL)
//! - AERO_PLAN_EMPTY_INDEX (FATAL)
//! - AERO_PLAN_EXPRESSION_ARITY (FATAL)
//! - AERO_PLAN_DUPLICATE_INDEX (FATAL)
//! - AERO_PLAN_DUPLICATE_PREDICATE (FATAL)
//! - AERO_PLAN_SCRATCH_MISMATCH (FATAL)
//! - AERO_PLAN_INVALID_CONFIG (FATAL)
//!
//! Every planner error is an invariant violation in the input handed over by
//! the compiler or the catalog. Index exclusions are not errors; a query that
//! cannot use any index silently falls back to a natural scan.

use std::fmt;

use thiserror::Error;

use super::ast::PredicateId;
use super::catalog::IndexId;

/// Severity levels for planner errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Statement compilation must abort
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Planner-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannerErrorCode {
    AeroPlanInvalidCardinality,
    AeroPlanInvalidSelectivity,
    AeroPlanEmptyIndex,
    AeroPlanExpressionArity,
    AeroPlanDuplicateIndex,
    AeroPlanDuplicatePredicate,
    AeroPlanScratchMismatch,
    AeroPlanInvalidConfig,
}

impl PlannerErrorCode {
    /// Returns the stable string code
    pub fn code(&self) -> &'static str {
        match self {
            PlannerErrorCode::AeroPlanInvalidCardinality => "AERO_PLAN_INVALID_CARDINALITY",
            PlannerErrorCode::AeroPlanInvalidSelectivity => "AERO_PLAN_INVALID_SELECTIVITY",
            PlannerErrorCode::AeroPlanEmptyIndex => "AERO_PLAN_EMPTY_INDEX",
            PlannerErrorCode::AeroPlanExpressionArity => "AERO_PLAN_EXPRESSION_ARITY",
            PlannerErrorCode::AeroPlanDuplicateIndex => "AERO_PLAN_DUPLICATE_INDEX",
            PlannerErrorCode::AeroPlanDuplicatePredicate => "AERO_PLAN_DUPLICATE_PREDICATE",
            PlannerErrorCode::AeroPlanScratchMismatch => "AERO_PLAN_SCRATCH_MISMATCH",
            PlannerErrorCode::AeroPlanInvalidConfig => "AERO_PLAN_INVALID_CONFIG",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        Severity::Fatal
    }

    /// Returns which collaborator handed over the inconsistent input
    pub fn origin(&self) -> &'static str {
        match self {
            PlannerErrorCode::AeroPlanInvalidCardinality => "compiler",
            PlannerErrorCode::AeroPlanDuplicatePredicate => "compiler",
            PlannerErrorCode::AeroPlanInvalidSelectivity => "catalog",
            PlannerErrorCode::AeroPlanEmptyIndex => "catalog",
            PlannerErrorCode::AeroPlanExpressionArity => "catalog",
            PlannerErrorCode::AeroPlanDuplicateIndex => "catalog",
            PlannerErrorCode::AeroPlanScratchMismatch => "planner",
            PlannerErrorCode::AeroPlanInvalidConfig => "config",
        }
    }
}

impl fmt::Display for PlannerErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Planner error type
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlannerError {
    #[error("stream cardinality must be a finite, non-negative number (got {0})")]
    InvalidCardinality(f64),

    #[error("index {index} segment {segment} has selectivity {value} outside [0, 1]")]
    InvalidSelectivity {
        index: IndexId,
        segment: usize,
        value: f64,
    },

    #[error("index {index} has no segments")]
    EmptyIndex { index: IndexId },

    #[error("expression index {index} must have exactly one segment (has {segments})")]
    ExpressionArity { index: IndexId, segments: usize },

    #[error("index id {0} appears more than once for the stream")]
    DuplicateIndexId(IndexId),

    #[error("predicate id {0} appears more than once in the predicate tree")]
    DuplicatePredicateId(PredicateId),

    #[error("scratch for index {index} has {actual} segments, descriptor has {expected}")]
    ScratchMismatch {
        index: IndexId,
        expected: usize,
        actual: usize,
    },

    #[error("invalid planner configuration field '{field}': {reason}")]
    InvalidConfig { field: &'static str, reason: String },
}

impl PlannerError {
    /// Create an invalid configuration error
    pub fn invalid_config(field: &'static str, reason: impl Into<String>) -> Self {
        PlannerError::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }

    /// Returns the error code
    pub fn code(&self) -> PlannerErrorCode {
        match self {
            PlannerError::InvalidCardinality(_) => PlannerErrorCode::AeroPlanInvalidCardinality,
            PlannerError::InvalidSelectivity { .. } => PlannerErrorCode::AeroPlanInvalidSelectivity,
            PlannerError::EmptyIndex { .. } => PlannerErrorCode::AeroPlanEmptyIndex,
            PlannerError::ExpressionArity { .. } => PlannerErrorCode::AeroPlanExpressionArity,
            PlannerError::DuplicateIndexId(_) => PlannerErrorCode::AeroPlanDuplicateIndex,
            PlannerError::DuplicatePredicateId(_) => PlannerErrorCode::AeroPlanDuplicatePredicate,
            PlannerError::ScratchMismatch { .. } => PlannerErrorCode::AeroPlanScratchMismatch,
            PlannerError::InvalidConfig { .. } => PlannerErrorCode::AeroPlanInvalidConfig,
        }
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code().severity()
    }

    /// Planner errors always abort the statement compilation
    pub fn is_fatal(&self) -> bool {
        matches!(self.severity(), Severity::Fatal)
    }

    /// Renders the error the way it is reported in logs and EXPLAIN output
    pub fn report(&self) -> String {
        format!("[{}] {}: {}", self.severity(), self.code(), self)
    }
}

/// Result type for planner operations
pub type PlannerResult<T> = Result<T, PlannerError>;
