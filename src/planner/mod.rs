//! Index-retrieval planner
//!
//! Decides, for one stream of a query block, how its rows are fetched: by a
//! natural scan, through one or more indexes, through record-id lookups, or
//! by walking an index in key order so that no sort is needed.
//!
//! # Design Principles
//!
//! - Deterministic: same request and configuration, same plan
//! - Read-only: compiler trees and catalog descriptors are never mutated
//! - Estimated: selectivity and page cost only, nothing is executed
//! - Honest: only predicates the retrieval enforces are reported as matched
//!
//! # Pipeline
//!
//! 1. Index scratches are seeded, one per usable index
//! 2. Conjuncts are matched into the scratches (non-OR first, then OR)
//! 3. Matched scratches become inversion candidates
//! 4. Candidates are composed greedily by total cost
//! 5. An index able to deliver the requested order is weighed against a sort

mod ast;
mod candidate;
mod catalog;
mod config;
mod cost;
mod errors;
mod explain;
mod inversion;
mod matcher;
mod navigation;
mod retrieval;
mod rowid;
mod scratch;
mod selector;

pub use ast::{
    BoolExpr, ColumnId, CompareKind, CompareOp, Comparison, Expr, NullsPlacement, PredicateId,
    SortDirection, SortItem, StreamId,
};
pub use candidate::{CandidateEvaluator, InversionCandidate};
pub use catalog::{Collation, DataType, IndexDescriptor, IndexId, IndexSegment};
pub use config::PlannerConfig;
pub use cost::CostModel;
pub use errors::{PlannerError, PlannerErrorCode, PlannerResult, Severity};
pub use explain::ExplainPlan;
pub use inversion::{Bound, IndexRetrieval, InversionNode, KeyRange, ListScan};
pub use matcher::BooleanMatcher;
pub use navigation::{NavigationAnalyzer, NavigationCandidate};
pub use retrieval::{PlanContext, RetrievalPlan, RetrievalPlanner, RetrievalRequest};
pub use rowid::{match_rowid, RowIdRange};
pub use scratch::{
    build_scratches, ExclusionReason, IndexScratch, ScanType, ScratchSet, SegmentMatch,
    SegmentProbe,
};
pub use selector::{better_candidate, CandidateSelector, Selection};
