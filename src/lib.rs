//! aeroplan - A deterministic, cost-based index-retrieval planner
//!
//! Given one stream, its indexes and the predicates of a query block, chooses
//! the cheapest way to fetch the stream's rows.

pub mod observability;
pub mod planner;
