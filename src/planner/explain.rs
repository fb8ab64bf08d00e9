//! Explain plan output
//!
//! Produces deterministic, human-readable explain output: the compact access
//! string (`NATURAL`, `INDEX (A, B)`, `ORDER X INDEX (Y)`) and an indented
//! retrieval tree.

use std::fmt;

use super::errors::PlannerError;
use super::inversion::{IndexRetrieval, InversionNode};
use super::retrieval::RetrievalPlan;

/// Explain plan output
#[derive(Debug, Clone, PartialEq)]
pub struct ExplainPlan {
    /// Whether planning succeeded
    pub accepted: bool,
    /// Compact access description (if accepted)
    pub access: Option<String>,
    /// Indented retrieval tree, one line per node
    pub tree: Vec<String>,
    pub selectivity: Option<f64>,
    pub cost: Option<f64>,
    pub estimated_rows: Option<f64>,
    pub unique: bool,
    /// Predicates no longer filtered after retrieval
    pub enforced: Vec<u32>,
    /// Rejection reason (if rejected)
    pub rejection_reason: Option<String>,
    /// Rejection error code (if rejected)
    pub rejection_code: Option<String>,
}

impl ExplainPlan {
    /// Creates an explain plan from a retrieval plan
    pub fn from_plan(plan: &RetrievalPlan) -> Self {
        let mut tree = Vec::new();
        if let Some(navigation) = &plan.navigation {
            tree.push(format!("ORDER {}", describe_retrieval(navigation)));
        }
        if let Some(inversion) = &plan.inversion {
            render_node(inversion, 0, &mut tree);
        }
        for range in &plan.rowid_ranges {
            let lower = range.lower.as_ref().map(|b| if b.exclusive { "(" } else { "[" });
            let upper = range.upper.as_ref().map(|b| if b.exclusive { ")" } else { "]" });
            tree.push(format!(
                "DBKEY RANGE {}..{} component {}",
                lower.unwrap_or("(-inf"),
                upper.unwrap_or("+inf)"),
                range.component
            ));
        }
        if tree.is_empty() {
            tree.push("NATURAL".to_string());
        }

        Self {
            accepted: true,
            access: Some(access_string(plan)),
            tree,
            selectivity: Some(plan.selectivity),
            cost: Some(plan.total_cost()),
            estimated_rows: Some(plan.estimated_rows()),
            unique: plan.unique,
            enforced: plan.matches.iter().copied().collect(),
            rejection_reason: None,
            rejection_code: None,
        }
    }

    /// Creates an explain plan from a planning error
    pub fn from_error(err: &PlannerError) -> Self {
        Self {
            accepted: false,
            access: None,
            tree: Vec::new(),
            selectivity: None,
            cost: None,
            estimated_rows: None,
            unique: false,
            enforced: Vec::new(),
            rejection_reason: Some(err.to_string()),
            rejection_code: Some(err.code().code().to_string()),
        }
    }
}

/// `NATURAL`, `INDEX (A, B)`, `ORDER X` or `ORDER X INDEX (Y)`
fn access_string(plan: &RetrievalPlan) -> String {
    let names = plan.index_names();
    let filter = if !names.is_empty() {
        Some(format!("INDEX ({})", names.join(", ")))
    } else if plan.inversion.is_some() || !plan.rowid_ranges.is_empty() {
        Some("DBKEY".to_string())
    } else {
        None
    };
    match (&plan.navigation, filter) {
        (Some(nav), Some(filter)) => format!("ORDER {} {}", nav.name, filter),
        (Some(nav), None) => format!("ORDER {}", nav.name),
        (None, Some(filter)) => filter,
        (None, None) => "NATURAL".to_string(),
    }
}

fn render_node(node: &InversionNode, depth: usize, out: &mut Vec<String>) {
    let indent = "  ".repeat(depth);
    match node {
        InversionNode::IndexScan(retrieval) => {
            out.push(format!("{}INDEX {}", indent, describe_retrieval(retrieval)));
        }
        InversionNode::RowIdLookup(values) => {
            out.push(format!("{}DBKEY lookup of {} value(s)", indent, values.len()));
        }
        InversionNode::And(l, r) | InversionNode::Or(l, r) | InversionNode::In(l, r) => {
            out.push(format!("{}{}", indent, node.kind()));
            render_node(l, depth + 1, out);
            render_node(r, depth + 1, out);
        }
        InversionNode::Conditional { condition, inversion } => {
            out.push(format!("{}CONDITIONAL skip when #{}", indent, condition.id()));
            render_node(inversion, depth + 1, out);
        }
    }
}

fn describe_retrieval(retrieval: &IndexRetrieval) -> String {
    let mut text = retrieval.name.clone();
    if retrieval.descending {
        text.push_str(" DESC");
    }
    if retrieval.is_full_scan() {
        text.push_str(" full");
        return text;
    }
    text.push_str(&format!(
        " lower={} upper={}",
        retrieval.lower_count(),
        retrieval.upper_count()
    ));
    if let Some(list) = &retrieval.list {
        text.push_str(&format!(" list[{}]={}", list.segment, list.values.len()));
        if retrieval.root_list_scan {
            text.push_str(" root");
        }
    }
    if retrieval.partial_key {
        text.push_str(" partial");
    }
    text
}

impl fmt::Display for ExplainPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== EXPLAIN PLAN ===")?;

        if self.accepted {
            writeln!(f, "Status: ACCEPTED")?;
            if let Some(access) = &self.access {
                writeln!(f, "Access: {}", access)?;
            }
            if let Some(selectivity) = self.selectivity {
                writeln!(f, "Selectivity: {:.6}", selectivity)?;
            }
            if let Some(rows) = self.estimated_rows {
                writeln!(f, "Estimated Rows: {:.2}", rows)?;
            }
            if let Some(cost) = self.cost {
                writeln!(f, "Cost: {:.2}", cost)?;
            }
            if self.unique {
                writeln!(f, "Unique: yes")?;
            }
            if !self.enforced.is_empty() {
                let ids: Vec<String> = self.enforced.iter().map(|id| format!("#{}", id)).collect();
                writeln!(f, "Enforced: {}", ids.join(", "))?;
            }
            writeln!(f, "Retrieval:")?;
            for line in &self.tree {
                writeln!(f, "  {}", line)?;
            }
        } else {
            writeln!(f, "Status: REJECTED")?;
            if let Some(code) = &self.rejection_code {
                writeln!(f, "Error Code: {}", code)?;
            }
            if let Some(reason) = &self.rejection_reason {
                writeln!(f, "Reason: {}", reason)?;
            }
        }

        Ok(())
    }
}
