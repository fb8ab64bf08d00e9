//! Planner configuration
//!
//! Every numeric constant of the cost model lives here. None of them are part
//! of the planning algorithm's contract; they only shift where thresholds fall.

use serde::{Deserialize, Serialize};

use super::errors::{PlannerError, PlannerResult};

/// Tunable constants for the retrieval planner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Cost of a single index descent (root to leaf)
    #[serde(default = "default_index_cost")]
    pub default_index_cost: f64,

    /// Segment selectivity used when the catalog has no statistics
    #[serde(default = "default_selectivity")]
    pub default_selectivity: f64,

    /// Absent-statistics selectivity for boolean segments (two values)
    #[serde(default = "default_boolean_selectivity")]
    pub boolean_selectivity: f64,

    /// Lower clamp for any estimated selectivity
    #[serde(default = "default_minimum_selectivity")]
    pub minimum_selectivity: f64,

    /// Cardinality floor; estimates below it are raised to it
    #[serde(default = "default_minimum_cardinality")]
    pub minimum_cardinality: f64,

    /// Streams at or below this cardinality are planned as small tables
    #[serde(default = "default_threshold_cardinality")]
    pub threshold_cardinality: f64,

    /// Reduction factor for a trailing BETWEEN segment
    #[serde(default = "default_reduce_between")]
    pub reduce_factor_between: f64,

    /// Reduction factor for a trailing STARTING WITH segment
    #[serde(default = "default_reduce_starting")]
    pub reduce_factor_starting: f64,

    /// Reduction factor for a trailing `<` / `<=` segment
    #[serde(default = "default_reduce_open")]
    pub reduce_factor_less: f64,

    /// Reduction factor for a trailing `>` / `>=` segment
    #[serde(default = "default_reduce_open")]
    pub reduce_factor_greater: f64,

    /// Index page size in bytes
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Per-entry bytes stored next to each key (record number, prefix header)
    #[serde(default = "default_key_overhead")]
    pub key_overhead: u32,

    /// Cost factor for copying a row into and out of the sort buffer
    #[serde(default = "default_memcopy")]
    pub cost_factor_memcopy: f64,

    /// Cost factor for one quicksort comparison
    #[serde(default = "default_quicksort")]
    pub cost_factor_quicksort: f64,

    /// Relative band inside which two candidates' total costs count as equal
    #[serde(default = "default_cost_tolerance")]
    pub cost_tolerance: f64,
}

fn default_index_cost() -> f64 {
    3.0
}

fn default_selectivity() -> f64 {
    0.1
}

fn default_boolean_selectivity() -> f64 {
    0.5
}

fn default_minimum_selectivity() -> f64 {
    1e-9
}

fn default_minimum_cardinality() -> f64 {
    1.0
}

fn default_threshold_cardinality() -> f64 {
    5.0
}

fn default_reduce_between() -> f64 {
    0.0025
}

fn default_reduce_starting() -> f64 {
    0.01
}

fn default_reduce_open() -> f64 {
    0.05
}

fn default_page_size() -> u32 {
    8192
}

fn default_key_overhead() -> u32 {
    6
}

fn default_memcopy() -> f64 {
    0.05
}

fn default_quicksort() -> f64 {
    0.02
}

fn default_cost_tolerance() -> f64 {
    0.02
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            default_index_cost: default_index_cost(),
            default_selectivity: default_selectivity(),
            boolean_selectivity: default_boolean_selectivity(),
            minimum_selectivity: default_minimum_selectivity(),
            minimum_cardinality: default_minimum_cardinality(),
            threshold_cardinality: default_threshold_cardinality(),
            reduce_factor_between: default_reduce_between(),
            reduce_factor_starting: default_reduce_starting(),
            reduce_factor_less: default_reduce_open(),
            reduce_factor_greater: default_reduce_open(),
            page_size: default_page_size(),
            key_overhead: default_key_overhead(),
            cost_factor_memcopy: default_memcopy(),
            cost_factor_quicksort: default_quicksort(),
            cost_tolerance: default_cost_tolerance(),
        }
    }
}

impl PlannerConfig {
    /// Parses a configuration from JSON; absent fields take their defaults.
    pub fn from_json_str(json: &str) -> PlannerResult<Self> {
        let config: PlannerConfig = serde_json::from_str(json)
            .map_err(|e| PlannerError::invalid_config("<document>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> PlannerResult<()> {
        let positive = [
            ("default_index_cost", self.default_index_cost),
            ("default_selectivity", self.default_selectivity),
            ("boolean_selectivity", self.boolean_selectivity),
            ("minimum_selectivity", self.minimum_selectivity),
            ("minimum_cardinality", self.minimum_cardinality),
            ("threshold_cardinality", self.threshold_cardinality),
            ("reduce_factor_between", self.reduce_factor_between),
            ("reduce_factor_starting", self.reduce_factor_starting),
            ("reduce_factor_less", self.reduce_factor_less),
            ("reduce_factor_greater", self.reduce_factor_greater),
            ("cost_factor_memcopy", self.cost_factor_memcopy),
            ("cost_factor_quicksort", self.cost_factor_quicksort),
        ];
        for (field, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(PlannerError::invalid_config(
                    field,
                    format!("must be finite and positive (got {})", value),
                ));
            }
        }

        let fractions = [
            ("default_selectivity", self.default_selectivity),
            ("boolean_selectivity", self.boolean_selectivity),
            ("minimum_selectivity", self.minimum_selectivity),
            ("reduce_factor_between", self.reduce_factor_between),
            ("reduce_factor_starting", self.reduce_factor_starting),
            ("reduce_factor_less", self.reduce_factor_less),
            ("reduce_factor_greater", self.reduce_factor_greater),
        ];
        for (field, value) in fractions {
            if value > 1.0 {
                return Err(PlannerError::invalid_config(
                    field,
                    format!("must not exceed 1.0 (got {})", value),
                ));
            }
        }

        if !(0.0..1.0).contains(&self.cost_tolerance) {
            return Err(PlannerError::invalid_config(
                "cost_tolerance",
                format!("must be within [0, 1) (got {})", self.cost_tolerance),
            ));
        }

        if self.page_size < 512 {
            return Err(PlannerError::invalid_config(
                "page_size",
                format!("must be at least 512 bytes (got {})", self.page_size),
            ));
        }

        if self.threshold_cardinality < self.minimum_cardinality {
            return Err(PlannerError::invalid_config(
                "threshold_cardinality",
                "must not be below minimum_cardinality",
            ));
        }

        Ok(())
    }
}
