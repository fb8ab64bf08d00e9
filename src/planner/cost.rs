//! Cost model
//!
//! Pure functions converting selectivity, cardinality and key length into
//! abstract page-access units. A natural scan of `N` rows costs `N`; an index
//! contributes one descent plus the leaf pages its selectivity covers, and
//! each fetched row costs one unit on top.

use super::catalog::IndexSegment;
use super::config::PlannerConfig;
use super::scratch::ScanType;

/// Cost estimator over a planner configuration
#[derive(Debug, Clone, Copy)]
pub struct CostModel<'a> {
    config: &'a PlannerConfig,
}

impl<'a> CostModel<'a> {
    pub fn new(config: &'a PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &'a PlannerConfig {
        self.config
    }

    /// Raises a cardinality estimate to the statistical floor
    pub fn clamp_cardinality(&self, cardinality: f64) -> f64 {
        cardinality.max(self.config.minimum_cardinality)
    }

    /// Keeps a selectivity within `[minimum_selectivity, 1]`
    pub fn clamp_selectivity(&self, selectivity: f64) -> f64 {
        selectivity.clamp(self.config.minimum_selectivity, 1.0)
    }

    /// Returns true if the cardinality sits on the statistical floor
    pub fn at_floor(&self, cardinality: f64) -> bool {
        cardinality <= self.config.minimum_cardinality
    }

    /// Returns true if the stream counts as a small table
    pub fn is_small_table(&self, cardinality: f64) -> bool {
        cardinality <= self.config.threshold_cardinality
    }

    /// Stored prefix selectivity of a segment, or a type-scaled default
    pub fn segment_selectivity(&self, segment: &IndexSegment) -> f64 {
        if segment.selectivity > 0.0 {
            return self.clamp_selectivity(segment.selectivity);
        }
        if segment.ty.is_boolean() {
            self.config.boolean_selectivity
        } else {
            self.config.default_selectivity
        }
    }

    /// Factor applied to the compound selectivity for a trailing partial match
    pub fn reduce_factor(&self, scan: ScanType) -> f64 {
        match scan {
            ScanType::Between => self.config.reduce_factor_between,
            ScanType::Starting => self.config.reduce_factor_starting,
            ScanType::Less => self.config.reduce_factor_less,
            ScanType::Greater => self.config.reduce_factor_greater,
            _ => 1.0,
        }
    }

    /// Estimated leaf pages of an index over `cardinality` rows
    pub fn index_pages(&self, cardinality: f64, avg_key_length: u32) -> f64 {
        let bytes = cardinality * f64::from(avg_key_length);
        (bytes / f64::from(self.config.page_size)).ceil().max(1.0)
    }

    /// One descent plus the selected share of the leaf level
    pub fn index_scan_cost(&self, selectivity: f64, pages: f64) -> f64 {
        self.config.default_index_cost + selectivity * pages
    }

    /// Cost of a guaranteed single-row lookup through `indexes` indexes
    pub fn unique_lookup_cost(&self, indexes: usize) -> f64 {
        self.config.default_index_cost * indexes as f64 + 1.0
    }

    /// One descent per list value plus the covered leaf pages
    pub fn list_probe_cost(&self, values: usize, selectivity: f64, pages: f64) -> f64 {
        self.config.default_index_cost * values as f64 + selectivity * pages
    }

    /// Natural (full) scan of the stream
    pub fn natural_scan_cost(&self, cardinality: f64) -> f64 {
        cardinality
    }

    /// Index cost plus one fetch per selected row
    pub fn total_cost(&self, cost: f64, selectivity: f64, cardinality: f64) -> f64 {
        cost + selectivity * cardinality
    }

    /// Selectivity of `A OR B` for independent branches
    pub fn or_selectivity(&self, s1: f64, s2: f64) -> f64 {
        s1 + s2 - s1 * s2
    }

    /// Materialise-and-sort cost for `rows` rows
    pub fn sort_cost(&self, rows: f64) -> f64 {
        let rows = rows.max(1.0);
        2.0 * rows * self.config.cost_factor_memcopy
            + rows * rows.log2() * self.config.cost_factor_quicksort
    }

    /// Ordered walk of the navigation index fetching every selected row
    pub fn navigation_cost(&self, filtering_cost: f64, selectivity: f64, cardinality: f64) -> f64 {
        filtering_cost + cardinality * selectivity
    }

    /// Cost to the first row of an ordered walk: one descent, then rows are
    /// visited until one passes a filter of selectivity `selectivity`.
    pub fn first_row_navigation_cost(&self, selectivity: f64, cardinality: f64) -> f64 {
        let visited = (1.0 / self.clamp_selectivity(selectivity)).min(cardinality);
        self.config.default_index_cost + visited
    }

    /// Returns true if two total costs fall within the configured tolerance
    pub fn similar_cost(&self, a: f64, b: f64) -> bool {
        if a == 0.0 && b == 0.0 {
            return true;
        }
        if b == 0.0 {
            return false;
        }
        let ratio = a / b;
        ratio >= 1.0 - self.config.cost_tolerance && ratio <= 1.0 + self.config.cost_tolerance
    }
}
