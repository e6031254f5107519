//! Pre-execution cost estimation.
//!
//! Turns the warehouse's dry-run byte count into a monetary estimate using a
//! fixed price-per-byte. Pure; all state is configuration captured at
//! construction.

use crate::config::{CostThresholds, DEFAULT_PRICE_PER_BYTE};

/// Monetary estimate for a query before it runs.
#[derive(Debug, Clone, PartialEq)]
pub struct CostEstimate {
    /// Bytes the backend would scan.
    pub bytes: u64,
    /// Estimated cost in dollars.
    pub cost: f64,
    /// Estimated cost is above the per-query warning level.
    pub exceeds_warning: bool,
    /// Estimated cost is above the per-query hard limit.
    pub exceeds_limit: bool,
    /// The byte input was invalid (negative). The estimate is zero-cost but
    /// must not be treated as free by callers.
    pub estimation_error: bool,
}

/// Converts byte estimates into cost estimates.
#[derive(Debug, Clone)]
pub struct CostEstimator {
    price_per_byte: f64,
    warning_level: f64,
    hard_limit: f64,
}

impl CostEstimator {
    /// Create an estimator with an explicit price-per-byte.
    pub fn new(price_per_byte: f64, thresholds: &CostThresholds) -> Self {
        Self {
            price_per_byte,
            warning_level: thresholds.query_cost_warning,
            hard_limit: thresholds.query_cost_limit,
        }
    }

    /// Create an estimator with the default $5/TB price.
    pub fn with_default_pricing(thresholds: &CostThresholds) -> Self {
        Self::new(DEFAULT_PRICE_PER_BYTE, thresholds)
    }

    /// Cost of `bytes` already billed by the backend. Used after execution,
    /// when the true billed byte count is known.
    pub fn billed_cost(&self, bytes: u64) -> f64 {
        bytes as f64 * self.price_per_byte
    }

    /// Estimate the cost of scanning `bytes`.
    ///
    /// Negative input yields a zero-cost estimate with `estimation_error`
    /// set, so a broken dry run can never be mistaken for a free query.
    pub fn estimate(&self, bytes: i64) -> CostEstimate {
        if bytes < 0 {
            return CostEstimate {
                bytes: 0,
                cost: 0.0,
                exceeds_warning: false,
                exceeds_limit: false,
                estimation_error: true,
            };
        }

        let bytes = bytes as u64;
        let cost = bytes as f64 * self.price_per_byte;
        CostEstimate {
            bytes,
            cost,
            exceeds_warning: cost > self.warning_level,
            exceeds_limit: cost > self.hard_limit,
            estimation_error: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> CostEstimator {
        CostEstimator::with_default_pricing(&CostThresholds::default())
    }

    #[test]
    fn test_small_query_is_cheap() {
        // 10 MB at $5/TB = $0.00005
        let estimate = estimator().estimate(10_000_000);
        assert_eq!(estimate.bytes, 10_000_000);
        assert!((estimate.cost - 0.00005).abs() < 1e-9);
        assert!(!estimate.exceeds_warning);
        assert!(!estimate.exceeds_limit);
        assert!(!estimate.estimation_error);
    }

    #[test]
    fn test_warning_flag() {
        // 30 GB at $5/TB = $0.15, above the $0.10 warning level
        let estimate = estimator().estimate(30_000_000_000);
        assert!(estimate.exceeds_warning);
        assert!(!estimate.exceeds_limit);
    }

    #[test]
    fn test_hard_limit_flag() {
        // 500 GB at $5/TB = $2.50, above the $1.00 hard limit
        let estimate = estimator().estimate(500_000_000_000);
        assert!(estimate.exceeds_warning);
        assert!(estimate.exceeds_limit);
    }

    #[test]
    fn test_negative_bytes_flagged_not_free() {
        let estimate = estimator().estimate(-1);
        assert!(estimate.estimation_error);
        assert_eq!(estimate.cost, 0.0);
        assert_eq!(estimate.bytes, 0);
    }

    #[test]
    fn test_zero_bytes_is_valid() {
        let estimate = estimator().estimate(0);
        assert!(!estimate.estimation_error);
        assert_eq!(estimate.cost, 0.0);
    }
}
