//! Gateway configuration.
//!
//! All limits are supplied at construction time; no component reads ambient
//! global configuration. Defaults match a small-project BigQuery budget.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::request::QueryCategory;

/// Price charged per byte scanned, in dollars. $5 per TB.
pub const DEFAULT_PRICE_PER_BYTE: f64 = 5.00 / 1_000_000_000_000.0;

/// Budget thresholds and per-query limits.
///
/// Immutable once handed to the ledger. `validate` enforces the invariants:
/// every limit is positive and the warning level sits below the hard limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostThresholds {
    /// Maximum queries per hour (breach is warning-only).
    pub queries_per_hour_limit: u64,
    /// Maximum queries per day (breach sets the emergency stop).
    pub queries_per_day_limit: u64,
    /// Daily spend limit in dollars.
    pub daily_limit: f64,
    /// Monthly spend limit in dollars.
    pub monthly_limit: f64,
    /// Per-query cost that triggers a warning, in dollars.
    pub query_cost_warning: f64,
    /// Per-query cost that blocks execution, in dollars.
    pub query_cost_limit: f64,
    /// Per-query byte scan limit.
    pub bytes_per_query_limit: u64,
}

impl Default for CostThresholds {
    fn default() -> Self {
        Self {
            queries_per_hour_limit: 100,
            queries_per_day_limit: 1000,
            daily_limit: 5.00,
            monthly_limit: 150.00,
            query_cost_warning: 0.10,
            query_cost_limit: 1.00,
            bytes_per_query_limit: 100_000_000,
        }
    }
}

impl CostThresholds {
    /// Check threshold invariants.
    pub fn validate(&self) -> Result<(), Error> {
        if self.queries_per_hour_limit == 0 {
            return Err(Error::InvalidConfig(
                "queries_per_hour_limit must be positive".into(),
            ));
        }
        if self.queries_per_day_limit == 0 {
            return Err(Error::InvalidConfig(
                "queries_per_day_limit must be positive".into(),
            ));
        }
        if self.daily_limit <= 0.0 {
            return Err(Error::InvalidConfig("daily_limit must be positive".into()));
        }
        if self.monthly_limit <= 0.0 {
            return Err(Error::InvalidConfig(
                "monthly_limit must be positive".into(),
            ));
        }
        if self.query_cost_warning <= 0.0 {
            return Err(Error::InvalidConfig(
                "query_cost_warning must be positive".into(),
            ));
        }
        if self.query_cost_limit <= 0.0 {
            return Err(Error::InvalidConfig(
                "query_cost_limit must be positive".into(),
            ));
        }
        if self.bytes_per_query_limit == 0 {
            return Err(Error::InvalidConfig(
                "bytes_per_query_limit must be positive".into(),
            ));
        }
        if self.query_cost_warning >= self.query_cost_limit {
            return Err(Error::InvalidConfig(format!(
                "query_cost_warning (${:.2}) must be below query_cost_limit (${:.2})",
                self.query_cost_warning, self.query_cost_limit
            )));
        }
        Ok(())
    }
}

/// Category to cache-TTL table.
///
/// Looked up by the coordinator when populating the result cache. Categories
/// absent from the table fall back to `default_ttl`.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    ttls: HashMap<QueryCategory, Duration>,
    default_ttl: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        let mut ttls = HashMap::new();
        ttls.insert(QueryCategory::Interactive, Duration::from_secs(3600));
        ttls.insert(QueryCategory::Report, Duration::from_secs(7200));
        ttls.insert(QueryCategory::RealTime, Duration::from_secs(300));
        ttls.insert(QueryCategory::Historical, Duration::from_secs(86400));
        ttls.insert(QueryCategory::Funnel, Duration::from_secs(1800));
        Self {
            ttls,
            default_ttl: Duration::from_secs(3600),
        }
    }
}

impl TtlPolicy {
    /// Create an empty policy where every category uses `default_ttl`.
    pub fn uniform(default_ttl: Duration) -> Self {
        Self {
            ttls: HashMap::new(),
            default_ttl,
        }
    }

    /// Override the TTL for one category.
    pub fn with_ttl(mut self, category: QueryCategory, ttl: Duration) -> Self {
        self.ttls.insert(category, ttl);
        self
    }

    /// TTL for a category.
    pub fn ttl_for(&self, category: QueryCategory) -> Duration {
        self.ttls.get(&category).copied().unwrap_or(self.default_ttl)
    }

    /// Iterate over the explicit category entries.
    pub fn entries(&self) -> impl Iterator<Item = (QueryCategory, Duration)> + '_ {
        self.ttls.iter().map(|(c, d)| (*c, *d))
    }

    /// The fallback TTL.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds_valid() {
        assert!(CostThresholds::default().validate().is_ok());
    }

    #[test]
    fn test_zero_limit_rejected() {
        let thresholds = CostThresholds {
            daily_limit: 0.0,
            ..Default::default()
        };
        assert!(thresholds.validate().is_err());
    }

    #[test]
    fn test_warning_must_be_below_limit() {
        let thresholds = CostThresholds {
            query_cost_warning: 1.00,
            query_cost_limit: 1.00,
            ..Default::default()
        };
        assert!(thresholds.validate().is_err());
    }

    #[test]
    fn test_ttl_lookup() {
        let policy = TtlPolicy::default();
        assert_eq!(
            policy.ttl_for(QueryCategory::RealTime),
            Duration::from_secs(300)
        );
        assert_eq!(
            policy.ttl_for(QueryCategory::Historical),
            Duration::from_secs(86400)
        );
        // General has no explicit entry
        assert_eq!(
            policy.ttl_for(QueryCategory::General),
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn test_ttl_override() {
        let policy = TtlPolicy::default().with_ttl(QueryCategory::Report, Duration::from_secs(60));
        assert_eq!(
            policy.ttl_for(QueryCategory::Report),
            Duration::from_secs(60)
        );
    }
}
