//! Gateway error types.

use thiserror::Error;

/// Reason a query was rejected by the pre-execution budget check.
///
/// Each variant carries the numbers that triggered it so callers (and alert
/// payloads) can report the specific limit without re-deriving it.
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    /// Estimated cost exceeds the per-query hard limit.
    QueryCostLimit {
        /// Estimated cost in dollars.
        estimated: f64,
        /// Configured per-query hard limit in dollars.
        limit: f64,
    },
    /// Estimated bytes exceed the per-query byte limit.
    QueryByteLimit {
        /// Estimated bytes to scan.
        bytes: u64,
        /// Configured per-query byte limit.
        limit: u64,
    },
    /// Estimated cost would push the day over its budget.
    DailyBudget {
        /// Cost already accrued today in dollars.
        current: f64,
        /// Estimated cost of this query in dollars.
        estimated: f64,
        /// Configured daily limit in dollars.
        limit: f64,
    },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::QueryCostLimit { estimated, limit } => {
                write!(f, "query cost ${estimated:.4} exceeds limit ${limit:.2}")
            }
            RejectReason::QueryByteLimit { bytes, limit } => {
                write!(f, "query size {bytes} bytes exceeds limit {limit} bytes")
            }
            RejectReason::DailyBudget {
                current,
                estimated,
                limit,
            } => {
                write!(
                    f,
                    "query would exceed daily budget (${current:.2} + ${estimated:.2} > ${limit:.2})"
                )
            }
        }
    }
}

/// Gateway errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The warehouse could not produce a byte estimate. The coordinator
    /// treats this conservatively and refuses to run the query.
    #[error("byte estimate unavailable: {0}")]
    Estimation(String),

    /// Pre-execution budget check rejected this query.
    #[error("query rejected: {0}")]
    BudgetRejected(RejectReason),

    /// The ledger-wide emergency stop is set; all queries are blocked
    /// until the daily rollover clears it.
    #[error("emergency stop active: all queries blocked until daily reset")]
    EmergencyStop,

    /// The warehouse executor failed after approval. No usage was recorded.
    #[error("warehouse execution failed: {0}")]
    Execution(String),

    /// Record store error.
    #[error("record store error: {0}")]
    RecordStore(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
