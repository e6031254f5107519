//! Query request types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Classification of a query's purpose.
///
/// The category selects the cache TTL and is stored on every cost record so
/// spend can be broken down by workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryCategory {
    /// Dashboard / interactive queries.
    Interactive,
    /// Scheduled report queries.
    Report,
    /// Point-in-time queries over live data.
    RealTime,
    /// Queries over immutable historical ranges.
    Historical,
    /// Funnel analysis queries.
    Funnel,
    /// Anything else.
    General,
}

impl std::fmt::Display for QueryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueryCategory::Interactive => "interactive",
            QueryCategory::Report => "report",
            QueryCategory::RealTime => "realtime",
            QueryCategory::Historical => "historical",
            QueryCategory::Funnel => "funnel",
            QueryCategory::General => "general",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for QueryCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "interactive" | "dashboard" => Ok(QueryCategory::Interactive),
            "report" => Ok(QueryCategory::Report),
            "realtime" | "real-time" => Ok(QueryCategory::RealTime),
            "historical" => Ok(QueryCategory::Historical),
            "funnel" => Ok(QueryCategory::Funnel),
            "general" => Ok(QueryCategory::General),
            other => Err(format!("unknown query category: {other}")),
        }
    }
}

/// A query submitted to the gateway.
///
/// The parameter map distinguishes otherwise-identical query text in the
/// cache key. `BTreeMap` keeps serialization order deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Raw query text.
    pub sql: String,
    /// Query category.
    pub category: QueryCategory,
    /// Optional named parameters.
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

impl QueryRequest {
    /// Create a request with no parameters.
    pub fn new(sql: impl Into<String>, category: QueryCategory) -> Self {
        Self {
            sql: sql.into(),
            category,
            params: BTreeMap::new(),
        }
    }

    /// Attach a named parameter.
    pub fn with_param(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }
}
