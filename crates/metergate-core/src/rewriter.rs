//! Textual query optimization.
//!
//! A fixed, ordered list of rewrite rules applied before execution. Each rule
//! is a self-contained predicate + transform pair and only fires when the
//! pattern it would inject is absent, which makes the whole pass idempotent:
//! `rewrite(rewrite(q))` produces the same text as `rewrite(q)`.
//!
//! This is deliberately string-level. The gateway does not parse the query
//! grammar; it only recognizes the handful of shapes that dominate scan cost
//! on a pay-per-byte backend. Rewriting never turns a read into a write or
//! vice versa: rules only add predicates, caps, or swap one aggregate
//! function for its approximate form.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::request::QueryCategory;

/// Default lookback window injected when a query has no date bound.
pub const DEFAULT_LOOKBACK_DAYS: u32 = 30;

/// Default row cap appended to uncapped plain selections.
pub const DEFAULT_ROW_CAP: u64 = 10_000;

static WHERE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bWHERE\b").unwrap());
static DATE_BOUND_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(DATE|TIMESTAMP)").unwrap());
static SELECT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bSELECT\b").unwrap());
static LIMIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bLIMIT\b").unwrap());
static GROUP_BY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bGROUP\s+BY\b").unwrap());
static SELECT_STAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bSELECT\s+\*").unwrap());
static COUNT_DISTINCT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bCOUNT\s*\(\s*DISTINCT\s+").unwrap());

/// What a rule did to the query.
enum RuleEffect {
    /// Replace the query text.
    Rewrite(String),
    /// Leave the text alone but attach a warning annotation.
    Warn(String),
}

/// A single named optimization rule.
trait RewriteRule: Send + Sync {
    /// Stable rule name, reported in the applied-rules list.
    fn name(&self) -> &'static str;

    /// Whether the rule should fire. Must return false on the rule's own
    /// output so repeated application is a no-op.
    fn check(&self, sql: &str) -> bool;

    /// Apply the rule. Only called when `check` returned true.
    fn apply(&self, sql: &str) -> RuleEffect;
}

/// Inject a default lookback window into filtered queries with no date bound.
///
/// An unbounded full-dataset scan is the single largest cost driver on a
/// metered backend, so any query that filters rows but carries no
/// recognizable date/time predicate gets a 30-day bound prepended to its
/// WHERE clause.
struct MissingDateFilter;

impl RewriteRule for MissingDateFilter {
    fn name(&self) -> &'static str {
        "missing-date-filter"
    }

    fn check(&self, sql: &str) -> bool {
        WHERE_RE.is_match(sql) && !DATE_BOUND_RE.is_match(sql)
    }

    fn apply(&self, sql: &str) -> RuleEffect {
        let clause = format!(
            "WHERE date >= DATE_SUB(CURRENT_DATE(), INTERVAL {DEFAULT_LOOKBACK_DAYS} DAY) AND"
        );
        RuleEffect::Rewrite(WHERE_RE.replace(sql, clause.as_str()).into_owned())
    }
}

/// Append a row cap to plain selections without aggregation.
struct MissingRowCap;

impl RewriteRule for MissingRowCap {
    fn name(&self) -> &'static str {
        "missing-row-cap"
    }

    fn check(&self, sql: &str) -> bool {
        SELECT_RE.is_match(sql) && !LIMIT_RE.is_match(sql) && !GROUP_BY_RE.is_match(sql)
    }

    fn apply(&self, sql: &str) -> RuleEffect {
        RuleEffect::Rewrite(format!("{sql} LIMIT {DEFAULT_ROW_CAP}"))
    }
}

/// Flag `SELECT *`. Column pruning needs schema knowledge the rewriter does
/// not have, so this is a warning annotation only.
struct UnscopedProjection;

impl RewriteRule for UnscopedProjection {
    fn name(&self) -> &'static str {
        "unscoped-projection"
    }

    fn check(&self, sql: &str) -> bool {
        SELECT_STAR_RE.is_match(sql)
    }

    fn apply(&self, _sql: &str) -> RuleEffect {
        RuleEffect::Warn(
            "SELECT * scans every column; specify the columns the report needs".to_string(),
        )
    }
}

/// Replace exact distinct counts with the approximate form.
///
/// `APPROX_COUNT_DISTINCT` costs materially less on the target backend at a
/// documented ~1-2% error bound, which is acceptable for trend reporting.
struct ApproxDistinct;

impl RewriteRule for ApproxDistinct {
    fn name(&self) -> &'static str {
        "approx-distinct"
    }

    fn check(&self, sql: &str) -> bool {
        COUNT_DISTINCT_RE.is_match(sql)
    }

    fn apply(&self, sql: &str) -> RuleEffect {
        RuleEffect::Rewrite(
            COUNT_DISTINCT_RE
                .replace_all(sql, "APPROX_COUNT_DISTINCT(")
                .into_owned(),
        )
    }
}

/// Result of one rewrite pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOutcome {
    /// Rewritten query text.
    pub sql: String,
    /// Names of the rules that fired, in application order.
    pub applied: Vec<&'static str>,
    /// Warning annotations (no text change).
    pub warnings: Vec<String>,
}

/// Heuristic scan-cost reduction attributed to a rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavingsEstimate {
    /// Estimated percent reduction in bytes scanned, capped at 95.
    pub reduction_percent: u32,
    /// Human-readable contributing factors.
    pub factors: Vec<String>,
}

/// Applies the fixed rule list to queries before execution.
pub struct QueryRewriter {
    rules: Vec<Box<dyn RewriteRule>>,
}

impl Default for QueryRewriter {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryRewriter {
    /// Create a rewriter with the standard rule order.
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(MissingDateFilter),
                Box::new(MissingRowCap),
                Box::new(UnscopedProjection),
                Box::new(ApproxDistinct),
            ],
        }
    }

    /// Rewrite a query, returning the new text plus the rules that fired.
    pub fn rewrite(&self, sql: &str, category: QueryCategory) -> RewriteOutcome {
        let mut outcome = RewriteOutcome {
            sql: sql.to_string(),
            applied: Vec::new(),
            warnings: Vec::new(),
        };

        for rule in &self.rules {
            if !rule.check(&outcome.sql) {
                continue;
            }
            match rule.apply(&outcome.sql) {
                RuleEffect::Rewrite(sql) => {
                    outcome.sql = sql;
                    outcome.applied.push(rule.name());
                }
                RuleEffect::Warn(message) => {
                    outcome.applied.push(rule.name());
                    outcome.warnings.push(message);
                }
            }
        }

        if !outcome.applied.is_empty() {
            debug!(
                category = %category,
                rules = ?outcome.applied,
                "query rewritten"
            );
        }

        outcome
    }

    /// Estimate the scan-cost reduction from a rewrite.
    ///
    /// Pure heuristic for reporting; the true saving is only known from the
    /// backend's billed bytes.
    pub fn estimated_savings(&self, original: &str, rewritten: &str) -> SavingsEstimate {
        let mut reduction: u32 = 0;
        let mut factors = Vec::new();

        if rewritten.contains("DATE_SUB") && !original.contains("DATE_SUB") {
            reduction += 90;
            factors.push("date partition bound: -90%".to_string());
        }
        if rewritten.contains("APPROX_") && !original.contains("APPROX_") {
            reduction += 20;
            factors.push("approximate aggregation: -20%".to_string());
        }
        if LIMIT_RE.is_match(rewritten) && !LIMIT_RE.is_match(original) {
            reduction += 10;
            factors.push("row cap: -10%".to_string());
        }

        SavingsEstimate {
            reduction_percent: reduction.min(95),
            factors,
        }
    }
}
