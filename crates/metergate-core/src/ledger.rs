//! Budget ledger.
//!
//! Tracks usage counters across three period clocks (hour, day, month) and
//! gates query execution in two phases: `check_query` blocks known-too-
//! expensive queries before they run, and `record_usage` re-evaluates every
//! limit against the bytes the backend actually billed. The post-check is a
//! safety net against underestimation; a breach there sets the emergency
//! stop, which blocks all further approvals until the daily rollover.
//!
//! Period rollovers are explicit operations driven by an external scheduler.
//! Nothing in the request path reads the wall clock to decide period
//! boundaries, so rollover behavior is fully deterministic in tests.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::alert::{Alert, AlertKind, AlertSeverity, AlertSink};
use crate::config::CostThresholds;
use crate::error::{Error, RejectReason};
use crate::estimator::CostEstimate;

/// Mutable usage state for the current periods.
///
/// Counters are monotonically non-decreasing within a period and reset only
/// by an explicit rollover. The emergency-stop flag, once set, survives
/// every rollover except the daily one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageCounters {
    /// Queries recorded this hour.
    pub hour_queries: u64,
    /// Queries recorded today.
    pub day_queries: u64,
    /// Cost accrued today, in dollars.
    pub day_cost: f64,
    /// Cost accrued this month, in dollars.
    pub month_cost: f64,
    /// Ledger-wide block on all approvals.
    pub emergency_stop: bool,
}

/// Outcome of a successful pre-execution check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approval {
    /// Present when the estimate sits above the per-query warning level.
    pub warning: Option<String>,
}

/// Overall budget health, classified on percentage of budget used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostStatus {
    /// Under 50% of budget.
    Healthy,
    /// 50-80% of budget.
    Warning,
    /// 80-95% of budget.
    Critical,
    /// 95% or more of budget.
    Exceeded,
}

impl CostStatus {
    /// Classify a percentage-used value. Bands are inclusive on their lower
    /// bound: exactly 50% is `Warning`, 80% is `Critical`, 95% is `Exceeded`.
    pub fn classify(percent_used: f64) -> Self {
        if percent_used >= 95.0 {
            CostStatus::Exceeded
        } else if percent_used >= 80.0 {
            CostStatus::Critical
        } else if percent_used >= 50.0 {
            CostStatus::Warning
        } else {
            CostStatus::Healthy
        }
    }
}

/// Hourly usage snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourUsage {
    /// Queries this hour.
    pub queries: u64,
    /// Hourly query-count limit.
    pub query_limit: u64,
}

/// Daily usage snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayUsage {
    /// Queries today.
    pub queries: u64,
    /// Daily query-count limit.
    pub query_limit: u64,
    /// Cost accrued today in dollars.
    pub cost: f64,
    /// Daily cost limit in dollars.
    pub cost_limit: f64,
    /// Percent of the daily cost budget used.
    pub percent_used: f64,
    /// Remaining daily budget in dollars.
    pub remaining: f64,
}

/// Monthly usage snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthUsage {
    /// Cost accrued this month in dollars.
    pub cost: f64,
    /// Monthly cost limit in dollars.
    pub cost_limit: f64,
    /// Percent of the monthly budget used.
    pub percent_used: f64,
    /// Remaining monthly budget in dollars.
    pub remaining: f64,
}

/// Full ledger status report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerStatus {
    /// Overall health, the worse of the daily and monthly percentages.
    pub status: CostStatus,
    /// Whether the emergency stop is set.
    pub emergency_stop: bool,
    /// Current-hour usage.
    pub hour: HourUsage,
    /// Current-day usage.
    pub day: DayUsage,
    /// Current-month usage.
    pub month: MonthUsage,
    /// When this snapshot was taken.
    pub at: DateTime<Utc>,
}

/// The budget state machine.
///
/// Exclusively owns its thresholds and counters. One instance per process,
/// passed explicitly to every caller; all mutation goes through a single
/// mutex so concurrent callers never interleave a read-modify-write.
pub struct CostLedger {
    thresholds: CostThresholds,
    counters: Mutex<UsageCounters>,
    sink: Arc<dyn AlertSink>,
}

impl CostLedger {
    /// Create a ledger. Fails if the thresholds violate their invariants.
    pub fn new(thresholds: CostThresholds, sink: Arc<dyn AlertSink>) -> Result<Self, Error> {
        thresholds.validate()?;
        Ok(Self {
            thresholds,
            counters: Mutex::new(UsageCounters::default()),
            sink,
        })
    }

    /// The configured thresholds.
    pub fn thresholds(&self) -> &CostThresholds {
        &self.thresholds
    }

    /// Pre-execution approval decision.
    ///
    /// Rejection never mutates counters. The rejection reason names the
    /// specific limit so callers can distinguish "this query is too
    /// expensive" from "all queries are blocked".
    pub fn check_query(&self, estimate: &CostEstimate) -> Result<Approval, Error> {
        let counters = self.counters.lock();

        if counters.emergency_stop {
            return Err(Error::EmergencyStop);
        }

        if estimate.cost > self.thresholds.query_cost_limit {
            return Err(Error::BudgetRejected(RejectReason::QueryCostLimit {
                estimated: estimate.cost,
                limit: self.thresholds.query_cost_limit,
            }));
        }

        if estimate.bytes > self.thresholds.bytes_per_query_limit {
            return Err(Error::BudgetRejected(RejectReason::QueryByteLimit {
                bytes: estimate.bytes,
                limit: self.thresholds.bytes_per_query_limit,
            }));
        }

        if counters.day_cost + estimate.cost > self.thresholds.daily_limit {
            return Err(Error::BudgetRejected(RejectReason::DailyBudget {
                current: counters.day_cost,
                estimated: estimate.cost,
                limit: self.thresholds.daily_limit,
            }));
        }

        let warning = (estimate.cost > self.thresholds.query_cost_warning)
            .then(|| format!("high cost query: ${:.4}", estimate.cost));

        Ok(Approval { warning })
    }

    /// Record the true usage of an executed query, then re-evaluate limits.
    ///
    /// Increments are unconditional: the query already ran and was billed.
    /// Breaches found here escalate to the alert sink, and the hard ones set
    /// the emergency stop.
    pub fn record_usage(&self, bytes_processed: u64, cost: f64) {
        let mut alerts = Vec::new();

        {
            let mut counters = self.counters.lock();
            counters.hour_queries += 1;
            counters.day_queries += 1;
            counters.day_cost += cost;
            counters.month_cost += cost;

            debug!(
                bytes_processed,
                cost,
                day_cost = counters.day_cost,
                "usage recorded"
            );

            if counters.hour_queries > self.thresholds.queries_per_hour_limit {
                alerts.push(Alert::new(
                    AlertKind::HourlyQueryLimit,
                    AlertSeverity::Warning,
                    format!(
                        "hourly query limit exceeded: {}/{}",
                        counters.hour_queries, self.thresholds.queries_per_hour_limit
                    ),
                    json!({
                        "queries": counters.hour_queries,
                        "limit": self.thresholds.queries_per_hour_limit,
                    }),
                ));
            }

            if counters.day_queries > self.thresholds.queries_per_day_limit {
                alerts.push(Alert::new(
                    AlertKind::DailyQueryLimit,
                    AlertSeverity::Critical,
                    format!(
                        "daily query limit exceeded: {}/{}",
                        counters.day_queries, self.thresholds.queries_per_day_limit
                    ),
                    json!({
                        "queries": counters.day_queries,
                        "limit": self.thresholds.queries_per_day_limit,
                    }),
                ));
                counters.emergency_stop = true;
            }

            if counters.day_cost > self.thresholds.daily_limit {
                alerts.push(Alert::new(
                    AlertKind::DailyCostLimit,
                    AlertSeverity::Emergency,
                    format!(
                        "daily cost limit exceeded: ${:.2}/${:.2}",
                        counters.day_cost, self.thresholds.daily_limit
                    ),
                    json!({
                        "cost": counters.day_cost,
                        "limit": self.thresholds.daily_limit,
                    }),
                ));
                counters.emergency_stop = true;
            }

            if counters.month_cost > self.thresholds.monthly_limit {
                alerts.push(Alert::new(
                    AlertKind::MonthlyCostLimit,
                    AlertSeverity::Emergency,
                    format!(
                        "monthly cost limit exceeded: ${:.2}/${:.2}",
                        counters.month_cost, self.thresholds.monthly_limit
                    ),
                    json!({
                        "cost": counters.month_cost,
                        "limit": self.thresholds.monthly_limit,
                    }),
                ));
                counters.emergency_stop = true;
            }
        }

        // Deliver outside the counter lock; sinks may log or forward.
        for alert in alerts {
            self.sink.send(alert);
        }
    }

    /// Snapshot current usage against the limits.
    pub fn status(&self) -> LedgerStatus {
        let counters = self.counters.lock().clone();

        let day_percent = counters.day_cost / self.thresholds.daily_limit * 100.0;
        let month_percent = counters.month_cost / self.thresholds.monthly_limit * 100.0;
        let status = CostStatus::classify(day_percent.max(month_percent));

        LedgerStatus {
            status,
            emergency_stop: counters.emergency_stop,
            hour: HourUsage {
                queries: counters.hour_queries,
                query_limit: self.thresholds.queries_per_hour_limit,
            },
            day: DayUsage {
                queries: counters.day_queries,
                query_limit: self.thresholds.queries_per_day_limit,
                cost: counters.day_cost,
                cost_limit: self.thresholds.daily_limit,
                percent_used: day_percent,
                remaining: self.thresholds.daily_limit - counters.day_cost,
            },
            month: MonthUsage {
                cost: counters.month_cost,
                cost_limit: self.thresholds.monthly_limit,
                percent_used: month_percent,
                remaining: self.thresholds.monthly_limit - counters.month_cost,
            },
            at: Utc::now(),
        }
    }

    /// Linear projection of this month's cost over a 30-day month.
    pub fn projected_month_cost(&self, days_elapsed: u32) -> f64 {
        let month_cost = self.counters.lock().month_cost;
        let daily_average = month_cost / f64::from(days_elapsed.max(1));
        daily_average * 30.0
    }

    /// Zero the hourly counters. Driven by the external scheduler.
    pub fn reset_hour(&self) {
        let mut counters = self.counters.lock();
        counters.hour_queries = 0;
        info!("hourly counters reset");
    }

    /// Zero the daily counters and clear the emergency stop.
    pub fn reset_day(&self) {
        let mut counters = self.counters.lock();
        counters.day_queries = 0;
        counters.day_cost = 0.0;
        counters.emergency_stop = false;
        info!("daily counters reset");
    }

    /// Zero the monthly counters.
    pub fn reset_month(&self) {
        let mut counters = self.counters.lock();
        counters.month_cost = 0.0;
        info!("monthly counters reset");
    }

    /// Copy of the raw counters, for diagnostics.
    pub fn counters(&self) -> UsageCounters {
        self.counters.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::MemoryAlertSink;

    fn estimate(bytes: u64, cost: f64) -> CostEstimate {
        CostEstimate {
            bytes,
            cost,
            exceeds_warning: false,
            exceeds_limit: false,
            estimation_error: false,
        }
    }

    fn ledger_with(thresholds: CostThresholds) -> (CostLedger, Arc<MemoryAlertSink>) {
        let sink = Arc::new(MemoryAlertSink::new());
        let ledger = CostLedger::new(thresholds, sink.clone()).unwrap();
        (ledger, sink)
    }

    fn ledger() -> (CostLedger, Arc<MemoryAlertSink>) {
        ledger_with(CostThresholds::default())
    }

    #[test]
    fn test_approves_cheap_query() {
        let (ledger, _) = ledger();
        let approval = ledger.check_query(&estimate(10_000_000, 0.00005)).unwrap();
        assert!(approval.warning.is_none());
    }

    #[test]
    fn test_rejects_cost_over_hard_limit_regardless_of_usage() {
        let (ledger, _) = ledger();
        let err = ledger.check_query(&estimate(1_000, 1.01)).unwrap_err();
        match err {
            Error::BudgetRejected(RejectReason::QueryCostLimit { estimated, limit }) => {
                assert!((estimated - 1.01).abs() < 1e-9);
                assert!((limit - 1.00).abs() < 1e-9);
            }
            other => panic!("expected QueryCostLimit, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_bytes_over_limit() {
        let (ledger, _) = ledger();
        let err = ledger.check_query(&estimate(200_000_000, 0.001)).unwrap_err();
        assert!(matches!(
            err,
            Error::BudgetRejected(RejectReason::QueryByteLimit { .. })
        ));
    }

    #[test]
    fn test_rejects_when_daily_budget_would_be_exceeded() {
        let (ledger, _) = ledger();
        // Seed today's cost to $4.80
        ledger.record_usage(1_000, 4.80);

        let err = ledger.check_query(&estimate(1_000, 0.30)).unwrap_err();
        assert!(matches!(
            err,
            Error::BudgetRejected(RejectReason::DailyBudget { .. })
        ));

        // A cheaper query still fits
        assert!(ledger.check_query(&estimate(1_000, 0.10)).is_ok());
    }

    #[test]
    fn test_rejection_does_not_mutate_counters() {
        let (ledger, _) = ledger();
        let before = ledger.counters();
        let _ = ledger.check_query(&estimate(1_000, 5.0));
        assert_eq!(ledger.counters(), before);
    }

    #[test]
    fn test_warning_attached_above_warning_level() {
        let (ledger, _) = ledger();
        let approval = ledger.check_query(&estimate(50_000_000, 0.15)).unwrap();
        assert!(approval.warning.is_some());
    }

    #[test]
    fn test_day_cost_is_sum_of_increments() {
        let (ledger, _) = ledger();
        let increments = [0.05, 0.10, 0.01, 0.20];
        for cost in increments {
            ledger.record_usage(1_000, cost);
        }
        let counters = ledger.counters();
        let expected: f64 = increments.iter().sum();
        assert!((counters.day_cost - expected).abs() < 1e-9);
        assert!((counters.month_cost - expected).abs() < 1e-9);
        assert_eq!(counters.day_queries, increments.len() as u64);
        assert_eq!(counters.hour_queries, increments.len() as u64);
    }

    #[test]
    fn test_daily_cost_breach_sets_emergency_stop_until_day_reset() {
        let (ledger, sink) = ledger();
        ledger.record_usage(1_000, 5.50);

        assert!(ledger.counters().emergency_stop);
        let alerts = sink.alerts();
        assert!(alerts
            .iter()
            .any(|a| a.kind == AlertKind::DailyCostLimit && a.severity == AlertSeverity::Emergency));

        // Every check now fails, even a free query
        assert!(matches!(
            ledger.check_query(&estimate(0, 0.0)),
            Err(Error::EmergencyStop)
        ));

        // Hour reset does not address the breach
        ledger.reset_hour();
        assert!(ledger.counters().emergency_stop);

        // Day rollover clears it
        ledger.reset_day();
        assert!(!ledger.counters().emergency_stop);
        assert!(ledger.check_query(&estimate(0, 0.0)).is_ok());
    }

    #[test]
    fn test_hourly_breach_warns_without_stop() {
        let thresholds = CostThresholds {
            queries_per_hour_limit: 2,
            ..Default::default()
        };
        let (ledger, sink) = ledger_with(thresholds);
        for _ in 0..3 {
            ledger.record_usage(1_000, 0.0001);
        }
        assert!(!ledger.counters().emergency_stop);
        let alerts = sink.alerts();
        assert!(alerts
            .iter()
            .any(|a| a.kind == AlertKind::HourlyQueryLimit && a.severity == AlertSeverity::Warning));
    }

    #[test]
    fn test_daily_query_count_breach_sets_stop() {
        let thresholds = CostThresholds {
            queries_per_day_limit: 2,
            ..Default::default()
        };
        let (ledger, sink) = ledger_with(thresholds);
        for _ in 0..3 {
            ledger.record_usage(1_000, 0.0001);
        }
        assert!(ledger.counters().emergency_stop);
        assert!(sink
            .alerts()
            .iter()
            .any(|a| a.kind == AlertKind::DailyQueryLimit));
    }

    #[test]
    fn test_monthly_breach_sets_stop() {
        let thresholds = CostThresholds {
            daily_limit: 1000.0,
            monthly_limit: 10.0,
            ..Default::default()
        };
        let (ledger, sink) = ledger_with(thresholds);
        ledger.record_usage(1_000, 11.0);
        assert!(ledger.counters().emergency_stop);
        assert!(sink
            .alerts()
            .iter()
            .any(|a| a.kind == AlertKind::MonthlyCostLimit));
    }

    #[test]
    fn test_status_classification_boundaries() {
        assert_eq!(CostStatus::classify(49.9), CostStatus::Healthy);
        assert_eq!(CostStatus::classify(50.0), CostStatus::Warning);
        assert_eq!(CostStatus::classify(79.9), CostStatus::Warning);
        assert_eq!(CostStatus::classify(80.0), CostStatus::Critical);
        assert_eq!(CostStatus::classify(94.9), CostStatus::Critical);
        assert_eq!(CostStatus::classify(95.0), CostStatus::Exceeded);
    }

    #[test]
    fn test_status_uses_worse_of_day_and_month() {
        let thresholds = CostThresholds {
            daily_limit: 100.0,
            monthly_limit: 10.0,
            ..Default::default()
        };
        let (ledger, _) = ledger_with(thresholds);
        // $9 is 9% of the day but 90% of the month
        ledger.record_usage(1_000, 9.0);
        let status = ledger.status();
        assert_eq!(status.status, CostStatus::Critical);
        assert!((status.day.percent_used - 9.0).abs() < 1e-9);
        assert!((status.month.percent_used - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_status_snapshot_fields() {
        let (ledger, _) = ledger();
        ledger.record_usage(1_000, 1.0);
        let status = ledger.status();
        assert_eq!(status.status, CostStatus::Healthy);
        assert_eq!(status.hour.queries, 1);
        assert_eq!(status.day.queries, 1);
        assert!((status.day.remaining - 4.0).abs() < 1e-9);
        assert!((status.month.remaining - 149.0).abs() < 1e-9);
    }

    #[test]
    fn test_month_survives_day_reset() {
        let (ledger, _) = ledger();
        ledger.record_usage(1_000, 2.0);
        ledger.reset_day();
        let counters = ledger.counters();
        assert_eq!(counters.day_cost, 0.0);
        assert!((counters.month_cost - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_projected_month_cost() {
        let (ledger, _) = ledger();
        ledger.record_usage(1_000, 10.0);
        // $10 over 5 days projects to $60 over 30 days
        assert!((ledger.projected_month_cost(5) - 60.0).abs() < 1e-9);
        // days_elapsed of 0 is treated as 1
        assert!((ledger.projected_month_cost(0) - 300.0).abs() < 1e-9);
    }
}
